// Library exports for TechVerse Connect
// This allows integration tests and the binary to share modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod mail;
pub mod membership;
pub mod routes;
pub mod state;
pub mod validation;

pub use routes::app;
