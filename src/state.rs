use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::token::TokenKeys;
use crate::config::Config;
use crate::mail::SharedMailer;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub tokens: Arc<TokenKeys>,
    pub mailer: Option<SharedMailer>,
}

impl AppState {
    pub fn new(db: DbPool, config: Config, mailer: Option<SharedMailer>) -> Self {
        let ttl_days = config.auth.token_ttl_days;
        let tokens = match config.auth.jwt_secret.as_deref() {
            Some(secret) => TokenKeys::new(secret.as_bytes(), ttl_days),
            None => {
                tracing::warn!(
                    "No JWT secret configured; using a random secret, tokens will not survive a restart"
                );
                TokenKeys::ephemeral(ttl_days)
            }
        };

        Self {
            db,
            config,
            tokens: Arc::new(tokens),
            mailer,
        }
    }
}
