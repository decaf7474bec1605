pub mod domain;
pub mod repository;

pub use domain::{CommunityMembers, Container, PostLikes, ToggleAction, ToggleOutcome};
pub use repository::{
    insert_reference, toggle, MembershipError, MembershipRepository, SqliteMembershipRepository,
};
