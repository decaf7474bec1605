// Domain types for reference-set toggles - pure, no side effects
use serde::Serialize;

/// A container that owns a set of user references plus a stored count of
/// that set: post likers or community members.
pub trait Container {
    /// Table holding the container rows.
    const TABLE: &'static str;
    /// Join table holding one row per (container, user) reference.
    const SET_TABLE: &'static str;
    /// Column in `SET_TABLE` pointing at the container.
    const KEY: &'static str;
    /// Denormalized counter column on `TABLE`.
    const COUNTER: &'static str;
    /// Message used when the container does not exist.
    const NOT_FOUND: &'static str;
}

pub struct PostLikes;

impl Container for PostLikes {
    const TABLE: &'static str = "posts";
    const SET_TABLE: &'static str = "post_likes";
    const KEY: &'static str = "post_id";
    const COUNTER: &'static str = "likes_count";
    const NOT_FOUND: &'static str = "Post not found";
}

pub struct CommunityMembers;

impl Container for CommunityMembers {
    const TABLE: &'static str = "communities";
    const SET_TABLE: &'static str = "community_members";
    const KEY: &'static str = "community_id";
    const COUNTER: &'static str = "members_count";
    const NOT_FOUND: &'static str = "Community not found";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Add,
    Remove,
}

impl ToggleAction {
    /// Remove-if-present, add-if-absent.
    pub fn for_membership(is_member: bool) -> Self {
        if is_member {
            ToggleAction::Remove
        } else {
            ToggleAction::Add
        }
    }
}

/// Result of a toggle: whether the actor is now in the set, and the
/// recomputed size of the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    pub active: bool,
    pub count: i64,
}

impl ToggleOutcome {
    pub fn new(action: ToggleAction, count: i64) -> Self {
        Self {
            active: action == ToggleAction::Add,
            count,
        }
    }
}
