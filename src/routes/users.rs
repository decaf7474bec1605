use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::handlers::UserResponse;
use crate::db::models::{Role, User};
use crate::db::NOW;
use crate::error::{AppError, AppResult};
use crate::extractors::{ApiJson, CurrentUser};
use crate::state::AppState;
use crate::validation;

/// The only profile fields a user may change. Anything else in the body
/// (`password`, `email`, `role`, ...) is dropped during deserialization.
#[derive(Debug, Deserialize, Validate, Default)]
pub struct ProfileUpdate {
    #[serde(default, alias = "displayName", deserialize_with = "validation::trimmed_opt")]
    #[validate(length(max = 50, message = "Display name must be 50 characters or less"))]
    pub display_name: Option<String>,
    #[validate(length(max = 500, message = "Bio must be less than 500 characters"))]
    pub bio: Option<String>,
    #[serde(alias = "avatarUrl")]
    #[validate(url(message = "Invalid avatar URL"))]
    pub avatar_url: Option<String>,
    #[serde(alias = "websiteUrl")]
    #[validate(url(message = "Invalid website URL"))]
    pub website_url: Option<String>,
    #[validate(length(max = 100, message = "Location must be less than 100 characters"))]
    pub location: Option<String>,
    #[serde(alias = "twitterHandle")]
    #[validate(length(max = 50, message = "Twitter handle must be 50 characters or less"))]
    pub twitter_handle: Option<String>,
    #[serde(alias = "githubHandle")]
    #[validate(length(max = 50, message = "GitHub handle must be 50 characters or less"))]
    pub github_handle: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub message: String,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct RoleEntry {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct RolesResponse {
    pub roles: Vec<RoleEntry>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/user/communities", get(my_communities))
        .route("/api/user/profile", get(get_profile).put(update_profile))
        .route("/api/user/roles", get(my_roles))
}

/// Ids of the communities the caller belongs to, oldest membership first.
async fn my_communities(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<String>>> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare(
        "SELECT community_id FROM community_members WHERE user_id = ?1 ORDER BY joined_at, rowid",
    )?;
    let ids = stmt
        .query_map(params![user.id()], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(Json(ids))
}

async fn get_profile(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse { user })
}

async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> AppResult<Json<ProfileResponse>> {
    update.validate()?;

    let conn = state.db.get()?;
    conn.execute(
        &format!(
            "UPDATE users SET
                display_name = COALESCE(?1, display_name),
                bio = COALESCE(?2, bio),
                avatar_url = COALESCE(?3, avatar_url),
                website_url = COALESCE(?4, website_url),
                location = COALESCE(?5, location),
                twitter_handle = COALESCE(?6, twitter_handle),
                github_handle = COALESCE(?7, github_handle),
                updated_at = {}
             WHERE id = ?8",
            NOW
        ),
        params![
            update.display_name,
            update.bio,
            update.avatar_url,
            update.website_url,
            update.location,
            update.twitter_handle,
            update.github_handle,
            user.id()
        ],
    )?;

    let user = User::find(&conn, user.id())?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    tracing::info!(user_id = %user.id, "Profile updated");

    Ok(Json(ProfileResponse {
        message: "Profile updated successfully".into(),
        user,
    }))
}

async fn my_roles(CurrentUser(user): CurrentUser) -> Json<RolesResponse> {
    Json(RolesResponse {
        roles: vec![RoleEntry {
            user_id: user.id,
            role: user.role,
        }],
    })
}
