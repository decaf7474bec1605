use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db;
use crate::db::models::{Community, CreatorSummary};
use crate::error::{AppError, AppResult};
use crate::extractors::{ApiJson, CurrentUser, MaybeUser};
use crate::membership::{
    insert_reference, CommunityMembers, MembershipRepository, SqliteMembershipRepository,
};
use crate::state::AppState;
use crate::validation;

const DUPLICATE_MESSAGE: &str = "Community with this name or slug already exists";

#[derive(Deserialize, Validate)]
pub struct CreateCommunityRequest {
    #[serde(deserialize_with = "validation::trimmed")]
    #[validate(length(min = 1, max = 50, message = "Community name must be between 1 and 50 characters"))]
    pub name: String,
    #[serde(deserialize_with = "validation::trimmed")]
    #[validate(length(min = 1, max = 500, message = "Description must be between 1 and 500 characters"))]
    pub description: String,
    #[validate(length(max = 50, message = "Slug must be 50 characters or less"))]
    pub slug: Option<String>,
    #[serde(alias = "avatarUrl")]
    pub avatar_url: Option<String>,
    #[serde(alias = "bannerUrl")]
    pub banner_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub joined: bool,
    pub members_count: i64,
    pub message: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/communities",
            get(list_communities).post(create_community),
        )
        .route("/api/communities/{id}", get(get_community))
        .route("/api/communities/{id}/join", post(toggle_join))
}

async fn list_communities(
    State(state): State<AppState>,
    viewer: MaybeUser,
) -> AppResult<Json<Vec<Community>>> {
    let conn = state.db.get()?;
    Ok(Json(query_communities(&conn, viewer.id())?))
}

async fn create_community(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<CreateCommunityRequest>,
) -> AppResult<Response> {
    req.validate()?;
    let CreateCommunityRequest {
        name,
        description,
        slug,
        avatar_url,
        banner_url,
    } = req;
    let slug = validation::slugify(validation::non_blank(slug.as_deref()).unwrap_or(&name));

    let community_id = uuid::Uuid::now_v7().to_string();
    let mut conn = state.db.get()?;

    let taken: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM communities WHERE name = ?1 OR slug = ?2",
        params![name, slug],
        |r| r.get(0),
    )?;
    if taken {
        return Err(AppError::Conflict(DUPLICATE_MESSAGE.into()));
    }

    // Community row and the creator's membership land together or not at all.
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO communities (id, name, slug, description, avatar_url, banner_url, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            community_id,
            name,
            slug,
            description,
            avatar_url,
            banner_url,
            user.id()
        ],
    )
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            AppError::Conflict(DUPLICATE_MESSAGE.into())
        } else {
            AppError::Database(e)
        }
    })?;
    insert_reference::<CommunityMembers>(&tx, &community_id, user.id())?;
    tx.commit()?;

    let community = find_community(&conn, Some(user.id()), &community_id)?
        .ok_or_else(|| AppError::Internal("Community vanished after insert".into()))?;
    tracing::info!(community_id = %community.id, slug = %community.slug, "Community created");

    Ok((StatusCode::CREATED, Json(community)).into_response())
}

async fn get_community(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Json<Community>> {
    let conn = state.db.get()?;
    let community = find_community(&conn, viewer.id(), &id)?
        .ok_or_else(|| AppError::NotFound("Community not found".into()))?;
    Ok(Json(community))
}

async fn toggle_join(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(community_id): Path<String>,
) -> AppResult<Json<JoinResponse>> {
    let repo = SqliteMembershipRepository::new(state.db.clone());
    let outcome = repo.toggle_membership(&community_id, user.id()).await?;

    Ok(Json(JoinResponse {
        joined: outcome.active,
        members_count: outcome.count,
        message: if outcome.active {
            "Joined community".into()
        } else {
            "Left community".into()
        },
    }))
}

// Counts come from the membership and post tables, not the cached column.
const COMMUNITY_SELECT: &str = "
    SELECT c.id, c.name, c.slug, c.description, c.avatar_url, c.banner_url,
           u.id, u.username, u.display_name,
           (SELECT COUNT(*) FROM community_members m WHERE m.community_id = c.id),
           (SELECT COUNT(*) FROM posts p WHERE p.community_id = c.id),
           EXISTS(SELECT 1 FROM community_members m WHERE m.community_id = c.id AND m.user_id = ?1),
           c.created_at, c.updated_at
    FROM communities c
    JOIN users u ON u.id = c.created_by";

fn community_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Community> {
    Ok(Community {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        avatar_url: row.get(4)?,
        banner_url: row.get(5)?,
        creator: CreatorSummary {
            id: row.get(6)?,
            username: row.get(7)?,
            display_name: row.get(8)?,
        },
        member_count: row.get(9)?,
        post_count: row.get(10)?,
        joined: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

pub fn query_communities(
    conn: &rusqlite::Connection,
    viewer_id: Option<&str>,
) -> AppResult<Vec<Community>> {
    let mut stmt = conn.prepare(&format!(
        "{} ORDER BY c.created_at DESC, c.rowid DESC",
        COMMUNITY_SELECT
    ))?;
    let communities = stmt
        .query_map(params![viewer_id.unwrap_or("")], community_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(communities)
}

pub fn find_community(
    conn: &rusqlite::Connection,
    viewer_id: Option<&str>,
    community_id: &str,
) -> AppResult<Option<Community>> {
    let community = conn
        .query_row(
            &format!("{} WHERE c.id = ?2", COMMUNITY_SELECT),
            params![viewer_id.unwrap_or(""), community_id],
            community_from_row,
        )
        .optional()?;
    Ok(community)
}
