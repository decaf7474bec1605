use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::models::{AuthorSummary, Category, CommunitySummary, Post};
use crate::db::NOW;
use crate::error::{AppError, AppResult};
use crate::extractors::{ApiJson, CurrentUser, MaybeUser};
use crate::membership::{MembershipRepository, SqliteMembershipRepository};
use crate::routes::MessageResponse;
use crate::state::AppState;
use crate::validation;

// --- Requests / responses ---

#[derive(Deserialize)]
pub struct PostFilter {
    pub category: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct CreatePostRequest {
    #[serde(deserialize_with = "validation::trimmed")]
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,
    #[serde(deserialize_with = "validation::trimmed")]
    #[validate(length(min = 1, max = 5000, message = "Content must be between 1 and 5000 characters"))]
    pub content: String,
    #[serde(default)]
    pub category: Category,
    #[validate(length(max = 500, message = "Excerpt must be 500 characters or less"))]
    pub excerpt: Option<String>,
    #[serde(alias = "communityId")]
    pub community_id: Option<String>,
    #[serde(alias = "featuredImageUrl")]
    pub featured_image_url: Option<String>,
}

/// Fields an author may change. Author and community are fixed at creation.
#[derive(Deserialize, Validate, Default)]
pub struct UpdatePostRequest {
    #[serde(default, deserialize_with = "validation::trimmed_opt")]
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "validation::trimmed_opt")]
    #[validate(length(min = 1, max = 5000, message = "Content must be between 1 and 5000 characters"))]
    pub content: Option<String>,
    #[validate(length(max = 500, message = "Excerpt must be 500 characters or less"))]
    pub excerpt: Option<String>,
    pub category: Option<Category>,
    #[serde(alias = "featuredImageUrl")]
    pub featured_image_url: Option<String>,
    #[serde(alias = "isPublished")]
    pub is_published: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub liked: bool,
    pub likes_count: i64,
    pub message: String,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts", get(list_posts).post(create_post))
        .route(
            "/api/posts/{id}",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/api/posts/{id}/like", post(toggle_like))
}

// --- Handlers ---

async fn list_posts(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Query(filter): Query<PostFilter>,
) -> AppResult<Json<Vec<Post>>> {
    let category = match filter.category.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<Category>().map_err(AppError::Validation)?),
    };

    let conn = state.db.get()?;
    let posts = query_posts(
        &conn,
        viewer.id(),
        category,
        state.config.feed.post_limit,
    )?;
    Ok(Json(posts))
}

async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<CreatePostRequest>,
) -> AppResult<Response> {
    req.validate()?;
    let CreatePostRequest {
        title,
        content,
        category,
        excerpt,
        community_id,
        featured_image_url,
    } = req;
    let excerpt = validation::non_blank(excerpt.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| validation::excerpt(&content));
    let community_id = validation::non_blank(community_id.as_deref());

    let post_id = uuid::Uuid::now_v7().to_string();
    let conn = state.db.get()?;

    if let Some(community_id) = community_id {
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM communities WHERE id = ?1",
            params![community_id],
            |r| r.get(0),
        )?;
        if !exists {
            return Err(AppError::NotFound("Community not found".into()));
        }
    }

    conn.execute(
        "INSERT INTO posts (id, title, content, excerpt, category, author_id, community_id, featured_image_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            post_id,
            title,
            content,
            excerpt,
            category,
            user.id(),
            community_id,
            featured_image_url
        ],
    )?;

    let post = find_post(&conn, Some(user.id()), &post_id)?
        .ok_or_else(|| AppError::Internal("Post vanished after insert".into()))?;
    tracing::info!(post_id = %post.id, author = %user.0.username, "Post created");

    Ok((StatusCode::CREATED, Json(post)).into_response())
}

/// GET /api/posts/{id}: counts as a view.
async fn get_post(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Json<Post>> {
    let conn = state.db.get()?;
    let mut post = find_post(&conn, viewer.id(), &id)?
        .filter(|p| p.is_published || viewer.id() == Some(p.author.id.as_str()))
        .ok_or_else(|| AppError::NotFound("Post not found".into()))?;

    conn.execute(
        "UPDATE posts SET view_count = view_count + 1 WHERE id = ?1",
        params![id],
    )?;
    post.view_count += 1;

    Ok(Json(post))
}

async fn update_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdatePostRequest>,
) -> AppResult<Json<Post>> {
    req.validate()?;

    // New content without a new excerpt regenerates the excerpt.
    let excerpt = match (validation::non_blank(req.excerpt.as_deref()), &req.content) {
        (Some(e), _) => Some(e.to_string()),
        (None, Some(c)) => Some(validation::excerpt(c)),
        (None, None) => None,
    };

    let conn = state.db.get()?;
    ensure_author(&conn, &id, &user, false)?;

    conn.execute(
        &format!(
            "UPDATE posts SET
                title = COALESCE(?1, title),
                content = COALESCE(?2, content),
                excerpt = COALESCE(?3, excerpt),
                category = COALESCE(?4, category),
                featured_image_url = COALESCE(?5, featured_image_url),
                is_published = COALESCE(?6, is_published),
                updated_at = {}
             WHERE id = ?7",
            NOW
        ),
        params![
            req.title,
            req.content,
            excerpt,
            req.category,
            req.featured_image_url,
            req.is_published,
            id
        ],
    )?;

    let post = find_post(&conn, Some(user.id()), &id)?
        .ok_or_else(|| AppError::NotFound("Post not found".into()))?;
    Ok(Json(post))
}

async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let conn = state.db.get()?;
    ensure_author(&conn, &id, &user, true)?;

    conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
    tracing::info!(post_id = %id, by = %user.id(), "Post deleted");
    Ok(Json(MessageResponse::new("Post deleted")))
}

async fn toggle_like(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Json<LikeResponse>> {
    let repo = SqliteMembershipRepository::new(state.db.clone());
    let outcome = repo.toggle_like(&post_id, user.id()).await?;

    Ok(Json(LikeResponse {
        liked: outcome.active,
        likes_count: outcome.count,
        message: if outcome.active {
            "Post liked".into()
        } else {
            "Post unliked".into()
        },
    }))
}

// --- Query helpers ---

const POST_SELECT: &str = "
    SELECT p.id, p.title, p.content, p.excerpt, p.category,
           u.id, u.username, u.display_name, u.avatar_url,
           c.id, c.name,
           p.likes_count, p.view_count,
           EXISTS(SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?1),
           p.is_published, p.is_featured, p.featured_image_url, p.created_at, p.updated_at
    FROM posts p
    JOIN users u ON u.id = p.author_id
    LEFT JOIN communities c ON c.id = p.community_id";

fn post_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    let community_id: Option<String> = row.get(9)?;
    let community_name: Option<String> = row.get(10)?;
    let community = community_id
        .zip(community_name)
        .map(|(id, name)| CommunitySummary { id, name });

    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        excerpt: row.get(3)?,
        category: row.get(4)?,
        author: AuthorSummary {
            id: row.get(5)?,
            username: row.get(6)?,
            display_name: row.get(7)?,
            avatar_url: row.get(8)?,
        },
        community,
        likes_count: row.get(11)?,
        view_count: row.get(12)?,
        liked: row.get(13)?,
        is_published: row.get(14)?,
        is_featured: row.get(15)?,
        featured_image_url: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

/// Newest published posts first, optionally narrowed to one category.
pub fn query_posts(
    conn: &rusqlite::Connection,
    viewer_id: Option<&str>,
    category: Option<Category>,
    limit: u32,
) -> AppResult<Vec<Post>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE p.is_published = 1 AND (?2 IS NULL OR p.category = ?2)
         ORDER BY p.created_at DESC, p.rowid DESC
         LIMIT ?3",
        POST_SELECT
    ))?;

    let posts = stmt
        .query_map(
            params![viewer_id.unwrap_or(""), category, limit],
            post_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(posts)
}

pub fn find_post(
    conn: &rusqlite::Connection,
    viewer_id: Option<&str>,
    post_id: &str,
) -> AppResult<Option<Post>> {
    let post = conn
        .query_row(
            &format!("{} WHERE p.id = ?2", POST_SELECT),
            params![viewer_id.unwrap_or(""), post_id],
            post_from_row,
        )
        .optional()?;
    Ok(post)
}

/// 404 when the post is missing, 403 unless the caller wrote it
/// (or is an admin, when `admin_allowed`).
fn ensure_author(
    conn: &rusqlite::Connection,
    post_id: &str,
    user: &CurrentUser,
    admin_allowed: bool,
) -> AppResult<()> {
    let author_id: String = conn
        .query_row(
            "SELECT author_id FROM posts WHERE id = ?1",
            params![post_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound("Post not found".into()))?;

    if author_id != user.id() && !(admin_allowed && user.is_admin()) {
        return Err(AppError::Forbidden(
            "Only the author can modify this post".into(),
        ));
    }
    Ok(())
}
