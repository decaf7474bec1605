use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use rusqlite::params;
use serde::Deserialize;
use validator::Validate;

use crate::error::AppResult;
use crate::extractors::ApiJson;
use crate::routes::MessageResponse;
use crate::state::AppState;
use crate::validation;

#[derive(Deserialize, Validate)]
pub struct SubscribeRequest {
    #[serde(deserialize_with = "validation::email")]
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/newsletter/subscribe", post(subscribe))
}

/// Subscribing twice is not an error; the address is stored once.
async fn subscribe(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SubscribeRequest>,
) -> AppResult<Json<MessageResponse>> {
    req.validate()?;
    let email = req.email;

    let conn = state.db.get()?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO newsletter_subscribers (email) VALUES (?1)",
        params![email],
    )?;
    if inserted > 0 {
        tracing::info!(%email, "Newsletter subscription");
    }

    Ok(Json(MessageResponse::new(
        "Successfully subscribed to newsletter",
    )))
}
