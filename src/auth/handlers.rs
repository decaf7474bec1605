use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::{password, reset};
use crate::db::models::User;
use crate::db::NOW;
use crate::error::{AppError, AppResult};
use crate::extractors::{ApiJson, CurrentUser};
use crate::mail;
use crate::routes::MessageResponse;
use crate::state::AppState;
use crate::validation;

const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent";

// -- Request/Response types --

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(deserialize_with = "validation::email")]
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[serde(deserialize_with = "validation::trimmed")]
    #[validate(length(min = 1, max = 30, message = "Username must be between 1 and 30 characters"))]
    pub username: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[serde(default, alias = "display_name", deserialize_with = "validation::trimmed_opt")]
    #[validate(length(max = 50, message = "Display name must be 50 characters or less"))]
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(deserialize_with = "validation::email")]
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct EmailRequest {
    #[serde(deserialize_with = "validation::email")]
    pub email: String,
}

#[derive(Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[serde(deserialize_with = "validation::trimmed")]
    pub token: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: String,
    pub token: String,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: User,
}

fn invalid_credentials() -> AppError {
    AppError::BadRequest("Invalid credentials".into())
}

// -- Handlers --

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> AppResult<Response> {
    req.validate()?;
    let RegisterRequest {
        email,
        username,
        password,
        display_name,
    } = req;
    let display_name = validation::non_blank(display_name.as_deref())
        .unwrap_or(&username)
        .to_string();

    {
        let conn = state.db.get()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT email FROM users WHERE email = ?1 OR username = ?2 LIMIT 1",
                params![email, username],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing_email) = existing {
            return Err(AppError::Conflict(if existing_email == email {
                "Email already exists".into()
            } else {
                "Username already taken".into()
            }));
        }
    }

    let password_hash = password::hash(password, state.config.auth.bcrypt_cost).await?;
    let user_id = uuid::Uuid::now_v7().to_string();

    let user = {
        let conn = state.db.get()?;
        conn.execute(
            "INSERT INTO users (id, username, email, display_name, password_hash)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, username, email, display_name, password_hash],
        )
        .map_err(|e| match AppError::from(e) {
            // Lost a race with a concurrent registration.
            AppError::Conflict(_) => AppError::Conflict("Email or username already taken".into()),
            other => other,
        })?;
        User::find(&conn, &user_id)?
            .ok_or_else(|| AppError::Internal("User vanished after insert".into()))?
    };

    let token = issue_token(&state, &user.id)?;
    tracing::info!(user_id = %user.id, username = %user.username, "User registered");

    mail::deliver(
        state.mailer.as_ref(),
        mail::welcome_email(&user.email, &user.username, &state.config.mail.site_url),
    )
    .await;

    let response = AuthResponse {
        message: "User created successfully".into(),
        token,
        user,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// POST /api/auth/login
///
/// Unknown email and wrong password produce the same response.
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = req.email.trim().to_lowercase();

    let found: Option<(String, String)> = {
        let conn = state.db.get()?;
        conn.query_row(
            "SELECT id, password_hash FROM users WHERE email = ?1",
            params![email],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
    };

    let (user_id, stored_hash) = match found {
        Some((id, hash)) => (Some(id), Some(hash)),
        None => (None, None),
    };

    let matched =
        password::verify(req.password, stored_hash, state.config.auth.bcrypt_cost).await?;
    let user_id = match (matched, user_id) {
        (true, Some(id)) => id,
        _ => return Err(invalid_credentials()),
    };

    let user = {
        let conn = state.db.get()?;
        User::find(&conn, &user_id)?.ok_or_else(invalid_credentials)?
    };
    let token = issue_token(&state, &user.id)?;
    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(AuthResponse {
        message: "Login successful".into(),
        token,
        user,
    }))
}

/// GET /api/auth/me
pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse { user })
}

/// POST /api/auth/forgot-password
///
/// Always answers with the same message, whether or not the email is known.
/// Token creation and mail run after the response so that known accounts
/// are not slower to answer.
pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<EmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    let email = req.email.trim().to_lowercase();

    let found: Option<(String, String)> = {
        let conn = state.db.get()?;
        conn.query_row(
            "SELECT id, username FROM users WHERE email = ?1",
            params![email],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
    };

    if let Some((user_id, username)) = found {
        let db = state.db.clone();
        let mailer = state.mailer.clone();
        let site_url = state.config.mail.site_url.clone();

        tokio::spawn(async move {
            let token = match reset::create_reset(&db, &user_id) {
                Ok(token) => token,
                Err(e) => {
                    tracing::error!(user_id = %user_id, "Failed to store reset token: {}", e);
                    return;
                }
            };
            tracing::info!(user_id = %user_id, "Password reset requested");
            mail::deliver(
                mailer.as_ref(),
                mail::password_reset_email(&email, &username, &site_url, &token),
            )
            .await;
        });
    }

    Ok(Json(MessageResponse::new(FORGOT_PASSWORD_MESSAGE)))
}

/// POST /api/auth/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    req.validate()?;

    let user_id = {
        let conn = state.db.get()?;
        reset::find_reset_user(&conn, &req.token)?
    }
    .ok_or_else(|| AppError::BadRequest("Invalid or expired reset token".into()))?;

    let password_hash = password::hash(req.password, state.config.auth.bcrypt_cost).await?;

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;
    tx.execute(
        &format!(
            "UPDATE users SET password_hash = ?1, updated_at = {} WHERE id = ?2",
            NOW
        ),
        params![password_hash, user_id],
    )?;
    tx.execute(
        "DELETE FROM password_resets WHERE user_id = ?1",
        params![user_id],
    )?;
    tx.commit()?;

    tracing::info!(user_id = %user_id, "Password reset completed");
    Ok(Json(MessageResponse::new("Password has been reset")))
}

fn issue_token(state: &AppState, user_id: &str) -> AppResult<String> {
    state
        .tokens
        .issue(user_id)
        .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::tests::test_pool;
    use crate::mail::tests::RecordingMailer;
    use crate::mail::SharedMailer;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_state(mailer: Option<SharedMailer>) -> (AppState, TempDir) {
        let (pool, tmp) = test_pool();
        let mut config = Config::default();
        config.auth.jwt_secret = Some("test-secret".into());
        config.auth.bcrypt_cost = 4;
        (AppState::new(pool, config, mailer), tmp)
    }

    async fn wait_for_mail(recorder: &RecordingMailer, count: usize) {
        for _ in 0..100 {
            if recorder.sent.lock().await.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Insert a user directly, bypassing the welcome mail.
    async fn register_quietly(state: &AppState, email: &str, username: &str) {
        let hash = password::hash("pw123456".into(), 4).await.unwrap();
        state
            .db
            .get()
            .unwrap()
            .execute(
                "INSERT INTO users (id, username, email, password_hash) VALUES (?1, ?2, ?3, ?4)",
                params![uuid::Uuid::now_v7().to_string(), username, email, hash],
            )
            .unwrap();
    }

    fn register_req(email: &str, username: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            username: username.into(),
            password: "pw123456".into(),
            display_name: None,
        }
    }

    #[tokio::test]
    async fn register_creates_user_and_sends_welcome_mail() {
        let recorder = Arc::new(RecordingMailer::default());
        let (state, _tmp) = create_test_state(Some(recorder.clone() as SharedMailer));

        let response = register(
            State(state.clone()),
            ApiJson(register_req("alice@example.com", "alice")),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let conn = state.db.get().unwrap();
        let (display_name, role): (String, String) = conn
            .query_row(
                "SELECT display_name, role FROM users WHERE username = 'alice'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(display_name, "alice");
        assert_eq!(role, "user");

        let sent = recorder.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.com");
    }

    #[tokio::test]
    async fn register_rejects_malformed_input() {
        let (state, _tmp) = create_test_state(None);

        for email in ["a@@b.com", "a@b..com", "alice", "@example.com"] {
            let err = register(State(state.clone()), ApiJson(register_req(email, "alice")))
                .await
                .unwrap_err();
            assert!(
                matches!(err, AppError::Validation(ref m) if m == "A valid email is required"),
                "{} was accepted",
                email
            );
        }

        let mut short = register_req("alice@example.com", "alice");
        short.password = "pw".into();
        let err = register(State(state.clone()), ApiJson(short))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("at least 6")));

        let blank: RegisterRequest = serde_json::from_str(
            r#"{"email": "alice@example.com", "username": "   ", "password": "pw123456"}"#,
        )
        .unwrap();
        let err = register(State(state.clone()), ApiJson(blank))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let count: i64 = state
            .db
            .get()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn register_body_normalizes_email() {
        let req: RegisterRequest = serde_json::from_str(
            r#"{"email": " Alice@Example.COM ", "username": " alice ", "password": "pw123456", "displayName": "Alice"}"#,
        )
        .unwrap();
        assert_eq!(req.email, "alice@example.com");
        assert_eq!(req.username, "alice");
        assert_eq!(req.display_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn duplicate_registration_names_the_colliding_field() {
        let (state, _tmp) = create_test_state(None);
        register(
            State(state.clone()),
            ApiJson(register_req("alice@example.com", "alice")),
        )
        .await
        .unwrap();

        let err = register(
            State(state.clone()),
            ApiJson(register_req("alice@example.com", "alice2")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "Email already exists"));

        let err = register(
            State(state),
            ApiJson(register_req("other@example.com", "alice")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "Username already taken"));
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let (state, _tmp) = create_test_state(None);
        register(
            State(state.clone()),
            ApiJson(register_req("alice@example.com", "alice")),
        )
        .await
        .unwrap();

        let wrong_password = login(
            State(state.clone()),
            ApiJson(LoginRequest {
                email: "alice@example.com".into(),
                password: "nope-nope".into(),
            }),
        )
        .await
        .unwrap_err();
        let unknown_email = login(
            State(state),
            ApiJson(LoginRequest {
                email: "bob@example.com".into(),
                password: "pw123456".into(),
            }),
        )
        .await
        .unwrap_err();

        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert_eq!(wrong_password.status(), unknown_email.status());
    }

    #[tokio::test]
    async fn login_issues_token_for_the_user() {
        let (state, _tmp) = create_test_state(None);
        register(
            State(state.clone()),
            ApiJson(register_req("alice@example.com", "alice")),
        )
        .await
        .unwrap();

        let Json(auth) = login(
            State(state.clone()),
            ApiJson(LoginRequest {
                email: "Alice@Example.com".into(),
                password: "pw123456".into(),
            }),
        )
        .await
        .unwrap();
        let claims = state.tokens.verify(&auth.token).unwrap();
        assert_eq!(claims.user_id, auth.user.id);
    }

    #[tokio::test]
    async fn forgot_password_only_mails_known_accounts() {
        let recorder = Arc::new(RecordingMailer::default());
        let (state, _tmp) = create_test_state(Some(recorder.clone() as SharedMailer));
        register(
            State(state.clone()),
            ApiJson(register_req("alice@example.com", "alice")),
        )
        .await
        .unwrap();
        recorder.sent.lock().await.clear();

        let Json(known) = forgot_password(
            State(state.clone()),
            ApiJson(EmailRequest {
                email: "alice@example.com".into(),
            }),
        )
        .await
        .unwrap();
        let Json(unknown) = forgot_password(
            State(state),
            ApiJson(EmailRequest {
                email: "nobody@example.com".into(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(known.message, unknown.message);
        wait_for_mail(&recorder, 1).await;
        // Give a stray second send the chance to show up.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = recorder.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html.contains("reset-password?token="));
    }

    /// Mailer whose sends take far longer than any request should.
    struct StalledMailer;

    #[async_trait::async_trait]
    impl mail::Mailer for StalledMailer {
        async fn send(&self, _email: mail::Email) -> Result<(), mail::MailError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn forgot_password_does_not_wait_for_mail() {
        let (state, _tmp) = create_test_state(Some(Arc::new(StalledMailer) as SharedMailer));
        register_quietly(&state, "alice@example.com", "alice").await;

        let answered = tokio::time::timeout(
            Duration::from_secs(2),
            forgot_password(
                State(state.clone()),
                ApiJson(EmailRequest {
                    email: "alice@example.com".into(),
                }),
            ),
        )
        .await;
        assert!(answered.is_ok(), "forgot-password waited on the mailer");

        // The reset token is still written in the background.
        let mut stored = 0;
        for _ in 0..100 {
            stored = state
                .db
                .get()
                .unwrap()
                .query_row("SELECT COUNT(*) FROM password_resets", [], |r| r.get(0))
                .unwrap();
            if stored > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn reset_password_consumes_token() {
        let (state, _tmp) = create_test_state(None);
        register(
            State(state.clone()),
            ApiJson(register_req("alice@example.com", "alice")),
        )
        .await
        .unwrap();
        let user_id: String = state
            .db
            .get()
            .unwrap()
            .query_row("SELECT id FROM users WHERE username = 'alice'", [], |r| {
                r.get(0)
            })
            .unwrap();
        let token = reset::create_reset(&state.db, &user_id).unwrap();

        reset_password(
            State(state.clone()),
            ApiJson(ResetPasswordRequest {
                token: token.clone(),
                password: "new-password".into(),
            }),
        )
        .await
        .unwrap();

        let login_result = login(
            State(state.clone()),
            ApiJson(LoginRequest {
                email: "alice@example.com".into(),
                password: "new-password".into(),
            }),
        )
        .await;
        assert!(login_result.is_ok());

        let reused = reset_password(
            State(state),
            ApiJson(ResetPasswordRequest {
                token,
                password: "another-password".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(reused, AppError::BadRequest(_)));
    }
}
