use std::sync::OnceLock;

use crate::error::AppResult;

/// Hash on the blocking pool.
pub async fn hash(password: String, cost: u32) -> AppResult<String> {
    let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hashed)
}

/// Constant-time comparison of `password` against a stored hash.
///
/// With no stored hash the password is still checked against a dummy hash
/// of the same cost, so an unknown account costs as much as a wrong password.
pub async fn verify(password: String, stored: Option<String>, cost: u32) -> AppResult<bool> {
    let matched = tokio::task::spawn_blocking(move || match stored {
        Some(hash) => bcrypt::verify(password, &hash).unwrap_or(false),
        None => {
            let _ = bcrypt::verify(password, dummy_hash(cost));
            false
        }
    })
    .await?;
    Ok(matched)
}

fn dummy_hash(cost: u32) -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| {
        bcrypt::hash("techverse-timing-equalizer", cost).unwrap_or_default()
    })
}
