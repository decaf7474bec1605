use rand::Rng;
use rusqlite::{params, OptionalExtension};

use crate::db::NOW;
use crate::error::AppResult;
use crate::state::DbPool;

const RESET_TTL_MINUTES: u32 = 60;

/// Store a fresh reset token for a user. Returns the token.
pub fn create_reset(pool: &DbPool, user_id: &str) -> AppResult<String> {
    let conn = pool.get()?;
    let token = generate_token();

    conn.execute(
        "INSERT INTO password_resets (token, user_id, expires_at)
         VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?3))",
        params![token, user_id, format!("+{} minutes", RESET_TTL_MINUTES)],
    )?;

    Ok(token)
}

/// Look up the user owning an unexpired reset token.
pub fn find_reset_user(
    conn: &rusqlite::Connection,
    token: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        &format!(
            "SELECT user_id FROM password_resets WHERE token = ?1 AND expires_at > {}",
            NOW
        ),
        params![token],
        |row| row.get(0),
    )
    .optional()
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{insert_user, test_pool};

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn fresh_token_resolves_to_user() {
        let (pool, _tmp) = test_pool();
        insert_user(&pool, "u1", "alice");
        let token = create_reset(&pool, "u1").unwrap();

        let conn = pool.get().unwrap();
        assert_eq!(find_reset_user(&conn, &token).unwrap().as_deref(), Some("u1"));
        assert_eq!(find_reset_user(&conn, "unknown").unwrap(), None);
    }

    #[test]
    fn expired_token_does_not_resolve() {
        let (pool, _tmp) = test_pool();
        insert_user(&pool, "u1", "alice");
        let token = create_reset(&pool, "u1").unwrap();

        let conn = pool.get().unwrap();
        conn.execute(
            "UPDATE password_resets SET expires_at = '2000-01-01T00:00:00.000Z' WHERE token = ?1",
            params![token],
        )
        .unwrap();
        assert_eq!(find_reset_user(&conn, &token).unwrap(), None);
    }
}
