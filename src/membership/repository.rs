// Repository pattern - all reference-set writes go through here
use async_trait::async_trait;
use rusqlite::{params, Connection, TransactionBehavior};
use thiserror::Error;

use crate::error::AppError;
use crate::membership::domain::*;
use crate::state::DbPool;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("{0}")]
    NotFound(&'static str),
}

impl From<MembershipError> for AppError {
    fn from(err: MembershipError) -> Self {
        match err {
            MembershipError::NotFound(msg) => AppError::NotFound(msg.to_string()),
            MembershipError::Database(e) => AppError::Pool(e),
            MembershipError::Sql(e) => AppError::from(e),
        }
    }
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Like the post if the user has not, unlike it if they have.
    async fn toggle_like(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> Result<ToggleOutcome, MembershipError>;

    /// Join the community if the user is not a member, leave it otherwise.
    async fn toggle_membership(
        &self,
        community_id: &str,
        user_id: &str,
    ) -> Result<ToggleOutcome, MembershipError>;
}

/// SQLite implementation
pub struct SqliteMembershipRepository {
    pool: DbPool,
}

impl SqliteMembershipRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipRepository for SqliteMembershipRepository {
    async fn toggle_like(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> Result<ToggleOutcome, MembershipError> {
        let mut conn = self.pool.get()?;
        toggle::<PostLikes>(&mut conn, post_id, user_id)
    }

    async fn toggle_membership(
        &self,
        community_id: &str,
        user_id: &str,
    ) -> Result<ToggleOutcome, MembershipError> {
        let mut conn = self.pool.get()?;
        toggle::<CommunityMembers>(&mut conn, community_id, user_id)
    }
}

/// Flip `user_id` in the container's reference set and recompute the counter.
///
/// Runs as one IMMEDIATE transaction: the write lock is taken before the
/// membership test, so concurrent toggles serialize instead of racing.
pub fn toggle<C: Container>(
    conn: &mut Connection,
    container_id: &str,
    user_id: &str,
) -> Result<ToggleOutcome, MembershipError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let exists: bool = tx.query_row(
        &format!("SELECT COUNT(*) > 0 FROM {} WHERE id = ?1", C::TABLE),
        params![container_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(MembershipError::NotFound(C::NOT_FOUND));
    }

    let is_member: bool = tx.query_row(
        &format!(
            "SELECT COUNT(*) > 0 FROM {} WHERE {} = ?1 AND user_id = ?2",
            C::SET_TABLE,
            C::KEY
        ),
        params![container_id, user_id],
        |row| row.get(0),
    )?;

    let action = ToggleAction::for_membership(is_member);
    match action {
        ToggleAction::Remove => {
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1 AND user_id = ?2",
                    C::SET_TABLE,
                    C::KEY
                ),
                params![container_id, user_id],
            )?;
        }
        ToggleAction::Add => {
            tx.execute(
                &format!(
                    "INSERT INTO {} ({}, user_id) VALUES (?1, ?2)",
                    C::SET_TABLE,
                    C::KEY
                ),
                params![container_id, user_id],
            )?;
        }
    }

    let count = recount::<C>(&tx, container_id)?;
    tx.commit()?;

    Ok(ToggleOutcome::new(action, count))
}

/// Add a reference inside the caller's transaction. Returns the new count.
pub fn insert_reference<C: Container>(
    conn: &Connection,
    container_id: &str,
    user_id: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {} ({}, user_id) VALUES (?1, ?2)",
            C::SET_TABLE,
            C::KEY
        ),
        params![container_id, user_id],
    )?;
    recount::<C>(conn, container_id)
}

/// Set the counter to the set's cardinality; never adjusted by +/-1.
fn recount<C: Container>(conn: &Connection, container_id: &str) -> rusqlite::Result<i64> {
    conn.execute(
        &format!(
            "UPDATE {table} SET {counter} = (SELECT COUNT(*) FROM {set} WHERE {key} = ?1) WHERE id = ?1",
            table = C::TABLE,
            counter = C::COUNTER,
            set = C::SET_TABLE,
            key = C::KEY
        ),
        params![container_id],
    )?;

    conn.query_row(
        &format!("SELECT {} FROM {} WHERE id = ?1", C::COUNTER, C::TABLE),
        params![container_id],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{insert_user, test_pool};

    fn insert_post(pool: &DbPool, id: &str, author: &str) {
        pool.get()
            .unwrap()
            .execute(
                "INSERT INTO posts (id, title, content, author_id) VALUES (?1, 'Hello', 'World', ?2)",
                params![id, author],
            )
            .unwrap();
    }

    fn insert_community(pool: &DbPool, id: &str, creator: &str) {
        pool.get()
            .unwrap()
            .execute(
                "INSERT INTO communities (id, name, slug, created_by) VALUES (?1, ?1, ?1, ?2)",
                params![id, creator],
            )
            .unwrap();
    }

    fn stored_state(pool: &DbPool, sql_set: &str, sql_counter: &str, id: &str) -> (i64, i64) {
        let conn = pool.get().unwrap();
        let set_size: i64 = conn.query_row(sql_set, params![id], |r| r.get(0)).unwrap();
        let counter: i64 = conn
            .query_row(sql_counter, params![id], |r| r.get(0))
            .unwrap();
        (set_size, counter)
    }

    #[tokio::test]
    async fn like_toggle_parity() {
        let (pool, _tmp) = test_pool();
        insert_user(&pool, "alice", "alice");
        insert_post(&pool, "p1", "alice");
        let repo = SqliteMembershipRepository::new(pool.clone());

        for n in 1..=5 {
            let outcome = repo.toggle_like("p1", "alice").await.unwrap();
            let odd = n % 2 == 1;
            assert_eq!(outcome.active, odd);
            assert_eq!(outcome.count, if odd { 1 } else { 0 });

            let (set_size, counter) = stored_state(
                &pool,
                "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
                "SELECT likes_count FROM posts WHERE id = ?1",
                "p1",
            );
            assert_eq!(set_size, counter);
            assert_eq!(counter, outcome.count);
        }
    }

    #[tokio::test]
    async fn likes_from_different_users_accumulate() {
        let (pool, _tmp) = test_pool();
        insert_user(&pool, "alice", "alice");
        insert_user(&pool, "bob", "bob");
        insert_post(&pool, "p1", "alice");
        let repo = SqliteMembershipRepository::new(pool);

        assert_eq!(repo.toggle_like("p1", "alice").await.unwrap().count, 1);
        let bob = repo.toggle_like("p1", "bob").await.unwrap();
        assert!(bob.active);
        assert_eq!(bob.count, 2);

        let alice_again = repo.toggle_like("p1", "alice").await.unwrap();
        assert!(!alice_again.active);
        assert_eq!(alice_again.count, 1);
    }

    #[tokio::test]
    async fn membership_toggle_parity() {
        let (pool, _tmp) = test_pool();
        insert_user(&pool, "alice", "alice");
        insert_user(&pool, "bob", "bob");
        insert_community(&pool, "rust", "alice");
        let repo = SqliteMembershipRepository::new(pool.clone());

        let joined = repo.toggle_membership("rust", "bob").await.unwrap();
        assert_eq!(joined, ToggleOutcome { active: true, count: 1 });

        let left = repo.toggle_membership("rust", "bob").await.unwrap();
        assert_eq!(left, ToggleOutcome { active: false, count: 0 });

        let (set_size, counter) = stored_state(
            &pool,
            "SELECT COUNT(*) FROM community_members WHERE community_id = ?1",
            "SELECT members_count FROM communities WHERE id = ?1",
            "rust",
        );
        assert_eq!((set_size, counter), (0, 0));
    }

    #[tokio::test]
    async fn missing_container_is_not_found() {
        let (pool, _tmp) = test_pool();
        insert_user(&pool, "alice", "alice");
        let repo = SqliteMembershipRepository::new(pool);

        let err = repo.toggle_like("nope", "alice").await.unwrap_err();
        assert!(matches!(err, MembershipError::NotFound("Post not found")));

        let err = repo.toggle_membership("nope", "alice").await.unwrap_err();
        assert!(matches!(err, MembershipError::NotFound("Community not found")));
    }

    #[test]
    fn insert_reference_is_idempotent() {
        let (pool, _tmp) = test_pool();
        insert_user(&pool, "alice", "alice");
        insert_community(&pool, "rust", "alice");

        let conn = pool.get().unwrap();
        assert_eq!(
            insert_reference::<CommunityMembers>(&conn, "rust", "alice").unwrap(),
            1
        );
        assert_eq!(
            insert_reference::<CommunityMembers>(&conn, "rust", "alice").unwrap(),
            1
        );
    }

    #[test]
    fn counter_repairs_drift_on_next_toggle() {
        let (pool, _tmp) = test_pool();
        insert_user(&pool, "alice", "alice");
        insert_user(&pool, "bob", "bob");
        insert_post(&pool, "p1", "alice");
        pool.get()
            .unwrap()
            .execute("UPDATE posts SET likes_count = 42 WHERE id = 'p1'", [])
            .unwrap();

        let mut conn = pool.get().unwrap();
        let outcome = toggle::<PostLikes>(&mut conn, "p1", "bob").unwrap();
        assert_eq!(outcome.count, 1);
    }

    #[test]
    fn concurrent_toggles_keep_counter_consistent() {
        let (pool, _tmp) = test_pool();
        insert_user(&pool, "alice", "alice");
        insert_post(&pool, "p1", "alice");
        for i in 0..8 {
            insert_user(&pool, &format!("u{}", i), &format!("user{}", i));
        }

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let user = format!("u{}", i);
                    // Odd users toggle twice and end up not liking.
                    let times = if i % 2 == 0 { 1 } else { 2 };
                    for _ in 0..times {
                        let mut conn = pool.get().unwrap();
                        toggle::<PostLikes>(&mut conn, "p1", &user).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let (set_size, counter) = stored_state(
            &pool,
            "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
            "SELECT likes_count FROM posts WHERE id = ?1",
            "p1",
        );
        assert_eq!(set_size, 4);
        assert_eq!(counter, 4);
    }
}
