//! Shared test helpers for signaling-server integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use callsign::repository::{PgRepository, Repository};
use callsign::token::TokenService;
use sqlx::PgPool;
use uuid::Uuid;

const TEST_PRIVATE_KEY: &str = include_str!("fixtures/test_rsa_private.pem");
const TEST_PUBLIC_KEY: &str = include_str!("fixtures/test_rsa_public.pem");

/// Connect to the test database using `DATABASE_URL` and bootstrap the schema.
pub async fn get_test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
    let pool = PgPool::connect(&url)
        .await
        .expect("failed to connect to test database");
    PgRepository::from_pool(pool.clone())
        .migrate()
        .await
        .expect("failed to bootstrap schema");
    pool
}

/// Delete all rows touched by a test run, keyed on the usernames it created.
pub async fn cleanup_test_users(pool: &PgPool, usernames: &[&str]) {
    let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE username = ANY($1)")
        .bind(usernames)
        .fetch_all(pool)
        .await
        .unwrap_or_default();
    for id in &ids {
        let _ = sqlx::query("DELETE FROM transcript_lines WHERE call_id IN (SELECT id FROM calls WHERE caller_id = $1 OR callee_id = $1)")
            .bind(id)
            .execute(pool)
            .await;
        let _ = sqlx::query("DELETE FROM calls WHERE caller_id = $1 OR callee_id = $1")
            .bind(id)
            .execute(pool)
            .await;
        let _ = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(id)
            .execute(pool)
            .await;
        let _ = sqlx::query("DELETE FROM contacts WHERE owner_id = $1 OR contact_id = $1")
            .bind(id)
            .execute(pool)
            .await;
    }
    let _ = sqlx::query("DELETE FROM users WHERE username = ANY($1)")
        .bind(usernames)
        .execute(pool)
        .await;
}

pub fn test_token_service(repository: Arc<dyn Repository>) -> TokenService {
    TokenService::new(
        TEST_PRIVATE_KEY.as_bytes(),
        TEST_PUBLIC_KEY.as_bytes(),
        Duration::from_secs(900),
        Duration::from_secs(7 * 24 * 3600),
        repository,
    )
    .expect("test RSA fixtures are valid keys")
}
