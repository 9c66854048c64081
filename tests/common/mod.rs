//! Common test utilities

#![allow(dead_code)]

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

/// Setup test database - truncate tables and seed test data
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    // Compute hash dynamically to match what middleware expects
    let hash_check: String = sqlx::query_scalar("SELECT encode(sha256('test_key_123'::bytea), 'hex')")
        .fetch_one(&pool)
        .await
        .unwrap();

    let mut tx = pool.begin().await.expect("Failed to begin transaction");

    // Clean up DB for fresh state
    sqlx::query("TRUNCATE TABLE journal_entries, audit_events, idempotency_keys, rate_limit_buckets, customers, api_keys CASCADE")
        .execute(&mut *tx)
        .await
        .expect("Failed to clean up DB");

    // Seed test API Key with dynamically computed hash
    sqlx::query(
        r#"
        INSERT INTO api_keys (id, name, key_hash, key_prefix, permissions, is_active)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (key_prefix) DO NOTHING
        "#
    )
    .bind(Uuid::new_v4())
    .bind("Test Key")
    .bind(&hash_check)
    .bind("test_")
    .bind(vec!["admin".to_string()])
    .bind(true)
    .execute(&mut *tx)
    .await
    .expect("Failed to seed API key");

    tx.commit().await.expect("Failed to commit transaction");

    pool
}

/// Insert a customer row directly, returning its id
pub async fn seed_customer(
    pool: &PgPool,
    limit_amount: i64,
    grace_amount: i64,
    allow_override: bool,
) -> Uuid {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO customers (id, name, outstanding, limit_enabled, limit_amount, grace_amount, allow_override)
        VALUES ($1, $2, 0, true, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(format!("test-customer-{}", id))
    .bind(Decimal::new(limit_amount, 0))
    .bind(Decimal::new(grace_amount, 0))
    .bind(allow_override)
    .execute(pool)
    .await
    .expect("Failed to seed customer");

    id
}

/// Read a customer's cached outstanding directly
pub async fn outstanding_of(pool: &PgPool, customer_id: Uuid) -> Decimal {
    sqlx::query_scalar("SELECT outstanding FROM customers WHERE id = $1")
        .bind(customer_id)
        .fetch_one(pool)
        .await
        .expect("Failed to read outstanding")
}
