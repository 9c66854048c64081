//! Credit engine integration tests
//!
//! These tests require a Postgres database with the migrated schema.
//! Run with: DATABASE_URL=... cargo test -- --ignored

use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use credit_core::credit::{CreditEngine, DecisionCode, ReleaseReason};
use credit_core::domain::{Amount, OperationContext};

mod common;

fn ctx_for(actor: Uuid) -> OperationContext {
    OperationContext::new()
        .with_actor(actor)
        .with_request_id(Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with migrated schema"]
async fn test_concurrent_reserves_exactly_one_wins() {
    // Scenario B: two concurrent Reserve(600) on outstanding=0, limit=1000.
    // Exactly one succeeds; the final state is 600, never 0 or 1200.
    let pool = common::setup_test_db().await;
    let customer_id = common::seed_customer(&pool, 1000, 0, false).await;

    let actor = Uuid::new_v4();
    let amount = Amount::from_str("600").unwrap();
    let engine_a = CreditEngine::new(pool.clone());
    let engine_b = CreditEngine::new(pool.clone());
    let ctx = ctx_for(actor);

    let (a, b) = tokio::join!(
        engine_a.reserve(customer_id, &amount, false, None, actor, "scenario-b-1", &ctx),
        engine_b.reserve(customer_id, &amount, false, None, actor, "scenario-b-2", &ctx),
    );

    let a = a.expect("first reserve errored");
    let b = b.expect("second reserve errored");

    let successes = [&a, &b].iter().filter(|d| d.success).count();
    let blocked = [&a, &b].iter().filter(|d| d.blocked).count();
    assert_eq!(successes, 1, "exactly one concurrent reserve must pass");
    assert_eq!(blocked, 1, "the other must be blocked");

    assert_eq!(
        common::outstanding_of(&pool, customer_id).await,
        Decimal::from_str("600.00").unwrap()
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with migrated schema"]
async fn test_scenario_a_block_then_override() {
    // limit=1000, grace=0, outstanding=900
    let pool = common::setup_test_db().await;
    let customer_id = common::seed_customer(&pool, 1000, 0, true).await;

    let actor = Uuid::new_v4();
    let engine = CreditEngine::new(pool.clone());
    let ctx = ctx_for(actor);

    let seed = Amount::from_str("900").unwrap();
    let seeded = engine
        .reserve(customer_id, &seed, false, None, actor, "scenario-a-seed", &ctx)
        .await
        .unwrap();
    assert!(seeded.success);

    // Reserve(200) without override: blocked, outstanding stays 900
    let amount = Amount::from_str("200").unwrap();
    let blocked = engine
        .reserve(customer_id, &amount, false, None, actor, "scenario-a-block", &ctx)
        .await
        .unwrap();

    assert!(!blocked.success);
    assert!(blocked.blocked);
    assert_eq!(blocked.details.code, DecisionCode::Blocked);
    assert_eq!(blocked.details.headroom, Decimal::from_str("100.00").unwrap());
    assert_eq!(
        common::outstanding_of(&pool, customer_id).await,
        Decimal::from_str("900.00").unwrap()
    );

    // Reserve(200, override, "mgr ok"): succeeds, outstanding=1100
    let overridden = engine
        .reserve(
            customer_id,
            &amount,
            true,
            Some("mgr ok"),
            actor,
            "scenario-a-override",
            &ctx,
        )
        .await
        .unwrap();

    assert!(overridden.success);
    assert_eq!(overridden.details.code, DecisionCode::OverrideUsed);
    assert_eq!(
        common::outstanding_of(&pool, customer_id).await,
        Decimal::from_str("1100.00").unwrap()
    );

    // The override decision is on the audit trail
    let override_events: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_events WHERE entity_id = $1 AND action = 'credit.override_used'",
    )
    .bind(customer_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(override_events, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with migrated schema"]
async fn test_override_without_reason_rejected_before_storage() {
    let pool = common::setup_test_db().await;
    let customer_id = common::seed_customer(&pool, 1000, 0, true).await;

    let actor = Uuid::new_v4();
    let engine = CreditEngine::new(pool.clone());
    let ctx = ctx_for(actor);

    let amount = Amount::from_str("200").unwrap();
    let result = engine
        .reserve(customer_id, &amount, true, None, actor, "no-reason", &ctx)
        .await;
    assert!(result.is_err());

    let blank = engine
        .reserve(customer_id, &amount, true, Some("   "), actor, "blank-reason", &ctx)
        .await;
    assert!(blank.is_err());

    // Nothing was applied or journaled
    assert_eq!(common::outstanding_of(&pool, customer_id).await, Decimal::ZERO);
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM journal_entries WHERE customer_id = $1")
        .bind(customer_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with migrated schema"]
async fn test_over_release_clamps_and_audits_anomaly() {
    let pool = common::setup_test_db().await;
    let customer_id = common::seed_customer(&pool, 1000, 0, false).await;

    let actor = Uuid::new_v4();
    let engine = CreditEngine::new(pool.clone());
    let ctx = ctx_for(actor);

    let reserved = Amount::from_str("100").unwrap();
    engine
        .reserve(customer_id, &reserved, false, None, actor, "clamp-reserve", &ctx)
        .await
        .unwrap();

    // Release more than outstanding: still succeeds, clamps to zero
    let released = Amount::from_str("250").unwrap();
    let decision = engine
        .release(
            customer_id,
            &released,
            ReleaseReason::Payment,
            actor,
            "clamp-release",
            &ctx,
        )
        .await
        .unwrap();

    assert!(decision.success);
    assert!(!decision.blocked);
    assert_eq!(decision.details.code, DecisionCode::Anomaly);
    assert_eq!(common::outstanding_of(&pool, customer_id).await, Decimal::ZERO);

    // Exactly one anomaly audit event for the occurrence
    let anomalies: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_events WHERE entity_id = $1 AND action = 'credit.release_anomaly'",
    )
    .bind(customer_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(anomalies, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with migrated schema"]
async fn test_rollback_release_restores_prior_outstanding() {
    let pool = common::setup_test_db().await;
    let customer_id = common::seed_customer(&pool, 1000, 0, false).await;

    let actor = Uuid::new_v4();
    let engine = CreditEngine::new(pool.clone());
    let ctx = ctx_for(actor);

    let baseline = Amount::from_str("400").unwrap();
    engine
        .reserve(customer_id, &baseline, false, None, actor, "rollback-baseline", &ctx)
        .await
        .unwrap();

    // Reserve ahead of a dependent write, then compensate its failure
    let amount = Amount::from_str("250").unwrap();
    engine
        .reserve(customer_id, &amount, false, None, actor, "rollback-reserve", &ctx)
        .await
        .unwrap();
    let decision = engine
        .release(
            customer_id,
            &amount,
            ReleaseReason::Rollback,
            actor,
            "rollback-release",
            &ctx,
        )
        .await
        .unwrap();

    assert!(decision.success);
    assert_eq!(decision.details.code, DecisionCode::Passed);
    assert_eq!(
        common::outstanding_of(&pool, customer_id).await,
        Decimal::from_str("400.00").unwrap()
    );

    // The rollback is distinguishable from payment-driven releases
    let reason: serde_json::Value = sqlx::query_scalar(
        "SELECT metadata FROM journal_entries WHERE actor_id = $1 AND idempotency_key = 'rollback-release'",
    )
    .bind(actor)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(reason["reason"], "rollback");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with migrated schema"]
async fn test_duplicate_journal_key_yields_single_row() {
    let pool = common::setup_test_db().await;
    // High limit so both attempts pass the guard; the journal unique
    // index is what stops the second application
    let customer_id = common::seed_customer(&pool, 100000, 0, false).await;

    let actor = Uuid::new_v4();
    let engine = CreditEngine::new(pool.clone());
    let ctx = ctx_for(actor);

    let amount = Amount::from_str("600").unwrap();
    let first = engine
        .reserve(customer_id, &amount, false, None, actor, "dup-key", &ctx)
        .await
        .unwrap();
    let second = engine
        .reserve(customer_id, &amount, false, None, actor, "dup-key", &ctx)
        .await
        .unwrap();

    assert!(first.success);
    assert!(second.success, "duplicate create returns the existing row as success");

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM journal_entries WHERE actor_id = $1 AND idempotency_key = 'dup-key'",
    )
    .bind(actor)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(rows, 1, "exactly one journal row per (actor, key)");

    assert_eq!(
        common::outstanding_of(&pool, customer_id).await,
        Decimal::from_str("600.00").unwrap(),
        "replay must not double-apply"
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with migrated schema"]
async fn test_reconcile_flags_drift() {
    use credit_core::reconcile::ReconciliationService;

    let pool = common::setup_test_db().await;
    let customer_id = common::seed_customer(&pool, 1000, 0, false).await;

    let actor = Uuid::new_v4();
    let engine = CreditEngine::new(pool.clone());
    let ctx = ctx_for(actor);

    let amount = Amount::from_str("100").unwrap();
    engine
        .reserve(customer_id, &amount, false, None, actor, "drift-reserve", &ctx)
        .await
        .unwrap();

    let reconcile = ReconciliationService::new(pool.clone());

    // Consistent cache: no drift
    let clean = reconcile.check_customer(customer_id, &ctx).await.unwrap();
    assert!(!clean.is_drifting());

    // Corrupt the cache out-of-band; the journal stays authoritative
    sqlx::query("UPDATE customers SET outstanding = 500 WHERE id = $1")
        .bind(customer_id)
        .execute(&pool)
        .await
        .unwrap();

    let report = reconcile.check_customer(customer_id, &ctx).await.unwrap();
    assert!(report.is_drifting());
    assert_eq!(report.cached_outstanding, Decimal::from_str("500.00").unwrap());
    assert_eq!(report.journal_outstanding, Decimal::from_str("100.00").unwrap());
    assert_eq!(report.drift, Decimal::from_str("400.00").unwrap());

    let drift_events: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_events WHERE entity_id = $1 AND action = 'reconcile.drift_detected'",
    )
    .bind(customer_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(drift_events, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with migrated schema"]
async fn test_disabled_limit_still_increments() {
    let pool = common::setup_test_db().await;
    let customer_id = common::seed_customer(&pool, 10, 0, false).await;

    // Turn the limit off
    sqlx::query("UPDATE customers SET limit_enabled = false WHERE id = $1")
        .bind(customer_id)
        .execute(&pool)
        .await
        .unwrap();

    let actor = Uuid::new_v4();
    let engine = CreditEngine::new(pool.clone());
    let ctx = ctx_for(actor);

    let amount = Amount::from_str("5000").unwrap();
    let decision = engine
        .reserve(customer_id, &amount, false, None, actor, "no-limit", &ctx)
        .await
        .unwrap();

    // Succeeds and still tracks, so enabling the limit later has a
    // meaningful baseline
    assert!(decision.success);
    assert_eq!(
        common::outstanding_of(&pool, customer_id).await,
        Decimal::from_str("5000.00").unwrap()
    );
}
