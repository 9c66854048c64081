//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditTrail};
use crate::credit::{CreditDecision, CreditDetails};
use crate::customer::Customer;
use crate::domain::OperationContext;
use crate::error::AppError;
use crate::handlers::{
    CreateCustomerCommand, CustomerHandler, ReleaseCommand, ReleaseHandler, ReserveCommand,
    ReserveHandler, UpdateLimitsCommand,
};
use crate::journal::JournalRepository;
use crate::reconcile::{DriftReport, ReconciliationService, SweepReport};

use super::middleware::AuthenticatedApiKey;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCustomerRequest {
    pub customer_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub limit_enabled: bool,
    #[serde(default = "default_zero_amount")]
    pub limit_amount: String,
    #[serde(default = "default_zero_amount")]
    pub grace_amount: String,
    #[serde(default)]
    pub allow_override: bool,
}

fn default_zero_amount() -> String {
    "0".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CustomerResponse {
    pub id: Uuid,
    pub name: String,
    pub outstanding: Decimal,
    pub limit_enabled: bool,
    pub limit_amount: Decimal,
    pub grace_amount: Decimal,
    pub allow_override: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Customer> for CustomerResponse {
    fn from(c: Customer) -> Self {
        Self {
            id: c.id,
            name: c.name,
            outstanding: c.outstanding,
            limit_enabled: c.limit_enabled,
            limit_amount: c.limit_amount,
            grace_amount: c.grace_amount,
            allow_override: c.allow_override,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateLimitsRequest {
    pub limit_enabled: bool,
    pub limit_amount: String,
    pub grace_amount: String,
    #[serde(default)]
    pub allow_override: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub amount: String,
    #[serde(default, rename = "override")]
    pub override_requested: bool,
    #[serde(default)]
    pub override_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub amount: String,
    pub reason: String,
}

/// Decision payload returned for both reserve and release
#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub success: bool,
    pub blocked: bool,
    /// True when this response was replayed from a previous request with
    /// the same idempotency key
    pub replayed: bool,
    pub customer: CustomerResponse,
    pub details: CreditDetails,
}

impl DecisionResponse {
    fn from_decision(decision: CreditDecision, replayed: bool) -> Self {
        Self {
            success: decision.success,
            blocked: decision.blocked,
            replayed,
            customer: decision.customer.into(),
            details: decision.details,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JournalEntryResponse {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub kind: String,
    pub amount: Decimal,
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct JournalResponse {
    pub customer_id: Uuid,
    pub entries: Vec<JournalEntryResponse>,
}

#[derive(Debug, Deserialize)]
pub struct JournalQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub entity_id: Option<Uuid>,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct AuditListResponse {
    pub events: Vec<AuditEvent>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<PgPool> {
    Router::new()
        // Customer onboarding and configuration
        .route("/customers", post(create_customer))
        .route("/customers/:customer_id", get(get_customer))
        .route("/customers/:customer_id/limits", patch(update_limits))
        // Credit core
        .route("/customers/:customer_id/credit/reserve", post(reserve))
        .route("/customers/:customer_id/credit/release", post(release))
        // Journal and integrity
        .route("/customers/:customer_id/journal", get(get_journal))
        .route("/customers/:customer_id/drift", get(check_drift))
        // Admin
        .route("/admin/audit", get(get_audit))
        .route("/admin/reconcile", post(run_reconcile))
}

/// Extract the idempotency key header, if present
fn idempotency_key(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("Idempotency-Key")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

// =========================================================================
// POST /customers
// =========================================================================

/// Create a new customer
async fn create_customer(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<CustomerResponse>), AppError> {
    let handler = CustomerHandler::new(pool);

    let command = CreateCustomerCommand {
        customer_id: request.customer_id,
        name: request.name,
        limit_enabled: request.limit_enabled,
        limit_amount: request.limit_amount,
        grace_amount: request.grace_amount,
        allow_override: request.allow_override,
    };

    let customer = handler.create(command, &context).await?;

    Ok((StatusCode::CREATED, Json(customer.into())))
}

// =========================================================================
// GET /customers/:customer_id
// =========================================================================

/// Get customer by ID
async fn get_customer(
    State(pool): State<PgPool>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<CustomerResponse>, AppError> {
    let handler = CustomerHandler::new(pool);
    let customer = handler.get(customer_id).await?;

    Ok(Json(customer.into()))
}

// =========================================================================
// PATCH /customers/:customer_id/limits
// =========================================================================

/// Update a customer's credit-limit configuration
async fn update_limits(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<UpdateLimitsRequest>,
) -> Result<Json<CustomerResponse>, AppError> {
    let handler = CustomerHandler::new(pool);

    let command = UpdateLimitsCommand {
        limit_enabled: request.limit_enabled,
        limit_amount: request.limit_amount,
        grace_amount: request.grace_amount,
        allow_override: request.allow_override,
    };

    let customer = handler.update_limits(customer_id, command, &context).await?;

    Ok(Json(customer.into()))
}

// =========================================================================
// POST /customers/:customer_id/credit/reserve
// =========================================================================

/// Reserve credit against a customer's limit.
/// A blocked reservation is a 200 with `blocked: true` and diagnostics,
/// not an error status.
async fn reserve(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Path(customer_id): Path<Uuid>,
    headers: axum::http::HeaderMap,
    Json(request): Json<ReserveRequest>,
) -> Result<Json<DecisionResponse>, AppError> {
    let handler = ReserveHandler::new(pool);

    let command = ReserveCommand {
        customer_id,
        amount: request.amount,
        override_requested: request.override_requested,
        override_reason: request.override_reason,
    };

    let (decision, replayed) = handler
        .execute(command, idempotency_key(&headers), &context)
        .await?;

    Ok(Json(DecisionResponse::from_decision(decision, replayed)))
}

// =========================================================================
// POST /customers/:customer_id/credit/release
// =========================================================================

/// Release previously reserved credit
async fn release(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Path(customer_id): Path<Uuid>,
    headers: axum::http::HeaderMap,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<DecisionResponse>, AppError> {
    let handler = ReleaseHandler::new(pool);

    let command = ReleaseCommand {
        customer_id,
        amount: request.amount,
        reason: request.reason,
    };

    let (decision, replayed) = handler
        .execute(command, idempotency_key(&headers), &context)
        .await?;

    Ok(Json(DecisionResponse::from_decision(decision, replayed)))
}

// =========================================================================
// GET /customers/:customer_id/journal
// =========================================================================

/// List recent journal movements for a customer
async fn get_journal(
    State(pool): State<PgPool>,
    Path(customer_id): Path<Uuid>,
    Query(query): Query<JournalQuery>,
) -> Result<Json<JournalResponse>, AppError> {
    // 404 for unknown customers rather than an empty list
    let customers = CustomerHandler::new(pool.clone());
    customers.get(customer_id).await?;

    let journal = JournalRepository::new(pool);
    let limit = query.limit.min(1000);
    let entries = journal.list_for_customer(customer_id, limit).await?;

    Ok(Json(JournalResponse {
        customer_id,
        entries: entries
            .into_iter()
            .map(|e| JournalEntryResponse {
                id: e.id,
                actor_id: e.actor_id,
                kind: e.kind.as_str().to_string(),
                amount: e.amount,
                idempotency_key: e.idempotency_key,
                metadata: e.metadata,
                created_at: e.created_at,
            })
            .collect(),
    }))
}

// =========================================================================
// GET /customers/:customer_id/drift
// =========================================================================

/// Compare a customer's cached outstanding against the journal
async fn check_drift(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<DriftReport>, AppError> {
    let reconcile = ReconciliationService::new(pool);
    let report = reconcile.check_customer(customer_id, &context).await?;

    Ok(Json(report))
}

// =========================================================================
// GET /admin/audit
// =========================================================================

/// Get recent audit events (admin only)
async fn get_audit(
    State(pool): State<PgPool>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditListResponse>, AppError> {
    if !api_key.has_permission("admin") {
        return Err(AppError::Forbidden("admin permission required".to_string()));
    }

    let audit = AuditTrail::new(pool);
    let limit = query.limit.min(1000);

    let events = match query.entity_id {
        Some(entity_id) => audit.get_by_entity(entity_id, limit).await?,
        None => audit.get_recent(limit).await?,
    };

    Ok(Json(AuditListResponse { events }))
}

// =========================================================================
// POST /admin/reconcile
// =========================================================================

/// Run a full reconciliation sweep (admin only)
async fn run_reconcile(
    State(pool): State<PgPool>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
) -> Result<Json<SweepReport>, AppError> {
    if !api_key.has_permission("admin") {
        return Err(AppError::Forbidden("admin permission required".to_string()));
    }

    let reconcile = ReconciliationService::new(pool);
    let report = reconcile.sweep(&context).await?;

    Ok(Json(report))
}
