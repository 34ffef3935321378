//! Axum REST API handlers.
//!
//! Identity comes from the upstream auth layer as trusted headers:
//! `x-account-id` for users, `x-admin-id` for admins.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use base64::Engine;
use ledger_core::{
    Account, AccountId, AccountStatus, AdminId, Amount, ErrorKind, LedgerError, Plan, PlanId,
    Transaction, TransactionId, TxType,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::accounts::{NewAccount, Referral};
use crate::admin::{AccountDetail, CreditReceipt, DashboardStats};
use crate::checkin::{CheckInReceipt, CheckInStatus};
use crate::evidence::{EvidenceUpload, MAX_EVIDENCE_BYTES};
use crate::invest::InvestmentReceipt;
use crate::plans::{NewPlan, PlanUpdate};
use crate::platform::Platform;
use crate::requests::{Decision, PendingRequest};
use crate::settings::DepositAccounts;

pub const ACCOUNT_HEADER: &str = "x-account-id";
pub const ADMIN_HEADER: &str = "x-admin-id";

/// Body cap for `POST /deposits`: the largest proof once base64 encoded,
/// plus room for the other fields.
pub const MAX_DEPOSIT_BODY_BYTES: usize = MAX_EVIDENCE_BYTES.div_ceil(3) * 4 + 64 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub platform: Platform,
}

type SharedState = State<Arc<ApiState>>;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/accounts", post(create_account))
        .route("/me", get(me))
        .route("/me/referrals", get(my_referrals))
        .route("/me/transactions", get(my_transactions))
        .route("/plans", get(active_plans))
        .route("/deposit-info", get(deposit_info))
        .route("/invest", post(invest))
        .route("/check-in", get(check_in_status).post(check_in))
        .route(
            "/deposits",
            post(request_deposit).layer(DefaultBodyLimit::max(MAX_DEPOSIT_BODY_BYTES)),
        )
        .route("/withdrawals", post(request_withdrawal))
        .route("/admin/stats", get(admin_stats))
        .route("/admin/accounts", get(admin_accounts))
        .route("/admin/accounts/:id", get(admin_account_detail))
        .route("/admin/accounts/:id/status", put(admin_set_status))
        .route("/admin/accounts/:id/credit", post(admin_credit))
        .route("/admin/accounts/:id/audit", get(admin_audit))
        .route("/admin/plans", get(admin_plans).post(admin_create_plan))
        .route("/admin/plans/:id", put(admin_update_plan))
        .route("/admin/deposits/pending", get(pending_deposits))
        .route("/admin/deposits/:id/approve", post(approve_deposit))
        .route("/admin/deposits/:id/reject", post(reject_deposit))
        .route("/admin/withdrawals/pending", get(pending_withdrawals))
        .route("/admin/withdrawals/:id/approve", post(approve_withdrawal))
        .route("/admin/withdrawals/:id/reject", post(reject_withdrawal))
        .route("/admin/transactions", get(admin_transactions))
        .route(
            "/admin/settings/deposit-accounts",
            get(admin_deposit_accounts).put(admin_update_deposit_accounts),
        )
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    /// A ledger failure. `detail` is set only on admin routes.
    Ledger {
        error: LedgerError,
        detail: bool,
    },
    Unauthorized(&'static str),
    /// The request body could not be read or parsed.
    Body(JsonRejection),
}

impl ApiError {
    /// Wrap a failure for an admin route, keeping the diagnostic text.
    pub fn admin(error: LedgerError) -> Self {
        ApiError::Ledger {
            error,
            detail: true,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(error: LedgerError) -> Self {
        ApiError::Ledger {
            error,
            detail: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState | ErrorKind::AlreadyInvested => StatusCode::CONFLICT,
        ErrorKind::InsufficientFunds
        | ErrorKind::BelowMinimum
        | ErrorKind::PlanInactive
        | ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::ReferralRequirementNotMet | ErrorKind::AccountBlocked => StatusCode::FORBIDDEN,
        ErrorKind::StorageConflict => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::StorageUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Body(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Ledger { error: err, detail } => {
                let kind = err.kind();
                let status = status_for(kind);
                if status.is_server_error() {
                    error!("Request failed: {err}");
                }
                let body = ErrorResponse {
                    error: kind.as_str().to_string(),
                    message: err.user_message().to_string(),
                    detail: detail.then(|| err.to_string()),
                };
                (status, Json(body)).into_response()
            }
            ApiError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "unauthorized".to_string(),
                    message: message.to_string(),
                    detail: None,
                }),
            )
                .into_response(),
            ApiError::Body(rejection) => {
                let status = rejection.status();
                let error = if status == StatusCode::PAYLOAD_TOO_LARGE {
                    "payload_too_large"
                } else {
                    "invalid_body"
                };
                (
                    status,
                    Json(ErrorResponse {
                        error: error.to_string(),
                        message: rejection.body_text(),
                        detail: None,
                    }),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// ─────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────

fn header_id(parts: &Parts, header: &str) -> Option<i64> {
    parts
        .headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// The signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentAccount(pub AccountId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentAccount {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_id(parts, ACCOUNT_HEADER)
            .map(CurrentAccount)
            .ok_or(ApiError::Unauthorized("Not authorized, please sign in."))
    }
}

/// The signed-in admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentAdmin(pub AdminId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_id(parts, ADMIN_HEADER)
            .map(CurrentAdmin)
            .ok_or(ApiError::Unauthorized("Admin access required."))
    }
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Listing<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(items: Vec<T>) -> Self {
        Listing {
            count: items.len(),
            items,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Submitted {
    pub transaction_id: TransactionId,
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct InvestBody {
    pub plan_id: PlanId,
}

#[derive(Debug, Deserialize)]
pub struct DepositBody {
    pub amount: Amount,
    pub method: String,
    pub external_reference: Option<String>,
    pub evidence_file_name: String,
    /// Proof of payment, standard base64.
    pub evidence_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalBody {
    pub amount: Amount,
    pub method: String,
    pub destination: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: AccountStatus,
}

#[derive(Debug, Deserialize)]
pub struct CreditBody {
    pub amount: Amount,
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

// ─────────────────────────────────────────────────────────
// User handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /accounts`
pub async fn create_account(
    State(state): SharedState,
    Json(body): Json<NewAccount>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let account = state.platform.register_account(body).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// `GET /me`
pub async fn me(State(state): SharedState, CurrentAccount(id): CurrentAccount) -> ApiResult<Account> {
    Ok(Json(state.platform.get_account(id).await?))
}

/// `GET /me/referrals`
pub async fn my_referrals(
    State(state): SharedState,
    CurrentAccount(id): CurrentAccount,
) -> ApiResult<Listing<Referral>> {
    Ok(Json(state.platform.list_referrals(id).await?.into()))
}

/// `GET /me/transactions`
pub async fn my_transactions(
    State(state): SharedState,
    CurrentAccount(id): CurrentAccount,
) -> ApiResult<Listing<Transaction>> {
    Ok(Json(state.platform.transaction_history(id).await?.into()))
}

/// `GET /plans`
pub async fn active_plans(State(state): SharedState) -> ApiResult<Listing<Plan>> {
    Ok(Json(state.platform.list_active_plans().await?.into()))
}

/// `GET /deposit-info`
pub async fn deposit_info(
    State(state): SharedState,
    CurrentAccount(_): CurrentAccount,
) -> ApiResult<DepositAccounts> {
    Ok(Json(state.platform.deposit_accounts().await?))
}

/// `POST /invest`
pub async fn invest(
    State(state): SharedState,
    CurrentAccount(id): CurrentAccount,
    Json(body): Json<InvestBody>,
) -> ApiResult<InvestmentReceipt> {
    Ok(Json(state.platform.invest(id, body.plan_id).await?))
}

/// `GET /check-in`
pub async fn check_in_status(
    State(state): SharedState,
    CurrentAccount(id): CurrentAccount,
) -> ApiResult<CheckInStatus> {
    Ok(Json(state.platform.check_in_status(id).await?))
}

/// `POST /check-in`
pub async fn check_in(
    State(state): SharedState,
    CurrentAccount(id): CurrentAccount,
) -> ApiResult<CheckInReceipt> {
    Ok(Json(state.platform.check_in(id).await?))
}

/// `POST /deposits`
pub async fn request_deposit(
    State(state): SharedState,
    CurrentAccount(id): CurrentAccount,
    payload: Result<Json<DepositBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Submitted>), ApiError> {
    let Json(body) = payload?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body.evidence_base64.trim())
        .map_err(|_| LedgerError::Validation("evidence is not valid base64".into()))?;
    let transaction_id = state
        .platform
        .request_deposit(
            id,
            body.amount,
            body.method,
            body.external_reference,
            EvidenceUpload {
                file_name: body.evidence_file_name,
                bytes,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Submitted {
            transaction_id,
            status: "Pending",
        }),
    ))
}

/// `POST /withdrawals`
pub async fn request_withdrawal(
    State(state): SharedState,
    CurrentAccount(id): CurrentAccount,
    Json(body): Json<WithdrawalBody>,
) -> Result<(StatusCode, Json<Submitted>), ApiError> {
    let transaction_id = state
        .platform
        .request_withdrawal(id, body.amount, body.method, body.destination)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Submitted {
            transaction_id,
            status: "Pending",
        }),
    ))
}

// ─────────────────────────────────────────────────────────
// Admin handlers
// ─────────────────────────────────────────────────────────

/// `GET /admin/stats`
pub async fn admin_stats(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
) -> ApiResult<DashboardStats> {
    let stats = state.platform.dashboard_stats().await.map_err(ApiError::admin)?;
    Ok(Json(stats))
}

/// `GET /admin/accounts?search=`
pub async fn admin_accounts(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Listing<Account>> {
    let accounts = state
        .platform
        .list_accounts(query.search)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(accounts.into()))
}

/// `GET /admin/accounts/:id`
pub async fn admin_account_detail(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
    Path(account_id): Path<AccountId>,
) -> ApiResult<AccountDetail> {
    let detail = state
        .platform
        .account_detail(account_id)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(detail))
}

/// `PUT /admin/accounts/:id/status`
pub async fn admin_set_status(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
    Path(account_id): Path<AccountId>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Account> {
    let account = state
        .platform
        .set_account_status(account_id, body.status)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(account))
}

/// `POST /admin/accounts/:id/credit`
pub async fn admin_credit(
    State(state): SharedState,
    CurrentAdmin(admin): CurrentAdmin,
    Path(account_id): Path<AccountId>,
    Json(body): Json<CreditBody>,
) -> ApiResult<CreditReceipt> {
    let receipt = state
        .platform
        .admin_credit(account_id, body.amount, body.reason, admin)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(receipt))
}

/// `GET /admin/accounts/:id/audit`
pub async fn admin_audit(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
    Path(account_id): Path<AccountId>,
) -> ApiResult<ledger_core::invariants::BalanceAudit> {
    let audit = state
        .platform
        .audit_account(account_id)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(audit))
}

/// `GET /admin/plans`
pub async fn admin_plans(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
) -> ApiResult<Listing<Plan>> {
    let plans = state.platform.list_all_plans().await.map_err(ApiError::admin)?;
    Ok(Json(plans.into()))
}

/// `POST /admin/plans`
pub async fn admin_create_plan(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
    Json(body): Json<NewPlan>,
) -> Result<(StatusCode, Json<Plan>), ApiError> {
    let plan = state.platform.create_plan(body).await.map_err(ApiError::admin)?;
    Ok((StatusCode::CREATED, Json(plan)))
}

/// `PUT /admin/plans/:id`
pub async fn admin_update_plan(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
    Path(plan_id): Path<PlanId>,
    Json(body): Json<PlanUpdate>,
) -> ApiResult<Plan> {
    let plan = state
        .platform
        .update_plan(plan_id, body)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(plan))
}

async fn pending(state: &ApiState, kind: TxType) -> ApiResult<Listing<PendingRequest>> {
    let queue = state.platform.list_pending(kind).await.map_err(ApiError::admin)?;
    Ok(Json(queue.into()))
}

/// `GET /admin/deposits/pending`
pub async fn pending_deposits(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
) -> ApiResult<Listing<PendingRequest>> {
    pending(&state, TxType::Deposit).await
}

/// `GET /admin/withdrawals/pending`
pub async fn pending_withdrawals(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
) -> ApiResult<Listing<PendingRequest>> {
    pending(&state, TxType::Withdrawal).await
}

/// `POST /admin/deposits/:id/approve`
pub async fn approve_deposit(
    State(state): SharedState,
    CurrentAdmin(admin): CurrentAdmin,
    Path(id): Path<TransactionId>,
) -> ApiResult<Decision> {
    let decision = state
        .platform
        .approve_deposit(id, admin)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(decision))
}

/// `POST /admin/deposits/:id/reject`
pub async fn reject_deposit(
    State(state): SharedState,
    CurrentAdmin(admin): CurrentAdmin,
    Path(id): Path<TransactionId>,
) -> ApiResult<Transaction> {
    let rejected = state
        .platform
        .reject_deposit(id, admin)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(rejected))
}

/// `POST /admin/withdrawals/:id/approve`
pub async fn approve_withdrawal(
    State(state): SharedState,
    CurrentAdmin(admin): CurrentAdmin,
    Path(id): Path<TransactionId>,
) -> ApiResult<Decision> {
    let decision = state
        .platform
        .approve_withdrawal(id, admin)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(decision))
}

/// `POST /admin/withdrawals/:id/reject`
pub async fn reject_withdrawal(
    State(state): SharedState,
    CurrentAdmin(admin): CurrentAdmin,
    Path(id): Path<TransactionId>,
) -> ApiResult<Transaction> {
    let rejected = state
        .platform
        .reject_withdrawal(id, admin)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(rejected))
}

/// `GET /admin/transactions?search=`
pub async fn admin_transactions(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Listing<Transaction>> {
    let entries = state
        .platform
        .search_transactions(query.search)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(entries.into()))
}

/// `GET /admin/settings/deposit-accounts`
pub async fn admin_deposit_accounts(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
) -> ApiResult<DepositAccounts> {
    let settings = state.platform.deposit_accounts().await.map_err(ApiError::admin)?;
    Ok(Json(settings))
}

/// `PUT /admin/settings/deposit-accounts`
pub async fn admin_update_deposit_accounts(
    State(state): SharedState,
    CurrentAdmin(_): CurrentAdmin,
    Json(body): Json<DepositAccounts>,
) -> ApiResult<DepositAccounts> {
    let settings = state
        .platform
        .update_deposit_accounts(body)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(settings))
}
