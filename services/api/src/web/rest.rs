//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.
//!
//! These routes are a thin shell over the ledger: every balance rule lives in
//! `ExpenseLedgerService` and `IncomeService`, the handlers only translate
//! between JSON and `LedgerError`.

use crate::web::middleware::CurrentUser;
use crate::web::protocol::{
    CreateExpenseRequest, CreateIncomeRequest, ExpenseResponse, HealthResponse, IncomeResponse, UpdateExpenseRequest,
    UpdateIncomeRequest,
};
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::Utc;
use expense_tracker_core::domain::{ExpenseUpdate, IncomeUpdate, NewExpense, NewIncome, Origin};
use expense_tracker_core::LedgerError;
use std::sync::Arc;
use tracing::error;
use utoipa::OpenApi;
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        list_incomes_handler,
        create_income_handler,
        get_income_handler,
        update_income_handler,
        delete_income_handler,
        list_expenses_handler,
        create_expense_handler,
        update_expense_handler,
        delete_expense_handler,
    ),
    components(
        schemas(
            HealthResponse,
            CreateIncomeRequest,
            UpdateIncomeRequest,
            CreateExpenseRequest,
            UpdateExpenseRequest,
            IncomeResponse,
            ExpenseResponse
        )
    ),
    tags(
        (name = "Expense Tracker API", description = "Dashboard endpoints over the income and expense ledger.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Error Mapping
//=========================================================================================

type HandlerError = (StatusCode, String);

fn ledger_error_response(e: LedgerError) -> HandlerError {
    let message = e.to_string();
    match e {
        LedgerError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        LedgerError::InvalidAmount => (StatusCode::BAD_REQUEST, message),
        LedgerError::InsufficientFunds | LedgerError::IncomeInUse | LedgerError::Conflict => {
            (StatusCode::CONFLICT, message)
        }
        LedgerError::NotFound => (StatusCode::NOT_FOUND, message),
        LedgerError::Unauthorized => (StatusCode::FORBIDDEN, message),
        LedgerError::Port(_) => {
            error!("Ledger storage failure: {}", message);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

//=========================================================================================
// Health
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

//=========================================================================================
// Income Handlers
//=========================================================================================

/// List the user's incomes, most recent first.
#[utoipa::path(
    get,
    path = "/incomes",
    responses(
        (status = 200, description = "Incomes of the user", body = Vec<IncomeResponse>),
        (status = 401, description = "Missing or invalid x-user-id header")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn list_incomes_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, HandlerError> {
    let incomes = state
        .incomes
        .list_incomes(user_id)
        .await
        .map_err(ledger_error_response)?;
    Ok(Json(
        incomes.into_iter().map(IncomeResponse::from).collect::<Vec<_>>(),
    ))
}

/// Create an income. Its remaining balance starts at the full amount.
#[utoipa::path(
    post,
    path = "/incomes",
    request_body = CreateIncomeRequest,
    responses(
        (status = 201, description = "Income created", body = IncomeResponse),
        (status = 400, description = "Invalid income data"),
        (status = 401, description = "Missing or invalid x-user-id header")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn create_income_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(req): Json<CreateIncomeRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let income = state
        .incomes
        .create_income(
            NewIncome {
                name: req.name,
                source: req.source,
                notes: req.notes,
                amount: req.amount,
                date: req.date,
                origin: Origin::Website,
            },
            user_id,
        )
        .await
        .map_err(ledger_error_response)?;
    Ok((StatusCode::CREATED, Json(IncomeResponse::from(income))))
}

/// Fetch one income.
#[utoipa::path(
    get,
    path = "/incomes/{id}",
    responses(
        (status = 200, description = "The income", body = IncomeResponse),
        (status = 404, description = "No such income for this user")
    ),
    params(
        ("id" = Uuid, Path, description = "Income id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn get_income_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(income_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let income = state
        .incomes
        .get_income(income_id, user_id)
        .await
        .map_err(ledger_error_response)?;
    Ok(Json(IncomeResponse::from(income)))
}

/// Update an income. A new amount shifts the remaining balance by the same delta.
#[utoipa::path(
    put,
    path = "/incomes/{id}",
    request_body = UpdateIncomeRequest,
    responses(
        (status = 200, description = "Income updated", body = IncomeResponse),
        (status = 400, description = "Amount below what is already spent, or invalid data"),
        (status = 404, description = "No such income for this user")
    ),
    params(
        ("id" = Uuid, Path, description = "Income id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn update_income_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(income_id): Path<Uuid>,
    Json(req): Json<UpdateIncomeRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let update = IncomeUpdate {
        name: req.name,
        source: req.source,
        notes: req.notes,
        amount: req.amount,
        date: req.date,
    };
    let income = state
        .incomes
        .edit_income(update, income_id, user_id)
        .await
        .map_err(ledger_error_response)?;
    Ok(Json(IncomeResponse::from(income)))
}

/// Delete an income that no expense draws from.
#[utoipa::path(
    delete,
    path = "/incomes/{id}",
    responses(
        (status = 204, description = "Income deleted"),
        (status = 404, description = "No such income"),
        (status = 409, description = "Income is still referenced by expenses")
    ),
    params(
        ("id" = Uuid, Path, description = "Income id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_income_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(income_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    state
        .incomes
        .delete_income(income_id, user_id)
        .await
        .map_err(ledger_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Expense Handlers
//=========================================================================================

/// List the user's expenses, most recent first.
#[utoipa::path(
    get,
    path = "/expenses",
    responses(
        (status = 200, description = "Expenses of the user", body = Vec<ExpenseResponse>),
        (status = 401, description = "Missing or invalid x-user-id header")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn list_expenses_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, HandlerError> {
    let expenses = state
        .ledger
        .list_expenses(user_id)
        .await
        .map_err(ledger_error_response)?;
    Ok(Json(
        expenses.into_iter().map(ExpenseResponse::from).collect::<Vec<_>>(),
    ))
}

/// Record an expense from the dashboard. Without `source_income_id` the most
/// recent income that still covers the amount pays for it.
#[utoipa::path(
    post,
    path = "/expenses",
    request_body = CreateExpenseRequest,
    responses(
        (status = 201, description = "Expense recorded", body = ExpenseResponse),
        (status = 400, description = "Invalid expense data"),
        (status = 403, description = "Income belongs to another user"),
        (status = 404, description = "No such income"),
        (status = 409, description = "Insufficient remaining balance")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn create_expense_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(req): Json<CreateExpenseRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let data = NewExpense {
        name: req.name,
        amount: req.amount,
        category: req.category,
        date: Some(req.date.unwrap_or_else(Utc::now)),
        source_income_id: req.source_income_id,
        origin: Some(Origin::Website),
        confidence: None,
    };
    let expense = state
        .ledger
        .create_expense(data, user_id)
        .await
        .map_err(ledger_error_response)?;
    Ok((StatusCode::CREATED, Json(ExpenseResponse::from(expense))))
}

/// Update an expense, moving money between incomes when needed.
#[utoipa::path(
    put,
    path = "/expenses/{id}",
    request_body = UpdateExpenseRequest,
    responses(
        (status = 200, description = "Expense updated", body = ExpenseResponse),
        (status = 400, description = "Invalid expense data"),
        (status = 403, description = "Expense belongs to another user"),
        (status = 404, description = "No such expense or income"),
        (status = 409, description = "Insufficient remaining balance, or the expense changed meanwhile")
    ),
    params(
        ("id" = Uuid, Path, description = "Expense id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn update_expense_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(expense_id): Path<Uuid>,
    Json(req): Json<UpdateExpenseRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let update = ExpenseUpdate {
        name: req.name,
        amount: req.amount,
        category: req.category,
        date: req.date,
        source_income_id: req.source_income_id,
    };
    let expense = state
        .ledger
        .edit_expense(update, expense_id, user_id)
        .await
        .map_err(ledger_error_response)?;
    Ok(Json(ExpenseResponse::from(expense)))
}

/// Delete an expense and refund its income.
#[utoipa::path(
    delete,
    path = "/expenses/{id}",
    responses(
        (status = 204, description = "Expense deleted"),
        (status = 404, description = "No such expense"),
        (status = 409, description = "The expense changed meanwhile")
    ),
    params(
        ("id" = Uuid, Path, description = "Expense id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_expense_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(expense_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    state
        .ledger
        .delete_expense(expense_id, user_id)
        .await
        .map_err(ledger_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
