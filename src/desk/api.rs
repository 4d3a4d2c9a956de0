use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::StatusCode,
    http::request::Parts,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use helpdesk_common::{Priority, Role, TicketStatus, Transition};
use serde::Deserialize;

use super::auth::CurrentUser;
use super::db::DbHandle;
#[cfg(test)]
use super::db::DeskDb;
use super::models::*;
use super::service;
use crate::config::HelpdeskConfig;
use crate::errors::HelpdeskError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub config: HelpdeskConfig,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `assignee_id` must be present; an explicit `null` unassigns.
#[derive(Deserialize)]
pub struct AssignRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub assignee_id: Option<Option<i64>>,
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub body: String,
}

/// Query string of `GET /api/tickets`. Codes arrive as strings so a bad
/// value can be reported against its field.
#[derive(Debug, Default, Deserialize)]
pub struct TicketQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub client_id: Option<i64>,
    pub project_id: Option<i64>,
    pub assignee_id: Option<i64>,
    pub q: Option<String>,
    pub page: Option<u32>,
}

impl TicketQuery {
    fn into_filter(self) -> Result<(TicketFilter, u32), HelpdeskError> {
        let status = non_empty(self.status)
            .map(|s| TicketStatus::from_str(&s))
            .transpose()
            .map_err(|e| HelpdeskError::validation("status", e))?;
        let priority = non_empty(self.priority)
            .map(|p| Priority::from_str(&p))
            .transpose()
            .map_err(|e| HelpdeskError::validation("priority", e))?;
        let filter = TicketFilter {
            status,
            priority,
            client_id: self.client_id,
            project_id: self.project_id,
            assignee_id: self.assignee_id,
            q: non_empty(self.q),
        };
        Ok((filter, self.page.unwrap_or(1)))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectQuery {
    pub client_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub role: Option<String>,
    #[serde(default)]
    pub active: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ── Extractors ────────────────────────────────────────────────────────
//
// axum's own extractors reject with plain-text bodies. These wrappers
// turn every rejection into an `ApiError` so clients always get JSON.

pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

pub struct ApiPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest {
        message: String,
        field: Option<&'static str>,
    },
    Conflict(String),
    Internal(String),
}

impl From<HelpdeskError> for ApiError {
    fn from(err: HelpdeskError) -> Self {
        let message = err.to_string();
        match err {
            HelpdeskError::Unauthorized => ApiError::Unauthorized(message),
            HelpdeskError::Forbidden(_) => ApiError::Forbidden(message),
            HelpdeskError::NotFound { .. } => ApiError::NotFound(message),
            HelpdeskError::Validation { field, .. } => ApiError::BadRequest {
                message,
                field: Some(field),
            },
            HelpdeskError::InvalidTransition { .. } | HelpdeskError::Conflict(_) => {
                ApiError::Conflict(message)
            }
            HelpdeskError::LockPoisoned | HelpdeskError::Other(_) => {
                tracing::error!(error = ?err, "Request failed");
                ApiError::Internal("Internal server error".into())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest {
            message: rejection.body_text(),
            field: None,
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest {
            message: rejection.body_text(),
            field: None,
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest {
            message: rejection.body_text(),
            field: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, serde_json::json!({"error": msg}))
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, serde_json::json!({"error": msg})),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({"error": msg})),
            ApiError::BadRequest { message, field } => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": message, "field": field}),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, serde_json::json!({"error": msg})),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"error": msg}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", get(logout).post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/dashboard", get(dashboard))
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/{id}", get(get_ticket).patch(update_ticket))
        .route("/api/tickets/{id}/assign", post(assign_ticket))
        .route("/api/tickets/{id}/start", post(start_ticket))
        .route("/api/tickets/{id}/resolve", post(resolve_ticket))
        .route("/api/tickets/{id}/close", post(close_ticket))
        .route("/api/tickets/{id}/reopen", post(reopen_ticket))
        .route("/api/tickets/{id}/comments", post(add_comment))
        .route("/api/clients", get(list_clients).post(create_client))
        .route(
            "/api/clients/{id}",
            get(get_client).patch(update_client).delete(delete_client),
        )
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/{id}", patch(update_user))
        .route("/health", get(health_check))
}

// ── Health ────────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

// ── Auth handlers ─────────────────────────────────────────────────────

async fn login(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let ttl = state.config.auth.session_ttl_hours;
    let session = service::login(&state.db, &req.username, &req.password, ttl).await?;
    Ok(Json(session))
}

async fn logout(
    State(state): State<SharedState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let token_hash = user.token_hash;
    state
        .db
        .call(move |db| service::logout(db, &token_hash))
        .await?;
    Ok(Json(serde_json::json!({"status": "logged_out"})))
}

async fn me(user: CurrentUser) -> Json<User> {
    Json(user.user)
}

// ── Dashboard ─────────────────────────────────────────────────────────

async fn dashboard(
    State(state): State<SharedState>,
    user: CurrentUser,
) -> Result<Json<Dashboard>, ApiError> {
    let actor = user.actor();
    let board = state
        .db
        .call(move |db| service::dashboard(db, &actor))
        .await?;
    Ok(Json(board))
}

// ── Ticket handlers ───────────────────────────────────────────────────

async fn list_tickets(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<TicketQuery>,
) -> Result<Json<TicketPage>, ApiError> {
    let actor = user.actor();
    let (filter, page) = query.into_filter()?;
    let page_size = state.config.tickets.page_size;
    let tickets = state
        .db
        .call(move |db| service::list_tickets(db, &actor, &filter, page, page_size))
        .await?;
    Ok(Json(tickets))
}

async fn create_ticket(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewTicket>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = user.actor();
    let ticket = state
        .db
        .call(move |db| service::create_ticket(db, &actor, req))
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn get_ticket(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<TicketDetail>, ApiError> {
    let actor = user.actor();
    let detail = state
        .db
        .call(move |db| service::get_ticket(db, &actor, id))
        .await?;
    Ok(Json(detail))
}

async fn update_ticket(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<TicketChanges>,
) -> Result<Json<Ticket>, ApiError> {
    let actor = user.actor();
    let ticket = state
        .db
        .call(move |db| service::update_ticket(db, &actor, id, req))
        .await?;
    Ok(Json(ticket))
}

async fn assign_ticket(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<AssignRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let actor = user.actor();
    let assignee_id = req.assignee_id.ok_or_else(|| {
        HelpdeskError::validation("assignee_id", "is required (null to unassign)")
    })?;
    let ticket = state
        .db
        .call(move |db| service::assign_ticket(db, &actor, id, assignee_id))
        .await?;
    Ok(Json(ticket))
}

async fn apply_transition(
    state: SharedState,
    user: CurrentUser,
    id: i64,
    transition: Transition,
) -> Result<Json<Ticket>, ApiError> {
    let actor = user.actor();
    let ticket = state
        .db
        .call(move |db| service::transition_ticket(db, &actor, id, transition))
        .await?;
    Ok(Json(ticket))
}

async fn start_ticket(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Ticket>, ApiError> {
    apply_transition(state, user, id, Transition::Start).await
}

async fn resolve_ticket(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Ticket>, ApiError> {
    apply_transition(state, user, id, Transition::Resolve).await
}

async fn close_ticket(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Ticket>, ApiError> {
    apply_transition(state, user, id, Transition::Close).await
}

async fn reopen_ticket(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Ticket>, ApiError> {
    apply_transition(state, user, id, Transition::Reopen).await
}

async fn add_comment(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = user.actor();
    let comment = state
        .db
        .call(move |db| service::add_comment(db, &actor, id, &req.body))
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

// ── Client handlers ───────────────────────────────────────────────────

async fn list_clients(
    State(state): State<SharedState>,
    user: CurrentUser,
) -> Result<Json<Vec<Client>>, ApiError> {
    let actor = user.actor();
    let clients = state
        .db
        .call(move |db| service::list_clients(db, &actor))
        .await?;
    Ok(Json(clients))
}

async fn create_client(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewClient>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = user.actor();
    let client = state
        .db
        .call(move |db| service::create_client(db, &actor, req))
        .await?;
    Ok((StatusCode::CREATED, Json(client)))
}

async fn get_client(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ClientDetail>, ApiError> {
    let actor = user.actor();
    let client = state
        .db
        .call(move |db| service::get_client(db, &actor, id))
        .await?;
    Ok(Json(client))
}

async fn update_client(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<ClientChanges>,
) -> Result<Json<Client>, ApiError> {
    let actor = user.actor();
    let client = state
        .db
        .call(move |db| service::update_client(db, &actor, id, req))
        .await?;
    Ok(Json(client))
}

async fn delete_client(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    let actor = user.actor();
    state
        .db
        .call(move |db| service::delete_client(db, &actor, id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Project handlers ──────────────────────────────────────────────────

async fn list_projects(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<ProjectQuery>,
) -> Result<Json<Vec<Project>>, ApiError> {
    let actor = user.actor();
    let projects = state
        .db
        .call(move |db| service::list_projects(db, &actor, query.client_id))
        .await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewProject>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = user.actor();
    let project = state
        .db
        .call(move |db| service::create_project(db, &actor, req))
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Project>, ApiError> {
    let actor = user.actor();
    let project = state
        .db
        .call(move |db| service::get_project(db, &actor, id))
        .await?;
    Ok(Json(project))
}

async fn update_project(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<ProjectChanges>,
) -> Result<Json<Project>, ApiError> {
    let actor = user.actor();
    let project = state
        .db
        .call(move |db| service::update_project(db, &actor, id, req))
        .await?;
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    let actor = user.actor();
    state
        .db
        .call(move |db| service::delete_project(db, &actor, id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── User handlers ─────────────────────────────────────────────────────

async fn list_users(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<UserQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    let actor = user.actor();
    let role = non_empty(query.role)
        .map(|r| Role::from_str(&r))
        .transpose()
        .map_err(|e| HelpdeskError::validation("role", e))?;
    let active_only = query.active;
    let users = state
        .db
        .call(move |db| service::list_users(db, &actor, role, active_only))
        .await?;
    Ok(Json(users))
}

async fn create_user(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = user.actor();
    let created = service::create_user(&state.db, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_user(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UserChanges>,
) -> Result<Json<User>, ApiError> {
    let actor = user.actor();
    let updated = service::update_user(&state.db, &actor, id, req).await?;
    Ok(Json(updated))
}

// ── Tests ─────────────────────────────────────────────────────────────
