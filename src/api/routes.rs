//! JSON endpoints for the order, payload, changeover, and anomaly
//! operations exposed by components F, G, I. See `SPEC_FULL.md` §6.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use edge_types::{OrderStatus, OrderType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::state::AppState;
use crate::poller;
use crate::store::admin::login as admin_login;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn err(status: StatusCode, message: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: message.to_string() }))
}

const SESSION_HEADER: &str = "x-session-token";

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    let token = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| err(StatusCode::UNAUTHORIZED, "missing session token"))?;
    if state.sessions.validate(token).await {
        Ok(())
    } else {
        Err(err(StatusCode::UNAUTHORIZED, "invalid or expired session"))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/orders/retrieve", post(create_retrieve_order))
        .route("/api/orders/store", post(create_store_order))
        .route("/api/orders/move", post(create_move_order))
        .route("/api/orders/:id/submit", post(submit_order))
        .route("/api/orders/:id/confirm-count", post(confirm_count))
        .route("/api/orders/:id/confirm-delivery", post(confirm_delivery))
        .route("/api/orders/:id/abort", post(abort_order))
        .route("/api/orders/:id/redirect", post(redirect_order))
        .route("/api/payloads/:id/reorder-settings", put(update_reorder_settings))
        .route("/api/changeover/:line_id/start", post(changeover_start))
        .route("/api/changeover/:line_id/advance", post(changeover_advance))
        .route("/api/changeover/:line_id/cancel", post(changeover_cancel))
        .route("/api/snapshots/:id/confirm", post(confirm_snapshot))
        .route("/api/snapshots/:id/dismiss", post(dismiss_snapshot))
        .route("/healthz", get(healthz))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ErrorResponse>)> {
    let ok = admin_login(state.admin.as_ref(), &req.username, &req.password)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    if !ok {
        return Err(err(StatusCode::UNAUTHORIZED, "invalid credentials"));
    }
    let token = state.sessions.issue(&req.username).await;
    Ok(Json(LoginResponse { token }))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        state.sessions.revoke(token).await;
    }
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct CreateRetrieveRequest {
    payload_id: Option<i64>,
    retrieve_empty: bool,
    quantity: f64,
    delivery_node: Option<String>,
    staging_node: Option<String>,
    load_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    auto_confirm: bool,
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    id: i64,
    uuid: Uuid,
    order_type: OrderType,
    status: OrderStatus,
}

async fn create_retrieve_order(
    State(state): State<AppState>,
    Json(req): Json<CreateRetrieveRequest>,
) -> Result<Json<OrderResponse>, (StatusCode, Json<ErrorResponse>)> {
    let order = state
        .orders
        .create_retrieve_order(
            Uuid::new_v4(),
            req.payload_id,
            req.retrieve_empty,
            req.quantity,
            req.delivery_node,
            req.staging_node,
            req.load_type,
            req.description,
            req.auto_confirm,
        )
        .await
        .map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(Json(OrderResponse { id: order.id, uuid: order.uuid, order_type: order.order_type, status: order.status }))
}

#[derive(Debug, Deserialize)]
struct CreateStoreRequest {
    payload_id: Option<i64>,
    quantity: f64,
    pickup_node: Option<String>,
}

async fn create_store_order(
    State(state): State<AppState>,
    Json(req): Json<CreateStoreRequest>,
) -> Result<Json<OrderResponse>, (StatusCode, Json<ErrorResponse>)> {
    let order = state
        .orders
        .create_store_order(Uuid::new_v4(), req.payload_id, req.quantity, req.pickup_node)
        .await
        .map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(Json(OrderResponse { id: order.id, uuid: order.uuid, order_type: order.order_type, status: order.status }))
}

#[derive(Debug, Deserialize)]
struct CreateMoveRequest {
    payload_id: Option<i64>,
    quantity: f64,
    pickup_node: Option<String>,
    delivery_node: Option<String>,
}

async fn create_move_order(
    State(state): State<AppState>,
    Json(req): Json<CreateMoveRequest>,
) -> Result<Json<OrderResponse>, (StatusCode, Json<ErrorResponse>)> {
    let order = state
        .orders
        .create_move_order(Uuid::new_v4(), req.payload_id, req.quantity, req.pickup_node, req.delivery_node)
        .await
        .map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(Json(OrderResponse { id: order.id, uuid: order.uuid, order_type: order.order_type, status: order.status }))
}

async fn submit_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.orders.submit_order(id).await.map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn confirm_count(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.orders.confirm_count(id).await.map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ConfirmDeliveryRequest {
    final_count: f64,
}

async fn confirm_delivery(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ConfirmDeliveryRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.orders.confirm_delivery(id, req.final_count).await.map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn abort_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.orders.abort_order(id).await.map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct RedirectRequest {
    new_delivery: String,
}

async fn redirect_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RedirectRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.orders.redirect_order(id, req.new_delivery).await.map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ReorderSettingsRequest {
    reorder_point: i64,
    reorder_qty: f64,
    auto_reorder: bool,
}

async fn update_reorder_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<ReorderSettingsRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    require_admin(&state, &headers).await?;
    state
        .payloads
        .update_reorder_settings(id, req.reorder_point, req.reorder_qty, req.auto_reorder)
        .await
        .map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ChangeoverStartRequest {
    from_style: Option<i64>,
    to_style: Option<i64>,
    operator: Option<String>,
}

async fn changeover_start(
    State(state): State<AppState>,
    Path(line_id): Path<i64>,
    Json(req): Json<ChangeoverStartRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state
        .changeover
        .start(line_id, req.from_style, req.to_style, req.operator.as_deref())
        .await
        .map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Default)]
struct OperatorRequest {
    #[serde(default)]
    operator: Option<String>,
}

async fn changeover_advance(
    State(state): State<AppState>,
    Path(line_id): Path<i64>,
    body: Option<Json<OperatorRequest>>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let operator = body.map(|b| b.0.operator).unwrap_or_default();
    state.changeover.advance(line_id, operator.as_deref()).await.map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn changeover_cancel(
    State(state): State<AppState>,
    Path(line_id): Path<i64>,
    body: Option<Json<OperatorRequest>>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let operator = body.map(|b| b.0.operator).unwrap_or_default();
    state.changeover.cancel(line_id, operator.as_deref()).await.map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn confirm_snapshot(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    poller::confirm_snapshot(state.reporting_points.as_ref(), id)
        .await
        .map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn dismiss_snapshot(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    poller::dismiss_snapshot(state.reporting_points.as_ref(), id)
        .await
        .map_err(|e| err(StatusCode::BAD_REQUEST, e))?;
    Ok(StatusCode::NO_CONTENT)
}
