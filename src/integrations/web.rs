//! 顾客 / 管理 HTTP 接口（JSON）
//!
//! 响应体统一为 `{ "success": bool, ... }`；失败时 `message` 只包含按错误种类生成的文案。
//! 管理接口的登录鉴权交给前置代理。

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::admin::AdminDesk;
use crate::checkout::{CheckoutFlow, CheckoutRequest};
use crate::core::DeskError;
use crate::order::{OrderFilter, OrderId, OrderStatus};

pub struct WebState {
    pub checkout: Arc<CheckoutFlow>,
    pub admin: Arc<AdminDesk>,
}

/// 业务错误或请求解析失败 -> HTTP 响应
pub enum ApiError {
    Desk(DeskError),
    /// 请求体 / 查询参数无法解析，保留 axum 给出的状态码
    Malformed { status: StatusCode, detail: String },
}

impl From<DeskError> for ApiError {
    fn from(err: DeskError) -> Self {
        ApiError::Desk(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Malformed {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Malformed {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Desk(err) => {
                let status = match err {
                    DeskError::Validation(_) => StatusCode::BAD_REQUEST,
                    DeskError::NotFound(_) => StatusCode::NOT_FOUND,
                    DeskError::Unauthorized(_) => StatusCode::FORBIDDEN,
                    DeskError::AllocationExhausted(_) | DeskError::Store(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status.is_server_error() {
                    tracing::error!("Request failed: {}", err);
                }
                (status, err.user_message())
            }
            ApiError::Malformed { status, detail } => {
                tracing::warn!("Rejected malformed request: {}", detail);
                (status, "Invalid request.".to_string())
            }
        };
        let body = json!({ "success": false, "message": message });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

fn parse_id(raw: &str) -> Result<OrderId, ApiError> {
    OrderId::from_str(raw).map_err(|e| ApiError::Desk(e.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMessageRequest {
    pub order_id: String,
    pub user_message: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<String>,
    pub archived: Option<bool>,
    pub unread: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<usize>,
}

impl OrdersQuery {
    fn into_filter(self) -> Result<OrderFilter, DeskError> {
        let status = self
            .status
            .as_deref()
            .map(OrderStatus::from_str)
            .transpose()?;
        Ok(OrderFilter {
            status,
            archived: self.archived,
            unread: self.unread,
            search: self.search.filter(|s| !s.trim().is_empty()),
            limit: self.limit,
        })
    }
}

pub fn create_router(state: Arc<WebState>) -> Router {
    Router::new()
        .route("/api/checkout", post(checkout))
        .route("/api/track-order/:number", get(track_order))
        .route("/api/add-message", post(add_message))
        .route("/admin/orders", get(list_orders))
        .route("/admin/orders/:id/status", post(update_status))
        .route("/admin/orders/:id/messages", post(send_message))
        .route("/admin/orders/:id/archive", post(archive_order))
        .route("/admin/orders/:id/delete-archived", post(delete_archived))
        .with_state(state)
}

/// POST /api/checkout
async fn checkout(
    State(state): State<Arc<WebState>>,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let order = state.checkout.place_order(req).await?;
    Ok(Json(json!({ "success": true, "orderNumber": order.order_number })))
}

/// GET /api/track-order/:number
async fn track_order(State(state): State<Arc<WebState>>, Path(number): Path<String>) -> ApiResult {
    let order = state.checkout.track(&number).await?;
    Ok(Json(json!({ "success": true, "order": order })))
}

/// POST /api/add-message
async fn add_message(
    State(state): State<Arc<WebState>>,
    body: Result<Json<AddMessageRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let id = parse_id(&req.order_id)?;
    let order = state.checkout.add_customer_message(id, &req.user_message).await?;
    Ok(Json(json!({ "success": true, "messages": order.messages })))
}

/// GET /admin/orders
async fn list_orders(
    State(state): State<Arc<WebState>>,
    query: Result<Query<OrdersQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let filter = query.into_filter()?;
    let orders = state.admin.dashboard(&filter).await?;
    Ok(Json(json!({ "success": true, "orders": orders })))
}

async fn update_status(
    State(state): State<Arc<WebState>>,
    Path(id): Path<String>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let order = state.admin.update_status(parse_id(&id)?, &req.status).await?;
    Ok(Json(json!({ "success": true, "order": order })))
}

async fn send_message(
    State(state): State<Arc<WebState>>,
    Path(id): Path<String>,
    body: Result<Json<TextRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let order = state.admin.send_operator_message(parse_id(&id)?, &req.text).await?;
    Ok(Json(json!({ "success": true, "messages": order.messages })))
}

async fn archive_order(State(state): State<Arc<WebState>>, Path(id): Path<String>) -> ApiResult {
    let order = state.admin.archive(parse_id(&id)?).await?;
    Ok(Json(json!({ "success": true, "order": order })))
}

async fn delete_archived(State(state): State<Arc<WebState>>, Path(id): Path<String>) -> ApiResult {
    let order = state.admin.delete_archived(parse_id(&id)?).await?;
    Ok(Json(json!({ "success": true, "orderNumber": order.order_number })))
}
