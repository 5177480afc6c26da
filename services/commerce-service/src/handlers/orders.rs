use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::{CreateOrderCommand, Order, OrderFilter, OrderStatus};
use serde::Deserialize;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListOrdersParams {
    pub user_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TotalPriceParams {
    pub total_price: Option<String>,
}

pub async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<CreateOrderCommand>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(request) = payload?;
    info!("Received create order request for user: {}", request.user_id);
    let order = state.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orders.get_order(id).await?))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let filter = OrderFilter {
        user_id: params.user_id,
        status: params
            .status
            .as_deref()
            .map(str::parse::<OrderStatus>)
            .transpose()?,
    };

    Ok(Json(state.orders.list_orders(&filter).await?))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<StatusParams>,
) -> Result<Json<Order>, ApiError> {
    let status: OrderStatus = params
        .status
        .ok_or_else(|| ApiError::BadRequest("status query parameter is required".to_string()))?
        .parse()?;

    info!(order_id = id, status = %status, "Received order status update");
    Ok(Json(state.orders.update_order_status(id, status).await?))
}

pub async fn update_order_total_price(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<TotalPriceParams>,
) -> Result<Json<Order>, ApiError> {
    let raw = params.total_price.ok_or_else(|| {
        ApiError::BadRequest("total_price query parameter is required".to_string())
    })?;
    let total_price: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid total_price: {raw}")))?;

    Ok(Json(
        state.orders.update_order_total_price(id, total_price).await?,
    ))
}

pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.orders.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
