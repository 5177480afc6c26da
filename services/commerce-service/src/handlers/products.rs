use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use commerce::SyncReport;
use domain::{CreateProductCommand, Product};
use serde::Deserialize;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

pub async fn list_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.products.list_products().await?))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Product>, ApiError> {
    Ok(Json(state.products.get_product(id).await?))
}

pub async fn create_product(
    State(state): State<AppState>,
    payload: Result<Json<CreateProductCommand>, JsonRejection>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let Json(request) = payload?;
    info!("Received create product request: {}", request.name);
    let product = state.products.add_product(request).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<CreateProductCommand>, JsonRejection>,
) -> Result<Json<Product>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.products.update_product(id, request).await?))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.products.delete_product(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn search_products(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.products.search_products(&params.q).await?))
}

/// Full resync of the search index from the primary store
pub async fn sync_search_index(
    State(state): State<AppState>,
) -> Result<Json<SyncReport>, ApiError> {
    info!("Received search index resync request");
    Ok(Json(state.products.sync_search_index().await?))
}
