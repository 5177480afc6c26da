use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers::{health, orders, products};
use crate::state::AppState;

/// Build the application router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics_handler))
        .route(
            "/products",
            get(products::list_products).post(products::create_product),
        )
        .route("/products/search", get(products::search_products))
        .route("/products/sync", post(products::sync_search_index))
        .route(
            "/products/:id",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )
        .route(
            "/orders",
            get(orders::list_orders).post(orders::create_order),
        )
        .route(
            "/orders/:id",
            get(orders::get_order).delete(orders::delete_order),
        )
        .route(
            "/orders/:id/total-price",
            put(orders::update_order_total_price),
        )
        .route(
            "/orders/update-order-status/:id",
            put(orders::update_order_status),
        )
        .with_state(state)
}
