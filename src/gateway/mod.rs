//! HTTP delivery edge: the JSON control operations plus the realtime
//! WebSocket endpoint. The core never depends on this layer.

pub mod auth;
pub mod handlers;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;

use crate::engine::DispatchEngine;
use crate::events::ws_handler;

use state::AppState;

/// Build the full API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // Customer surface
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_my_orders),
        )
        .route("/orders/cancel", post(handlers::orders::cancel_order))
        .route("/orders/{order_id}", get(handlers::orders::get_order))
        .route(
            "/orders/{order_id}/status",
            get(handlers::orders::order_status),
        )
        // Transporter surface
        .route(
            "/requests/active",
            get(handlers::orders::list_active_requests),
        )
        .route("/holds", post(handlers::holds::place_hold))
        .route("/holds/confirm", post(handlers::holds::confirm_hold))
        .route("/holds/release", post(handlers::holds::release_hold))
        .route(
            "/orders/{order_id}/availability",
            get(handlers::holds::availability),
        )
        // Driver / shared trip surface
        .route("/route/reached", post(handlers::trips::reached_stop))
        .route("/route/departed", post(handlers::trips::departed_stop))
        .route("/orders/{order_id}/route", get(handlers::trips::get_route));

    Router::new()
        .route("/ws", get(ws_handler))
        .nest("/api/v1", api)
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run_server(listen_addr: &str, engine: Arc<DispatchEngine>) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(engine));
    let app = build_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = listen_addr, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
