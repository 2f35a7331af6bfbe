pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Captioning control routes (operator panel)
    let captioning_routes = Router::new()
        .route("/start", post(routes::captioning::start))
        .route("/stop", post(routes::captioning::stop))
        .route("/status", get(routes::captioning::status));

    let api = Router::new().nest("/captioning", captioning_routes);

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api)
        .merge(health)
        .route("/ws/captions", get(ws::handler::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
