pub mod protocol;
pub mod room;
pub mod state;
pub mod ws;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
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

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/languages", get(languages))
        .route("/ws/client", get(ws::handler::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Babblefish Server",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Real-time voice translation",
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "pipeline_ready": state.pipeline.has_translator(),
        "rooms": state.rooms.room_count(),
        "participants": state.rooms.total_participants(),
    }))
}

/// Supported language tags with display names, for the client join UI.
async fn languages(State(state): State<AppState>) -> Json<Value> {
    let languages: Vec<Value> = state
        .registry
        .supported()
        .map(|short| {
            json!({
                "code": short,
                "name": state.registry.language_name(short),
            })
        })
        .collect();
    Json(json!({ "languages": languages }))
}
