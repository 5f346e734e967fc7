use axum::{routing::get, Json, Router};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

pub const SERVICE_NAME: &str = "acreblitz-server";

async fn root() -> Json<Value> {
    Json(json!({
        "name": "AcreBlitz Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/health": "Service health check",
            "/reply": "Streamed assistant reply (Vercel AI data stream protocol)",
            "/ask": "Single non-streaming assistant answer",
            "/weather/forecast": "Get weather forecast for coordinates",
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    }))
}

pub fn routes() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
}
