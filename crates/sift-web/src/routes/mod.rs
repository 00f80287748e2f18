//! Route handlers.

pub mod research;

use axum::Json;
use serde_json::{json, Value};

/// GET / - Describe the available endpoints.
pub async fn index() -> Json<Value> {
    Json(json!({
        "name": "sift",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /api/research": "Run the research pipeline for {\"query\": ...}",
            "GET /health": "Liveness check",
        }
    }))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
