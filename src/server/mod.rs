// src/server/mod.rs

//! Status and data API.
//!
//! A small JSON surface over the scheduler status and the two artifacts:
//! - `GET /api/status` - run state, last completion, seconds to next run
//! - `GET /api/chain` - the full chain snapshot
//! - `GET /api/iv/{contract_id}` - one contract's IV history
//!
//! Consumers of a missing or empty artifact get an explicit 404 "not
//! available" body, never stale data dressed up as fresh.

use crate::analytics::{ChainBuilder, IvHistoryBuilder};
use crate::models::IvHistoryRecord;
use crate::pipeline::Scheduler;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::info;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Shared state for the API server.
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
    pub chain: Arc<ChainBuilder>,
    pub iv_history: Arc<IvHistoryBuilder>,
}

/// The API server exposing scheduler status and built artifacts.
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    pub fn new(state: ApiState, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            port,
        }
    }

    /// Starts serving. Runs until the process shuts down.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route("/api/status", get(get_status))
            .route("/api/chain", get(get_chain))
            .route("/api/iv/{contract_id}", get(get_iv_history))
            .layer(cors)
            .with_state(self.state);

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("api server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// GET /api/status - Scheduler status snapshot
async fn get_status(State(state): State<Arc<ApiState>>) -> Response {
    Json(state.scheduler.status()).into_response()
}

/// GET /api/chain - Full chain snapshot
async fn get_chain(State(state): State<Arc<ApiState>>) -> Response {
    match state.chain.snapshot() {
        Some(rows) if !rows.is_empty() => Json(rows.as_slice()).into_response(),
        _ => not_available("Chain data not available"),
    }
}

/// GET /api/iv/{contract_id} - IV history for one contract
async fn get_iv_history(
    State(state): State<Arc<ApiState>>,
    Path(contract_id): Path<String>,
) -> Response {
    let Some(rows) = state.iv_history.snapshot() else {
        return not_available("IV history not available");
    };

    let wanted = contract_id.trim();
    // Rows are already sorted by (contract, date); the filter preserves the
    // date order.
    let matched: Vec<&IvHistoryRecord> = rows
        .iter()
        .filter(|r| r.contract_id == wanted)
        .collect();

    if matched.is_empty() {
        return not_available("Contract not found");
    }
    Json(matched).into_response()
}

fn not_available(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}
