//! HTTP API for health checks, status, and transaction lookup

use crate::chain::ChainProvider;
use crate::config::ApiConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::store::{ListTxsFilter, TxRecord, TxStatus, TxStore};
use crate::tx::TxManager;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TxStore>,
    pub manager: Arc<TxManager>,
    pub providers: Arc<Vec<Arc<ChainProvider>>>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/chains", get(get_chains))
        .route("/stats", get(get_stats))
        .route("/txs/:id", get(get_tx))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> RelayerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify store and chain connections
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.store.health_check().await.is_ok();

    let details: Vec<ChainHealth> = join_all(state.providers.iter().map(|p| async move {
        ChainHealth {
            chain_id: p.chain_id(),
            healthy: p.health_check().await,
        }
    }))
    .await;
    let chains_ok = details.iter().all(|c| c.healthy);

    let ready = db_ok && chains_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            database: db_ok,
            chains: chains_ok,
            details,
        }),
    )
}

/// Chains the relayer can submit to
async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    let chains = state
        .providers
        .iter()
        .map(|p| ChainInfo {
            chain_id: p.chain_id(),
            name: p.name().to_string(),
            last_block: p.last_block(),
        })
        .collect();

    Json(ChainsResponse {
        chains,
        submittable: state.manager.chain_ids(),
    })
}

/// Record counts per status
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let mut counts = BTreeMap::new();
    for status in TxStatus::all() {
        match state.store.list_txs(ListTxsFilter::status(status)).await {
            Ok(records) => {
                counts.insert(status.as_str(), records.len());
            }
            Err(e) => {
                error!("Failed to count {} transactions: {}", status, e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(StatsResponse::default()),
                );
            }
        }
    }

    (
        StatusCode::OK,
        Json(StatsResponse {
            transactions: counts,
            active_workers: state.manager.active_count(),
        }),
    )
}

/// Look up a single record
async fn get_tx(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TxRecord>, (StatusCode, Json<ErrorResponse>)> {
    state.manager.get_tx(&id).await.map(Json).map_err(|e| {
        let status = match e {
            RelayerError::TransactionNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct ChainInfo {
    chain_id: u64,
    name: String,
    last_block: u64,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<ChainInfo>,
    submittable: Vec<u64>,
}

#[derive(Serialize, Default)]
struct StatsResponse {
    transactions: BTreeMap<&'static str, usize>,
    active_workers: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
