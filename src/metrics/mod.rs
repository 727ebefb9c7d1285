//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status and scanned block height
//! - Transaction lifecycle (submissions, broadcasts, bumps, outcomes)
//! - Relayed bridge messages

use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "superbridge_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "superbridge_chain_block_height",
        "Last block scanned for bridge messages per chain",
        &["chain_id"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "superbridge_transactions_submitted_total",
        "Total transactions accepted by the manager",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_BROADCASTS: CounterVec = register_counter_vec!(
        "superbridge_transaction_broadcasts_total",
        "Total signed transactions broadcast",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_GAS_BUMPS: CounterVec = register_counter_vec!(
        "superbridge_transaction_gas_bumps_total",
        "Total fee-replacement broadcasts",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_COMPLETED: CounterVec = register_counter_vec!(
        "superbridge_transactions_completed_total",
        "Total transactions reaching a terminal status",
        &["chain_id", "status"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "superbridge_transaction_latency_seconds",
        "Time from submission to terminal status",
        &["chain_id"],
        vec![5.0, 15.0, 30.0, 60.0, 120.0, 180.0, 300.0, 600.0]
    ).unwrap();

    // Relay metrics
    pub static ref RELAY_MESSAGES: CounterVec = register_counter_vec!(
        "superbridge_relay_messages_total",
        "Bridge messages handled by outcome",
        &["source_chain_id", "destination_chain_id", "result"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "superbridge_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "superbridge_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_blocks_processed(chain_id: u64, block_number: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(block_number as f64);
}

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_broadcast(chain_id: u64, attempt: u64) {
    let chain = chain_id.to_string();
    TX_BROADCASTS.with_label_values(&[&chain]).inc();
    if attempt > 1 {
        TX_GAS_BUMPS.with_label_values(&[&chain]).inc();
    }
}

pub fn record_tx_completed(chain_id: u64, status: &str, latency_secs: f64) {
    let chain = chain_id.to_string();
    TX_COMPLETED.with_label_values(&[&chain, status]).inc();
    TX_LATENCY.with_label_values(&[&chain]).observe(latency_secs);
}

pub fn record_relay_message(source_chain_id: u64, destination_chain_id: u64, result: &str) {
    RELAY_MESSAGES
        .with_label_values(&[
            &source_chain_id.to_string(),
            &destination_chain_id.to_string(),
            result,
        ])
        .inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
