//! SuperBridge Relayer - multi-chain transaction manager and bridge message relay
//!
//! Watches SuperBridge contracts on every configured chain and relays each `Msg`
//! event to its destination chain through the fee-bumping transaction manager.

use anyhow::{Context, Result};
use ethers::signers::Signer;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use superbridge_relayer::api::{self, AppState};
use superbridge_relayer::bridge::{BridgeCodec, BridgeEndpoint, BridgeRelay};
use superbridge_relayer::chain::{ChainClient, ChainProvider, EventSource};
use superbridge_relayer::config::Settings;
use superbridge_relayer::metrics::{self, MetricsServer};
use superbridge_relayer::signer;
use superbridge_relayer::store::{BlockStore, InMemoryTxStore, PgTxStore, TxStore};
use superbridge_relayer::tx::TxManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting SuperBridge Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains (instance {})",
        settings.enabled_chains().len(),
        settings.relayer.instance_id
    );

    // Transaction and checkpoint store
    let (store, checkpoints): (Arc<dyn TxStore>, Arc<dyn BlockStore>) = match &settings.database
    {
        Some(database) => {
            let store = Arc::new(PgTxStore::new(database).await?);
            info!("Database connection established");
            store.run_migrations().await?;
            (store.clone() as Arc<dyn TxStore>, store as Arc<dyn BlockStore>)
        }
        None => {
            warn!("No database configured, transactions are kept in memory only");
            let store = Arc::new(InMemoryTxStore::new());
            (store.clone() as Arc<dyn TxStore>, store as Arc<dyn BlockStore>)
        }
    };

    // Chain connections
    let mut providers = Vec::new();
    for (name, chain) in settings.enabled_chains() {
        let provider = Arc::new(ChainProvider::new(chain.clone())?);
        info!("Connected to {} (chain {})", name, chain.chain_id);
        providers.push(provider);
    }
    let chain_ids: Vec<u64> = providers.iter().map(|p| p.chain_id()).collect();

    // Signing wallet
    let signer = signer::restricted(
        signer::from_env(&settings.wallet.private_key_env)?,
        chain_ids.clone(),
    );
    let first_chain = chain_ids
        .first()
        .copied()
        .context("No enabled chains configured")?;
    let sender = signer(first_chain)?.address();
    info!("Relaying from account {:?}", sender);

    // Transaction manager
    let clients: HashMap<u64, Arc<dyn ChainClient>> = providers
        .iter()
        .map(|p| (p.chain_id(), p.clone() as Arc<dyn ChainClient>))
        .collect();
    let manager = Arc::new(TxManager::new(
        store.clone(),
        clients,
        sender,
        Duration::from_secs(settings.relayer.bump_interval_secs),
        Duration::from_secs(settings.relayer.poll_interval_secs),
        signer,
    ));
    manager.start().await?;
    info!("Transaction manager started");

    // Bridge relay
    let mut endpoints = Vec::new();
    for provider in &providers {
        let Some(chain) = settings.get_chain_by_id(provider.chain_id()) else {
            continue;
        };
        endpoints.push(BridgeEndpoint {
            chain_id: chain.chain_id,
            address: chain.bridge_address()?,
            deployment_block: chain.deployment_block,
            poll_interval: Duration::from_millis(chain.log_poll_interval_ms),
            source: provider.clone() as Arc<dyn EventSource>,
        });
    }
    let relay = Arc::new(BridgeRelay::new(
        manager.clone(),
        Arc::new(BridgeCodec::new()?),
        endpoints,
        checkpoints,
        settings.relayer.relay_gas_limit,
    ));
    relay.start();

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            store: store.clone(),
            manager: manager.clone(),
            providers: Arc::new(providers.clone()),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let providers = providers.clone();
        let store = store.clone();
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                let mut healthy = true;
                for provider in &providers {
                    let ok = provider.health_check().await;
                    metrics::record_chain_health(provider.chain_id(), ok);
                    if !ok {
                        warn!("Chain {} health check failed", provider.chain_id());
                        healthy = false;
                    }
                }

                if let Err(e) = store.health_check().await {
                    warn!("Database health check failed: {}", e);
                    healthy = false;
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("SuperBridge Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    relay.stop().await;
    manager.stop().await;

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("SuperBridge Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,superbridge_relayer=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
