//! Runtime orchestration: the listener, connection spawning, and the
//! periodic maintenance tasks.

use crate::broker::store::BrokerStore;
use crate::core::config::Config;
use crate::net::driver::serve_connection;
use crate::session::connection::ConnectionSettings;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. RUST_LOG wins over the configured
/// filter; repeated calls (tests) are harmless.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub struct Broker {
    config: Config,
}

/// A started broker: the bound address plus a shutdown trigger. Dropping the
/// handle also shuts the broker down, since the watch sender goes with it.
pub struct BrokerHandle {
    local_addr: SocketAddr,
    store: Arc<BrokerStore>,
    shutdown: watch::Sender<bool>,
}

impl BrokerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> Arc<BrokerStore> {
        Arc::clone(&self.store)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Broker {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Bind the listener and spawn the accept and maintenance tasks.
    pub async fn start(&self) -> Result<BrokerHandle> {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("unable to bind {addr}"))?;
        let local_addr = listener.local_addr().context("listener has no address")?;
        let store = Arc::new(BrokerStore::new(self.config.store_config()));
        let authenticator = self.config.authenticator();
        let settings = self.config.connection_settings();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&store),
            authenticator,
            settings,
            shutdown_rx.clone(),
        ));
        tokio::spawn(maintenance_loop(
            Arc::clone(&store),
            self.config.cleanup_interval(),
            self.config.status_interval(),
            shutdown_rx,
        ));
        tracing::info!(%local_addr, "broker listening");
        Ok(BrokerHandle {
            local_addr,
            store,
            shutdown: shutdown_tx,
        })
    }

    /// Start the broker and block until ctrl-c.
    pub async fn run(&self) -> Result<()> {
        let handle = self.start().await?;
        tokio::signal::ctrl_c()
            .await
            .context("unable to listen for shutdown signal")?;
        tracing::info!("shutdown signal received");
        handle.shutdown();
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    store: Arc<BrokerStore>,
    authenticator: Arc<dyn crate::broker::auth::Authenticator>,
    settings: ConnectionSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(serve_connection(
                        stream,
                        Arc::clone(&store),
                        Arc::clone(&authenticator),
                        settings.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(err) => {
                    tracing::warn!("accept failed: {err}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("accept loop stopped");
}

async fn maintenance_loop(
    store: Arc<BrokerStore>,
    cleanup_interval: Duration,
    status_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut cleanup = tokio::time::interval(cleanup_interval);
    let mut status = tokio::time::interval(status_interval);
    loop {
        tokio::select! {
            _ = cleanup.tick() => {
                let report = store.cleanup_once();
                if !report.is_empty() {
                    tracing::info!(
                        sessions = report.sessions_evicted,
                        frames = report.frames_expired,
                        destinations = report.destinations_pruned,
                        "cleanup pass"
                    );
                }
            }
            _ = status.tick() => store.publish_status(),
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("maintenance loop stopped");
}
