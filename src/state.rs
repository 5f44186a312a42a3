//! Application state module
//!
//! Contains the shared state used across all server connections.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::handlers::build_registry;
use crate::net::capture::{MemoryCapture, PacketObserver, TracingCapture};
use crate::net::dispatcher::Dispatcher;
use crate::net::manager::SessionManager;
use crate::net::registry::HandlerRegistry;

/// Application state shared across all connections
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Session manager for tracking connected clients
    pub session_manager: Arc<SessionManager>,
    /// Frame router with the read-only handler registry
    pub dispatcher: Dispatcher,
    /// Packet capture shared by the dispatcher and every session
    pub capture: Arc<dyn PacketObserver>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create a new application state, picking the capture from the config
    pub fn new(config: ServerConfig, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        let capture: Arc<dyn PacketObserver> = if config.capture_capacity > 0 {
            info!(capacity = config.capture_capacity, "Packet capture kept in memory");
            Arc::new(MemoryCapture::new(config.capture_capacity))
        } else {
            Arc::new(TracingCapture)
        };
        Self::with_capture(config, shutdown_tx, capture)
    }

    /// Create a new application state with an explicit packet capture
    pub fn with_capture(
        config: ServerConfig,
        shutdown_tx: broadcast::Sender<()>,
        capture: Arc<dyn PacketObserver>,
    ) -> Result<Self> {
        let region = crate::region::Region::from_config(&config.region)?;
        Ok(Self::with_registry(
            config,
            shutdown_tx,
            build_registry(region),
            capture,
        ))
    }

    /// Create a new application state around a prebuilt handler registry
    pub fn with_registry(
        config: ServerConfig,
        shutdown_tx: broadcast::Sender<()>,
        registry: HandlerRegistry,
        capture: Arc<dyn PacketObserver>,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::new(registry), capture.clone());

        let session_manager = Arc::new(SessionManager::with_limits(config.max_connections_per_ip));
        if config.maintenance {
            info!("Starting in maintenance mode");
            session_manager.set_maintenance(true);
        }

        Self {
            config,
            session_manager,
            dispatcher,
            capture,
            shutdown_tx,
        }
    }

    /// Subscribe to the shutdown signal
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
