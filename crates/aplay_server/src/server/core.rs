//! Core server implementation.
//!
//! `AplayServer` owns the listener, the shared engine context and the
//! shutdown channel. It contains no protocol logic itself; every accepted
//! socket is handed to a worker in [`crate::server::handlers`] which drives
//! the per-connection state machine.

use crate::config::ServerConfig;
use crate::dedup::{MsgNoSequencer, PushDedupCache};
use crate::error::ServerError;
use metagame::{
    CareerInfoGenerator, CareerStore, HenchmanRoster, MatchConfigGenerator, SessionIdentityMap,
    StaticData,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// The collaborators the protocol engine calls out to.
///
/// Constructed once at process start and shared across all connections;
/// each collaborator owns its own locking.
#[derive(Debug, Clone)]
pub struct Services {
    pub identity: Arc<SessionIdentityMap>,
    pub store: Arc<CareerStore>,
    pub statics: Arc<StaticData>,
    pub henchmen: Arc<HenchmanRoster>,
    pub career_info: Arc<CareerInfoGenerator>,
    pub match_config: Arc<MatchConfigGenerator>,
}

impl Services {
    /// Builds the default collaborator set over a data directory (career
    /// files) and a static-data directory (extracted game content).
    pub fn new(data_dir: impl Into<std::path::PathBuf>, static_dir: impl Into<std::path::PathBuf>) -> Self {
        let static_dir = static_dir.into();
        Self {
            identity: Arc::new(SessionIdentityMap::new()),
            store: Arc::new(CareerStore::new(data_dir)),
            statics: Arc::new(StaticData::new(static_dir.clone())),
            henchmen: Arc::new(HenchmanRoster::new(static_dir)),
            career_info: Arc::new(CareerInfoGenerator::new()),
            match_config: Arc::new(MatchConfigGenerator::new()),
        }
    }
}

/// Shared engine context: configuration, collaborators and the
/// process-wide dedup/ordering state. One per server, cloned into every
/// connection worker behind an `Arc`.
#[derive(Debug)]
pub struct Engine {
    pub config: ServerConfig,
    pub services: Services,
    pub dedup: Arc<PushDedupCache>,
    pub sequencer: Arc<MsgNoSequencer>,
    shutdown: broadcast::Sender<()>,
}

impl Engine {
    pub fn new(config: ServerConfig, services: Services) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            services,
            dedup: Arc::new(PushDedupCache::new()),
            sequencer: Arc::new(MsgNoSequencer::new()),
            shutdown,
        })
    }

    /// A fresh receiver for the global stop signal.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Requests a global stop; all accept loops, read loops and background
    /// tasks observe it.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

/// The session protocol server.
pub struct AplayServer {
    engine: Arc<Engine>,
}

impl AplayServer {
    pub fn new(config: ServerConfig, services: Services) -> Self {
        Self {
            engine: Engine::new(config, services),
        }
    }

    /// The shared engine context, e.g. for issuing a shutdown from a signal
    /// handler.
    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    /// Binds the listener and runs the accept loop until shutdown.
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.engine.config.bind_address).await?;
        let local = listener.local_addr()?;
        info!("🚀 Session server listening on {}", local);
        self.run_accept_loop(listener).await;
        info!("🛑 Session server on {} stopped", local);
        Ok(())
    }

    /// Binds to an ephemeral port and runs in a background task; returns the
    /// bound address. Used by scenario tests.
    pub async fn start_detached(&self) -> Result<SocketAddr, ServerError> {
        let listener = TcpListener::bind(self.engine.config.bind_address).await?;
        let local = listener.local_addr()?;
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let server = AplayServer { engine };
            server.run_accept_loop(listener).await;
        });
        Ok(local)
    }

    async fn run_accept_loop(&self, listener: TcpListener) {
        let mut shutdown = self.engine.shutdown_signal();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            info!("🔗 Connection from {}", peer);
                            if let Err(e) = socket.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                            }
                            let engine = Arc::clone(&self.engine);
                            tokio::spawn(async move {
                                crate::server::handlers::handle_connection(engine, socket, peer)
                                    .await;
                            });
                        }
                        Err(e) => {
                            error!("Accept failed: {}", e);
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
    }
}
