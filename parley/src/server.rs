use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use parley_api::{create_router, AppState, Config, PeerHub, SignalingDispatcher};
use parley_sfu::{EngineKind, LoopbackEngine, RoutingEngine, SessionCoordinator, SfuConfig};

/// How long in-flight HTTP work may take to drain after shutdown begins
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A started routing engine plus the signal that fires if it dies
struct EngineRuntime {
    engine: Arc<dyn RoutingEngine>,
    worker_died: CancellationToken,
}

async fn start_engine(config: &SfuConfig) -> Result<EngineRuntime> {
    match config.engine {
        EngineKind::Loopback => {
            warn!("Using loopback routing engine: signaling works, no media is forwarded");
            Ok(EngineRuntime {
                engine: Arc::new(LoopbackEngine::new(config)),
                worker_died: CancellationToken::new(),
            })
        }
        EngineKind::Mediasoup => start_mediasoup(config).await,
    }
}

#[cfg(feature = "mediasoup")]
async fn start_mediasoup(config: &SfuConfig) -> Result<EngineRuntime> {
    let engine = parley_sfu::MediasoupEngine::new(config.clone());
    engine
        .start()
        .await
        .context("Failed to start mediasoup worker")?;
    info!("mediasoup routing engine started");

    let worker_died = engine.worker_died();
    Ok(EngineRuntime {
        engine: Arc::new(engine),
        worker_died,
    })
}

#[cfg(not(feature = "mediasoup"))]
async fn start_mediasoup(_config: &SfuConfig) -> Result<EngineRuntime> {
    Err(anyhow::anyhow!(
        "sfu.engine is \"mediasoup\" but this binary was built without the `mediasoup` feature"
    ))
}

pub struct ParleyServer {
    config: Config,
    dispatcher: SignalingDispatcher,
    worker_died: CancellationToken,
}

impl ParleyServer {
    /// Start the routing engine and wire up the signaling stack
    pub async fn start(config: Config) -> Result<Self> {
        let runtime = start_engine(&config.sfu).await?;
        let coordinator = Arc::new(SessionCoordinator::new(runtime.engine, config.sfu.clone()));
        let dispatcher = SignalingDispatcher::new(coordinator, PeerHub::new());

        Ok(Self {
            config,
            dispatcher,
            worker_died: runtime.worker_died,
        })
    }

    /// Serve until a shutdown signal arrives or the routing engine dies
    pub async fn run(self) -> Result<()> {
        let address = self.config.http_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {address}"))?;
        info!("HTTP server listening on {}", address);

        let app = create_router(AppState::new(
            self.dispatcher.clone(),
            self.config.server.max_message_size,
        ));

        let stop = CancellationToken::new();
        let graceful = stop.clone();
        let mut http_handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .await
        });

        let worker_died = tokio::select! {
            result = &mut http_handle => {
                match result {
                    Ok(Ok(())) => warn!("HTTP server exited"),
                    Ok(Err(e)) => error!("HTTP server error: {}", e),
                    Err(e) => error!("HTTP server task failed: {}", e),
                }
                false
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, stopping server");
                false
            }
            () = self.worker_died.cancelled() => {
                error!("Routing engine worker died, shutting down");
                true
            }
        };

        self.shutdown(stop, http_handle).await;

        if worker_died {
            return Err(anyhow::anyhow!("routing engine worker died"));
        }
        Ok(())
    }

    async fn shutdown(
        &self,
        stop: CancellationToken,
        http_handle: tokio::task::JoinHandle<std::io::Result<()>>,
    ) {
        // Open sockets keep graceful shutdown waiting, so release them first
        let peers = self.dispatcher.coordinator().stats().connections;
        self.dispatcher.disconnect_all().await;
        info!(peers, "All connections torn down");

        stop.cancel();
        if http_handle.is_finished() {
            return;
        }
        let abort = http_handle.abort_handle();
        if tokio::time::timeout(DRAIN_TIMEOUT, http_handle).await.is_err() {
            warn!("HTTP server did not drain in time, aborting");
            abort.abort();
        }
        info!("Server stopped");
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        () = ctrl_c => {},
        () = terminate => {},
    }
}
