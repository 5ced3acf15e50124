//! `MatchforgeServer` builder and run loop.
//!
//! This is the entry point for running the service. It ties the layers
//! together: the backend, the event pump that drives it, the orchestrator
//! on top, the sweep task, and the HTTP router.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use matchforge_backend::SessionBackend;
use matchforge_pump::{PumpConfig, spawn_event_pump};
use matchforge_session::{Orchestrator, OrchestratorConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::MatchforgeError;
use crate::config::{DEFAULT_BUCKET_ID, DEFAULT_MAX_PLAYERS, ServerConfig};
use crate::handler;

// ---------------------------------------------------------------------------
// Application context
// ---------------------------------------------------------------------------

/// Parameters applied to every session the HTTP API creates.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub bucket_id: String,
    pub max_players: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            bucket_id: DEFAULT_BUCKET_ID.to_owned(),
            max_players: DEFAULT_MAX_PLAYERS,
        }
    }
}

/// Everything a request handler needs, passed as router state.
pub struct AppContext<B: SessionBackend> {
    pub orchestrator: Arc<Orchestrator<B>>,
    pub defaults: Arc<SessionDefaults>,
}

impl<B: SessionBackend> AppContext<B> {
    pub fn new(orchestrator: Arc<Orchestrator<B>>, defaults: SessionDefaults) -> Self {
        Self {
            orchestrator,
            defaults: Arc::new(defaults),
        }
    }
}

// Manual impl: a derive would require `B: Clone`.
impl<B: SessionBackend> Clone for AppContext<B> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            defaults: Arc::clone(&self.defaults),
        }
    }
}

/// Builds the HTTP router over `ctx`.
pub fn build_router<B: SessionBackend>(ctx: AppContext<B>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/livez", get(handler::livez))
        .route("/matchmaking", post(handler::create_match::<B>))
        .route("/sessions", get(handler::list_sessions::<B>))
        .route(
            "/session/{id}",
            get(handler::get_session::<B>).delete(handler::destroy_session::<B>),
        )
        .route("/session/start/{id}", post(handler::start_session::<B>))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a Matchforge server.
///
/// # Example
///
/// ```rust,ignore
/// let backend = Arc::new(MemoryBackend::initialize(&credentials)?);
/// let server = MatchforgeServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(backend)
///     .await?;
/// server.run_until(shutdown_signal()).await
/// ```
pub struct MatchforgeServerBuilder {
    bind_addr: String,
    defaults: SessionDefaults,
    orchestrator_config: OrchestratorConfig,
    pump_config: PumpConfig,
    sweep_interval: Duration,
    request_timeout: Duration,
}

impl MatchforgeServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            defaults: SessionDefaults::default(),
            orchestrator_config: OrchestratorConfig::default(),
            pump_config: PumpConfig::default(),
            sweep_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Starts from a loaded [`ServerConfig`].
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new()
            .bind(&config.bind_addr())
            .session_defaults(SessionDefaults {
                bucket_id: config.bucket_id.clone(),
                max_players: config.max_players,
            })
            .orchestrator_config(config.orchestrator_config())
            .pump_config(config.pump_config())
            .sweep_interval(config.sweep_interval)
            .request_timeout(config.request_timeout)
    }

    /// Sets the address to bind the server to. Port 0 picks a free port.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn session_defaults(mut self, defaults: SessionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator_config = config;
        self
    }

    pub fn pump_config(mut self, config: PumpConfig) -> Self {
        self.pump_config = config;
        self
    }

    /// How often stale sessions are swept.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Requests taking longer than this get a 408.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Binds the listener and wires the orchestrator to `backend`.
    ///
    /// `backend` must already be initialized. Nothing runs until
    /// [`MatchforgeServer::run`] or [`MatchforgeServer::run_until`].
    pub async fn build<B: SessionBackend>(
        self,
        backend: Arc<B>,
    ) -> Result<MatchforgeServer<B>, MatchforgeError> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        let orchestrator = Arc::new(Orchestrator::new(backend, self.orchestrator_config));

        Ok(MatchforgeServer {
            listener,
            context: AppContext::new(orchestrator, self.defaults),
            pump_config: self.pump_config,
            sweep_interval: self.sweep_interval,
            request_timeout: self.request_timeout,
        })
    }
}

impl Default for MatchforgeServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A bound, not yet running, Matchforge server.
pub struct MatchforgeServer<B: SessionBackend> {
    listener: TcpListener,
    context: AppContext<B>,
    pump_config: PumpConfig,
    sweep_interval: Duration,
    request_timeout: Duration,
}

impl<B: SessionBackend> MatchforgeServer<B> {
    /// Creates a new builder.
    pub fn builder() -> MatchforgeServerBuilder {
        MatchforgeServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> &AppContext<B> {
        &self.context
    }

    pub fn router(&self) -> Router {
        build_router(self.context.clone(), self.request_timeout)
    }

    /// Runs until the process is terminated.
    pub async fn run(self) -> Result<(), MatchforgeError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves requests until `shutdown` resolves, then stops in order:
    /// in-flight requests finish, the sweep task exits, and the event pump
    /// drains outstanding completions.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), MatchforgeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let router = self.router();
        let orchestrator = Arc::clone(&self.context.orchestrator);

        let pump = spawn_event_pump(
            Arc::clone(orchestrator.backend()),
            self.pump_config,
            CancellationToken::new(),
        );
        let sweep_cancel = CancellationToken::new();
        let sweeper = spawn_sweeper(
            Arc::clone(&orchestrator),
            self.sweep_interval,
            sweep_cancel.clone(),
        );

        info!(%addr, "matchforge server listening");
        let served = axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await;
        info!("http server stopped, shutting down background tasks");

        sweep_cancel.cancel();
        if let Err(e) = sweeper.await {
            error!(error = %e, "sweep task failed");
        }
        match pump.shutdown().await {
            Ok(metrics) => debug!(
                ticks = metrics.total_ticks,
                overruns = metrics.total_overruns,
                "event pump drained"
            ),
            Err(e) => error!(error = %e, "event pump task failed"),
        }

        served?;
        Ok(())
    }
}

/// Runs [`Orchestrator::sweep_stale`] every `every` until cancelled.
fn spawn_sweeper<B: SessionBackend>(
    orchestrator: Arc<Orchestrator<B>>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    // tokio's interval panics on a zero period.
    let every = every.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing is stale yet.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    orchestrator.sweep_stale();
                }
            }
        }
        debug!("session sweeper stopped");
    })
}
