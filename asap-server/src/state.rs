//! Shared server state and the [`AsapServer`] builder.

use std::sync::Arc;
use std::time::{Duration, Instant};

use asap_core::{system_clock, Manifest, PayloadSchemaRegistry, SharedClock};
use axum::Router;
use tokio::net::TcpListener;

use crate::auth::CredentialValidator;
use crate::config::ServerConfig;
use crate::constants::SWEEP_INTERVAL;
use crate::error::StartupError;
use crate::executor::BoundedExecutor;
use crate::handlers::HandlerRegistry;
use crate::metrics::AsapMetrics;
use crate::rate_limit::AsapRateLimiter;
use crate::routes::create_router;
use crate::security::{InMemoryNonceStore, NonceStore, TimestampValidator};
use crate::tasks::TaskTracker;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub manifest: Arc<Manifest>,
    pub handlers: Arc<HandlerRegistry>,
    pub executor: Arc<BoundedExecutor>,
    pub tasks: Arc<TaskTracker>,
    /// `None` when rate limiting is disabled.
    pub rate_limiter: Option<AsapRateLimiter>,
    pub timestamps: TimestampValidator,
    /// `None` unless nonces are required or a store was injected.
    pub nonces: Option<Arc<dyn NonceStore>>,
    pub nonce_ttl: Duration,
    pub credentials: Option<Arc<dyn CredentialValidator>>,
    pub metrics: Arc<AsapMetrics>,
    pub schemas: Arc<PayloadSchemaRegistry>,
    pub clock: SharedClock,
    pub start_time: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("agent", &self.manifest.id)
            .field("handlers", &self.handlers.payload_types())
            .field("executor", &self.executor)
            .field("rate_limiter", &self.rate_limiter)
            .field("nonces", &self.nonces.is_some())
            .field("auth", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub nonces: usize,
    pub rate_limit_keys: usize,
    pub tasks: usize,
}

impl AppState {
    /// Drop expired nonces, fully replenished rate limit keys and terminal
    /// tasks past their retention.
    pub fn sweep(&self) -> SweepReport {
        SweepReport {
            nonces: self.nonces.as_ref().map_or(0, |store| store.sweep()),
            rate_limit_keys: self.rate_limiter.as_ref().map_or(0, |l| l.sweep()),
            tasks: self.tasks.purge_terminal(self.config.task_retention),
        }
    }
}

/// A configured ASAP server.
#[derive(Debug, Clone)]
pub struct AsapServer {
    state: AppState,
}

impl AsapServer {
    pub fn builder(manifest: Manifest) -> AsapServerBuilder {
        AsapServerBuilder::new(manifest)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Axum router with every ASAP route.
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Serve on `listener` until the future is dropped or the server fails.
    ///
    /// Also spawns the periodic [`AppState::sweep`].
    pub async fn serve(self, listener: TcpListener) -> Result<(), StartupError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            %addr,
            agent = %self.state.manifest.id,
            handlers = ?self.state.handlers.payload_types(),
            "Starting ASAP server"
        );

        let state = self.state.clone();
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let report = state.sweep();
                if report != SweepReport::default() {
                    tracing::debug!(
                        nonces = report.nonces,
                        rate_limit_keys = report.rate_limit_keys,
                        tasks = report.tasks,
                        "Swept expired state"
                    );
                }
            }
        });

        let app = self
            .router()
            .into_make_service_with_connect_info::<std::net::SocketAddr>();
        let result = axum::serve(listener, app).await;

        sweeper.abort();
        result.map_err(StartupError::Io)
    }
}

/// Builder for [`AsapServer`].
pub struct AsapServerBuilder {
    manifest: Manifest,
    config: ServerConfig,
    handlers: HandlerRegistry,
    credentials: Option<Arc<dyn CredentialValidator>>,
    nonce_store: Option<Arc<dyn NonceStore>>,
    schemas: Option<PayloadSchemaRegistry>,
    clock: Option<SharedClock>,
}

impl AsapServerBuilder {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            config: ServerConfig::default(),
            handlers: HandlerRegistry::new(),
            credentials: None,
            nonce_store: None,
            schemas: None,
            clock: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn credential_validator<V: CredentialValidator + 'static>(mut self, validator: V) -> Self {
        self.credentials = Some(Arc::new(validator));
        self
    }

    /// Use a custom nonce store. Present nonces are checked against it even
    /// when nonces are not required.
    pub fn nonce_store(mut self, store: Arc<dyn NonceStore>) -> Self {
        self.nonce_store = Some(store);
        self
    }

    /// Replace the built-in payload schemas.
    pub fn schemas(mut self, schemas: PayloadSchemaRegistry) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<AsapServer, StartupError> {
        self.config.validate()?;
        self.manifest.validate().map_err(StartupError::Manifest)?;
        if self.manifest.requires_auth() && self.credentials.is_none() {
            return Err(StartupError::MissingCredentialValidator);
        }

        let clock = self.clock.unwrap_or_else(system_clock);
        let rate_limiter = if self.config.rate_limit_enabled {
            Some(AsapRateLimiter::from_spec(&self.config.rate_limit)?)
        } else {
            None
        };
        let nonces = match self.nonce_store {
            Some(store) => Some(store),
            None if self.config.require_nonce => {
                Some(Arc::new(InMemoryNonceStore::new(clock.clone())) as Arc<dyn NonceStore>)
            }
            None => None,
        };
        let executor = BoundedExecutor::new(self.config.max_workers, self.config.executor_queue);
        let timestamps = TimestampValidator::new(
            self.config.max_envelope_age,
            self.config.max_future_tolerance,
            clock.clone(),
        );

        let state = AppState {
            nonce_ttl: self.config.effective_nonce_ttl(),
            config: Arc::new(self.config),
            manifest: Arc::new(self.manifest),
            handlers: Arc::new(self.handlers),
            executor: Arc::new(executor),
            tasks: Arc::new(TaskTracker::new(clock.clone())),
            rate_limiter,
            timestamps,
            nonces,
            credentials: self.credentials,
            metrics: Arc::new(AsapMetrics::new()?),
            schemas: Arc::new(self.schemas.unwrap_or_else(PayloadSchemaRegistry::with_builtin)),
            clock,
            start_time: Instant::now(),
        };
        Ok(AsapServer { state })
    }
}
