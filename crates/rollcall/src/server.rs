//! `RollcallServer` builder and server loop.
//!
//! This is the entry point for running Rollcall. It ties the layers
//! together: transport → protocol → session registry, with the session
//! clock sweeping in the background.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rollcall_clock::{Clock, SweepConfig, SystemClock};
use rollcall_protocol::{Codec, JsonCodec};
use rollcall_session::{
    AuditSink, RosterProvider, ScanProcessor, SessionClock, SessionRegistry, SessionSchedule,
    TracingAuditSink,
};
use rollcall_token::{HmacTokenGenerator, TokenGenerator};
use rollcall_transport::{Transport, TransportError, WebSocketTransport};
use tokio::sync::watch;

use crate::RollcallError;
use crate::auth::Authenticator;
use crate::handler::handle_connection;

/// The current protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Server settings. Build one by hand, start from `Default`, or derive
/// it from a [`RollcallConfig`](crate::RollcallConfig) file.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Sweep cadence. Every session opened through this server gets a
    /// drift allowance equal to the sweep interval.
    pub sweep: SweepConfig,
    /// How long an ended session stays queryable before eviction.
    pub retention: Duration,
    /// Rotation period used when `OpenSession` omits one.
    pub default_rotation: Duration,
    /// Grace period used when `OpenSession` omits one.
    pub default_grace: Duration,
    pub handshake_timeout: Duration,
    /// Connections silent for this long are dropped.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            sweep: SweepConfig::default(),
            retention: Duration::from_secs(24 * 60 * 60),
            default_rotation: Duration::from_secs(30),
            default_grace: Duration::from_secs(300),
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Schedule for a session opened through this server. Unset periods
    /// fall back to the defaults; the drift allowance is the sweep
    /// interval the scheduler actually runs at.
    pub fn session_schedule(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        rotation_secs: Option<u64>,
        grace_secs: Option<u64>,
    ) -> SessionSchedule {
        SessionSchedule::new(window_start, window_end)
            .rotation_period(rotation_secs.map_or(self.default_rotation, Duration::from_secs))
            .grace_period(grace_secs.map_or(self.default_grace, Duration::from_secs))
            .drift_allowance(self.sweep.interval.max(SweepConfig::MIN_INTERVAL))
    }
}

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<A: Authenticator, R: RosterProvider, C: Codec> {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) processor: ScanProcessor,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) auth: A,
    pub(crate) rosters: R,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a Rollcall server.
///
/// # Example
///
/// ```rust,no_run
/// use rollcall::prelude::*;
///
/// # async fn start() -> Result<(), RollcallError> {
/// let server = RollcallServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build(StaticAuthenticator::new(), StaticRoster::new())
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct RollcallServerBuilder {
    config: ServerConfig,
    tokens: Option<Arc<dyn TokenGenerator>>,
    audit: Option<Arc<dyn AuditSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl RollcallServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            tokens: None,
            audit: None,
            clock: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Replaces every setting, including the bind address.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Token generator for new sessions. Defaults to HMAC with a random key.
    pub fn token_generator(mut self, tokens: Arc<dyn TokenGenerator>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Where audit entries go. Defaults to [`TracingAuditSink`].
    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Time source for scans and sweeps. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Binds the listener and wires up the registry.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<A, R>(
        self,
        auth: A,
        rosters: R,
    ) -> Result<RollcallServer<A, R, JsonCodec>, RollcallError>
    where
        A: Authenticator,
        R: RosterProvider,
    {
        let transport = WebSocketTransport::bind(self.config.bind_addr.as_str()).await?;
        let config = ServerConfig {
            sweep: self.config.sweep.validated(),
            ..self.config
        };

        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(HmacTokenGenerator::with_random_secret()));
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let registry = Arc::new(SessionRegistry::new(tokens, audit));
        let session_clock = SessionClock::new(
            Arc::clone(&registry),
            Arc::clone(&clock),
            config.sweep.clone(),
        )
        .with_retention(config.retention);

        let state = Arc::new(ServerState {
            processor: ScanProcessor::new(Arc::clone(&registry), Arc::clone(&clock)),
            registry,
            clock,
            auth,
            rosters,
            codec: JsonCodec,
            config,
        });

        Ok(RollcallServer {
            transport,
            state,
            session_clock,
        })
    }
}

impl Default for RollcallServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Rollcall server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RollcallServer<A: Authenticator, R: RosterProvider, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, R, C>>,
    session_clock: SessionClock,
}

impl<A, R, C> RollcallServer<A, R, C>
where
    A: Authenticator,
    R: RosterProvider,
    C: Codec,
{
    /// Creates a new builder.
    pub fn builder() -> RollcallServerBuilder {
        RollcallServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.transport.local_addr()
    }

    /// The registry behind this server, for in-process callers.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Runs until the process is terminated.
    pub async fn run(self) -> Result<(), RollcallError> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections and sweeps sessions until `shutdown` resolves.
    ///
    /// Connection tasks already running are left to finish on their own.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), RollcallError> {
        let Self {
            mut transport,
            state,
            session_clock,
        } = self;

        let (stop_clock, clock_shutdown) = watch::channel(false);
        let clock_task = tokio::spawn(session_clock.run(clock_shutdown));

        tracing::info!(addr = ?transport.local_addr().ok(), "Rollcall server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        let _ = stop_clock.send(true);
        if let Err(e) = clock_task.await {
            tracing::error!(error = %e, "session clock task failed");
        }
        tracing::info!("Rollcall server stopped");
        Ok(())
    }
}
