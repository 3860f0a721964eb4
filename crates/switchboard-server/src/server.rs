//! `SwitchboardServer`: Axum HTTP + WebSocket front end for a dispatcher.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use switchboard_core::Metadata;
use switchboard_events::Listener;
use switchboard_runtime::{BootContext, Dispatcher, Middleware, Plugin, PluginManager};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REFUSED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{SessionLimits, WsConnection, run_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    config: Arc<ServerConfig>,
    shutdown: ShutdownCoordinator,
    slots: Arc<AtomicUsize>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// The Switchboard server.
pub struct SwitchboardServer {
    config: Arc<ServerConfig>,
    dispatcher: Arc<Dispatcher>,
    plugins: PluginManager,
    metrics: Option<PrometheusHandle>,
    shutdown: ShutdownCoordinator,
    slots: Arc<AtomicUsize>,
    start_time: Instant,
}

impl SwitchboardServer {
    /// Create a server around a built dispatcher.
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            plugins: PluginManager::new(),
            metrics: None,
            shutdown: ShutdownCoordinator::new(),
            slots: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Add a lifecycle event listener.
    pub fn register_event_listener(&self, event: &str, listener: Listener) {
        self.dispatcher.register_event_listener(event, listener);
    }

    /// Add a plugin. Plugins register and boot when the server starts listening.
    pub fn add_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.add_plugin(plugin);
    }

    /// Append a global middleware.
    pub fn add_global_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.dispatcher.add_global_middleware(middleware);
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            slots: self.slots.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Register and boot plugins, bind, and start serving.
    ///
    /// The returned handle stops the server; shutdown stops accepting,
    /// drains sessions, and unregisters plugins.
    pub async fn listen(mut self) -> Result<ServerHandle, ServerError> {
        self.plugins.register_plugins(self.dispatcher.events())?;
        self.plugins
            .boot_plugins(&mut BootContext::new(&self.dispatcher))?;

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, plugins = self.plugins.len(), "switchboard listening");

        let router = self.router();
        let shutdown = self.shutdown.clone();
        let token = shutdown.token();
        let drain_timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        let dispatcher = self.dispatcher.clone();
        let mut plugins = self.plugins;

        let serve_token = token.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(serve_token.cancelled_owned())
                .await;
            let _ = shutdown.drain(drain_timeout).await;
            plugins.unregister_plugins(dispatcher.events());
            info!("switchboard stopped");
            result.map_err(ServerError::from)
        });

        Ok(ServerHandle { addr, token, task })
    }
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Begin graceful shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Wait for the server to stop.
    pub async fn wait(self) -> Result<(), ServerError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ServerError::Task(e.to_string())),
        }
    }

    /// Shut down and wait.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown();
        self.wait().await
    }
}

/// One of `max_connections` session slots; released on drop.
struct SessionSlot(Arc<AtomicUsize>);

impl SessionSlot {
    fn acquire(slots: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(slots.clone()))
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    let Some(slot) = SessionSlot::acquire(&state.slots, state.config.max_connections) else {
        warn!(
            max_connections = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        counter!(WS_CONNECTIONS_REFUSED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let metadata: Metadata = query
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    let (conn, outbound) = WsConnection::new(metadata, state.config.outbound_queue_size);
    let limits = SessionLimits {
        heartbeat_interval: state.config.heartbeat_interval(),
        heartbeat_timeout: state.config.heartbeat_timeout(),
    };
    let dispatcher = state.dispatcher.clone();
    let shutdown = state.shutdown.clone();

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let token = shutdown.token();
            shutdown.spawn_session(async move {
                let _slot = slot;
                run_session(socket, conn, outbound, dispatcher, limits, token).await;
            });
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.dispatcher.registry();
    Json(health::health_check(
        state.start_time,
        registry.len(),
        registry.topic_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map_or_else(String::new, PrometheusHandle::render);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
