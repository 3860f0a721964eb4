//! Per-connection and per-message orchestration.
//!
//! The [`Dispatcher`] wires a [`RouteMatcher`], handler and middleware
//! resolvers, the [`ConnectionRegistry`], and the [`EventBus`] into the
//! lifecycle hooks a transport calls: [`on_open`](Dispatcher::on_open),
//! [`on_message`](Dispatcher::on_message), [`on_close`](Dispatcher::on_close),
//! and [`on_error`](Dispatcher::on_error).

pub mod hooks;
pub mod state;

pub use hooks::OpenHook;
pub use state::DispatchState;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use switchboard_core::{
    ConfigurationError, ConnectionRef, ConnectionRejected, DispatchError, Packet, RoutingError,
};
use switchboard_events::{EventBus, EventPayload, Listener, names};
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::{DISPATCH_DURATION_SECONDS, DISPATCH_ERRORS_TOTAL, DISPATCH_MESSAGES_TOTAL};
use crate::pipeline::{Middleware, MiddlewarePipeline, PipelineReport, Terminal, TerminalOutcome};
use crate::registry::ConnectionRegistry;
use crate::routing::{
    HandlerRegistry, HandlerResolver, MiddlewareRegistry, MiddlewareResolver, RouteMatch,
    RouteMatcher, RouteParams,
};
use state::StateTracker;

/// Result of a dispatched message that reached the end of its pipeline.
#[derive(Clone, Debug)]
pub struct DispatchReport {
    /// Matched route name.
    pub route: String,
    /// Params passed to the handler.
    pub params: RouteParams,
    /// States the message passed through, ending in `Done`.
    pub states: Vec<DispatchState>,
    /// Middleware step outcomes and the terminal outcome.
    pub pipeline: PipelineReport,
}

impl DispatchReport {
    /// Final state.
    pub fn state(&self) -> DispatchState {
        self.states.last().copied().unwrap_or(DispatchState::Received)
    }

    /// Whether the route handler ran.
    pub fn handler_invoked(&self) -> bool {
        self.states.contains(&DispatchState::HandlerInvoked)
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    matcher: Arc<dyn RouteMatcher>,
    handlers: Arc<dyn HandlerResolver>,
    middleware: Arc<dyn MiddlewareResolver>,
    events: Option<Arc<EventBus>>,
    registry: Option<Arc<ConnectionRegistry>>,
    global: Vec<Arc<dyn Middleware>>,
    open_hooks: Vec<Arc<dyn OpenHook>>,
    report_errors_to_client: bool,
}

impl DispatcherBuilder {
    /// Start from a route matcher with empty resolvers.
    pub fn new(matcher: Arc<dyn RouteMatcher>) -> Self {
        Self {
            matcher,
            handlers: Arc::new(HandlerRegistry::new()),
            middleware: Arc::new(MiddlewareRegistry::new()),
            events: None,
            registry: None,
            global: Vec::new(),
            open_hooks: Vec::new(),
            report_errors_to_client: true,
        }
    }

    /// Handler resolver.
    #[must_use]
    pub fn handlers(mut self, handlers: Arc<dyn HandlerResolver>) -> Self {
        self.handlers = handlers;
        self
    }

    /// Per-route middleware resolver.
    #[must_use]
    pub fn middleware(mut self, middleware: Arc<dyn MiddlewareResolver>) -> Self {
        self.middleware = middleware;
        self
    }

    /// Shared event bus. A fresh bus is created if unset.
    #[must_use]
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Shared registry. If unset, one emitting on the dispatcher's bus is created.
    #[must_use]
    pub fn registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Append a global middleware (runs before per-route middleware).
    #[must_use]
    pub fn global_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.global.push(middleware);
        self
    }

    /// Append a pre-registration hook.
    #[must_use]
    pub fn open_hook(mut self, hook: Arc<dyn OpenHook>) -> Self {
        self.open_hooks.push(hook);
        self
    }

    /// Whether failures are answered with `{"error":{...}}` frames.
    #[must_use]
    pub fn report_errors_to_client(mut self, enabled: bool) -> Self {
        self.report_errors_to_client = enabled;
        self
    }

    /// Validate every declared route and build the dispatcher.
    ///
    /// Each declared handler id and middleware id must resolve.
    pub fn build(self) -> Result<Dispatcher, ConfigurationError> {
        for route in self.matcher.declared_routes() {
            if let Some(handler) = &route.handler {
                let _ = self.handlers.resolve(handler)?;
            }
            for id in &route.middleware {
                let _ = self.middleware.resolve(id)?;
            }
        }

        let events = self.events.unwrap_or_default();
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ConnectionRegistry::with_events(events.clone())));

        debug!(
            routes = self.matcher.declared_routes().len(),
            global_middleware = self.global.len(),
            open_hooks = self.open_hooks.len(),
            "dispatcher built"
        );

        Ok(Dispatcher {
            matcher: self.matcher,
            handlers: self.handlers,
            middleware: self.middleware,
            events,
            registry,
            global: RwLock::new(self.global),
            open_hooks: RwLock::new(self.open_hooks),
            report_errors_to_client: self.report_errors_to_client,
        })
    }
}

/// Composition root of the core.
pub struct Dispatcher {
    matcher: Arc<dyn RouteMatcher>,
    handlers: Arc<dyn HandlerResolver>,
    middleware: Arc<dyn MiddlewareResolver>,
    events: Arc<EventBus>,
    registry: Arc<ConnectionRegistry>,
    global: RwLock<Vec<Arc<dyn Middleware>>>,
    open_hooks: RwLock<Vec<Arc<dyn OpenHook>>>,
    report_errors_to_client: bool,
}

impl Dispatcher {
    /// Start building a dispatcher.
    pub fn builder(matcher: Arc<dyn RouteMatcher>) -> DispatcherBuilder {
        DispatcherBuilder::new(matcher)
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The lifecycle event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Add a listener on the event bus.
    pub fn register_event_listener(&self, event: &str, listener: Listener) {
        self.events.add_listener(event, listener);
    }

    /// Append a global middleware. Affects messages dispatched afterwards.
    pub fn add_global_middleware(&self, middleware: Arc<dyn Middleware>) {
        debug!(middleware = middleware.name(), "global middleware added");
        self.global.write().push(middleware);
    }

    /// Append a pre-registration hook.
    pub fn add_open_hook(&self, hook: Arc<dyn OpenHook>) {
        debug!(hook = hook.name(), "open hook added");
        self.open_hooks.write().push(hook);
    }

    /// Names of the global middleware in execution order.
    pub fn global_middleware_names(&self) -> Vec<String> {
        self.global
            .read()
            .iter()
            .map(|m| m.name().to_owned())
            .collect()
    }

    /// Transport-level open.
    ///
    /// Emits `connection.opened`, runs the open hooks, then registers the
    /// connection. A listener error or hook rejection closes the connection
    /// and it is never registered. A duplicate identity also closes it.
    #[instrument(skip_all, fields(conn_id = %conn.id()))]
    pub async fn on_open(&self, conn: &ConnectionRef) -> Result<(), DispatchError> {
        if let Err(e) = self
            .events
            .dispatch(names::CONNECTION_OPENED, &EventPayload::Connection(conn.clone()))
        {
            return Err(self.reject(conn, "listener", ConnectionRejected::new(e.to_string())));
        }

        let hooks: Vec<Arc<dyn OpenHook>> = self.open_hooks.read().clone();
        for hook in hooks {
            if let Err(rejection) = hook.on_open(conn).await {
                return Err(self.reject(conn, hook.name(), rejection));
            }
        }

        if let Err(duplicate) = self.registry.add(conn) {
            warn!(error = %duplicate, "duplicate connection identity, closing");
            conn.close();
            metrics::counter!(DISPATCH_ERRORS_TOTAL, "kind" => "DUPLICATE_CONNECTION")
                .increment(1);
            return Err(duplicate.into());
        }

        info!("connection opened");
        Ok(())
    }

    /// Dispatch one inbound frame.
    ///
    /// Emits `message.received`, decodes, matches the route, and runs global
    /// then per-route middleware ending in the route handler. Failures are
    /// logged, counted, and (if enabled) answered with an error frame; the
    /// connection stays open.
    ///
    /// A connection that is not the one registered under its id (rejected at
    /// open, a refused duplicate, or never opened) is closed and refused with
    /// `Rejected` before any listener, middleware or handler runs.
    #[instrument(skip_all, fields(conn_id = %conn.id()))]
    pub async fn on_message(
        &self,
        conn: &ConnectionRef,
        raw: Bytes,
    ) -> Result<DispatchReport, DispatchError> {
        let started = Instant::now();
        metrics::counter!(DISPATCH_MESSAGES_TOTAL).increment(1);

        let result = self.dispatch(conn, raw).await;

        metrics::histogram!(DISPATCH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result.map_err(|(err, failed_in)| {
            self.report_failure(conn, &err, failed_in);
            err
        })
    }

    /// Transport-level close. Safe for connections that never registered.
    #[instrument(skip_all, fields(conn_id = %conn.id()))]
    pub fn on_close(&self, conn: &ConnectionRef) {
        if self.registry.remove(conn) {
            info!("connection closed");
        } else {
            debug!("close for unregistered connection");
        }
    }

    /// Transport-level error: logs and closes. The transport still calls
    /// [`on_close`](Self::on_close) afterwards.
    pub fn on_error(&self, conn: &ConnectionRef, err: &dyn std::error::Error) {
        warn!(conn_id = %conn.id(), error = %err, "connection error, closing");
        conn.close();
    }

    async fn dispatch(
        &self,
        conn: &ConnectionRef,
        raw: Bytes,
    ) -> Result<DispatchReport, (DispatchError, DispatchState)> {
        let mut state = StateTracker::new();
        let fail = |err: DispatchError, state: &mut StateTracker| {
            let failed_in = state.current();
            state.advance(DispatchState::Error);
            (err, failed_in)
        };

        if !self.registry.contains(conn) {
            conn.close();
            let rejection = ConnectionRejected::new("connection is not registered");
            return Err(fail(rejection.into(), &mut state));
        }

        if let Err(e) = self.events.dispatch(
            names::MESSAGE_RECEIVED,
            &EventPayload::MessageReceived {
                connection: conn.clone(),
                raw: raw.clone(),
            },
        ) {
            warn!(error = %e, "message.received listener failed");
        }

        let packet = Packet::from_json(&raw).map_err(|e| fail(e.into(), &mut state))?;

        let Some(matched) = self.matcher.match_route(packet.route()) else {
            let err = RoutingError::NoMatch {
                route: packet.route().to_owned(),
            };
            return Err(fail(err.into(), &mut state));
        };
        let Some(handler_id) = matched.handler.clone() else {
            let err = RoutingError::MissingHandler {
                route: matched.route.clone(),
            };
            return Err(fail(err.into(), &mut state));
        };
        let pipeline = self
            .pipeline_for(&matched)
            .map_err(|e| fail(e.into(), &mut state))?;
        state.advance(DispatchState::RouteMatched);
        debug!(route = %matched.route, handler = %handler_id, "route matched");

        let terminal = RouteTerminal {
            handlers: self.handlers.as_ref(),
            handler_id: &handler_id,
            params: &matched.params,
            invoked: AtomicBool::new(false),
        };
        state.advance(DispatchState::MiddlewareRunning);
        let report = pipeline.process(conn, packet, &terminal).await;
        if terminal.invoked.load(Ordering::Acquire) {
            state.advance(DispatchState::HandlerInvoked);
        }

        if let TerminalOutcome::Failed(err) = &report.terminal {
            return Err(fail(err.clone(), &mut state));
        }
        state.advance(DispatchState::Done);

        Ok(DispatchReport {
            route: matched.route,
            params: matched.params,
            states: state.into_history(),
            pipeline: report,
        })
    }

    fn pipeline_for(&self, matched: &RouteMatch) -> Result<MiddlewarePipeline, ConfigurationError> {
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.extend(self.global.read().iter().cloned());
        for id in &matched.middleware {
            pipeline.add(self.middleware.resolve(id)?);
        }
        Ok(pipeline)
    }

    fn reject(&self, conn: &ConnectionRef, by: &str, rejection: ConnectionRejected) -> DispatchError {
        warn!(rejected_by = by, reason = %rejection.reason, "connection rejected");
        metrics::counter!(DISPATCH_ERRORS_TOTAL, "kind" => "CONNECTION_REJECTED").increment(1);
        conn.close();
        rejection.into()
    }

    fn report_failure(&self, conn: &ConnectionRef, err: &DispatchError, failed_in: DispatchState) {
        match err {
            DispatchError::Configuration(_) => {
                error!(state = %failed_in, error = %err, "dispatch configuration error");
            }
            _ => warn!(state = %failed_in, code = err.code(), error = %err, "dispatch failed"),
        }
        metrics::counter!(DISPATCH_ERRORS_TOTAL, "kind" => err.code()).increment(1);

        if self.report_errors_to_client
            && !matches!(err, DispatchError::Send(_) | DispatchError::Rejected(_))
        {
            if let Err(e) = conn.send_json(&err.to_frame()) {
                debug!(error = %e, "could not deliver error frame");
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.matcher.declared_routes().len())
            .field("global_middleware", &self.global_middleware_names())
            .field("open_hooks", &self.open_hooks.read().len())
            .field("registry", &self.registry)
            .field("report_errors_to_client", &self.report_errors_to_client)
            .finish_non_exhaustive()
    }
}

struct RouteTerminal<'a> {
    handlers: &'a dyn HandlerResolver,
    handler_id: &'a str,
    params: &'a RouteParams,
    invoked: AtomicBool,
}

#[async_trait]
impl Terminal for RouteTerminal<'_> {
    async fn call(&self, conn: &ConnectionRef, packet: &Packet) -> Result<(), DispatchError> {
        let handler = self.handlers.resolve(self.handler_id)?;
        self.invoked.store(true, Ordering::Release);
        handler.handle(conn, packet, self.params).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MiddlewareError;
    use crate::pipeline::{Next, StepOutcome};
    use crate::routing::{RouteHandler, RouteTable};
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use serde_json::json;
    use switchboard_core::{Connection, HandlerError, MemoryConnection, RouteDefinition};
    use switchboard_events::{ListenerError, listener};
    use switchboard_logging::capture_logs;

    type Calls = Arc<Mutex<Vec<(String, RouteParams, Packet)>>>;

    struct RecordingHandler {
        calls: Calls,
    }

    #[async_trait]
    impl RouteHandler for RecordingHandler {
        async fn handle(
            &self,
            conn: &ConnectionRef,
            packet: &Packet,
            params: &RouteParams,
        ) -> Result<(), HandlerError> {
            self.calls
                .lock()
                .push((conn.id().to_string(), params.clone(), packet.clone()));
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl RouteHandler for FailingHandler {
        async fn handle(
            &self,
            _conn: &ConnectionRef,
            _packet: &Packet,
            _params: &RouteParams,
        ) -> Result<(), HandlerError> {
            Err(HandlerError::new("room service down"))
        }
    }

    struct Tagging {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        forward: bool,
    }

    #[async_trait]
    impl Middleware for Tagging {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(
            &self,
            conn: &ConnectionRef,
            packet: &mut Packet,
            next: Next<'_>,
        ) -> Result<(), MiddlewareError> {
            self.log.lock().push(self.name.to_string());
            if !self.forward {
                return Ok(());
            }
            packet.set_metadata(self.name, json!(true));
            next.run(conn.clone(), packet).await;
            Ok(())
        }
    }

    struct Erroring;

    #[async_trait]
    impl Middleware for Erroring {
        fn name(&self) -> &str {
            "erroring"
        }

        async fn handle(
            &self,
            _conn: &ConnectionRef,
            _packet: &mut Packet,
            _next: Next<'_>,
        ) -> Result<(), MiddlewareError> {
            Err(MiddlewareError::new("validator crashed"))
        }
    }

    struct DenyAll;

    #[async_trait]
    impl OpenHook for DenyAll {
        fn name(&self) -> &str {
            "deny_all"
        }

        async fn on_open(&self, conn: &ConnectionRef) -> Result<(), ConnectionRejected> {
            let _ = conn.send_text("go away");
            Err(ConnectionRejected::new("denied"))
        }
    }

    fn routes() -> Arc<RouteTable> {
        Arc::new(
            RouteTable::new(vec![
                RouteDefinition::new("join_room", "room/{roomId}/join", "ChatHandler"),
                RouteDefinition::new("audited", "audit/{id}", "ChatHandler")
                    .with_middleware("audit"),
                RouteDefinition::new("broken", "broken", "Failing"),
                RouteDefinition {
                    name: "orphan".into(),
                    path: "orphan".into(),
                    handler: None,
                    middleware: vec![],
                },
            ])
            .unwrap(),
        )
    }

    struct Fixture {
        dispatcher: Dispatcher,
        calls: Calls,
        log: Arc<Mutex<Vec<String>>>,
    }

    fn fixture_with(configure: impl FnOnce(DispatcherBuilder) -> DispatcherBuilder) -> Fixture {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = HandlerRegistry::new();
        handlers.register(
            "ChatHandler",
            Arc::new(RecordingHandler {
                calls: calls.clone(),
            }),
        );
        handlers.register("Failing", Arc::new(FailingHandler));
        let mut middleware = MiddlewareRegistry::new();
        middleware.register(
            "audit",
            Arc::new(Tagging {
                name: "audit",
                log: log.clone(),
                forward: true,
            }),
        );
        let builder = Dispatcher::builder(routes())
            .handlers(Arc::new(handlers))
            .middleware(Arc::new(middleware));
        Fixture {
            dispatcher: configure(builder).build().unwrap(),
            calls,
            log,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|b| b)
    }

    async fn open(dispatcher: &Dispatcher, id: &str) -> (Arc<MemoryConnection>, ConnectionRef) {
        let mem = MemoryConnection::shared(id);
        let conn: ConnectionRef = mem.clone();
        dispatcher.on_open(&conn).await.unwrap();
        (mem, conn)
    }

    fn frame(route: &str, msg: serde_json::Value) -> Bytes {
        Bytes::from(json!({"route": route, "msg": msg}).to_string())
    }

    #[tokio::test]
    async fn routes_to_handler_with_params_exactly_once() {
        let f = fixture();
        let (_, conn) = open(&f.dispatcher, "c1").await;

        let report = f
            .dispatcher
            .on_message(&conn, frame("room/42/join", json!("hi")))
            .await
            .unwrap();

        assert_eq!(report.route, "join_room");
        assert_eq!(report.state(), DispatchState::Done);
        assert!(report.handler_invoked());
        let calls = f.calls.lock();
        assert_eq!(calls.len(), 1);
        let (conn_id, params, packet) = &calls[0];
        assert_eq!(conn_id, "c1");
        assert_eq!(params.get("roomId").map(String::as_str), Some("42"));
        assert_eq!(params.get("_route").map(String::as_str), Some("join_room"));
        assert_eq!(packet.payload(), &json!("hi"));
    }

    #[tokio::test]
    async fn happy_path_state_history() {
        let f = fixture();
        let (_, conn) = open(&f.dispatcher, "c1").await;
        let report = f
            .dispatcher
            .on_message(&conn, frame("room/1/join", json!(null)))
            .await
            .unwrap();
        assert_eq!(
            report.states,
            vec![
                DispatchState::Received,
                DispatchState::RouteMatched,
                DispatchState::MiddlewareRunning,
                DispatchState::HandlerInvoked,
                DispatchState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn no_match_is_routing_error_and_connection_stays_open() {
        let f = fixture();
        let (mem, conn) = open(&f.dispatcher, "c1").await;

        let err = f
            .dispatcher
            .on_message(&conn, frame("nowhere", json!("x")))
            .await
            .unwrap_err();

        assert_matches!(err, DispatchError::Routing(RoutingError::NoMatch { .. }));
        assert!(!mem.is_closed());
        assert!(f.dispatcher.registry().get(conn.id()).is_some());
        let sent = mem.sent_text();
        let frame: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(frame["error"]["code"], "ROUTING_ERROR");
        assert!(f.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn route_without_handler_is_routing_error() {
        let f = fixture();
        let (_, conn) = open(&f.dispatcher, "c1").await;
        let err = f
            .dispatcher
            .on_message(&conn, frame("orphan", json!(null)))
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Routing(RoutingError::MissingHandler { route }) if route == "orphan");
    }

    #[tokio::test]
    async fn malformed_frame_is_reported_not_fatal() {
        let f = fixture();
        let (mem, conn) = open(&f.dispatcher, "c1").await;
        let err = f
            .dispatcher
            .on_message(&conn, Bytes::from_static(b"{\"msg\":1}"))
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Malformed(_));
        assert!(!mem.is_closed());
        assert!(mem.sent_text()[0].contains("MALFORMED_MESSAGE"));
    }

    #[tokio::test]
    async fn error_frames_can_be_disabled() {
        let f = fixture_with(|b| b.report_errors_to_client(false));
        let (mem, conn) = open(&f.dispatcher, "c1").await;
        let _ = f
            .dispatcher
            .on_message(&conn, frame("nowhere", json!("x")))
            .await;
        assert!(mem.sent().is_empty());
    }

    #[tokio::test]
    async fn global_then_route_middleware_order() {
        let f = fixture();
        f.dispatcher.add_global_middleware(Arc::new(Tagging {
            name: "g1",
            log: f.log.clone(),
            forward: true,
        }));
        f.dispatcher.add_global_middleware(Arc::new(Tagging {
            name: "g2",
            log: f.log.clone(),
            forward: true,
        }));
        let (_, conn) = open(&f.dispatcher, "c1").await;

        let report = f
            .dispatcher
            .on_message(&conn, frame("audit/7", json!(null)))
            .await
            .unwrap();

        assert_eq!(*f.log.lock(), vec!["g1", "g2", "audit"]);
        let names: Vec<&str> = report
            .pipeline
            .steps
            .iter()
            .map(|s| s.middleware.as_str())
            .collect();
        assert_eq!(names, vec!["g1", "g2", "audit"]);
        let packet = &f.calls.lock()[0].2;
        assert_eq!(packet.metadata("g1"), Some(&json!(true)));
        assert_eq!(packet.metadata("audit"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn short_circuit_skips_handler() {
        let f = fixture();
        f.dispatcher.add_global_middleware(Arc::new(Tagging {
            name: "gate",
            log: f.log.clone(),
            forward: false,
        }));
        let (_, conn) = open(&f.dispatcher, "c1").await;
        let report = f
            .dispatcher
            .on_message(&conn, frame("audit/7", json!(null)))
            .await
            .unwrap();
        assert_eq!(*f.log.lock(), vec!["gate"]);
        assert!(!report.handler_invoked());
        assert_eq!(report.pipeline.short_circuited_by(), Some("gate"));
        assert_eq!(report.state(), DispatchState::Done);
        assert!(f.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn erroring_middleware_does_not_block_handler() {
        let (logs, _guard) = capture_logs();
        let f = fixture_with(|b| b.global_middleware(Arc::new(Erroring)));
        let (mem, conn) = open(&f.dispatcher, "c1").await;
        let report = f
            .dispatcher
            .on_message(&conn, frame("room/1/join", json!(null)))
            .await
            .unwrap();
        assert!(report.handler_invoked());
        assert_matches!(
            report.pipeline.steps[0].outcome,
            StepOutcome::ErrorContinue(_)
        );
        assert!(mem.sent().is_empty());
        assert!(logs.has_event(tracing::Level::WARN, "middleware failed (continuing)"));
    }

    #[tokio::test]
    async fn handler_error_is_reported() {
        let f = fixture();
        let (mem, conn) = open(&f.dispatcher, "c1").await;
        let err = f
            .dispatcher
            .on_message(&conn, frame("broken", json!(null)))
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Handler(_));
        assert!(mem.sent_text()[0].contains("HANDLER_ERROR"));
        assert!(!mem.is_closed());
    }

    #[test]
    fn build_rejects_unknown_handler() {
        let table = Arc::new(
            RouteTable::new(vec![RouteDefinition::new("r", "r", "Nobody")]).unwrap(),
        );
        let err = Dispatcher::builder(table).build().unwrap_err();
        assert_matches!(err, ConfigurationError::UnknownHandler { handler } if handler == "Nobody");
    }

    #[test]
    fn build_rejects_unknown_route_middleware() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(
            "H",
            Arc::new(RecordingHandler {
                calls: Arc::default(),
            }),
        );
        let table = Arc::new(
            RouteTable::new(vec![RouteDefinition::new("r", "r", "H").with_middleware("ghost")])
                .unwrap(),
        );
        let err = Dispatcher::builder(table)
            .handlers(Arc::new(handlers))
            .build()
            .unwrap_err();
        assert_matches!(err, ConfigurationError::UnknownMiddleware { middleware } if middleware == "ghost");
    }

    struct OpaqueMatcher;

    impl RouteMatcher for OpaqueMatcher {
        fn match_route(&self, route: &str) -> Option<RouteMatch> {
            let mut params = RouteParams::new();
            let _ = params.insert("_route".into(), route.to_owned());
            Some(RouteMatch {
                route: route.to_owned(),
                handler: Some("Unregistered".into()),
                middleware: vec![],
                params,
            })
        }
    }

    #[tokio::test]
    async fn unresolvable_handler_at_dispatch_is_configuration_error() {
        let (logs, _guard) = capture_logs();
        let dispatcher = Dispatcher::builder(Arc::new(OpaqueMatcher)).build().unwrap();
        let mem = MemoryConnection::shared("c1");
        let conn: ConnectionRef = mem.clone();
        dispatcher.on_open(&conn).await.unwrap();

        let err = dispatcher
            .on_message(&conn, frame("anything", json!(null)))
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Configuration(ConfigurationError::UnknownHandler { .. }));
        assert_ne!(err.code(), "ROUTING_ERROR");
        assert!(logs.has_event(tracing::Level::ERROR, "dispatch configuration error"));
        assert!(!mem.is_closed());
    }

    #[tokio::test]
    async fn open_registers_and_emits() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in [names::CONNECTION_OPENED, names::CONNECTION_ADDED] {
            let seen = seen.clone();
            f.dispatcher.register_event_listener(
                name,
                listener(move |_| {
                    seen.lock().push(name);
                    Ok(())
                }),
            );
        }
        let (_, conn) = open(&f.dispatcher, "c1").await;
        assert_eq!(f.dispatcher.registry().len(), 1);
        assert!(f.dispatcher.registry().get(conn.id()).is_some());
        assert_eq!(*seen.lock(), vec!["connection.opened", "connection.added"]);
    }

    #[tokio::test]
    async fn rejecting_hook_closes_and_never_registers() {
        let f = fixture_with(|b| b.open_hook(Arc::new(DenyAll)));
        let mem = MemoryConnection::shared("c1");
        let conn: ConnectionRef = mem.clone();

        let err = f.dispatcher.on_open(&conn).await.unwrap_err();
        assert_matches!(err, DispatchError::Rejected(_));
        assert!(err.closes_connection());
        assert!(mem.is_closed());
        assert_eq!(mem.sent_text(), vec!["go away"]);
        assert!(f.dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn opened_listener_error_rejects() {
        let f = fixture();
        f.dispatcher.register_event_listener(
            names::CONNECTION_OPENED,
            listener(|_| Err(ListenerError::new("banned address"))),
        );
        let mem = MemoryConnection::shared("c1");
        let conn: ConnectionRef = mem.clone();
        let err = f.dispatcher.on_open(&conn).await.unwrap_err();
        assert_matches!(err, DispatchError::Rejected(ConnectionRejected { reason }) if reason.contains("banned address"));
        assert!(mem.is_closed());
        assert!(f.dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn duplicate_identity_is_closed() {
        let f = fixture();
        let (first, _) = open(&f.dispatcher, "c1").await;
        let dup = MemoryConnection::shared("c1");
        let dup_ref: ConnectionRef = dup.clone();
        let err = f.dispatcher.on_open(&dup_ref).await.unwrap_err();
        assert_matches!(err, DispatchError::Duplicate(_));
        assert!(dup.is_closed());
        assert!(!first.is_closed());
        assert_eq!(f.dispatcher.registry().len(), 1);
    }

    #[tokio::test]
    async fn closing_refused_duplicate_keeps_original() {
        let f = fixture();
        let (first, original) = open(&f.dispatcher, "c1").await;
        assert!(f.dispatcher.registry().subscribe(&original, "room"));

        let dup: ConnectionRef = MemoryConnection::shared("c1");
        assert!(f.dispatcher.on_open(&dup).await.is_err());
        f.dispatcher.on_close(&dup);

        let registry = f.dispatcher.registry();
        assert!(registry.contains(&original));
        assert!(registry.is_subscribed(&original, "room"));
        assert_eq!(registry.subscribers_of("room").len(), 1);
        assert!(!first.is_closed());
    }

    #[tokio::test]
    async fn rejected_connection_gets_no_dispatch() {
        let f = fixture_with(|b| b.open_hook(Arc::new(DenyAll)));
        let mem = MemoryConnection::shared("c1");
        let conn: ConnectionRef = mem.clone();
        assert!(f.dispatcher.on_open(&conn).await.is_err());

        let err = f
            .dispatcher
            .on_message(&conn, frame("room/1/join", json!(1)))
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Rejected(_));
        assert!(f.calls.lock().is_empty());
        assert_eq!(mem.sent_text(), vec!["go away"]);
    }

    #[tokio::test]
    async fn unopened_or_duplicate_connection_gets_no_dispatch() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(0_usize));
        let s = seen.clone();
        f.dispatcher.register_event_listener(
            names::MESSAGE_RECEIVED,
            listener(move |_| {
                *s.lock() += 1;
                Ok(())
            }),
        );

        let stranger_mem = MemoryConnection::shared("stranger");
        let stranger: ConnectionRef = stranger_mem.clone();
        let err = f
            .dispatcher
            .on_message(&stranger, frame("audit/1", json!(null)))
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Rejected(_));
        assert!(stranger_mem.is_closed());

        let (_, _original) = open(&f.dispatcher, "c1").await;
        let dup: ConnectionRef = MemoryConnection::shared("c1");
        assert!(f.dispatcher.on_open(&dup).await.is_err());
        assert!(f
            .dispatcher
            .on_message(&dup, frame("audit/2", json!(null)))
            .await
            .is_err());

        assert_eq!(*seen.lock(), 0);
        assert!(f.log.lock().is_empty());
        assert!(f.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn close_purges_and_is_safe_twice() {
        let f = fixture();
        let (_, conn) = open(&f.dispatcher, "c1").await;
        let _ = f.dispatcher.registry().subscribe(&conn, "room:1");
        f.dispatcher.on_close(&conn);
        f.dispatcher.on_close(&conn);
        assert!(f.dispatcher.registry().is_empty());
        assert!(f.dispatcher.registry().subscribers_of("room:1").is_empty());

        let never: ConnectionRef = MemoryConnection::shared("never");
        f.dispatcher.on_close(&never);
    }

    #[tokio::test]
    async fn on_error_closes() {
        let f = fixture();
        let (mem, conn) = open(&f.dispatcher, "c1").await;
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        f.dispatcher.on_error(&conn, &io);
        assert!(mem.is_closed());
    }

    #[tokio::test]
    async fn message_received_emitted_before_decoding() {
        let f = fixture();
        let raw_seen = Arc::new(Mutex::new(Vec::new()));
        let r = raw_seen.clone();
        f.dispatcher.register_event_listener(
            names::MESSAGE_RECEIVED,
            listener(move |p| {
                if let EventPayload::MessageReceived { raw, .. } = p {
                    r.lock().push(raw.clone());
                }
                Ok(())
            }),
        );
        let (_, conn) = open(&f.dispatcher, "c1").await;
        let _ = f
            .dispatcher
            .on_message(&conn, Bytes::from_static(b"garbage"))
            .await;
        assert_eq!(raw_seen.lock()[0], Bytes::from_static(b"garbage"));
    }

    #[tokio::test]
    async fn handler_sends_to_already_closed_connection() {
        struct Echo;

        #[async_trait]
        impl RouteHandler for Echo {
            async fn handle(
                &self,
                conn: &ConnectionRef,
                packet: &Packet,
                _params: &RouteParams,
            ) -> Result<(), HandlerError> {
                conn.send(packet.payload_bytes())?;
                Ok(())
            }
        }

        let mut handlers = HandlerRegistry::new();
        handlers.register("Echo", Arc::new(Echo));
        let table = Arc::new(RouteTable::new(vec![RouteDefinition::new("echo", "echo", "Echo")]).unwrap());
        let dispatcher = Dispatcher::builder(table)
            .handlers(Arc::new(handlers))
            .build()
            .unwrap();
        let mem = MemoryConnection::shared("c1");
        let conn: ConnectionRef = mem.clone();
        dispatcher.on_open(&conn).await.unwrap();
        mem.close();

        let err = dispatcher
            .on_message(&conn, frame("echo", json!("x")))
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Handler(_));
    }
}
