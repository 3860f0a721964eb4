//! Dispatcher assembly from settings.

use std::path::Path;
use std::sync::Arc;

use switchboard_core::{ConfigurationError, RouteDefinition};
use switchboard_events::EventBus;
use switchboard_runtime::{
    ConnectionRegistry, Dispatcher, HandlerRegistry, MiddlewareRegistry, RouteTable,
    TraceMiddleware,
};
use switchboard_settings::SwitchboardSettings;
use tracing::info;

use crate::chat::{CHAT_HANDLER, ChatHandler};

/// Chat room routes used when no route table is configured.
pub fn default_routes() -> Vec<RouteDefinition> {
    vec![
        RouteDefinition::new("join_room", "room/{roomId}/join", CHAT_HANDLER),
        RouteDefinition::new("leave_room", "room/{roomId}/leave", CHAT_HANDLER),
        RouteDefinition::new("room_publish", "room/{roomId}/publish", CHAT_HANDLER),
    ]
}

/// Route table from `routesPath`, else inline `routes`, else the chat defaults.
pub fn route_table(settings: &SwitchboardSettings) -> Result<RouteTable, ConfigurationError> {
    if let Some(path) = &settings.routing.routes_path {
        info!(path, "loading routes file");
        return RouteTable::from_file(Path::new(path));
    }
    if settings.routing.routes.is_empty() {
        return RouteTable::new(default_routes());
    }
    RouteTable::new(settings.routing.routes.clone())
}

/// Wire the chat handler, built-in middleware and route table into a dispatcher.
pub fn build_dispatcher(settings: &SwitchboardSettings) -> Result<Dispatcher, ConfigurationError> {
    let table = route_table(settings)?;
    let events = Arc::new(EventBus::default());
    let registry = Arc::new(ConnectionRegistry::with_events(events.clone()));

    let mut handlers = HandlerRegistry::new();
    handlers.register(CHAT_HANDLER, Arc::new(ChatHandler::new(registry.clone())));

    let mut middleware = MiddlewareRegistry::new();
    middleware.register("trace", Arc::new(TraceMiddleware));

    info!(routes = table.len(), "route table ready");
    Dispatcher::builder(Arc::new(table))
        .handlers(Arc::new(handlers))
        .middleware(Arc::new(middleware))
        .events(events)
        .registry(registry)
        .report_errors_to_client(settings.dispatch.report_errors_to_client)
        .build()
}
