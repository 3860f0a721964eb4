//! Handler and middleware resolution by id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use switchboard_core::{ConfigurationError, ConnectionRef, HandlerError, Packet};

use crate::pipeline::Middleware;
use crate::routing::matcher::RouteParams;

/// Terminal business logic for a resolved route.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Handle a packet that passed the middleware chain.
    async fn handle(
        &self,
        conn: &ConnectionRef,
        packet: &Packet,
        params: &RouteParams,
    ) -> Result<(), HandlerError>;
}

/// Resolves handler ids declared by routes.
pub trait HandlerResolver: Send + Sync {
    /// Look up a handler; unknown ids are a wiring defect.
    fn resolve(&self, handler: &str) -> Result<Arc<dyn RouteHandler>, ConfigurationError>;
}

/// Resolves per-route middleware ids.
pub trait MiddlewareResolver: Send + Sync {
    /// Look up a middleware; unknown ids are a wiring defect.
    fn resolve(&self, middleware: &str) -> Result<Arc<dyn Middleware>, ConfigurationError>;
}

/// Map-backed [`HandlerResolver`].
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn RouteHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `id`, replacing any previous entry.
    pub fn register(&mut self, id: impl Into<String>, handler: Arc<dyn RouteHandler>) {
        let _ = self.handlers.insert(id.into(), handler);
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl HandlerResolver for HandlerRegistry {
    fn resolve(&self, handler: &str) -> Result<Arc<dyn RouteHandler>, ConfigurationError> {
        self.handlers
            .get(handler)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownHandler {
                handler: handler.to_owned(),
            })
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.ids())
            .finish()
    }
}

/// Map-backed [`MiddlewareResolver`].
#[derive(Default)]
pub struct MiddlewareRegistry {
    middleware: HashMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `middleware` under `id`, replacing any previous entry.
    pub fn register(&mut self, id: impl Into<String>, middleware: Arc<dyn Middleware>) {
        let _ = self.middleware.insert(id.into(), middleware);
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.middleware.contains_key(id)
    }
}

impl MiddlewareResolver for MiddlewareRegistry {
    fn resolve(&self, middleware: &str) -> Result<Arc<dyn Middleware>, ConfigurationError> {
        self.middleware
            .get(middleware)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownMiddleware {
                middleware: middleware.to_owned(),
            })
    }
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.middleware.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("MiddlewareRegistry")
            .field("middleware", &ids)
            .finish()
    }
}
