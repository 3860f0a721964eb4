//! Plugin capability and boot context.

use std::sync::Arc;

use switchboard_events::EventBus;

use crate::dispatcher::{Dispatcher, OpenHook};
use crate::errors::PluginError;
use crate::pipeline::Middleware;
use crate::registry::ConnectionRegistry;

/// An optional component hooking the event bus and the dispatch path.
pub trait Plugin: Send + Sync {
    /// Unique name used in logs and `plugin.registered` payloads.
    fn name(&self) -> &str;

    /// Wire event listeners. Runs before any plugin boots.
    fn register(&self, bus: &EventBus) -> Result<(), PluginError>;

    /// Boot-time side effects, such as adding middleware or open hooks.
    fn boot(&self, _ctx: &mut BootContext<'_>) -> Result<(), PluginError> {
        Ok(())
    }

    /// Remove listeners added by [`register`](Self::register).
    fn unregister(&self, _bus: &EventBus) {}
}

/// Dispatcher surface available to plugins while booting.
pub struct BootContext<'a> {
    dispatcher: &'a Dispatcher,
    added_middleware: usize,
    added_hooks: usize,
}

impl<'a> BootContext<'a> {
    /// Boot against `dispatcher`.
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self {
            dispatcher,
            added_middleware: 0,
            added_hooks: 0,
        }
    }

    /// Append a global middleware.
    pub fn add_global_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.dispatcher.add_global_middleware(middleware);
        self.added_middleware += 1;
    }

    /// Append a pre-registration hook.
    pub fn add_open_hook(&mut self, hook: Arc<dyn OpenHook>) {
        self.dispatcher.add_open_hook(hook);
        self.added_hooks += 1;
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.dispatcher.registry()
    }

    /// The event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        self.dispatcher.events()
    }

    /// Middleware and hooks added through this context so far.
    pub fn added(&self) -> (usize, usize) {
        (self.added_middleware, self.added_hooks)
    }
}

impl std::fmt::Debug for BootContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootContext")
            .field("added_middleware", &self.added_middleware)
            .field("added_hooks", &self.added_hooks)
            .finish_non_exhaustive()
    }
}
