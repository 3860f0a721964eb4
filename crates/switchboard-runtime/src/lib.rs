//! # switchboard-runtime
//!
//! The dispatch core between a transport and application handlers.
//!
//! - **Registry**: connections and the two-sided topic subscription index
//! - **Pipeline**: ordered chain-of-responsibility middleware with
//!   short-circuiting and error containment
//! - **Routing**: route table, matcher, and handler/middleware resolution
//! - **Dispatcher**: `on_open` / `on_message` / `on_close` / `on_error`
//!   orchestration with a per-message state machine
//! - **Plugins**: two-phase register/boot lifecycle over the event bus

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod errors;
pub mod metrics;
pub mod pipeline;
pub mod plugins;
pub mod registry;
pub mod routing;

pub use dispatcher::{DispatchReport, DispatchState, Dispatcher, DispatcherBuilder, OpenHook};
pub use errors::{MiddlewareError, PluginError};
pub use pipeline::{
    Middleware, MiddlewarePipeline, Next, PipelineReport, StepOutcome, StepReport, Terminal,
    TerminalOutcome, TraceMiddleware,
};
pub use plugins::{BootContext, Plugin, PluginManager};
pub use registry::{BroadcastReport, ConnectionRegistry};
pub use routing::{
    HandlerRegistry, HandlerResolver, MiddlewareRegistry, MiddlewareResolver, ROUTE_PARAM,
    RouteHandler, RouteMatch, RouteMatcher, RouteParams, RouteTable,
};
