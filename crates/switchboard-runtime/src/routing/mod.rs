//! Route resolution.
//!
//! - [`RouteMatcher`]: route string to handler id, middleware ids, and params
//! - [`RouteTable`]: the built-in matcher over `/`-segment patterns
//! - [`HandlerResolver`] / [`MiddlewareResolver`]: id to implementation,
//!   with map-backed [`HandlerRegistry`] and [`MiddlewareRegistry`]

pub mod matcher;
pub mod resolver;
pub mod table;

pub use matcher::{ROUTE_PARAM, RouteMatch, RouteMatcher, RouteParams};
pub use resolver::{
    HandlerRegistry, HandlerResolver, MiddlewareRegistry, MiddlewareResolver, RouteHandler,
};
pub use table::RouteTable;
