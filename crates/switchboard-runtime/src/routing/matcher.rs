//! The route matching capability.

use std::collections::BTreeMap;

use switchboard_core::RouteDefinition;

/// Parameters extracted from a matched route.
pub type RouteParams = BTreeMap<String, String>;

/// Param key that always carries the matched route name.
pub const ROUTE_PARAM: &str = "_route";

/// A successful match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteMatch {
    /// Matched route name.
    pub route: String,
    /// Handler id, if the route declares one.
    pub handler: Option<String>,
    /// Per-route middleware ids in declaration order.
    pub middleware: Vec<String>,
    /// Captured params plus [`ROUTE_PARAM`].
    pub params: RouteParams,
}

/// Resolves a packet's route string.
pub trait RouteMatcher: Send + Sync {
    /// Match `route`, or `None` if no route applies.
    fn match_route(&self, route: &str) -> Option<RouteMatch>;

    /// Every route this matcher can produce, for build-time validation.
    ///
    /// Matchers that cannot enumerate their routes return an empty slice and
    /// are validated per message instead.
    fn declared_routes(&self) -> &[RouteDefinition] {
        &[]
    }
}
