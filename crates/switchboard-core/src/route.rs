//! Declarative route definitions.

use serde::{Deserialize, Serialize};

/// One entry of a route table, as written in settings or a routes file.
///
/// ```json
/// { "name": "join_room", "path": "room/{roomId}/join",
///   "handler": "ChatHandler", "middleware": ["auth"] }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
    /// Unique route name, exposed to handlers as the `_route` param.
    pub name: String,
    /// `/`-separated pattern; `{param}` segments capture one segment.
    pub path: String,
    /// Handler id; a route without one fails at dispatch with a routing error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Per-route middleware ids, run after the global middleware.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middleware: Vec<String>,
}

impl RouteDefinition {
    /// A route bound to `handler` with no per-route middleware.
    pub fn new(name: impl Into<String>, path: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            handler: Some(handler.into()),
            middleware: Vec::new(),
        }
    }

    /// Append a per-route middleware id.
    #[must_use]
    pub fn with_middleware(mut self, id: impl Into<String>) -> Self {
        self.middleware.push(id.into());
        self
    }
}
