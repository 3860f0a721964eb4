//! Segment-pattern route table.
//!
//! Patterns are split on `/` with leading and trailing slashes ignored.
//! A `{name}` segment captures one non-empty segment; anything else must
//! match literally. The first declared route that matches wins.

use std::collections::HashSet;
use std::path::Path;

use switchboard_core::{ConfigurationError, RouteDefinition};
use tracing::debug;

use crate::routing::matcher::{ROUTE_PARAM, RouteMatch, RouteMatcher, RouteParams};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Clone, Debug)]
struct CompiledRoute {
    segments: Vec<Segment>,
}

/// Compiled, ordered route definitions.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    definitions: Vec<RouteDefinition>,
    compiled: Vec<CompiledRoute>,
}

impl RouteTable {
    /// Compile definitions, rejecting duplicate names and bad patterns.
    pub fn new(definitions: Vec<RouteDefinition>) -> Result<Self, ConfigurationError> {
        let mut names = HashSet::new();
        let mut compiled = Vec::with_capacity(definitions.len());
        for def in &definitions {
            if def.name.is_empty() {
                return Err(invalid(def, "route name is empty"));
            }
            if !names.insert(def.name.as_str()) {
                return Err(invalid(def, "duplicate route name"));
            }
            compiled.push(CompiledRoute {
                segments: compile(def)?,
            });
        }
        debug!(routes = definitions.len(), "route table compiled");
        Ok(Self {
            definitions,
            compiled,
        })
    }

    /// Parse a JSON array of route definitions.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let definitions: Vec<RouteDefinition> =
            serde_json::from_str(json).map_err(|e| ConfigurationError::Load(e.to_string()))?;
        Self::new(definitions)
    }

    /// Read and compile a JSON routes file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Load(format!("{}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the table has no routes.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl RouteMatcher for RouteTable {
    fn match_route(&self, route: &str) -> Option<RouteMatch> {
        let parts: Vec<&str> = split(route).collect();
        self.definitions
            .iter()
            .zip(&self.compiled)
            .find_map(|(def, compiled)| {
                let params = match_segments(&compiled.segments, &parts)?;
                Some(build_match(def, params))
            })
    }

    fn declared_routes(&self) -> &[RouteDefinition] {
        &self.definitions
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.trim_matches('/');
    trimmed.split('/').filter(move |_| !trimmed.is_empty())
}

fn compile(def: &RouteDefinition) -> Result<Vec<Segment>, ConfigurationError> {
    let mut seen = HashSet::new();
    split(&def.path)
        .map(|part| {
            if part.is_empty() {
                return Err(invalid(def, "empty path segment"));
            }
            if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(invalid(def, &format!("invalid parameter '{part}'")));
                }
                if name == ROUTE_PARAM || !seen.insert(name.to_owned()) {
                    return Err(invalid(def, &format!("duplicate parameter '{name}'")));
                }
                return Ok(Segment::Param(name.to_owned()));
            }
            if part.contains(['{', '}']) {
                return Err(invalid(def, &format!("unbalanced braces in '{part}'")));
            }
            Ok(Segment::Literal(part.to_owned()))
        })
        .collect()
}

fn match_segments(segments: &[Segment], parts: &[&str]) -> Option<RouteParams> {
    if segments.len() != parts.len() {
        return None;
    }
    let mut params = RouteParams::new();
    for (segment, part) in segments.iter().zip(parts) {
        match segment {
            Segment::Literal(lit) if lit == part => {}
            Segment::Param(name) if !part.is_empty() => {
                let _ = params.insert(name.clone(), (*part).to_owned());
            }
            _ => return None,
        }
    }
    Some(params)
}

fn build_match(def: &RouteDefinition, mut params: RouteParams) -> RouteMatch {
    let _ = params.insert(ROUTE_PARAM.to_owned(), def.name.clone());
    RouteMatch {
        route: def.name.clone(),
        handler: def.handler.clone(),
        middleware: def.middleware.clone(),
        params,
    }
}

fn invalid(def: &RouteDefinition, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidRoute {
        route: def.name.clone(),
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn chat_table() -> RouteTable {
        RouteTable::new(vec![
            RouteDefinition::new("join_room", "room/{roomId}/join", "ChatHandler"),
            RouteDefinition::new("leave_room", "room/{roomId}/leave", "ChatHandler"),
            RouteDefinition::new("ping", "/ping/", "PingHandler").with_middleware("trace"),
        ])
        .unwrap()
    }

    #[test]
    fn matches_params_and_route_name() {
        let m = chat_table().match_route("room/42/join").unwrap();
        assert_eq!(m.route, "join_room");
        assert_eq!(m.handler.as_deref(), Some("ChatHandler"));
        assert_eq!(m.params.get("roomId").map(String::as_str), Some("42"));
        assert_eq!(m.params.get(ROUTE_PARAM).map(String::as_str), Some("join_room"));
    }

    #[test]
    fn slashes_are_ignored_at_edges() {
        let table = chat_table();
        assert!(table.match_route("/room/42/join/").is_some());
        let ping = table.match_route("ping").unwrap();
        assert_eq!(ping.middleware, vec!["trace"]);
    }

    #[test]
    fn no_match() {
        let table = chat_table();
        assert!(table.match_route("room/42").is_none());
        assert!(table.match_route("room/42/join/extra").is_none());
        assert!(table.match_route("room//join").is_none());
        assert!(table.match_route("lobby/42/join").is_none());
        assert!(table.match_route("").is_none());
    }

    #[test]
    fn first_declared_wins() {
        let table = RouteTable::new(vec![
            RouteDefinition::new("specific", "room/lobby/join", "A"),
            RouteDefinition::new("generic", "room/{roomId}/join", "B"),
        ])
        .unwrap();
        assert_eq!(table.match_route("room/lobby/join").unwrap().route, "specific");
        assert_eq!(table.match_route("room/7/join").unwrap().route, "generic");
    }

    #[test]
    fn route_without_handler_still_matches() {
        let table = RouteTable::new(vec![RouteDefinition {
            name: "orphan".into(),
            path: "orphan".into(),
            handler: None,
            middleware: vec![],
        }])
        .unwrap();
        assert!(table.match_route("orphan").unwrap().handler.is_none());
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = RouteTable::new(vec![
            RouteDefinition::new("a", "x", "H"),
            RouteDefinition::new("a", "y", "H"),
        ])
        .unwrap_err();
        assert_matches!(err, ConfigurationError::InvalidRoute { route, .. } if route == "a");
    }

    #[test]
    fn rejects_bad_patterns() {
        for path in ["room/{}/join", "room/{id", "room/{a}/{a}", "a//b", "x/{_route}"] {
            let result = RouteTable::new(vec![RouteDefinition::new("r", path, "H")]);
            assert_matches!(
                result,
                Err(ConfigurationError::InvalidRoute { .. }),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn from_json_and_file() {
        let json = r#"[{"name":"join_room","path":"room/{roomId}/join","handler":"ChatHandler"}]"#;
        assert_eq!(RouteTable::from_json(json).unwrap().len(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        std::fs::write(&path, json).unwrap();
        let table = RouteTable::from_file(&path).unwrap();
        assert_eq!(table.declared_routes()[0].name, "join_room");
    }

    #[test]
    fn load_errors() {
        assert_matches!(
            RouteTable::from_json("{not json"),
            Err(ConfigurationError::Load(_))
        );
        assert_matches!(
            RouteTable::from_file(Path::new("/nonexistent/routes.json")),
            Err(ConfigurationError::Load(_))
        );
    }

    #[test]
    fn empty_table() {
        let table = RouteTable::default();
        assert!(table.is_empty());
        assert!(table.match_route("anything").is_none());
    }
}
