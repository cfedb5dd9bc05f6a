//! WebSocket route table: mount prefixes, each with ordered sub-path patterns.

use crate::http::params::{decode_query, ParamMap};
use crate::routing::matcher::{trim_mount, PathPattern};
use crate::websocket::endpoint::EndpointFactory;

struct Route {
    pattern: PathPattern,
    factory: EndpointFactory,
}

struct Mount {
    prefix: String,
    routes: Vec<Route>,
}

/// Ordered mapping from URI prefix to ordered (pattern → factory) entries.
///
/// Patterns may overlap; the first registered pattern that matches wins.
#[derive(Default)]
pub struct WebSocketRoutes {
    mounts: Vec<Mount>,
}

/// The outcome of resolving an upgrade request.
#[derive(Clone)]
pub struct Binding {
    pub pattern: String,
    pub factory: EndpointFactory,
    /// Query parameters overlaid with pattern parameters, plus `uri` and
    /// `requestUri` when neither defined them.
    pub params: Vec<(String, String)>,
    pub sub_path: String,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("pattern", &self.pattern)
            .field("params", &self.params)
            .field("sub_path", &self.sub_path)
            .finish_non_exhaustive()
    }
}

impl WebSocketRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pattern` under `prefix`. Re-registering a pattern replaces
    /// its factory and keeps its position.
    pub fn register(&mut self, prefix: &str, pattern: &str, factory: EndpointFactory) {
        let prefix = normalize_prefix(prefix);
        let index = match self.mounts.iter().position(|m| m.prefix == prefix) {
            Some(index) => index,
            None => {
                self.mounts.push(Mount {
                    prefix,
                    routes: Vec::new(),
                });
                self.mounts.len() - 1
            }
        };
        let routes = &mut self.mounts[index].routes;
        match routes.iter_mut().find(|r| r.pattern.as_str() == pattern) {
            Some(route) => route.factory = factory,
            None => routes.push(Route {
                pattern: PathPattern::new(pattern),
                factory,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Mount prefixes, in registration order.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.mounts.iter().map(|m| m.prefix.as_str())
    }

    /// The longest mount prefix `path` belongs to.
    pub fn mount_for(&self, path: &str) -> Option<&str> {
        self.mounts
            .iter()
            .filter(|m| trim_mount(path, &m.prefix).is_some())
            .max_by_key(|m| m.prefix.len())
            .map(|m| m.prefix.as_str())
    }

    /// Resolve the endpoint for an upgrade to `path` with optional `query`.
    ///
    /// `None` when the path is outside every mount or no pattern matches.
    pub fn bind(&self, path: &str, query: Option<&str>) -> Option<Binding> {
        let prefix = self.mount_for(path)?;
        let mount = self.mounts.iter().find(|m| m.prefix == prefix)?;
        let sub_path = trim_mount(path, &mount.prefix)?;

        let (route, captured) = if sub_path.is_empty() {
            let route = mount.routes.iter().find(|r| r.pattern.as_str().is_empty())?;
            (route, Vec::new())
        } else {
            mount
                .routes
                .iter()
                .find_map(|r| r.pattern.match_entire(sub_path).map(|c| (r, c)))?
        };

        let request_uri = match query {
            Some(q) => format!("{path}?{q}"),
            None => path.to_string(),
        };
        Some(Binding {
            pattern: route.pattern.as_str().to_string(),
            factory: route.factory.clone(),
            params: merge_params(query, captured, sub_path, request_uri),
            sub_path: sub_path.to_string(),
        })
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn merge_params(
    query: Option<&str>,
    captured: Vec<(String, String)>,
    sub_path: &str,
    request_uri: String,
) -> Vec<(String, String)> {
    let mut decoded = ParamMap::new();
    if let Some(query) = query {
        decode_query(query, &mut decoded);
    }
    let mut params: Vec<(String, String)> = decoded
        .iter()
        .filter_map(|(k, values)| values.first().map(|v| (k.to_string(), v.clone())))
        .collect();

    for (name, value) in captured {
        match params.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => params.push((name, value)),
        }
    }
    if !params.iter().any(|(k, _)| k == "uri") {
        params.push(("uri".to_string(), sub_path.to_string()));
    }
    if !params.iter().any(|(k, _)| k == "requestUri") {
        params.push(("requestUri".to_string(), request_uri));
    }
    params
}
