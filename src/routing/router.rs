//! Application routing contract and a table-driven implementation.
//!
//! # Responsibilities
//! - Define what the dispatcher needs from an application (`HttpApp`)
//! - Define a routable unit of work (`RouteAction`)
//! - Provide `AppRouter`: exact routes, prefix mounts, WebSocket table
//!
//! # Design Decisions
//! - Immutable after construction (shared across connections without locks)
//! - O(1) exact lookup via HashMap, O(n) mount scan
//! - Explicit `None` rather than a silent default route

use axum::http::Method;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::http::context::HttpContext;
use crate::http::file::StaticFiles;
use crate::websocket::{EndpointFactory, WebSocketRoutes};

/// A unit of request handling bound to a route.
pub trait RouteAction: Send + Sync {
    /// Methods this action accepts. `HEAD` is implied by `GET`.
    fn methods(&self) -> &[Method];

    /// Handle the request, sending at most one response through `ctx`.
    fn process<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, ()>;
}

/// A resolved route.
#[derive(Clone)]
pub struct RouteMatch {
    /// The registered path that matched.
    pub route_path: String,
    pub action: Arc<dyn RouteAction>,
}

impl RouteMatch {
    pub fn methods(&self) -> &[Method] {
        self.action.methods()
    }

    /// Whether the action accepts `method`.
    pub fn allows(&self, method: &Method) -> bool {
        let methods = self.action.methods();
        methods.contains(method) || (*method == Method::HEAD && methods.contains(&Method::GET))
    }
}

impl std::fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMatch")
            .field("route_path", &self.route_path)
            .field("methods", &self.action.methods())
            .finish()
    }
}

/// What a server needs from the application it hosts.
pub trait HttpApp: Send + Sync {
    /// Every routed request path must start with this prefix (compared
    /// case-insensitively).
    fn context_path(&self) -> &str;

    fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch>;

    fn websocket_routes(&self) -> &WebSocketRoutes;

    /// Runs once when the hosting server stops.
    fn destroy(&self) {}
}

/// Action built from an async closure, see [`action_fn`].
pub struct FnAction<F> {
    methods: Vec<Method>,
    f: F,
}

impl<F> RouteAction for FnAction<F>
where
    F: for<'a> Fn(&'a mut HttpContext) -> BoxFuture<'a, ()> + Send + Sync,
{
    fn methods(&self) -> &[Method] {
        &self.methods
    }

    fn process<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, ()> {
        (self.f)(ctx)
    }
}

/// Wrap an async closure as an action.
///
/// ```ignore
/// action_fn(&[Method::GET], |ctx| Box::pin(async move { /* ... */ }))
/// ```
pub fn action_fn<F>(methods: &[Method], f: F) -> FnAction<F>
where
    F: for<'a> Fn(&'a mut HttpContext) -> BoxFuture<'a, ()> + Send + Sync,
{
    FnAction {
        methods: methods.to_vec(),
        f,
    }
}

/// Action built from a synchronous closure, see [`sync_action_fn`].
pub struct SyncFnAction<F> {
    methods: Vec<Method>,
    f: F,
}

impl<F> RouteAction for SyncFnAction<F>
where
    F: Fn(&mut HttpContext) + Send + Sync,
{
    fn methods(&self) -> &[Method] {
        &self.methods
    }

    fn process<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, ()> {
        Box::pin(async move { (self.f)(ctx) })
    }
}

pub fn sync_action_fn<F>(methods: &[Method], f: F) -> SyncFnAction<F>
where
    F: Fn(&mut HttpContext) + Send + Sync,
{
    SyncFnAction {
        methods: methods.to_vec(),
        f,
    }
}

/// Table-driven [`HttpApp`].
///
/// Route and mount paths are relative to the context path; WebSocket
/// prefixes are absolute.
pub struct AppRouter {
    context_path: String,
    routes: HashMap<String, Arc<dyn RouteAction>>,
    mounts: Vec<(String, Arc<dyn RouteAction>)>,
    websockets: WebSocketRoutes,
}

impl AppRouter {
    pub fn new(context_path: impl Into<String>) -> Self {
        let context_path = context_path.into();
        let context_path = if context_path.starts_with('/') {
            context_path
        } else {
            format!("/{context_path}")
        };
        Self {
            context_path,
            routes: HashMap::new(),
            mounts: Vec::new(),
            websockets: WebSocketRoutes::new(),
        }
    }

    /// Route exactly `path`.
    pub fn route(mut self, path: &str, action: impl RouteAction + 'static) -> Self {
        let full = self.full_path(path);
        tracing::debug!(path = %full, "route registered");
        self.routes.insert(full, Arc::new(action));
        self
    }

    /// Route `prefix` and everything below it.
    pub fn mount(mut self, prefix: &str, action: impl RouteAction + 'static) -> Self {
        let full = self.full_path(prefix);
        tracing::debug!(prefix = %full, "mount registered");
        self.mounts.push((full, Arc::new(action)));
        self
    }

    /// Serve files from `root` below `prefix`.
    pub fn files(self, prefix: &str, root: impl Into<PathBuf>, attachment: bool) -> Self {
        let full = self.full_path(prefix);
        let action = StaticFiles::new(full, root).attachment(attachment);
        self.mount(prefix, action)
    }

    /// Register a WebSocket endpoint for `pattern` under `prefix`.
    pub fn websocket(mut self, prefix: &str, pattern: &str, factory: EndpointFactory) -> Self {
        self.websockets.register(prefix, pattern, factory);
        self
    }

    fn full_path(&self, path: &str) -> String {
        let base = self.context_path.trim_end_matches('/');
        let path = path.trim_end_matches('/');
        match path {
            "" if base.is_empty() => "/".to_string(),
            "" => base.to_string(),
            p if p.starts_with('/') => format!("{base}{p}"),
            p => format!("{base}/{p}"),
        }
    }
}

impl HttpApp for AppRouter {
    fn context_path(&self) -> &str {
        &self.context_path
    }

    fn resolve(&self, _method: &Method, path: &str) -> Option<RouteMatch> {
        let trimmed = match path.trim_end_matches('/') {
            "" => "/",
            p => p,
        };
        if let Some(action) = self.routes.get(trimmed) {
            return Some(RouteMatch {
                route_path: trimmed.to_string(),
                action: action.clone(),
            });
        }
        self.mounts
            .iter()
            .filter(|(prefix, _)| under_prefix(path, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, action)| RouteMatch {
                route_path: prefix.clone(),
                action: action.clone(),
            })
    }

    fn websocket_routes(&self) -> &WebSocketRoutes {
        &self.websockets
    }
}

fn under_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
