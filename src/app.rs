//! Host web application
//!
//! A small application object that plugins extend. It owns the configuration,
//! a set of blueprints (named, prefixed groups of routes) and a map of JSON
//! extension slots. Requests are dispatched synchronously against the
//! registered blueprints through a `matchit` route table; a real HTTP server
//! can sit on top of [`Application::dispatch`].
//!
//! The application is shared as `Arc<Application>`; mutable state lives behind
//! an `RwLock` and no lock is held while a route handler runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use http::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ExpotionError, Result};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

// ---------------------------------------------------------------------------
// HTTP primitives
// ---------------------------------------------------------------------------

/// Parse a method name case-insensitively, e.g. `get` or `DELETE`.
pub fn parse_method(name: &str) -> Result<Method> {
    Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes())
        .map_err(|e| ExpotionError::Routing(format!("Invalid HTTP method '{}': {}", name, e)))
}

/// Serde adapters for the `http` types carried by manifests and the URL map.
pub mod serde_http {
    /// `Vec<Method>` as a list of method names.
    pub mod methods {
        use http::Method;
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serializer};

        #[allow(clippy::ptr_arg)]
        pub fn serialize<S>(methods: &Vec<Method>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_seq(methods.iter().map(Method::as_str))
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Method>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Vec::<String>::deserialize(deserializer)?
                .iter()
                .map(|name| crate::app::parse_method(name).map_err(D::Error::custom))
                .collect()
        }
    }

    /// `StatusCode` as its numeric code.
    pub mod status {
        use http::StatusCode;
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_u16(status.as_u16())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<StatusCode, D::Error>
        where
            D: Deserializer<'de>,
        {
            let code = u16::deserialize(deserializer)?;
            StatusCode::from_u16(code).map_err(D::Error::custom)
        }
    }
}

/// An incoming request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    /// Values captured from `<name>` segments of the matched rule.
    pub params: HashMap<String, String>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: HashMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Captured path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }
}

/// A response produced by a route handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub content_type: String,
    pub body: String,
}

impl Response {
    pub fn new(status: StatusCode, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// `200 OK` with a plain-text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, TEXT_PLAIN, body)
    }

    /// `200 OK` with a JSON body.
    pub fn json(value: &Value) -> Self {
        Self::new(StatusCode::OK, "application/json", value.to_string())
    }

    /// Plain-text response whose body is the status' canonical reason.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(status, TEXT_PLAIN, status.canonical_reason().unwrap_or_default())
    }
}

/// Route handler.
pub type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

// ---------------------------------------------------------------------------
// Blueprints
// ---------------------------------------------------------------------------

/// A single route inside a blueprint.
#[derive(Clone)]
pub struct Route {
    pub methods: Vec<Method>,
    /// Rule relative to the blueprint prefix, e.g. `/items/<id>`.
    pub rule: String,
    pub endpoint: String,
    handler: Handler,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("methods", &self.methods)
            .field("rule", &self.rule)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// A routable sub-section of the application, registered by a plugin.
#[derive(Debug, Clone)]
pub struct Blueprint {
    name: String,
    url_prefix: String,
    routes: Vec<Route>,
}

impl Blueprint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_prefix: String::new(),
            routes: Vec::new(),
        }
    }

    /// Prefix prepended to every rule of this blueprint, e.g. `/alpha`.
    pub fn url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = prefix.into();
        self
    }

    /// Add a route answering the given methods.
    pub fn route<F>(
        mut self,
        methods: &[Method],
        rule: impl Into<String>,
        endpoint: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.routes.push(Route {
            methods: methods.to_vec(),
            rule: rule.into(),
            endpoint: endpoint.into(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Add a `GET` route.
    pub fn get<F>(self, rule: impl Into<String>, endpoint: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.route(&[Method::GET], rule, endpoint, handler)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ExpotionError::Routing(
                "Blueprint name must not be empty".to_string(),
            ));
        }
        if self.name.contains('.') {
            return Err(ExpotionError::Routing(format!(
                "Blueprint name '{}' must not contain a dot",
                self.name
            )));
        }
        if !self.url_prefix.is_empty() && !self.url_prefix.starts_with('/') {
            return Err(ExpotionError::Routing(format!(
                "Blueprint '{}' prefix '{}' must start with '/'",
                self.name, self.url_prefix
            )));
        }
        for route in &self.routes {
            if !route.rule.starts_with('/') {
                return Err(ExpotionError::Routing(format!(
                    "Route '{}' in blueprint '{}' must start with '/'",
                    route.rule, self.name
                )));
            }
            if route.methods.is_empty() {
                return Err(ExpotionError::Routing(format!(
                    "Route '{}' in blueprint '{}' has no methods",
                    route.rule, self.name
                )));
            }
        }
        if self.url_prefix.contains(['{', '}'])
            || self.routes.iter().any(|r| r.rule.contains(['{', '}']))
        {
            return Err(ExpotionError::Routing(format!(
                "Blueprint '{}' rules must not contain braces; use <name> for parameters",
                self.name
            )));
        }
        Ok(())
    }
}

/// One entry of the application's URL map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub blueprint: String,
    #[serde(with = "serde_http::methods")]
    pub methods: Vec<Method>,
    pub rule: String,
    /// `<blueprint>.<endpoint>`
    pub endpoint: String,
}

fn join_rule(prefix: &str, rule: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    format!("{}{}", prefix, rule)
}

// ---------------------------------------------------------------------------
// Route table
// ---------------------------------------------------------------------------

/// Handlers registered for one full rule, across blueprints.
struct Endpoint {
    methods: Vec<Method>,
    handler: Handler,
}

type RouteTable = matchit::Router<Vec<Endpoint>>;

/// Translate a `<name>` rule into matchit's `{name}` syntax.
fn table_path(rule: &str) -> Result<String> {
    let segments = rule
        .split('/')
        .map(|segment| {
            match segment.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
                Some("") => Err(ExpotionError::Routing(format!(
                    "Rule '{}' has an unnamed parameter",
                    rule
                ))),
                Some(name) => Ok(format!("{{{}}}", name)),
                None => Ok(segment.to_string()),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(segments.join("/"))
}

/// Compile every route of `blueprints` into one table. Routes sharing a full
/// rule are grouped so the method decides between them.
fn build_table(blueprints: &[Blueprint]) -> Result<RouteTable> {
    let mut grouped: Vec<(String, Vec<Endpoint>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for bp in blueprints {
        for route in &bp.routes {
            let full = join_rule(&bp.url_prefix, &route.rule);
            let endpoint = Endpoint {
                methods: route.methods.clone(),
                handler: Arc::clone(&route.handler),
            };
            match index.get(&full) {
                Some(&i) => grouped[i].1.push(endpoint),
                None => {
                    index.insert(full.clone(), grouped.len());
                    grouped.push((full, vec![endpoint]));
                }
            }
        }
    }

    let mut table = matchit::Router::new();
    for (rule, endpoints) in grouped {
        table.insert(table_path(&rule)?, endpoints).map_err(|e| {
            ExpotionError::Routing(format!("Route '{}' cannot be registered: {}", rule, e))
        })?;
    }
    Ok(table)
}

/// Find the handler for a request, or the status to answer with.
fn resolve(
    table: &RouteTable,
    request: &Request,
) -> std::result::Result<(Handler, HashMap<String, String>), StatusCode> {
    let matched = table
        .at(&request.path)
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let params: HashMap<String, String> = matched
        .params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if params.values().any(|v| v.is_empty()) {
        return Err(StatusCode::NOT_FOUND);
    }

    matched
        .value
        .iter()
        .find(|e| e.methods.contains(&request.method))
        .map(|e| (Arc::clone(&e.handler), params))
        .ok_or(StatusCode::METHOD_NOT_ALLOWED)
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

struct AppState {
    blueprints: Vec<Blueprint>,
    routes: RouteTable,
    extensions: HashMap<String, Value>,
}

/// The host application that plugins extend.
pub struct Application {
    id: Uuid,
    config: AppConfig,
    state: RwLock<AppState>,
}

impl Application {
    /// Create a new application and wrap it for sharing with the loader.
    pub fn new(config: AppConfig) -> Arc<Self> {
        let id = Uuid::new_v4();
        debug!(app = %config.name, id = %id, "Created application");
        Arc::new(Self {
            id,
            config,
            state: RwLock::new(AppState {
                blueprints: Vec::new(),
                routes: matchit::Router::new(),
                extensions: HashMap::new(),
            }),
        })
    }

    /// Unique identity of this application instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a blueprint. A blueprint with the same name replaces the
    /// previously registered one. A route that conflicts with an existing
    /// one is rejected and nothing is registered.
    pub fn register_blueprint(&self, blueprint: Blueprint) -> Result<()> {
        blueprint.validate()?;

        let name = blueprint.name.clone();
        let prefix = blueprint.url_prefix.clone();
        let route_count = blueprint.routes.len();

        let mut state = self.write();
        let mut blueprints = state.blueprints.clone();
        let replaced = match blueprints.iter_mut().find(|b| b.name == name) {
            Some(existing) => {
                *existing = blueprint;
                true
            }
            None => {
                blueprints.push(blueprint);
                false
            }
        };

        let routes = build_table(&blueprints)?;
        state.blueprints = blueprints;
        state.routes = routes;

        if replaced {
            warn!(blueprint = %name, "Replaced already registered blueprint");
        } else {
            info!(
                blueprint = %name,
                prefix = %prefix,
                routes = route_count,
                "Registered blueprint"
            );
        }
        Ok(())
    }

    pub fn has_blueprint(&self, name: &str) -> bool {
        self.read().blueprints.iter().any(|b| b.name == name)
    }

    /// Names of registered blueprints, in registration order.
    pub fn blueprint_names(&self) -> Vec<String> {
        self.read().blueprints.iter().map(|b| b.name.clone()).collect()
    }

    /// Every route with its full rule.
    pub fn url_map(&self) -> Vec<RouteInfo> {
        self.read()
            .blueprints
            .iter()
            .flat_map(|bp| {
                bp.routes.iter().map(move |route| RouteInfo {
                    blueprint: bp.name.clone(),
                    methods: route.methods.clone(),
                    rule: join_rule(&bp.url_prefix, &route.rule),
                    endpoint: format!("{}.{}", bp.name, route.endpoint),
                })
            })
            .collect()
    }

    /// Route a request to its handler.
    ///
    /// Returns 404 if no rule matches the path and 405 if a rule matches the
    /// path but not the method.
    pub fn dispatch(&self, request: &Request) -> Response {
        let resolved = {
            let state = self.read();
            resolve(&state.routes, request)
        };

        match resolved {
            Ok((handler, params)) => {
                let mut request = request.clone();
                request.params = params;
                handler(&request)
            }
            Err(status) => Response::from_status(status),
        }
    }

    /// Store a value in an extension slot.
    pub fn set_extension(&self, key: impl Into<String>, value: Value) {
        self.write().extensions.insert(key.into(), value);
    }

    /// Read an extension slot.
    pub fn extension(&self, key: &str) -> Option<Value> {
        self.read().extensions.get(key).cloned()
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("blueprints", &self.blueprint_names())
            .finish()
    }
}
