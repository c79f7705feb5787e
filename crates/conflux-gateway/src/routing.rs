//! Capability routing tables.
//!
//! Both tables are rebuilt in full by each discovery pass and swapped in
//! whole, so a lookup sees either the previous pass or the new one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use conflux_core::CapabilityKind;
use conflux_core::ports::GatewayError;

/// Scheme of gateway-visible resource URIs.
pub const RESOURCE_SCHEME: &str = "resource://";

/// Where a client-visible tool or prompt name goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub server_id: String,
    /// Name the backend knows the capability by (before display rules).
    pub original_name: String,
}

/// Client-visible name to owning backend.
///
/// Name collisions resolve last-write-wins in enumeration order.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<Arc<HashMap<String, Route>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route to a table under construction, logging collisions.
    pub fn insert(routes: &mut HashMap<String, Route>, name: String, route: Route) {
        if let Some(previous) = routes.get(&name) {
            if previous.server_id != route.server_id {
                tracing::warn!(
                    name = %name,
                    previous = %previous.server_id,
                    winner = %route.server_id,
                    "Capability name collision, later backend wins"
                );
            }
        }
        routes.insert(name, route);
    }

    /// Swap in a freshly built table.
    pub async fn replace(&self, routes: HashMap<String, Route>) {
        *self.routes.write().await = Arc::new(routes);
    }

    pub async fn lookup(&self, name: &str) -> Option<Route> {
        self.routes.read().await.get(name).cloned()
    }

    pub async fn snapshot(&self) -> Arc<HashMap<String, Route>> {
        self.routes.read().await.clone()
    }
}

/// `scheme` of `scheme://rest`, if `uri` has one.
fn scheme_of(uri: &str) -> Option<&str> {
    let (scheme, _) = uri.split_once("://")?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

/// Map a backend-native URI into the gateway namespace.
///
/// `file:///tmp/a.txt` on `alpha` becomes `resource://alpha/tmp/a.txt`.
pub fn encode(server_name: &str, native: &str) -> String {
    let rest = native
        .split_once("://")
        .filter(|_| scheme_of(native).is_some())
        .map_or(native, |(_, rest)| rest);
    format!(
        "{RESOURCE_SCHEME}{server_name}/{}",
        rest.trim_start_matches('/')
    )
}

/// Split a namespaced URI into `(server_name, path)`. The path keeps its
/// leading slash.
///
/// # Errors
///
/// `InvalidRequest` if `uri` is not `resource://<server>/<path>`.
pub fn decode(uri: &str) -> Result<(&str, &str), GatewayError> {
    let rest = uri.strip_prefix(RESOURCE_SCHEME).ok_or_else(|| {
        GatewayError::invalid_request(format!("Resource URI must start with {RESOURCE_SCHEME}: {uri}"))
    })?;
    let slash = rest
        .find('/')
        .ok_or_else(|| GatewayError::invalid_request(format!("Resource URI has no path: {uri}")))?;
    let (server_name, path) = rest.split_at(slash);
    if server_name.is_empty() {
        return Err(GatewayError::invalid_request(format!(
            "Resource URI has no server: {uri}"
        )));
    }
    Ok((server_name, path))
}

/// One discovery pass's namespaced URIs.
#[derive(Debug, Default, Clone)]
pub struct NamespaceMap {
    /// Namespaced URI to the backend's original URI.
    originals: HashMap<String, String>,
    /// Server name to the last scheme seen from it.
    schemes: HashMap<String, String>,
}

impl NamespaceMap {
    /// Record `native` from `server_name` and return its namespaced form.
    pub fn insert(&mut self, server_name: &str, native: &str) -> String {
        let namespaced = encode(server_name, native);
        if let Some(scheme) = scheme_of(native) {
            self.schemes
                .insert(server_name.to_string(), scheme.to_string());
        }
        self.originals.insert(namespaced.clone(), native.to_string());
        namespaced
    }

    pub fn len(&self) -> usize {
        self.originals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }
}

/// Namespaced resource URIs, one map per capability kind so resource and
/// template passes do not erase each other.
#[derive(Debug, Default)]
pub struct NamespaceTable {
    maps: RwLock<HashMap<CapabilityKind, Arc<NamespaceMap>>>,
}

impl NamespaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, kind: CapabilityKind, map: NamespaceMap) {
        self.maps.write().await.insert(kind, Arc::new(map));
    }

    /// Backend URIs to try for a namespaced URI, most likely first:
    /// the remembered original, the remembered scheme with the path, the
    /// bare path, then `<server>://` with the path.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for a malformed URI.
    pub async fn candidates(&self, uri: &str) -> Result<(String, Vec<String>), GatewayError> {
        let (server_name, path) = decode(uri)?;
        let maps = self.maps.read().await;
        let lookup = [CapabilityKind::Resource, CapabilityKind::ResourceTemplate]
            .into_iter()
            .filter_map(|kind| maps.get(&kind));

        let mut original = None;
        let mut scheme = None;
        for map in lookup {
            if original.is_none() {
                original = map.originals.get(uri).cloned();
            }
            if scheme.is_none() {
                scheme = map.schemes.get(server_name).cloned();
            }
        }
        if let Some(found) = original.as_deref().and_then(scheme_of) {
            scheme = Some(found.to_string());
        }

        let mut candidates: Vec<String> = Vec::with_capacity(4);
        let mut push = |candidate: String| {
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        };
        if let Some(original) = original {
            push(original);
        }
        if let Some(scheme) = scheme {
            push(format!("{scheme}://{path}"));
        }
        push(path.to_string());
        push(format!("{server_name}://{path}"));

        Ok((server_name.to_string(), candidates))
    }
}
