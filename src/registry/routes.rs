//! Route registry for HTTP and WebSocket endpoints.
//!
//! The runtime does not serve HTTP itself. Routes registered here are
//! bound onto whatever [`HttpFront`](crate::front::HttpFront) the embedder
//! provides during the `http:listen` phase, and unbound path by path when
//! modules unload. WebSocket handlers share the table under the [`Method::Ws`]
//! pseudo-verb, middleware as an ordered side list. An owner index keeps
//! eviction proportional to the evicted owner's entries.

use std::collections::HashSet;
use std::sync::RwLock;

use dashmap::DashMap;
use strum::{Display, EnumString};
use tracing::{debug, warn};

use super::{owner_conflict, ActionFn, ActionInput, Owner, RegistryError, RegistryResult};
use crate::event::Value;

/// Route verb. `Ws` keys WebSocket handlers into the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Ws,
}

type RouteKey = (Method, String);

/// A bound endpoint with its owning contributor.
#[derive(Clone)]
pub struct RouteEntry {
    pub method: Method,
    pub path: String,
    pub owner: Owner,
    pub action: ActionFn,
}

impl RouteEntry {
    pub fn new(method: Method, path: &str, owner: Owner, action: ActionFn) -> Self {
        Self {
            method,
            path: path.to_string(),
            owner,
            action,
        }
    }

    fn key(&self) -> RouteKey {
        (self.method, self.path.clone())
    }
}

#[derive(Default)]
pub struct RouteRegistry {
    routes: DashMap<RouteKey, RouteEntry>,
    owners: DashMap<Owner, HashSet<RouteKey>>,
    middlewares: RwLock<Vec<ActionFn>>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route. Returns false when the method and path pair is
    /// held by a different module; any other collision overwrites.
    pub fn register(&self, entry: RouteEntry) -> bool {
        let key = entry.key();
        if let Some(existing) = self.routes.get(&key) {
            if owner_conflict(&existing.owner, &entry.owner) {
                warn!(
                    "Route {} {} already registered by {}, rejecting {}",
                    entry.method, entry.path, existing.owner, entry.owner
                );
                return false;
            }
        }
        debug!(
            "Registering route {} {} ({})",
            entry.method, entry.path, entry.owner
        );
        let owner = entry.owner.clone();
        if let Some(previous) = self.routes.insert(key.clone(), entry) {
            if previous.owner != owner {
                self.detach(&previous.owner, &previous.key());
            }
        }
        self.owners.entry(owner).or_default().insert(key);
        true
    }

    /// Looks up and invokes a route action.
    pub async fn run(
        &self,
        method: Method,
        path: &str,
        input: ActionInput,
    ) -> RegistryResult<Value> {
        let action: ActionFn = self
            .routes
            .get(&(method, path.to_string()))
            .map(|entry| entry.action.clone())
            .ok_or_else(|| RegistryError::RouteNotFound {
                method: method.to_string(),
                path: path.to_string(),
            })?;
        action(input).await
    }

    pub fn get(&self, method: Method, path: &str) -> Option<RouteEntry> {
        self.routes
            .get(&(method, path.to_string()))
            .map(|entry| entry.clone())
    }

    pub fn remove(&self, method: Method, path: &str) -> bool {
        match self.routes.remove(&(method, path.to_string())) {
            Some((key, entry)) => {
                self.detach(&entry.owner, &key);
                true
            }
            None => false,
        }
    }

    /// Removes application-owned routes and returns them so the front can
    /// be unbound path by path.
    pub fn remove_app_entries(&self) -> Vec<RouteEntry> {
        self.remove_owned(&Owner::App)
    }

    /// Removes module-owned routes, owner by owner, and returns them.
    pub fn remove_module_entries(&self) -> Vec<RouteEntry> {
        let mut removed = Vec::new();
        for owner in self.module_owners() {
            removed.extend(self.remove_owned(&owner));
        }
        removed
    }

    /// Removes the routes owned by one contributor, O(owned entries).
    pub fn remove_owned(&self, owner: &Owner) -> Vec<RouteEntry> {
        let keys: Vec<RouteKey> = match self.owners.remove(owner) {
            Some((_, set)) => set.into_iter().collect(),
            None => return Vec::new(),
        };
        let mut removed = Vec::new();
        for key in keys {
            if let Some((_, entry)) = self.routes.remove(&key) {
                removed.push(entry);
            }
        }
        removed
    }

    /// Module owners currently holding at least one route.
    pub fn module_owners(&self) -> Vec<Owner> {
        self.owners
            .iter()
            .filter(|entry| entry.key().is_module())
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn detach(&self, owner: &Owner, key: &RouteKey) {
        if let Some(mut set) = self.owners.get_mut(owner) {
            set.remove(key);
        }
        self.owners.remove_if(owner, |_, set| set.is_empty());
    }

    /// Route snapshots sorted by path then verb, for binding and listings.
    pub fn routes(&self) -> Vec<RouteEntry> {
        let mut routes: Vec<RouteEntry> = self.routes.iter().map(|e| e.value().clone()).collect();
        routes.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| a.method.to_string().cmp(&b.method.to_string()))
        });
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Appends a middleware. Middlewares run in registration order ahead
    /// of any route action.
    pub fn add_middleware(&self, owner: Owner, action: ActionFn) {
        debug!("Registering middleware ({})", owner);
        let mut middlewares = self
            .middlewares
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        middlewares.push(action);
    }

    /// Ordered middleware actions for the front to run.
    pub fn middlewares(&self) -> Vec<ActionFn> {
        self.middlewares
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Drops every middleware. The `http:loadmiddleware` phase clears the
    /// list before re-populating so reload does not stack duplicates.
    pub fn clear_middlewares(&self) -> usize {
        let mut middlewares = self
            .middlewares
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = middlewares.len();
        middlewares.clear();
        count
    }

    pub fn middleware_count(&self) -> usize {
        self.middlewares
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Arc;

    fn reply_action(reply: &'static str) -> ActionFn {
        Arc::new(move |_input: ActionInput| {
            async move { Ok(Value::String(reply.to_string())) }.boxed()
        })
    }

    #[tokio::test]
    async fn test_register_and_run() {
        let registry = RouteRegistry::new();
        assert!(registry.register(RouteEntry::new(
            Method::Get,
            "/status",
            Owner::App,
            reply_action("ok")
        )));

        let result = registry
            .run(Method::Get, "/status", ActionInput::empty())
            .await
            .unwrap();
        assert_eq!(result, Value::String("ok".to_string()));
    }

    #[tokio::test]
    async fn test_method_distinguishes_routes() {
        let registry = RouteRegistry::new();
        registry.register(RouteEntry::new(
            Method::Get,
            "/item",
            Owner::App,
            reply_action("read"),
        ));
        registry.register(RouteEntry::new(
            Method::Post,
            "/item",
            Owner::App,
            reply_action("write"),
        ));
        registry.register(RouteEntry::new(
            Method::Ws,
            "/item",
            Owner::App,
            reply_action("socket"),
        ));

        assert_eq!(registry.len(), 3);
        let result = registry
            .run(Method::Ws, "/item", ActionInput::empty())
            .await
            .unwrap();
        assert_eq!(result, Value::String("socket".to_string()));
    }

    #[test]
    fn test_unknown_route() {
        let registry = RouteRegistry::new();
        assert!(registry.get(Method::Get, "/missing").is_none());
    }

    #[test]
    fn test_different_module_rejected() {
        let registry = RouteRegistry::new();
        registry.register(RouteEntry::new(
            Method::Get,
            "/shared",
            Owner::module("alpha"),
            reply_action("alpha"),
        ));
        assert!(!registry.register(RouteEntry::new(
            Method::Get,
            "/shared",
            Owner::module("beta"),
            reply_action("beta"),
        )));
        assert_eq!(
            registry.get(Method::Get, "/shared").unwrap().owner,
            Owner::module("alpha")
        );
    }

    #[test]
    fn test_removal_returns_entries_for_unbinding() {
        let registry = RouteRegistry::new();
        registry.register(RouteEntry::new(
            Method::Get,
            "/app",
            Owner::App,
            reply_action(""),
        ));
        registry.register(RouteEntry::new(
            Method::Get,
            "/alpha",
            Owner::module("alpha"),
            reply_action(""),
        ));
        registry.register(RouteEntry::new(
            Method::Post,
            "/alpha",
            Owner::module("alpha"),
            reply_action(""),
        ));

        let app_removed = registry.remove_app_entries();
        assert_eq!(app_removed.len(), 1);
        assert_eq!(app_removed[0].path, "/app");

        let module_removed = registry.remove_module_entries();
        assert_eq!(module_removed.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.module_owners().is_empty());
    }

    #[test]
    fn test_method_parses_case_insensitively() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("POST".parse::<Method>().unwrap(), Method::Post);
        assert_eq!("ws".parse::<Method>().unwrap(), Method::Ws);
        assert!("fetch".parse::<Method>().is_err());
    }

    #[test]
    fn test_middleware_order_and_clear() {
        let registry = RouteRegistry::new();
        registry.add_middleware(Owner::App, reply_action("first"));
        registry.add_middleware(Owner::module("alpha"), reply_action("second"));

        assert_eq!(registry.middleware_count(), 2);
        assert_eq!(registry.clear_middlewares(), 2);
        assert_eq!(registry.middleware_count(), 0);
    }
}
