//! Module registry.
//!
//! Holds one [`ModuleEntry`] per activated module and remembers the
//! activation order, which unload walks in reverse. Registration is
//! first-wins: a name already present is skipped, making a re-run of the
//! loader after a partial failure safe.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::definition::{ModuleContext, ModuleDefinition};
use crate::event::ListenerId;

/// A module's registry record, created during `modules:load` and removed
/// only at unload.
#[derive(Clone)]
pub struct ModuleEntry {
    pub definition: ModuleDefinition,
    pub context: Arc<ModuleContext>,
    /// Directory the module was discovered in; None for builtins.
    pub base_dir: Option<PathBuf>,
    pub activated_at: DateTime<Utc>,
    /// Handle of the context-to-bus bridge, used to unforward at unload.
    pub bridge: ListenerId,
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: DashMap<String, ModuleEntry>,
    order: Mutex<Vec<String>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an entry unless the name is already taken (first
    /// registration wins). Returns whether the entry was stored.
    pub fn register(&self, entry: ModuleEntry) -> bool {
        let name = entry.definition.name.clone();
        if self.modules.contains_key(&name) {
            debug!("Module {} already registered, keeping the first", name);
            return false;
        }
        self.modules.insert(name.clone(), entry);
        let mut order = self
            .order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        order.push(name);
        true
    }

    pub fn get(&self, name: &str) -> Option<ModuleEntry> {
        self.modules.get(name).map(|entry| entry.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Removes a module's entry, dropping it from the activation order.
    pub fn remove(&self, name: &str) -> Option<ModuleEntry> {
        let removed = self.modules.remove(name).map(|(_, entry)| entry);
        if removed.is_some() {
            let mut order = self
                .order
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            order.retain(|candidate| candidate != name);
        }
        removed
    }

    /// Module names in activation order.
    pub fn names(&self) -> Vec<String> {
        self.order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Module names newest first, the unload walk order.
    pub fn names_reversed(&self) -> Vec<String> {
        let mut names = self.names();
        names.reverse();
        names
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
