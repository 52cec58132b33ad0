//! Module definitions, factories, and activation contexts.

use std::{collections::HashMap, fmt, sync::Arc, sync::Mutex};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::manifest::{
    ActionDescriptor, CommandDescriptor, ModulePaths, RouteDescriptor, TaskDescriptor,
};
use super::{ModuleError, ModuleResult};
use crate::event::{ContextEmitter, Event, EventResult, ListenerId};
use crate::registry::ActionFn;

/// # ModuleContext
///
/// A module's isolated event source, created at activation and destroyed
/// at unload. Everything the module emits here is bridged onto the global
/// bus under `modules:<name>:`; listeners and observers the module places
/// directly on the global bus are tracked so unload can revoke them.
pub struct ModuleContext {
    name: String,
    emitter: ContextEmitter,
    tracked_listeners: Mutex<Vec<ListenerId>>,
    tracked_observers: Mutex<Vec<ListenerId>>,
}

impl ModuleContext {
    pub fn new(name: &str, max_listeners: usize) -> Self {
        Self {
            name: name.to_string(),
            emitter: ContextEmitter::new(max_listeners),
            tracked_listeners: Mutex::new(Vec::new()),
            tracked_observers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emits on the module's own bus; the bridge forwards it globally as
    /// `modules:<name>:<event>`.
    pub async fn emit(&self, event: Event) -> EventResult<()> {
        self.emitter.emit(event).await
    }

    pub fn emitter(&self) -> &ContextEmitter {
        &self.emitter
    }

    /// Records a global-bus listener owned by this module, revoked at
    /// unload.
    pub fn track_listener(&self, id: ListenerId) {
        let mut tracked = self
            .tracked_listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tracked.push(id);
    }

    /// Records a global-bus observer owned by this module, revoked at
    /// unload.
    pub fn track_observer(&self, id: ListenerId) {
        let mut tracked = self
            .tracked_observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tracked.push(id);
    }

    pub fn drain_tracked_listeners(&self) -> Vec<ListenerId> {
        let mut tracked = self
            .tracked_listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *tracked)
    }

    pub fn drain_tracked_observers(&self) -> Vec<ListenerId> {
        let mut tracked = self
            .tracked_observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *tracked)
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("name", &self.name)
            .finish()
    }
}

/// Named actions a module's descriptors can reference via
/// `{"handler": "<id>"}`.
#[derive(Default, Clone)]
pub struct HandlerSet {
    handlers: HashMap<String, ActionFn>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, id: &str, action: ActionFn) -> Self {
        self.handlers.insert(id.to_string(), action);
        self
    }

    pub fn insert(&mut self, id: &str, action: ActionFn) {
        self.handlers.insert(id.to_string(), action);
    }

    pub fn get(&self, id: &str) -> Option<ActionFn> {
        self.handlers.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// # ModuleFactory
///
/// The code half of a module: activation, post-activation initialization,
/// and the named handlers its descriptors resolve against. Builtins ship
/// factories in the catalog; user modules register theirs with the engine
/// under the manifest name.
#[async_trait]
pub trait ModuleFactory: Send + Sync {
    /// Activation callback, run once per load cycle with the module's
    /// config section. The context is fresh; local subscriptions set up
    /// here live until unload.
    async fn create(&self, ctx: &Arc<ModuleContext>, config: &JsonValue) -> ModuleResult<()>;

    /// Post-activation callback, run during `modules:init` after every
    /// module has been activated.
    async fn init(&self, _ctx: &Arc<ModuleContext>, _config: &JsonValue) -> ModuleResult<()> {
        Ok(())
    }

    /// Handlers this module exposes to its descriptors, bound to the live
    /// context.
    fn handlers(&self, _ctx: &Arc<ModuleContext>) -> HandlerSet {
        HandlerSet::default()
    }
}

/// Engine-shipped bundle items, the programmatic equivalent of a user
/// module's descriptor files.
#[derive(Default, Clone)]
pub struct BuiltinItems {
    /// `(event suffix, action)`; bound at `modules:<name>:<suffix>`.
    pub hooks: Vec<(String, ActionDescriptor)>,
    pub commands: Vec<CommandDescriptor>,
    /// `(route path, verb map)`.
    pub routes: Vec<(String, RouteDescriptor)>,
    pub tasks: Vec<TaskDescriptor>,
}

impl BuiltinItems {
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
            && self.commands.is_empty()
            && self.routes.is_empty()
            && self.tasks.is_empty()
    }
}

/// # ModuleDefinition
///
/// Everything the loader needs to activate a module. Immutable once
/// built.
#[derive(Clone)]
pub struct ModuleDefinition {
    pub name: String,
    pub paths: ModulePaths,
    pub dependencies: Vec<String>,
    pub factory: Arc<dyn ModuleFactory>,
    /// Programmatic bundle items, used by builtins.
    pub items: BuiltinItems,
}

impl ModuleDefinition {
    pub fn new(name: &str, factory: Arc<dyn ModuleFactory>) -> Self {
        Self {
            name: name.to_string(),
            paths: ModulePaths::default(),
            dependencies: Vec::new(),
            factory,
            items: BuiltinItems::default(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_paths(mut self, paths: ModulePaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_items(mut self, items: BuiltinItems) -> Self {
        self.items = items;
        self
    }

    /// Shape check applied to every candidate before activation. Fatal
    /// for builtins, skip-with-warning for user modules.
    pub fn validate(&self) -> ModuleResult<()> {
        super::manifest::validate_module_name(&self.name).map_err(|message| {
            ModuleError::InvalidDefinition {
                module: self.name.clone(),
                message,
            }
        })?;
        for dependency in &self.dependencies {
            if dependency == &self.name {
                return Err(ModuleError::InvalidDefinition {
                    module: self.name.clone(),
                    message: "module depends on itself".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("name", &self.name)
            .field("paths", &self.paths)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Value;
    use crate::registry::ActionInput;
    use futures::FutureExt;

    struct NullFactory;

    #[async_trait]
    impl ModuleFactory for NullFactory {
        async fn create(&self, _ctx: &Arc<ModuleContext>, _config: &JsonValue) -> ModuleResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_definition_validate() {
        let ok = ModuleDefinition::new("alpha", Arc::new(NullFactory));
        assert!(ok.validate().is_ok());

        let bad_name = ModuleDefinition::new("Not Valid!", Arc::new(NullFactory));
        assert!(bad_name.validate().is_err());

        let self_dep = ModuleDefinition::new("alpha", Arc::new(NullFactory))
            .with_dependencies(vec!["alpha".to_string()]);
        assert!(self_dep.validate().is_err());
    }

    #[test]
    fn test_handler_set() {
        let action: ActionFn =
            Arc::new(|_input: ActionInput| async move { Ok(Value::Null) }.boxed());
        let set = HandlerSet::new().with_handler("beat", action);

        assert!(set.get("beat").is_some());
        assert!(set.get("missing").is_none());
        assert_eq!(set.ids(), vec!["beat"]);
    }

    #[tokio::test]
    async fn test_context_tracking() {
        let ctx = ModuleContext::new("alpha", 25);
        let id = ListenerId::generate();
        ctx.track_listener(id);

        let drained = ctx.drain_tracked_listeners();
        assert_eq!(drained, vec![id]);
        assert!(ctx.drain_tracked_listeners().is_empty());
    }
}
