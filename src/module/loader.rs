//! # Module Loader
//!
//! Populates the Module Registry and, transitively, the command, route,
//! and task registries from pluggable units.
//!
//! ## Load Algorithm
//!
//! 1. Combine the builtin catalog with user modules discovered under the
//!    modules directory (one subdirectory with a `module.json` each)
//! 2. Read the disable-list; listed names are skipped with a warning
//! 3. Verify declared dependencies against the Module Registry; a missing
//!    dependency skips the module with a warning
//! 4. Validate the definition shape; an invalid builtin is fatal, an
//!    invalid user module is skipped
//! 5. Run the factory's `create` with the module's config section
//! 6. Bridge the context's emissions onto the global bus under
//!    `modules:<name>:` and store the registry entry
//! 7. Install bundle items (hooks, commands, routes, tasks) with the
//!    module as owner; invalid items are skipped individually
//!
//! Builtins activate first, then user modules in sorted directory order,
//! strictly sequentially so later modules can see earlier ones in the
//! registry. A name already registered is skipped (first wins), which
//! makes re-running the loader after a partial failure safe.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use glob::glob;
use tracing::{debug, info, warn};

use super::bundle::{collect_bundle, hook_event_name, route_path_name};
use super::definition::{BuiltinItems, HandlerSet, ModuleContext, ModuleDefinition};
use super::manifest::{
    ActionDescriptor, CommandDescriptor, HookDescriptor, ModuleManifest, RouteDescriptor,
    TaskDescriptor,
};
use super::registry::ModuleEntry;
use super::ModuleResult;
use crate::event::{Event, EventBus, EventError, Listener, ListenerId, Value};
use crate::registry::{
    ActionFn, ActionInput, CommandEntry, CommandRegistry, Owner, RegistryError, RouteEntry,
    RouteRegistry, TaskEntry, TaskRegistry,
};
use crate::system::EngineContext;
use crate::tasks::{CronExpr, Schedule};

const MANIFEST_FILE: &str = "module.json";

/// Reads the disable-list: one module name per line, `#` comments and
/// blank lines ignored. A missing file disables nothing.
pub async fn read_disabled_set(path: &Path) -> HashSet<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(String::from)
            .collect(),
        Err(_) => HashSet::new(),
    }
}

/// Where a descriptor action emits: module items on their context (so the
/// bridge namespaces them), app items straight onto the global bus.
#[derive(Clone)]
pub enum ActionScope {
    Module(Arc<ModuleContext>),
    App(Arc<EventBus>),
}

impl ActionScope {
    async fn emit(&self, event: Event) -> Result<(), EventError> {
        match self {
            ActionScope::Module(ctx) => ctx.emit(event).await,
            ActionScope::App(bus) => bus.publish(event).await,
        }
    }
}

/// Resolves a descriptor action into an invocable [`ActionFn`]. An
/// unknown handler id resolves to None, an item-level skip.
pub(crate) fn resolve_action(
    descriptor: &ActionDescriptor,
    scope: &ActionScope,
    handlers: &HandlerSet,
) -> Option<ActionFn> {
    match descriptor {
        ActionDescriptor::Emit { event, parameters } => {
            let scope = scope.clone();
            let event_name = event.clone();
            let parameters: HashMap<String, Value> = parameters
                .iter()
                .map(|(key, value)| (key.clone(), Value::from(value.clone())))
                .collect();
            Some(Arc::new(move |_input: ActionInput| {
                let scope = scope.clone();
                let event_name = event_name.clone();
                let parameters = parameters.clone();
                async move {
                    scope
                        .emit(Event::new(&event_name).with_parameters(parameters))
                        .await
                        .map_err(|e| RegistryError::ActionFailed {
                            name: event_name.clone(),
                            message: e.to_string(),
                        })?;
                    Ok(Value::Null)
                }
                .boxed()
            }))
        }
        ActionDescriptor::Handler(id) => handlers.get(id),
    }
}

/// Adapts an action into a bus listener, mapping its failure into the
/// bus's error type.
pub(crate) fn action_listener(action: ActionFn) -> Listener {
    Arc::new(move |event: &Event| {
        let action = action.clone();
        let event_name = event.name.clone();
        let input = ActionInput::with_parameters(event.parameters.clone());
        async move {
            action(input).await.map(|_| ()).map_err(|e| {
                EventError::HandlerFailed {
                    event_name,
                    message: e.to_string(),
                }
            })
        }
        .boxed()
    })
}

/// Binds a hook listener on the bus. Returns the listener handle, or
/// None when the item was skipped.
pub(crate) async fn install_hook(
    bus: &Arc<EventBus>,
    event_name: &str,
    action: &ActionDescriptor,
    scope: &ActionScope,
    handlers: &HandlerSet,
) -> Option<ListenerId> {
    let action = match resolve_action(action, scope, handlers) {
        Some(action) => action,
        None => {
            warn!("Hook {} references an unknown handler, skipping", event_name);
            return None;
        }
    };
    match bus.on_pattern(event_name, action_listener(action)).await {
        Ok(id) => {
            debug!("Binding hook {}", event_name);
            Some(id)
        }
        Err(e) => {
            warn!("Hook {} not bound: {}", event_name, e);
            None
        }
    }
}

/// Validates and registers one command descriptor.
pub(crate) fn install_command(
    registry: &CommandRegistry,
    descriptor: &CommandDescriptor,
    owner: Owner,
    scope: &ActionScope,
    handlers: &HandlerSet,
) -> bool {
    if let Err(message) = descriptor.validate() {
        warn!("Skipping command {:?}: {}", descriptor.name, message);
        return false;
    }
    let action = match resolve_action(&descriptor.action, scope, handlers) {
        Some(action) => action,
        None => {
            warn!(
                "Command {} references an unknown handler, skipping",
                descriptor.name
            );
            return false;
        }
    };
    let mut entry = CommandEntry::new(&descriptor.name, owner, action);
    entry.description = descriptor.description.clone();
    entry.usage = descriptor.usage.clone();
    registry.register(entry)
}

/// Validates and registers one route descriptor under `path`. Returns the
/// number of verbs registered; unresolved verbs are skipped individually.
pub(crate) fn install_route(
    registry: &RouteRegistry,
    path: &str,
    descriptor: &RouteDescriptor,
    owner: Owner,
    scope: &ActionScope,
    handlers: &HandlerSet,
) -> usize {
    if let Err(message) = descriptor.validate() {
        warn!("Skipping route {}: {}", path, message);
        return 0;
    }
    let mut registered = 0;
    for (method, action) in descriptor.verbs() {
        let action = match resolve_action(action, scope, handlers) {
            Some(action) => action,
            None => {
                warn!(
                    "Route {} {} references an unknown handler, skipping",
                    method, path
                );
                continue;
            }
        };
        if registry.register(RouteEntry::new(method, path, owner.clone(), action)) {
            registered += 1;
        }
    }
    registered
}

/// Validates and registers one task descriptor.
pub(crate) fn install_task(
    registry: &TaskRegistry,
    descriptor: &TaskDescriptor,
    owner: Owner,
    scope: &ActionScope,
    handlers: &HandlerSet,
) -> bool {
    if let Err(message) = descriptor.validate() {
        warn!("Skipping task {:?}: {}", descriptor.name, message);
        return false;
    }
    let schedule = match (&descriptor.cron, descriptor.every_ms) {
        (Some(expression), _) => match CronExpr::parse(expression) {
            Ok(expr) => Schedule::Cron(expr),
            Err(e) => {
                warn!("Skipping task {}: {}", descriptor.name, e);
                return false;
            }
        },
        (None, Some(millis)) => Schedule::Every(Duration::from_millis(millis)),
        (None, None) => return false,
    };
    let action = match resolve_action(&descriptor.action, scope, handlers) {
        Some(action) => action,
        None => {
            warn!(
                "Task {} references an unknown handler, skipping",
                descriptor.name
            );
            return false;
        }
    };
    registry.register(TaskEntry::new(&descriptor.name, owner, schedule, action))
}

pub struct ModuleLoader {
    ctx: Arc<EngineContext>,
}

impl ModuleLoader {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Runs a full load cycle. Returns the number of modules activated in
    /// this cycle.
    ///
    /// # Errors
    ///
    /// An invalid builtin definition or a failing factory aborts the
    /// cycle; every other problem downgrades to a logged skip.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn load_all(&self) -> ModuleResult<usize> {
        debug!("Loading modules");
        let disabled = read_disabled_set(&self.ctx.disabled_file()).await;
        let mut activated = 0;

        for definition in self.ctx.builtin_definitions() {
            if self.load_builtin(definition, &disabled).await? {
                activated += 1;
            }
        }

        for dir in self.user_module_dirs() {
            if self.load_user(&dir, &disabled).await? {
                activated += 1;
            }
        }

        info!("Loaded {} modules", self.ctx.modules.len());
        Ok(activated)
    }

    /// Sorted user module directories: subdirectories of the modules
    /// directory holding a manifest.
    fn user_module_dirs(&self) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/*/{}",
            self.ctx.modules_dir().display(),
            MANIFEST_FILE
        );
        let mut dirs = Vec::new();
        match glob(&pattern) {
            Ok(paths) => {
                for manifest in paths.flatten() {
                    if let Some(parent) = manifest.parent() {
                        dirs.push(parent.to_path_buf());
                    }
                }
            }
            Err(e) => warn!("Invalid modules directory pattern {}: {}", pattern, e),
        }
        dirs.sort();
        dirs
    }

    async fn load_builtin(
        &self,
        definition: ModuleDefinition,
        disabled: &HashSet<String>,
    ) -> ModuleResult<bool> {
        let name = definition.name.clone();
        if disabled.contains(&name) {
            warn!("Disabled module {}", name);
            return Ok(false);
        }
        if self.ctx.modules.contains(&name) {
            debug!("Module {} already registered, keeping the first", name);
            return Ok(false);
        }
        if let Some(missing) = self.missing_dependency(&definition) {
            warn!("Module {} missing dependency {}, skipping", name, missing);
            return Ok(false);
        }
        // A malformed builtin means the engine itself is broken.
        definition.validate()?;
        self.activate(definition, None).await?;
        Ok(true)
    }

    async fn load_user(&self, dir: &Path, disabled: &HashSet<String>) -> ModuleResult<bool> {
        let manifest = match ModuleManifest::from_file(&dir.join(MANIFEST_FILE)).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Skipping module at {}: {}", dir.display(), e);
                return Ok(false);
            }
        };
        let name = manifest.name.clone();
        if disabled.contains(&name) {
            warn!("Disabled module {}", name);
            return Ok(false);
        }
        if self.ctx.modules.contains(&name) {
            debug!("Module {} already registered, keeping the first", name);
            return Ok(false);
        }
        let factory = match self.ctx.user_factory(&name) {
            Some(factory) => factory,
            None => {
                warn!("Skipping module {}: no factory registered", name);
                return Ok(false);
            }
        };
        let definition = ModuleDefinition::new(&name, factory)
            .with_paths(manifest.paths.clone())
            .with_dependencies(manifest.dependencies.clone());
        if let Some(missing) = self.missing_dependency(&definition) {
            warn!("Module {} missing dependency {}, skipping", name, missing);
            return Ok(false);
        }
        if let Err(e) = definition.validate() {
            warn!("Skipping module {}: {}", name, e);
            return Ok(false);
        }
        self.activate(definition, Some(dir.to_path_buf())).await?;
        Ok(true)
    }

    fn missing_dependency(&self, definition: &ModuleDefinition) -> Option<String> {
        definition
            .dependencies
            .iter()
            .find(|dependency| !self.ctx.modules.contains(dependency))
            .cloned()
    }

    /// Activation: create the context, bridge it, store the entry, then
    /// install the module's bundle items.
    async fn activate(
        &self,
        definition: ModuleDefinition,
        base_dir: Option<PathBuf>,
    ) -> ModuleResult<()> {
        let name = definition.name.clone();
        debug!("Loading module {}", name);

        let config = self.ctx.module_config(&name);
        let context = Arc::new(ModuleContext::new(&name, self.ctx.max_listeners()));
        definition.factory.create(&context, &config).await?;
        debug!("Loaded module context for {}", name);

        let namespace = format!("modules:{}", name);
        let bridge = context
            .emitter()
            .forward_to(self.ctx.bus.clone(), &namespace)
            .await;

        self.ctx.modules.register(ModuleEntry {
            definition: definition.clone(),
            context: context.clone(),
            base_dir: base_dir.clone(),
            activated_at: Utc::now(),
            bridge,
        });

        let handlers = definition.factory.handlers(&context);
        let scope = ActionScope::Module(context);

        self.install_items(&definition.items, &name, &scope, &handlers)
            .await;
        if let Some(dir) = base_dir {
            self.install_bundles(&definition, &dir, &name, &scope, &handlers)
                .await?;
        }
        Ok(())
    }

    /// Programmatic bundle items carried by builtin definitions.
    async fn install_items(
        &self,
        items: &BuiltinItems,
        name: &str,
        scope: &ActionScope,
        handlers: &HandlerSet,
    ) {
        for (suffix, action) in &items.hooks {
            let event_name = format!("modules:{}:{}", name, suffix);
            install_hook(&self.ctx.bus, &event_name, action, scope, handlers).await;
        }
        for descriptor in &items.commands {
            install_command(
                &self.ctx.commands,
                descriptor,
                Owner::module(name),
                scope,
                handlers,
            );
        }
        for (path, descriptor) in &items.routes {
            install_route(
                &self.ctx.routes,
                path,
                descriptor,
                Owner::module(name),
                scope,
                handlers,
            );
        }
        for descriptor in &items.tasks {
            install_task(
                &self.ctx.tasks,
                descriptor,
                Owner::module(name),
                scope,
                handlers,
            );
        }
    }

    /// Descriptor bundles from the module's directory.
    async fn install_bundles(
        &self,
        definition: &ModuleDefinition,
        dir: &Path,
        name: &str,
        scope: &ActionScope,
        handlers: &HandlerSet,
    ) -> ModuleResult<()> {
        let hook_items = collect_bundle(&dir.join(&definition.paths.hooks)).await?;
        if !hook_items.is_empty() {
            debug!("Loading module hooks for {}", name);
        }
        for item in hook_items {
            let descriptor: HookDescriptor = match serde_json::from_value(item.value.clone()) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!(
                        "Hook {} from {} is invalid: {}",
                        item.relative_path.display(),
                        name,
                        e
                    );
                    continue;
                }
            };
            let suffix = hook_event_name(&item.relative_path);
            if let ActionDescriptor::Emit { event, .. } = &descriptor.action {
                if *event == suffix {
                    warn!("Hook {} would re-emit its own event, skipping", suffix);
                    continue;
                }
            }
            let event_name = format!("modules:{}:{}", name, suffix);
            install_hook(&self.ctx.bus, &event_name, &descriptor.action, scope, handlers).await;
        }

        let command_items = collect_bundle(&dir.join(&definition.paths.commands)).await?;
        if !command_items.is_empty() {
            debug!("Loading module commands for {}", name);
        }
        for item in command_items {
            let descriptor: CommandDescriptor = match serde_json::from_value(item.value.clone()) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!(
                        "Command {} from {} is invalid: {}",
                        item.relative_path.display(),
                        name,
                        e
                    );
                    continue;
                }
            };
            install_command(
                &self.ctx.commands,
                &descriptor,
                Owner::module(name),
                scope,
                handlers,
            );
        }

        let route_items = collect_bundle(&dir.join(&definition.paths.routes)).await?;
        if !route_items.is_empty() {
            debug!("Loading module routes for {}", name);
        }
        for item in route_items {
            let descriptor: RouteDescriptor = match serde_json::from_value(item.value.clone()) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!(
                        "Route {} from {} is invalid: {}",
                        item.relative_path.display(),
                        name,
                        e
                    );
                    continue;
                }
            };
            let path = route_path_name(&item.relative_path);
            debug!("Registering route {} as {}", item.relative_path.display(), path);
            install_route(
                &self.ctx.routes,
                &path,
                &descriptor,
                Owner::module(name),
                scope,
                handlers,
            );
        }

        let task_items = collect_bundle(&dir.join(&definition.paths.tasks)).await?;
        if !task_items.is_empty() {
            debug!("Loading module tasks for {}", name);
        }
        for item in task_items {
            let descriptor: TaskDescriptor = match serde_json::from_value(item.value.clone()) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!(
                        "Task {} from {} is invalid: {}",
                        item.relative_path.display(),
                        name,
                        e
                    );
                    continue;
                }
            };
            install_task(
                &self.ctx.tasks,
                &descriptor,
                Owner::module(name),
                scope,
                handlers,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_read_disabled_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disabled_modules");
        tokio::fs::write(&path, "alpha\n\n# a comment\n  beta  \n")
            .await
            .unwrap();

        let disabled = read_disabled_set(&path).await;
        assert_eq!(disabled.len(), 2);
        assert!(disabled.contains("alpha"));
        assert!(disabled.contains("beta"));
    }

    #[tokio::test]
    async fn test_read_disabled_set_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let disabled = read_disabled_set(&dir.path().join("absent")).await;
        assert!(disabled.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_emit_action_publishes() {
        let bus = Arc::new(EventBus::new(25));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        bus.on_pattern(
            "app:started",
            Arc::new(move |_event: &Event| {
                let seen = seen_clone.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            }),
        )
        .await
        .unwrap();

        let scope = ActionScope::App(bus);
        let action = resolve_action(
            &ActionDescriptor::emit("app:started"),
            &scope,
            &HandlerSet::default(),
        )
        .unwrap();

        action(ActionInput::empty()).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_handler_action() {
        let bus = Arc::new(EventBus::new(25));
        let scope = ActionScope::App(bus);
        let handlers = HandlerSet::new().with_handler(
            "greet",
            Arc::new(|_input: ActionInput| {
                async move { Ok(Value::String("hello".to_string())) }.boxed()
            }),
        );

        let action =
            resolve_action(&ActionDescriptor::handler("greet"), &scope, &handlers).unwrap();
        assert_eq!(
            action(ActionInput::empty()).await.unwrap(),
            Value::String("hello".to_string())
        );

        assert!(resolve_action(&ActionDescriptor::handler("missing"), &scope, &handlers).is_none());
    }

    #[tokio::test]
    async fn test_action_listener_maps_errors() {
        let failing: ActionFn = Arc::new(|_input: ActionInput| {
            async move {
                Err(RegistryError::ActionFailed {
                    name: "x".to_string(),
                    message: "refused".to_string(),
                })
            }
            .boxed()
        });
        let listener = action_listener(failing);
        let result = listener(&Event::new("some:event")).await;
        assert!(matches!(
            result,
            Err(EventError::HandlerFailed { event_name, .. }) if event_name == "some:event"
        ));
    }
}
