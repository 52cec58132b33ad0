//! # Engine
//!
//! The composition root. [`EngineContext`] is the shared state every
//! phase handler, module, and command closes over: the bus, the three
//! registries, the module registry, and the collaborator fronts.
//! [`Engine`] wraps a context with the boot sequencer, the reload
//! coordinator, and the run loop.
//!
//! There is no global instance. Tests and embedders build as many
//! engines as they like, each with its own bus and registries.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::boot::{BootError, BootSequencer, BOOT_SEQUENCE, STOP_EVENT};
use crate::builtin;
use crate::config::EngineConfig;
use crate::error::{EngineResult, Error};
use crate::event::{Event, EventBus};
use crate::front::{
    ConsoleFront, HttpFront, NullConsoleFront, NullHttpFront, NullStorage, NullUserSpace, Storage,
    UserSpace,
};
use crate::hooks;
use crate::module::{HandlerSet, ModuleDefinition, ModuleFactory, ModuleRegistry};
use crate::registry::{ActionFn, CommandRegistry, RouteRegistry, TaskRegistry};
use crate::reload::ReloadCoordinator;
use crate::tasks::Scheduler;

/// Shared engine state. Built once, then only reached through `Arc`.
pub struct EngineContext {
    pub config: EngineConfig,
    pub bus: Arc<EventBus>,
    pub commands: Arc<CommandRegistry>,
    pub routes: Arc<RouteRegistry>,
    pub tasks: Arc<TaskRegistry>,
    pub modules: Arc<ModuleRegistry>,
    pub scheduler: Scheduler,
    pub http: Arc<dyn HttpFront>,
    pub console: Arc<dyn ConsoleFront>,
    pub storage: Arc<dyn Storage>,
    pub user_space: Arc<dyn UserSpace>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub reload_tx: broadcast::Sender<()>,
    pub started_at: DateTime<Utc>,
    builtins: Vec<ModuleDefinition>,
    user_factories: DashMap<String, Arc<dyn ModuleFactory>>,
    app_handlers: HandlerSet,
    app_load: Option<ActionFn>,
}

impl EngineContext {
    /// The module's config section, or an empty object when none exists.
    pub fn module_config(&self, name: &str) -> JsonValue {
        match self.config.module_section(name) {
            Some(section) => section,
            None => {
                warn!("No config section for module {}, using an empty one", name);
                JsonValue::Object(serde_json::Map::new())
            }
        }
    }

    pub fn builtin_definitions(&self) -> Vec<ModuleDefinition> {
        self.builtins.clone()
    }

    pub fn user_factory(&self, name: &str) -> Option<Arc<dyn ModuleFactory>> {
        self.user_factories.get(name).map(|factory| factory.clone())
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.config.modules.dir.clone()
    }

    pub fn disabled_file(&self) -> PathBuf {
        self.config.modules.disabled_file.clone()
    }

    pub fn max_listeners(&self) -> usize {
        self.config.events.max_listeners
    }

    pub fn app_dir(&self, sub: &Path) -> PathBuf {
        self.config.app.root.join(sub)
    }

    pub fn app_handlers(&self) -> &HandlerSet {
        &self.app_handlers
    }

    pub fn app_load(&self) -> Option<ActionFn> {
        self.app_load.clone()
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("app", &self.config.app.name)
            .field("modules", &self.modules.len())
            .finish()
    }
}

/// Wires collaborators and user modules into an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    http: Arc<dyn HttpFront>,
    console: Arc<dyn ConsoleFront>,
    storage: Arc<dyn Storage>,
    user_space: Arc<dyn UserSpace>,
    user_factories: Vec<(String, Arc<dyn ModuleFactory>)>,
    app_handlers: HandlerSet,
    app_load: Option<ActionFn>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            http: Arc::new(NullHttpFront),
            console: Arc::new(NullConsoleFront),
            storage: Arc::new(NullStorage),
            user_space: Arc::new(NullUserSpace),
            user_factories: Vec::new(),
            app_handlers: HandlerSet::new(),
            app_load: None,
        }
    }

    pub fn with_http(mut self, front: Arc<dyn HttpFront>) -> Self {
        self.http = front;
        self
    }

    pub fn with_console(mut self, front: Arc<dyn ConsoleFront>) -> Self {
        self.console = front;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_user_space(mut self, user_space: Arc<dyn UserSpace>) -> Self {
        self.user_space = user_space;
        self
    }

    /// Registers the factory backing a user module directory of the same
    /// name.
    pub fn register_module(mut self, name: &str, factory: Arc<dyn ModuleFactory>) -> Self {
        self.user_factories.push((name.to_string(), factory));
        self
    }

    /// Registers a named action app descriptors can reference via
    /// `{"handler": "<id>"}`.
    pub fn register_app_handler(mut self, id: &str, action: ActionFn) -> Self {
        self.app_handlers.insert(id, action);
        self
    }

    /// Callback run at the `app:load` phase.
    pub fn on_app_load(mut self, action: ActionFn) -> Self {
        self.app_load = Some(action);
        self
    }

    pub fn build(self) -> Engine {
        let bus = Arc::new(EventBus::new(self.config.events.max_listeners));
        let tasks = Arc::new(TaskRegistry::new());
        let scheduler = Scheduler::new(tasks.clone());
        let (shutdown_tx, _) = broadcast::channel(1);
        let (reload_tx, _) = broadcast::channel(1);
        let builtins = builtin::definitions(&self.config, bus.clone());

        let user_factories = DashMap::new();
        for (name, factory) in self.user_factories {
            user_factories.insert(name, factory);
        }

        let ctx = Arc::new(EngineContext {
            config: self.config,
            bus,
            commands: Arc::new(CommandRegistry::new()),
            routes: Arc::new(RouteRegistry::new()),
            tasks,
            modules: Arc::new(ModuleRegistry::new()),
            scheduler,
            http: self.http,
            console: self.console,
            storage: self.storage,
            user_space: self.user_space,
            shutdown_tx,
            reload_tx,
            started_at: Utc::now(),
            builtins,
            user_factories,
            app_handlers: self.app_handlers,
            app_load: self.app_load,
        });
        let reload = Arc::new(ReloadCoordinator::new(ctx.clone()));
        Engine {
            ctx,
            reload,
            running: AtomicBool::new(false),
        }
    }
}

pub struct Engine {
    ctx: Arc<EngineContext>,
    reload: Arc<ReloadCoordinator>,
    running: AtomicBool,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn context(&self) -> Arc<EngineContext> {
        self.ctx.clone()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.ctx.bus.clone()
    }

    /// Boots the engine: phase handlers on, the full sequence through,
    /// then `engine:ready`.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> EngineResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BootError::AlreadyRunning.into());
        }
        info!("Starting {}", self.ctx.config.app.name);
        hooks::register_all(&self.ctx).await.map_err(Error::from)?;
        let sequencer = BootSequencer::new(self.ctx.bus.clone());
        sequencer.run(&BOOT_SEQUENCE).await.map_err(Error::from)?;
        sequencer.announce_ready().await?;
        Ok(())
    }

    /// Boots, then serves reload requests until `engine:stop` arrives.
    pub async fn run(&self) -> EngineResult<()> {
        let mut shutdown_rx = self.ctx.shutdown_tx.subscribe();
        let mut reload_rx = self.ctx.reload_tx.subscribe();
        self.start().await?;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = reload_rx.recv() => {
                    if let Err(e) = self.reload.reload_all().await {
                        warn!("Reload failed: {}", e);
                    }
                }
            }
        }
        self.teardown().await;
        Ok(())
    }

    pub async fn reload(&self) -> EngineResult<()> {
        self.reload.reload_all().await.map_err(Error::from)
    }

    /// Publishes `engine:stop`. The run loop exits once the event has
    /// been handled.
    pub async fn stop(&self) -> EngineResult<()> {
        self.ctx
            .bus
            .publish(Event::new(STOP_EVENT))
            .await
            .map_err(Error::from)
    }

    async fn teardown(&self) {
        debug!("Tearing down engine");
        self.reload.unload_all().await;
        self.ctx.tasks.stop_all();
        if self.ctx.config.database.enabled {
            if let Err(e) = self.ctx.storage.disconnect().await {
                warn!("Storage disconnect failed: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}
