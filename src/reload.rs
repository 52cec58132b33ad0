//! # Hot Reload
//!
//! A reload tears down everything the dynamic phases built, then replays
//! those phases. Static resources (bound sockets, the console prompt,
//! the database connection) stay up throughout.
//!
//! Teardown is best-effort: every step logs its failure and keeps going,
//! so one broken module cannot wedge the engine in a half-unloaded
//! state. The subsequent replay is fail-fast, same as boot.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::boot::{BootError, BootSequencer, RELOAD_SEQUENCE};
use crate::system::EngineContext;

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("A reload is already in progress")]
    AlreadyInProgress,
    #[error("Reload phase failed: {0}")]
    Boot(#[from] BootError),
}

pub type ReloadResult<T> = Result<T, ReloadError>;

pub struct ReloadCoordinator {
    ctx: Arc<EngineContext>,
    guard: Mutex<()>,
}

impl ReloadCoordinator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            guard: Mutex::new(()),
        }
    }

    /// Unloads everything dynamic and replays the dynamic phases. A
    /// second call while one is running is refused, not queued.
    pub async fn reload_all(&self) -> ReloadResult<()> {
        let _guard = self
            .guard
            .try_lock()
            .map_err(|_| ReloadError::AlreadyInProgress)?;
        info!("Reloading engine");
        self.unload_all().await;
        BootSequencer::new(self.ctx.bus.clone())
            .run(&RELOAD_SEQUENCE)
            .await?;
        self.apply_front().await;
        info!("Reload complete");
        Ok(())
    }

    /// Tears down commands, routes, tasks, modules, and user-space
    /// wiring, in that order. Modules unload in reverse activation order
    /// so dependents go before their dependencies. Safe to run twice.
    pub async fn unload_all(&self) {
        debug!("Unloading engine state");

        let removed = self.ctx.commands.remove_app_entries();
        debug!("Removed {} app commands", removed);
        let removed = self.ctx.commands.remove_module_entries();
        debug!("Removed {} module commands", removed);

        let routes = self.ctx.routes.remove_app_entries();
        debug!("Removed {} app routes", routes.len());
        self.detach_routes(routes).await;
        let routes = self.ctx.routes.remove_module_entries();
        debug!("Removed {} module routes", routes.len());
        self.detach_routes(routes).await;

        let removed = self.ctx.tasks.remove_app_entries();
        debug!("Removed {} app tasks", removed);
        let removed = self.ctx.tasks.remove_module_entries();
        debug!("Removed {} module tasks", removed);

        for name in self.ctx.modules.names_reversed() {
            self.unload_module(&name).await;
        }

        if let Err(e) = self.ctx.user_space.unload().await {
            warn!("User space unload failed: {}", e);
        }
    }

    async fn detach_routes(&self, routes: Vec<crate::registry::RouteEntry>) {
        if !self.ctx.config.http.enabled {
            return;
        }
        for entry in routes {
            if let Err(e) = self.ctx.http.remove_route(entry.method, &entry.path).await {
                warn!("Failed to detach route {} {}: {}", entry.method, entry.path, e);
            }
        }
    }

    async fn unload_module(&self, name: &str) {
        let entry = match self.ctx.modules.get(name) {
            Some(entry) => entry,
            None => return,
        };
        debug!("Unloading module {}", name);

        entry.context.emitter().unforward(entry.bridge).await;

        // Trailing delimiter so "modules:a:" cannot match "modules:ab:*".
        let prefix = format!("modules:{}:", name);
        let removed = self.ctx.bus.remove_namespace(&prefix).await;
        debug!("Removed {} listeners under {}", removed, prefix);

        for id in entry.context.drain_tracked_listeners() {
            self.ctx.bus.remove_listener(id).await;
        }
        for id in entry.context.drain_tracked_observers() {
            self.ctx.bus.remove_observer(id).await;
        }

        self.ctx.modules.remove(name);
    }

    /// Pushes the rebuilt registry state back to a live HTTP front.
    async fn apply_front(&self) {
        if !self.ctx.config.http.enabled {
            return;
        }
        if let Err(e) = self
            .ctx
            .http
            .apply_middleware(self.ctx.routes.middlewares())
            .await
        {
            warn!("Failed to reapply middleware: {}", e);
        }
        if let Err(e) = self.ctx.http.apply_routes(self.ctx.routes.routes()).await {
            warn!("Failed to reapply routes: {}", e);
        }
    }
}
