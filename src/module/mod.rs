//! # Module System
//!
//! Modules are the runtime's pluggable units. Each one owns an isolated
//! event context bridged onto the global bus under `modules:<name>:` and
//! may contribute commands, routes, scheduled tasks, and event hooks to
//! the shared registries, all tagged with its name for revocation.
//!
//! ## Discovery
//!
//! Two sources feed the loader, builtins first:
//!
//! - the **builtin catalog**: engine-shipped [`ModuleDefinition`]s complete
//!   with factories and programmatic bundle items
//! - **user modules**: subdirectories of the modules directory holding a
//!   `module.json` manifest plus descriptor bundles; their factories are
//!   resolved by name from the host-registered factory catalog
//!
//! Discovery is data first: manifests and descriptors are collected and
//! validated before anything touches a registry.

pub mod bundle;
pub mod definition;
pub mod loader;
pub mod manifest;
pub mod registry;

use thiserror::Error;

pub use bundle::{collect_bundle, hook_event_name, route_path_name, BundleItem};
pub use definition::{
    BuiltinItems, HandlerSet, ModuleContext, ModuleDefinition, ModuleFactory,
};
pub use loader::{read_disabled_set, ActionScope, ModuleLoader};
pub use manifest::{
    ActionDescriptor, CommandDescriptor, HookDescriptor, ModuleManifest, ModulePaths,
    RouteDescriptor, TaskDescriptor,
};
pub use registry::{ModuleEntry, ModuleRegistry};

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Invalid module definition {module}: {message}")]
    InvalidDefinition { module: String, message: String },

    #[error("Invalid manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },

    #[error("Module {module} failed to activate: {message}")]
    ActivationFailed { module: String, message: String },

    #[error("Module {module} failed to initialize: {message}")]
    InitFailed { module: String, message: String },

    #[error("Event error in module {module}: {source}")]
    Event {
        module: String,
        #[source]
        source: crate::event::EventError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ModuleResult<T> = Result<T, ModuleError>;
