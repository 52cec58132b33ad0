//! # Builtin Modules
//!
//! Engine-shipped modules, activated through the same loader path as
//! user modules. Their bundle items are carried programmatically on the
//! definition instead of descriptor files, and they can be turned off
//! per deployment through the disable-list like any other module.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::event::EventBus;
use crate::module::ModuleDefinition;

pub mod commands;
pub mod heartbeat;
pub mod sysmon;

/// The builtin catalog, built once at engine construction.
pub fn definitions(config: &EngineConfig, bus: Arc<EventBus>) -> Vec<ModuleDefinition> {
    vec![heartbeat::definition(config), sysmon::definition(bus)]
}
