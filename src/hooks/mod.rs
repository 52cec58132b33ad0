//! # Phase Handlers
//!
//! Each submodule subscribes to the boot phases it owns and does its
//! work when the sequencer publishes the phase event. Keeping the
//! handlers here, away from the sequencer, means the boot order lives in
//! one place ([`crate::boot`]) and the per-subsystem work in another.
//!
//! Handlers are plain bus listeners outside every module namespace, so
//! they survive unload and a reload replays them for free when it
//! republishes the dynamic phases.

use std::sync::Arc;

use crate::boot::Phase;
use crate::event::{EventError, EventResult};
use crate::system::EngineContext;

pub mod app;
pub mod cli;
pub mod engine;
pub mod http;
pub mod modules;
pub mod tasks;
pub mod user;
pub mod ws;

/// Wires every phase handler onto the bus. Called once before the boot
/// sequence runs.
pub async fn register_all(ctx: &Arc<EngineContext>) -> EventResult<()> {
    http::register(ctx).await?;
    ws::register(ctx).await?;
    cli::register(ctx).await?;
    tasks::register(ctx).await?;
    modules::register(ctx).await?;
    app::register(ctx).await?;
    user::register(ctx).await?;
    engine::register(ctx).await?;
    Ok(())
}

pub(crate) fn phase_error(phase: Phase, e: impl std::fmt::Display) -> EventError {
    EventError::HandlerFailed {
        event_name: phase.to_string(),
        message: e.to_string(),
    }
}
