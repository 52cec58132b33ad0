//! # Modulith: An Extensible Application Runtime
//!
//! Modulith boots an application as a sequence of named phases, loads
//! pluggable modules from a builtin catalog and from disk, and wires
//! everything together over a namespaced event bus. The runtime owns
//! registries for commands, routes, and scheduled tasks; the surfaces
//! that expose them (HTTP, console, storage) stay behind trait seams.
//!
//! ## Architecture
//!
//! ### 1. Phased Boot
//! Startup is data, not code: a fixed ordered list of phase events,
//! each awaited to completion before the next.
//! - Sequencing ([`boot`])
//! - Per-phase work ([`hooks`])
//!
//! ### 2. Modules
//! A module is a named unit with a factory, optional dependencies, and
//! a bundle of descriptor items (hooks, commands, routes, tasks).
//! - Definitions and manifests ([`module`])
//! - Engine-shipped modules ([`builtin`])
//!
//! ### 3. Event-Based Async Processing
//! All coordination rides the global bus: phases, module bridges,
//! command side effects.
//! - Bus, patterns, and bridging ([`event`])
//!
//! ### 4. Registries
//! Commands, routes, and tasks carry an owner tag, so unloading a
//! contributor is proportional to what it owns.
//! - Owner-indexed stores ([`registry`])
//! - Scheduling ([`tasks`])
//!
//! ### 5. Hot Reload
//! The dynamic half of boot can be torn down and replayed at runtime
//! without dropping sockets or the console.
//! - Teardown and replay ([`reload`])
//!
//! ## Boot Pipeline
//!
//! ```text
//! http:* → ws:* → cli:load* → tasks:loadtasks → modules:load →
//! app:load → database:connect → modules:init → user:load →
//! cli:start → http:bindstatic → http:listen → tasks:start →
//! engine:ready
//! ```
//!
//! A reload replays the same pipeline minus the static phases
//! (`database:connect`, `cli:start`, `http:bindstatic`, `http:listen`)
//! and never re-emits `engine:ready`.
//!
//! ## Entry Points
//!
//! [`system::Engine`] is the composition root: build one with
//! [`system::EngineBuilder`], then `start` or `run` it. Everything the
//! running engine shares lives in [`system::EngineContext`].

pub mod boot;
pub mod builtin;
pub mod config;
pub mod error;
pub mod event;
pub mod front;
pub mod hooks;
pub mod module;
pub mod registry;
pub mod reload;
pub mod system;
pub mod tasks;

// Re-exports
pub use boot::*;
pub use error::*;
pub use event::*;
pub use system::*;

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
