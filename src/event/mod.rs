//! # Event-Driven Architecture
//!
//! The event system is the core coordination mechanism of the runtime. Boot
//! phases, module hooks, and user-space extensions interact exclusively
//! through namespaced events, which keeps subsystems loosely coupled.
//!
//! ## Architecture Overview
//!
//! The event system consists of the following key components:
//!
//! - **EventBus**: Central hub dispatching events to pattern-matched
//!   listeners in registration order, awaiting each one
//! - **EventPattern**: `:`-delimited name matcher with a single-segment `*`
//!   wildcard
//! - **ContextEmitter**: Per-module emitter whose local events are bridged
//!   onto the global bus under `modules:<name>:`
//!
//! ## Event Flow
//!
//! ```text
//! ┌──────────┐     ┌──────────┐     ┌──────────┐
//! │Publisher │────▶│ EventBus │────▶│ Listener │
//! └──────────┘     └──────────┘     └──────────┘
//!                       │
//!                  ┌────▼────────┐
//!                  │EventPattern │
//!                  └─────────────┘
//! ```
//!
//! 1. Publishers create and publish events to the EventBus
//! 2. The bus matches the event name against every subscription pattern
//! 3. Matching listeners run sequentially; the publisher's future resolves
//!    once the last one finishes
//!
//! ## Module Bridging
//!
//! Modules never touch the global bus directly. Each module's
//! [`ContextEmitter`] forwards local emissions under the module namespace:
//!
//! ```text
//! ┌────────────┐  beat   ┌───────────────┐  modules:heartbeat:beat  ┌──────────┐
//! │  module    │────────▶│ ContextEmitter│─────────────────────────▶│ EventBus │
//! └────────────┘         └───────────────┘                          └──────────┘
//! ```
//!
//! Unloading a module removes the bridge and every global listener under
//! its namespace, so stale modules cannot observe or emit events.
//!
//! ## Usage Examples
//!
//! ### Publishing an Event
//!
//! ```rust,no_run
//! # use modulith::event::{Event, EventBus, Value};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = EventBus::new(25);
//! let event = Event::new("modules:heartbeat:beat")
//!     .with_parameter("sequence", Value::Integer(1));
//! bus.publish(event).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Subscribing with a Wildcard
//!
//! ```rust,no_run
//! # use modulith::event::{Event, EventBus};
//! # use std::sync::Arc;
//! # use futures::FutureExt;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = EventBus::new(25);
//! bus.on_pattern(
//!     "modules:*:beat",
//!     Arc::new(|event: &Event| {
//!         let name = event.name.clone();
//!         async move {
//!             println!("observed {}", name);
//!             Ok(())
//!         }
//!         .boxed()
//!     }),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod event_bus;
pub mod pattern;

pub use bridge::ContextEmitter;
pub use event_bus::{
    Event, EventBus, EventError, EventResult, Listener, ListenerFuture, ListenerId, Observer,
    Value,
};
pub use pattern::{EventPattern, PatternSegment, SEGMENT_DELIMITER};
