//! # twinforge-bus
//!
//! Internal event bus for twinforge.
//!
//! This crate provides:
//! - The event records flowing between adapters and the engine
//! - Typed topics with per-twin and global variants
//! - Broadcast-based pub/sub with bounded per-subscriber queues
//! - The non-fatal diagnostic channel

pub mod bus;
pub mod diagnostic;
pub mod event;
pub mod topic;

pub use bus::{EventBus, Subscription};
pub use diagnostic::{Diagnostic, DiagnosticKind, DiagnosticSink};
pub use event::{BusEvent, DigitalActionEvent, EngineLifecycle, LifecycleVariation, PhysicalEvent};
pub use topic::Topic;
