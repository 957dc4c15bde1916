//! # twinforge-adapter
//!
//! Adapter contracts and registry for twinforge.
//!
//! This crate provides:
//! - The physical/digital adapter traits and their engine-side handles
//! - The adapter registry with its binding lifecycle
//! - Bind timeouts, bounded rebind retries, and permanent-failure reporting

pub mod error;
pub mod registry;
pub mod traits;

pub use error::AdapterError;
pub use registry::{
    AdapterDescriptor, AdapterKind, AdapterLifecycle, AdapterRegistry, RetryPolicy,
};
pub use traits::{DigitalAdapter, DigitalAdapterHandle, PhysicalAdapter, PhysicalAdapterHandle};
