//! Storage adapters for conflux.
//!
//! - [`MemoryStore`] implements every configuration port from
//!   `conflux-core` and publishes change notifications.
//! - [`MemoryAuditSink`], [`JsonLinesAuditSink`] and [`FanoutAuditSink`]
//!   implement the audit port.

#![deny(unsafe_code)]

pub mod audit;
pub mod memory;
pub mod seed;

pub use audit::{
    DEFAULT_AUDIT_CAPACITY, FanoutAuditSink, JsonLinesAuditSink, MemoryAuditSink,
};
pub use memory::MemoryStore;
pub use seed::{Seed, SeedError};
