//! Event emitter trait for lifecycle event broadcasting.
//!
//! Implementations handle transport details (channels, SSE, ...).

use crate::events::GatewayEvent;

/// Trait for emitting gateway events.
///
/// # Implementations
///
/// - `NoopEmitter` - For tests and contexts without listeners
/// - Adapter-specific implementations (SSE broadcaster)
pub trait GatewayEventEmitter: Send + Sync {
    /// Emit an event. Must not block.
    fn emit(&self, event: GatewayEvent);
}

/// A no-op event emitter for tests and headless contexts.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub const fn new() -> Self {
        Self
    }
}

impl GatewayEventEmitter for NoopEmitter {
    fn emit(&self, _event: GatewayEvent) {
        // Intentionally do nothing
    }
}
