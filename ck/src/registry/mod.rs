//! Engine registry and lifecycle
//!
//! The registry exclusively owns the engine actors. Callers only ever see
//! [`EngineStub`](crate::engine::EngineStub) clones and must turn a missing
//! stub into `EngineNotInitialized` rather than retrying.

mod definition;
mod manager;

pub use definition::{EngineDefinition, EngineFactory, EngineSlot};
pub use manager::{DEFAULT_CLEANUP_GRACE, EngineRegistry};
