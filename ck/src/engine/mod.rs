//! CAD engines
//!
//! The [`Engine`] trait is the contract every engine implements. Engines are
//! never called directly: [`spawn_engine`] moves one onto its own task and
//! returns an [`EngineStub`] that talks to it by message passing.

pub mod builtin;
mod error;
mod stub;
mod traits;

pub use error::EngineError;
pub use stub::{DEFAULT_ENGINE_BUFFER, EngineCommand, EngineStub, spawn_engine};
pub use traits::{Engine, EngineContext, EngineOptions, EngineResult};
