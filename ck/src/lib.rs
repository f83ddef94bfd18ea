//! cadkernel - CAD kernel orchestrator
//!
//! Sits between an editor and a set of heterogeneous CAD engines. Given a model
//! file it picks the engine that understands it, extracts the file's tunable
//! parameters, evaluates geometry with user overrides applied, and exports the
//! result in a manufacturing format.
//!
//! # Core Concepts
//!
//! - **Actors, not objects**: every engine runs on its own task behind an
//!   [`EngineStub`]; a crashed engine surfaces as an error, never a crash
//! - **Latest request wins**: a new compute supersedes the pass in flight and
//!   stale results are discarded on arrival
//! - **Priority probing**: engines are asked in a fixed order and the answer is
//!   cached per filename
//!
//! # Modules
//!
//! - [`domain`] - Source files, parameters, geometry and formats
//! - [`engine`] - The engine contract, actor stubs and builtin engines
//! - [`registry`] - Engine lifecycle
//! - [`prober`] - Capability probing and caching
//! - [`pipeline`] - The controller and its handle
//! - [`events`] - Outbound events and log relay
//! - [`channel`] - Project file access for engines
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod channel;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod prober;
pub mod registry;
pub mod watcher;

// Re-export commonly used types
pub use config::Config;
pub use domain::{
    EngineKind, ExportFormat, ExportedBlob, ExtractedParameters, Geometry, Parameters, SourceFile, merge_parameters,
};
pub use engine::{Engine, EngineContext, EngineError, EngineOptions, EngineResult, EngineStub, spawn_engine};
pub use error::{ErrorKind, KernelError};
pub use events::{KernelEvent, LogLevel, Reporter, ReportedError, Stage};
pub use pipeline::{Kernel, KernelConfig, KernelHandle, PipelineState};
pub use prober::{CapabilityCache, CapabilityProber};
pub use registry::EngineRegistry;
pub use watcher::SourceWatcher;
