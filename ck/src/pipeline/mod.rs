//! Pipeline controller
//!
//! Drives a request through engine selection, parameter extraction and geometry
//! evaluation, plus a separate export lifecycle. A newer request supersedes the
//! one in flight instead of queuing behind it.

mod config;
mod controller;
mod handle;
mod messages;
mod state;

pub use config::KernelConfig;
pub use controller::Kernel;
pub use handle::KernelHandle;
pub use messages::{KernelRequest, StageOutcome};
pub use state::PipelineState;
