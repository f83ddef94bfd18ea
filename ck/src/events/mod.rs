//! Result reporting and log relay
//!
//! The [`Reporter`] wraps a tokio broadcast channel. The pipeline controller
//! reports stage outcomes through it, engines relay log lines through an
//! [`EngineLogger`], and the coordinator subscribes to the resulting
//! [`KernelEvent`] stream.

mod reporter;
mod types;

pub use reporter::{DEFAULT_EVENT_CAPACITY, EngineLogger, Reporter};
pub use types::{KernelEvent, LogLevel, ReportedError, Stage};
