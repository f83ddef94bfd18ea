//! Reporter - the single normalization point for stage outcomes
//!
//! Every stage result leaves the orchestrator through here: it is tagged with its
//! stage, turned into a [`KernelEvent`] and broadcast to subscribers. Engine log
//! messages take the same path through an [`EngineLogger`].

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::types::{KernelEvent, LogLevel, ReportedError, Stage};
use crate::domain::{EngineKind, ExportFormat, ExportedBlob, ExtractedParameters, Geometry};
use crate::error::KernelError;

/// Default channel capacity (events)
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Outbound event sink shared by the controller, the registry and the engines
#[derive(Clone)]
pub struct Reporter {
    tx: broadcast::Sender<KernelEvent>,
}

impl Reporter {
    /// Create a new reporter with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "Reporter::new: called");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to outbound events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        debug!("Reporter::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Fire-and-forget emit; no subscribers is fine
    pub fn emit(&self, event: KernelEvent) {
        debug!(event_type = event.event_type(), "Reporter::emit");
        let _ = self.tx.send(event);
    }

    // === Stage outcomes ===

    pub fn initialized(&self) {
        info!("Kernel initialized");
        self.emit(KernelEvent::KernelInitialized);
    }

    pub fn parameters_parsed(&self, extracted: &ExtractedParameters) {
        debug!(
            count = extracted.default_parameters.len(),
            "Reporter::parameters_parsed: called"
        );
        self.emit(KernelEvent::ParametersParsed {
            default_parameters: extracted.default_parameters.clone(),
            json_schema: extracted.json_schema.clone(),
        });
    }

    pub fn geometry_computed(&self, engine: EngineKind, geometries: Vec<Geometry>) {
        debug!(%engine, count = geometries.len(), "Reporter::geometry_computed: called");
        self.emit(KernelEvent::GeometryComputed { engine, geometries });
    }

    pub fn geometry_exported(&self, blob: ExportedBlob, format: ExportFormat) {
        debug!(%format, bytes = blob.data.len(), "Reporter::geometry_exported: called");
        self.emit(KernelEvent::GeometryExported { blob, format });
    }

    /// Report a failed stage
    ///
    /// Export failures go out as `GeometryExportFailed`; everything else as `KernelError`.
    pub fn failure(&self, stage: Stage, error: &KernelError) {
        warn!(%stage, error = %error, "Stage failed");
        let error = ReportedError::new(stage, error);
        match stage {
            Stage::Export => self.emit(KernelEvent::GeometryExportFailed { error }),
            _ => self.emit(KernelEvent::KernelError { error }),
        }
    }

    // === Log relay ===

    /// Relay a log message to the coordinator
    pub fn log(&self, level: LogLevel, message: impl Into<String>, origin: Option<EngineKind>, data: Option<Value>) {
        self.emit(KernelEvent::KernelLog {
            level,
            message: message.into(),
            origin,
            data,
            timestamp: Utc::now(),
        });
    }

    /// Create the logging callback handed to an engine at initialization
    pub fn engine_logger(&self, kind: EngineKind) -> EngineLogger {
        debug!(%kind, "Reporter::engine_logger: called");
        EngineLogger {
            reporter: self.clone(),
            kind,
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Logging callback bound to one engine
///
/// Cheap to clone; every message is tagged with the engine's identity and relayed
/// without waiting on any consumer.
#[derive(Clone)]
pub struct EngineLogger {
    reporter: Reporter,
    kind: EngineKind,
}

impl EngineLogger {
    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn log(&self, level: LogLevel, message: &str, data: Option<Value>) {
        match level {
            LogLevel::Debug => debug!(engine = %self.kind, "{}", message),
            LogLevel::Info => info!(engine = %self.kind, "{}", message),
            LogLevel::Warn => warn!(engine = %self.kind, "{}", message),
            LogLevel::Error => tracing::error!(engine = %self.kind, "{}", message),
        }
        self.reporter.log(level, message, Some(self.kind), data);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message, None);
    }
}

impl std::fmt::Debug for EngineLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLogger").field("kind", &self.kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Parameters;
    use crate::engine::EngineError;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_reporter_subscribe() {
        let reporter = Reporter::new(16);
        assert_eq!(reporter.subscriber_count(), 0);
        let _rx = reporter.subscribe();
        assert_eq!(reporter.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let reporter = Reporter::new(16);
        // Must not panic
        reporter.initialized();
        reporter.log(LogLevel::Info, "hello", None, None);
    }

    #[tokio::test]
    async fn test_failure_routes_by_stage() {
        let reporter = Reporter::new(16);
        let mut rx = reporter.subscribe();

        reporter.failure(Stage::Export, &KernelError::no_geometry(None));
        reporter.failure(
            Stage::ExtractParameters,
            &KernelError::ParameterExtraction {
                kind: EngineKind::Openscad,
                source: EngineError::failed("bad"),
            },
        );

        match rx.recv().await.unwrap() {
            KernelEvent::GeometryExportFailed { error } => assert_eq!(error.stage, Stage::Export),
            other => panic!("Expected GeometryExportFailed, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            KernelEvent::KernelError { error } => assert_eq!(error.engine, Some(EngineKind::Openscad)),
            other => panic!("Expected KernelError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_engine_logger_tags_origin() {
        let reporter = Reporter::new(16);
        let mut rx = reporter.subscribe();
        let logger = reporter.engine_logger(EngineKind::Cadquery);

        logger.warn("deprecated call");

        match rx.recv().await.unwrap() {
            KernelEvent::KernelLog {
                level, message, origin, ..
            } => {
                assert_eq!(level, LogLevel::Warn);
                assert_eq!(message, "deprecated call");
                assert_eq!(origin, Some(EngineKind::Cadquery));
            }
            other => panic!("Expected KernelLog, got {:?}", other),
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_parameters_parsed_event() {
        let reporter = Reporter::new(16);
        let mut rx = reporter.subscribe();

        reporter.parameters_parsed(&ExtractedParameters::empty());

        match rx.recv().await.unwrap() {
            KernelEvent::ParametersParsed {
                default_parameters, ..
            } => assert_eq!(default_parameters, Parameters::new()),
            other => panic!("Expected ParametersParsed, got {:?}", other),
        }
    }
}
