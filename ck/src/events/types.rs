//! Outbound event types
//!
//! The vocabulary the orchestrator uses to talk to its coordinator:
//! - Lifecycle (initialized, errors)
//! - Pipeline results (parameters, geometry, exports)
//! - Engine log relay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{EngineKind, ExportFormat, ExportedBlob, Geometry, Parameters};
use crate::error::{ErrorKind, KernelError};

/// Pipeline stage an outcome originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Initialize,
    DetermineEngine,
    ExtractParameters,
    EvaluateGeometry,
    Export,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Initialize => "initialize",
            Stage::DetermineEngine => "determine-engine",
            Stage::ExtractParameters => "extract-parameters",
            Stage::EvaluateGeometry => "evaluate-geometry",
            Stage::Export => "export",
        };
        write!(f, "{}", name)
    }
}

/// Severity of a relayed log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A [`KernelError`] normalized for the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl ReportedError {
    pub fn new(stage: Stage, error: &KernelError) -> Self {
        Self {
            stage,
            kind: error.kind(),
            message: error.to_string(),
            engine: error.engine(),
            line: error.line(),
        }
    }
}

impl std::fmt::Display for ReportedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "[{}] {} (line {})", self.stage, self.message, line),
            None => write!(f, "[{}] {}", self.stage, self.message),
        }
    }
}

/// Events sent from the orchestrator to its coordinator
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KernelEvent {
    /// Every engine acknowledged initialization
    KernelInitialized,

    /// A stage failed; the pipeline is back in `Ready`
    KernelError { error: ReportedError },

    /// Defaults and schema of the current file, sent before geometry is ready
    ParametersParsed {
        #[serde(rename = "default-parameters")]
        default_parameters: Parameters,
        #[serde(rename = "json-schema")]
        json_schema: Value,
    },

    /// The current pass produced geometry
    GeometryComputed {
        engine: EngineKind,
        geometries: Vec<Geometry>,
    },

    /// An export finished
    GeometryExported { blob: ExportedBlob, format: ExportFormat },

    /// An export failed
    GeometryExportFailed { error: ReportedError },

    /// Log line relayed out-of-band, not tied to any request
    KernelLog {
        level: LogLevel,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        origin: Option<EngineKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        timestamp: DateTime<Utc>,
    },
}

impl KernelEvent {
    /// Event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            KernelEvent::KernelInitialized => "KernelInitialized",
            KernelEvent::KernelError { .. } => "KernelError",
            KernelEvent::ParametersParsed { .. } => "ParametersParsed",
            KernelEvent::GeometryComputed { .. } => "GeometryComputed",
            KernelEvent::GeometryExported { .. } => "GeometryExported",
            KernelEvent::GeometryExportFailed { .. } => "GeometryExportFailed",
            KernelEvent::KernelLog { .. } => "KernelLog",
        }
    }

    /// Check if this event ends a pipeline pass (or an export pass)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            KernelEvent::KernelError { .. }
                | KernelEvent::GeometryComputed { .. }
                | KernelEvent::GeometryExported { .. }
                | KernelEvent::GeometryExportFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;

    #[test]
    fn test_reported_error_from_kernel_error() {
        let err = KernelError::GeometryEvaluation {
            kind: EngineKind::Openscad,
            source: EngineError::failed_at("Parser error", 3),
        };
        let reported = ReportedError::new(Stage::EvaluateGeometry, &err);

        assert_eq!(reported.kind, ErrorKind::GeometryEvaluationFailure);
        assert_eq!(reported.engine, Some(EngineKind::Openscad));
        assert_eq!(reported.line, Some(3));
        assert!(reported.to_string().starts_with("[evaluate-geometry]"));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = KernelEvent::KernelError {
            error: ReportedError::new(
                Stage::DetermineEngine,
                &KernelError::NoEngineAvailable {
                    filename: "a.txt".to_string(),
                },
            ),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "KernelError");
        assert_eq!(json["error"]["stage"], "determine-engine");
        assert_eq!(json["error"]["kind"], "no-engine-available");
        assert!(json["error"].get("engine").is_none());
    }

    #[test]
    fn test_terminal_events() {
        assert!(!KernelEvent::KernelInitialized.is_terminal());
        assert!(
            !KernelEvent::ParametersParsed {
                default_parameters: Parameters::new(),
                json_schema: serde_json::json!({}),
            }
            .is_terminal()
        );
        assert!(
            KernelEvent::GeometryComputed {
                engine: EngineKind::Mesh,
                geometries: vec![],
            }
            .is_terminal()
        );
    }
}
