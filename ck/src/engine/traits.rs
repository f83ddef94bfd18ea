//! Engine trait definition

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::error::EngineError;
use crate::channel::FileChannel;
use crate::domain::{ExportFormat, ExportedBlob, ExtractedParameters, Geometry, Parameters, SourceFile};
use crate::events::EngineLogger;

/// Result of an engine operation
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-specific options (binary paths, API keys, extra arguments)
pub type EngineOptions = Map<String, Value>;

/// Everything an engine receives at initialization
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Logging callback; messages are relayed to the coordinator
    pub logger: EngineLogger,

    /// Dedicated channel to the file-access service
    pub files: FileChannel,

    pub options: EngineOptions,
}

impl EngineContext {
    /// String option by key
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// List-of-strings option by key; missing or mistyped entries yield nothing
    pub fn option_strings(&self, key: &str) -> Vec<String> {
        self.options
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

/// The contract every CAD engine implements
///
/// Engines never run on the controller's task: each one is owned by its own
/// actor and reached through an [`EngineStub`](super::EngineStub), so `&mut self`
/// methods are never called concurrently.
#[async_trait]
pub trait Engine: Send {
    /// Prepare the engine; called once before any other method
    async fn initialize(&mut self, ctx: EngineContext) -> EngineResult<()>;

    /// Capability probe: can this engine process `file`?
    async fn can_handle(&mut self, file: &SourceFile) -> EngineResult<bool>;

    /// Default parameters and their JSON schema
    async fn extract_parameters(&mut self, file: &SourceFile) -> EngineResult<ExtractedParameters>;

    /// Evaluate `file` with fully merged parameters
    async fn compute_geometry(&mut self, file: &SourceFile, parameters: &Parameters) -> EngineResult<Vec<Geometry>>;

    /// Formats [`Engine::export_geometry`] accepts
    fn supported_export_formats(&self) -> Vec<ExportFormat>;

    /// Export the most recently computed geometry
    async fn export_geometry(&mut self, format: ExportFormat) -> EngineResult<Vec<ExportedBlob>>;

    /// Release resources before the actor is terminated
    async fn cleanup(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel_pair;
    use crate::domain::EngineKind;
    use crate::events::Reporter;
    use serde_json::json;

    fn context(options: Value) -> EngineContext {
        let (files, _port) = channel_pair(1);
        EngineContext {
            logger: Reporter::new(4).engine_logger(EngineKind::Openscad),
            files,
            options: options.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_option_str() {
        let ctx = context(json!({"binary": "/usr/bin/openscad", "threads": 4}));
        assert_eq!(ctx.option_str("binary"), Some("/usr/bin/openscad"));
        assert_eq!(ctx.option_str("threads"), None);
        assert_eq!(ctx.option_str("missing"), None);
    }

    #[test]
    fn test_option_strings() {
        let ctx = context(json!({"extra-args": ["--enable=manifold", 3, "--quiet"]}));
        assert_eq!(
            ctx.option_strings("extra-args"),
            vec!["--enable=manifold".to_string(), "--quiet".to_string()]
        );
        assert!(ctx.option_strings("missing").is_empty());
    }
}
