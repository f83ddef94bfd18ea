//! Kernel - the pipeline controller task
//!
//! One task, one active state, one request queue. Every stage issues exactly one
//! remote engine call from a spawned task; the task posts the result back onto
//! the controller's own queue tagged with the pass that started it. Starting a
//! new compute or export bumps the pass id, so results from abandoned passes
//! are recognized and dropped on arrival.

use std::future::Future;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::config::KernelConfig;
use super::handle::KernelHandle;
use super::messages::{KernelRequest, StageOutcome};
use super::state::PipelineState;
use crate::domain::{
    EngineKind, ExportFormat, ExportedBlob, ExtractedParameters, Geometry, Parameters, SourceFile, merge_parameters,
};
use crate::engine::EngineResult;
use crate::error::KernelError;
use crate::events::{KernelEvent, LogLevel, Reporter, Stage};
use crate::prober::{CapabilityProber, Determination};
use crate::registry::EngineRegistry;

/// What the current pass is working on
#[derive(Debug)]
enum ActivePass {
    Compute {
        file: SourceFile,
        overrides: Parameters,
        engine: Option<EngineKind>,
    },
    Export {
        format: ExportFormat,
        engine: EngineKind,
    },
}

/// The pipeline controller
pub struct Kernel {
    registry: EngineRegistry,
    prober: CapabilityProber,
    reporter: Reporter,
    rx: mpsc::Receiver<KernelRequest>,
    /// Weak so the controller stops once every handle is gone
    tx: mpsc::WeakSender<KernelRequest>,
    state: watch::Sender<PipelineState>,
    initialized: bool,
    pass: u64,
    active: Option<ActivePass>,
    selected: Option<EngineKind>,
}

impl Kernel {
    /// Create a controller and the first handle to it
    pub fn new(registry: EngineRegistry, config: &KernelConfig) -> (Self, KernelHandle) {
        debug!(?config, "Kernel::new: called");
        // tokio rejects zero-sized queues; `KernelConfig::validate` reports it first
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let (state, state_rx) = watch::channel(PipelineState::Uninitialized);
        let reporter = Reporter::new(config.event_capacity.max(1));
        let handle = KernelHandle::new(tx.clone(), state_rx, reporter.clone());

        let registry = match config.stage_timeout() {
            Some(timeout) => registry.with_call_timeout(Some(timeout)),
            None => registry,
        };

        let kernel = Self {
            registry,
            prober: CapabilityProber::default(),
            reporter,
            rx,
            tx: tx.downgrade(),
            state,
            initialized: false,
            pass: 0,
            active: None,
            selected: None,
        };
        (kernel, handle)
    }

    /// Spawn the controller task
    ///
    /// The returned receiver is subscribed before the task starts, so it sees
    /// every event.
    pub fn spawn(registry: EngineRegistry, config: &KernelConfig) -> (KernelHandle, broadcast::Receiver<KernelEvent>) {
        let (kernel, handle) = Self::new(registry, config);
        let events = handle.subscribe();
        tokio::spawn(kernel.run());
        (handle, events)
    }

    /// Run the controller until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!("Kernel controller started");
        let mut shutdown_reply = None;

        while let Some(request) = self.rx.recv().await {
            debug!(request = request.name(), state = %self.current_state(), pass = self.pass, "Kernel: received request");
            match request {
                KernelRequest::Initialize => self.initialize().await,
                KernelRequest::Compute { file, overrides } => self.start_compute(file, overrides),
                KernelRequest::Export { format } => self.start_export(format),
                KernelRequest::Shutdown { reply } => {
                    shutdown_reply = Some(reply);
                    break;
                }
                KernelRequest::StageCompleted { pass, outcome } => {
                    if pass != self.pass {
                        debug!(pass, current = self.pass, outcome = outcome.name(), "Kernel: discarding superseded result");
                        continue;
                    }
                    self.complete_stage(outcome);
                }
            }
        }

        self.rx.close();
        self.pass += 1;
        self.active = None;
        self.registry.destroy_all().await;
        self.set_state(PipelineState::Uninitialized);
        info!("Kernel controller stopped");

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn current_state(&self) -> PipelineState {
        *self.state.borrow()
    }

    fn set_state(&self, next: PipelineState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Kernel: state transition");
        }
    }

    /// Return to Ready, then report a stage failure
    ///
    /// State settles before any terminal event goes out, so a subscriber that
    /// sees the event also sees Ready.
    fn fail(&mut self, stage: Stage, error: KernelError) {
        self.active = None;
        if self.initialized {
            self.set_state(PipelineState::Ready);
        }
        self.reporter.failure(stage, &error);
    }

    fn finish(&mut self) {
        self.active = None;
        self.set_state(PipelineState::Ready);
    }

    /// Run `call` off the controller task and post its outcome back for this pass
    fn dispatch(&self, call: impl Future<Output = StageOutcome> + Send + 'static) {
        let Some(tx) = self.tx.upgrade() else {
            debug!("Kernel::dispatch: no handles left, dropping stage");
            return;
        };
        let pass = self.pass;
        tokio::spawn(async move {
            let outcome = call.await;
            let _ = tx.send(KernelRequest::StageCompleted { pass, outcome }).await;
        });
    }

    // === Initialize ===

    async fn initialize(&mut self) {
        debug!("Kernel::initialize: called");
        self.pass += 1;
        self.active = None;
        self.selected = None;
        self.set_state(PipelineState::Initializing);

        let result = self.registry.create_all(&self.reporter).await;
        self.initialized = true;
        self.set_state(PipelineState::Ready);

        match result {
            Ok(()) => self.reporter.initialized(),
            Err(e) => self.reporter.failure(Stage::Initialize, &e),
        }
    }

    // === Compute ===

    fn start_compute(&mut self, file: SourceFile, overrides: Parameters) {
        debug!(filename = %file.filename, overrides = overrides.len(), "Kernel::start_compute: called");
        self.pass += 1;
        if self.active.take().is_some() {
            info!(pass = self.pass, "Superseding in-flight pass");
        }

        if !self.initialized {
            self.fail(Stage::DetermineEngine, KernelError::NotInitialized);
            return;
        }

        self.set_state(PipelineState::DeterminingEngine);

        let candidates = self.registry.stubs_by_priority();
        match self.prober.determine_engine(&file, candidates, &self.reporter) {
            Determination::Cached(kind) => {
                self.selected = Some(kind);
                self.active = Some(ActivePass::Compute {
                    file,
                    overrides,
                    engine: Some(kind),
                });
                self.begin_extraction();
            }
            Determination::Pending(probe) => {
                self.active = Some(ActivePass::Compute {
                    file,
                    overrides,
                    engine: None,
                });
                self.dispatch(async move { StageOutcome::EngineDetermined(probe.await) });
            }
        }
    }

    fn on_engine_determined(&mut self, result: Result<EngineKind, KernelError>) {
        let Some(ActivePass::Compute { file, engine, .. }) = self.active.as_mut() else {
            warn!("Engine determination arrived without a compute pass");
            return;
        };

        match result {
            Ok(kind) => {
                info!(filename = %file.filename, %kind, "Engine selected");
                self.prober.record(&file.filename, kind);
                *engine = Some(kind);
                self.selected = Some(kind);
                self.begin_extraction();
            }
            Err(e) => {
                self.selected = None;
                self.fail(Stage::DetermineEngine, e);
            }
        }
    }

    fn begin_extraction(&mut self) {
        let Some(ActivePass::Compute {
            file,
            engine: Some(kind),
            ..
        }) = &self.active
        else {
            return;
        };
        let (file, kind) = (file.clone(), *kind);
        debug!(filename = %file.filename, %kind, "Kernel::begin_extraction: called");

        let Some(stub) = self.registry.stub(kind) else {
            self.fail(Stage::ExtractParameters, KernelError::EngineNotInitialized { kind });
            return;
        };

        self.set_state(PipelineState::ExtractingParameters);
        self.dispatch(async move { StageOutcome::ParametersExtracted(stub.extract_parameters(&file).await) });
    }

    fn on_parameters_extracted(&mut self, result: EngineResult<ExtractedParameters>) {
        let Some(ActivePass::Compute {
            file,
            overrides,
            engine: Some(kind),
        }) = &self.active
        else {
            warn!("Parameters arrived without a compute pass");
            return;
        };
        let (file, overrides, kind) = (file.clone(), overrides.clone(), *kind);

        let extracted = match result {
            Ok(extracted) => extracted,
            Err(e) if e.is_unexpected() => {
                warn!(%kind, error = %e, "Parameter extraction failed unexpectedly; continuing without defaults");
                self.reporter.log(
                    LogLevel::Warn,
                    format!("parameter extraction failed unexpectedly, continuing without defaults: {e}"),
                    Some(kind),
                    None,
                );
                ExtractedParameters::empty()
            }
            Err(source) => {
                self.fail(Stage::ExtractParameters, KernelError::ParameterExtraction { kind, source });
                return;
            }
        };
        self.reporter.parameters_parsed(&extracted);

        let merged = merge_parameters(&extracted.default_parameters, &overrides);
        let Some(stub) = self.registry.stub(kind) else {
            self.fail(Stage::EvaluateGeometry, KernelError::EngineNotInitialized { kind });
            return;
        };

        self.set_state(PipelineState::EvaluatingGeometry);
        self.dispatch(async move { StageOutcome::GeometryEvaluated(stub.compute_geometry(&file, &merged).await) });
    }

    fn on_geometry_evaluated(&mut self, result: EngineResult<Vec<Geometry>>) {
        let Some(ActivePass::Compute {
            engine: Some(kind), ..
        }) = &self.active
        else {
            warn!("Geometry arrived without a compute pass");
            return;
        };
        let kind = *kind;

        match result {
            Ok(geometries) => {
                info!(%kind, count = geometries.len(), "Geometry computed");
                self.finish();
                self.reporter.geometry_computed(kind, geometries);
            }
            Err(source) => self.fail(Stage::EvaluateGeometry, KernelError::GeometryEvaluation { kind, source }),
        }
    }

    // === Export ===

    fn start_export(&mut self, format: ExportFormat) {
        debug!(%format, selected = ?self.selected, "Kernel::start_export: called");
        self.pass += 1;
        if self.active.take().is_some() {
            info!(pass = self.pass, "Superseding in-flight pass");
        }

        if !self.initialized {
            self.fail(Stage::Export, KernelError::NotInitialized);
            return;
        }
        let Some(kind) = self.selected else {
            self.fail(Stage::Export, KernelError::no_geometry(None));
            return;
        };
        let Some(stub) = self.registry.stub(kind) else {
            self.fail(Stage::Export, KernelError::EngineNotInitialized { kind });
            return;
        };

        self.active = Some(ActivePass::Export { format, engine: kind });
        self.set_state(PipelineState::Exporting);
        self.dispatch(async move { StageOutcome::FormatsListed(stub.supported_export_formats().await) });
    }

    fn active_export(&self) -> Option<(ExportFormat, EngineKind)> {
        match &self.active {
            Some(ActivePass::Export { format, engine }) => Some((*format, *engine)),
            _ => None,
        }
    }

    fn on_formats_listed(&mut self, result: EngineResult<Vec<ExportFormat>>) {
        let Some((format, kind)) = self.active_export() else {
            warn!("Export formats arrived without an export pass");
            return;
        };

        let supported = match result {
            Ok(supported) => supported,
            Err(e) => {
                self.fail(
                    Stage::Export,
                    KernelError::Export {
                        kind: Some(kind),
                        message: e.to_string(),
                    },
                );
                return;
            }
        };

        if !supported.contains(&format) {
            self.fail(Stage::Export, KernelError::UnsupportedExportFormat { kind, format, supported });
            return;
        }

        let Some(stub) = self.registry.stub(kind) else {
            self.fail(Stage::Export, KernelError::EngineNotInitialized { kind });
            return;
        };
        self.dispatch(async move { StageOutcome::Exported(stub.export_geometry(format).await) });
    }

    fn on_exported(&mut self, result: EngineResult<Vec<ExportedBlob>>) {
        let Some((format, kind)) = self.active_export() else {
            warn!("Export result arrived without an export pass");
            return;
        };

        match result.map(|blobs| blobs.into_iter().next()) {
            Ok(Some(blob)) => {
                info!(%kind, %format, bytes = blob.data.len(), "Geometry exported");
                self.finish();
                self.reporter.geometry_exported(blob, format);
            }
            Ok(None) => self.fail(Stage::Export, KernelError::no_geometry(Some(kind))),
            Err(e) => self.fail(
                Stage::Export,
                KernelError::Export {
                    kind: Some(kind),
                    message: e.to_string(),
                },
            ),
        }
    }

    fn complete_stage(&mut self, outcome: StageOutcome) {
        debug!(outcome = outcome.name(), pass = self.pass, "Kernel::complete_stage: called");
        match outcome {
            StageOutcome::EngineDetermined(result) => self.on_engine_determined(result),
            StageOutcome::ParametersExtracted(result) => self.on_parameters_extracted(result),
            StageOutcome::GeometryEvaluated(result) => self.on_geometry_evaluated(result),
            StageOutcome::FormatsListed(result) => self.on_formats_listed(result),
            StageOutcome::Exported(result) => self.on_exported(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelManager, FileService};
    use crate::error::ErrorKind;

    fn empty_registry() -> (EngineRegistry, tempfile::TempDir) {
        let temp = tempfile::TempDir::new().unwrap();
        let registry = EngineRegistry::new(ChannelManager::new(FileService::new(temp.path())));
        (registry, temp)
    }

    #[tokio::test]
    async fn test_compute_before_initialize() {
        let (registry, _temp) = empty_registry();
        let (handle, mut events) = Kernel::spawn(registry, &KernelConfig::default());

        handle.compute(SourceFile::new("a.scad", ""), Parameters::new()).await.unwrap();

        match events.recv().await.unwrap() {
            KernelEvent::KernelError { error } => {
                assert_eq!(error.stage, Stage::DetermineEngine);
                assert_eq!(error.kind, ErrorKind::EngineNotInitialized);
            }
            other => panic!("Expected KernelError, got {:?}", other),
        }
        assert_eq!(handle.state(), PipelineState::Uninitialized);
    }

    #[tokio::test]
    async fn test_initialize_with_no_engines_then_no_engine_available() {
        let (registry, _temp) = empty_registry();
        let (handle, mut events) = Kernel::spawn(registry, &KernelConfig::default());

        handle.initialize().await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), KernelEvent::KernelInitialized));

        handle.compute(SourceFile::new("part.xyz", ""), Parameters::new()).await.unwrap();
        match events.recv().await.unwrap() {
            KernelEvent::KernelError { error } => {
                assert_eq!(error.kind, ErrorKind::NoEngineAvailable);
                assert!(error.message.contains("part.xyz"));
            }
            other => panic!("Expected KernelError, got {:?}", other),
        }
        handle.wait_for_state(PipelineState::Ready).await.unwrap();
    }

    #[tokio::test]
    async fn test_export_without_selection() {
        let (registry, _temp) = empty_registry();
        let (handle, mut events) = Kernel::spawn(registry, &KernelConfig::default());
        handle.initialize().await.unwrap();
        let _ = events.recv().await;

        handle.export(ExportFormat::Stl).await.unwrap();
        match events.recv().await.unwrap() {
            KernelEvent::GeometryExportFailed { error } => {
                assert_eq!(error.kind, ErrorKind::ExportFailure);
                assert!(error.message.contains("no geometry to export"));
            }
            other => panic!("Expected GeometryExportFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_controller() {
        let (registry, _temp) = empty_registry();
        let (handle, _events) = Kernel::spawn(registry, &KernelConfig::default());
        handle.initialize().await.unwrap();

        handle.shutdown().await.unwrap();
        assert_eq!(handle.state(), PipelineState::Uninitialized);
        assert!(matches!(handle.initialize().await, Err(KernelError::ControllerClosed)));
    }
}
