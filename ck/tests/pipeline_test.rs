//! Integration tests for the pipeline controller
//!
//! Drives a spawned [`Kernel`] through its public handle with in-memory fake
//! engines standing in for real CAD backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadkernel::channel::{ChannelManager, FileService};
use cadkernel::domain::{EngineKind, ExportFormat, ExportedBlob, ExtractedParameters, Geometry, Parameters, SourceFile};
use cadkernel::engine::{Engine, EngineContext, EngineError, EngineResult};
use cadkernel::error::ErrorKind;
use cadkernel::events::{KernelEvent, Stage};
use cadkernel::pipeline::{Kernel, KernelConfig, KernelHandle, PipelineState};
use cadkernel::registry::EngineRegistry;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Fake engine
// =============================================================================

#[derive(Default)]
struct Counters {
    probes: AtomicUsize,
    extracts: AtomicUsize,
    computes: AtomicUsize,
    exports: AtomicUsize,
    last_parameters: Mutex<Option<Parameters>>,
}

/// Accepts files by extension
///
/// Filenames steer its behavior: `slow*` computes for 300ms and exports its
/// geometry just as slowly, `panic*` panics during extraction, `bad*` reports
/// a syntax error on line 3.
struct FakeEngine {
    extensions: Vec<&'static str>,
    defaults: Parameters,
    formats: Vec<ExportFormat>,
    fail_init: bool,
    counters: Arc<Counters>,
    last: Option<Parameters>,
    last_file: Option<String>,
}

impl FakeEngine {
    fn new(extensions: Vec<&'static str>, counters: Arc<Counters>) -> Self {
        Self {
            extensions,
            defaults: json!({"width": 5, "height": 2}).as_object().cloned().unwrap(),
            formats: vec![ExportFormat::Stl, ExportFormat::StlAscii],
            fail_init: false,
            counters,
            last: None,
            last_file: None,
        }
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn initialize(&mut self, _ctx: EngineContext) -> EngineResult<()> {
        if self.fail_init {
            return Err(EngineError::failed("toolchain missing"));
        }
        Ok(())
    }

    async fn can_handle(&mut self, file: &SourceFile) -> EngineResult<bool> {
        self.counters.probes.fetch_add(1, Ordering::SeqCst);
        let extension = file.extension().unwrap_or_default();
        Ok(self.extensions.iter().any(|accepted| *accepted == extension))
    }

    async fn extract_parameters(&mut self, file: &SourceFile) -> EngineResult<ExtractedParameters> {
        self.counters.extracts.fetch_add(1, Ordering::SeqCst);
        if file.filename.starts_with("panic") {
            panic!("extractor blew up");
        }
        if file.filename.starts_with("bad") {
            return Err(EngineError::failed_at("syntax error", 3));
        }
        Ok(ExtractedParameters::from_defaults(self.defaults.clone()))
    }

    async fn compute_geometry(&mut self, file: &SourceFile, parameters: &Parameters) -> EngineResult<Vec<Geometry>> {
        if file.filename.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        self.counters.computes.fetch_add(1, Ordering::SeqCst);
        *self.counters.last_parameters.lock().unwrap() = Some(parameters.clone());
        self.last = Some(parameters.clone());
        self.last_file = Some(file.filename.clone());
        Ok(vec![Geometry {
            name: file.filename.clone(),
            format: ExportFormat::Stl,
            data: serde_json::to_vec(parameters).unwrap(),
        }])
    }

    fn supported_export_formats(&self) -> Vec<ExportFormat> {
        self.formats.clone()
    }

    async fn export_geometry(&mut self, format: ExportFormat) -> EngineResult<Vec<ExportedBlob>> {
        if self.last_file.as_deref().is_some_and(|name| name.starts_with("slow")) {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        self.counters.exports.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .last
            .iter()
            .map(|p| ExportedBlob {
                name: "model".to_string(),
                format,
                data: serde_json::to_vec(p).unwrap(),
            })
            .collect())
    }
}

struct Fixture {
    handle: KernelHandle,
    events: broadcast::Receiver<KernelEvent>,
    declarative: Arc<Counters>,
    script: Arc<Counters>,
    _temp: TempDir,
}

/// Openscad accepts `.decl` and `.any`; Cadquery accepts `.script` and `.any`
fn spawn_kernel(config: KernelConfig, fail_script_init: bool) -> Fixture {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let declarative = Arc::new(Counters::default());
    let script = Arc::new(Counters::default());

    let decl_counters = declarative.clone();
    let script_counters = script.clone();
    let registry = EngineRegistry::new(ChannelManager::new(FileService::new(temp.path())))
        .register(EngineKind::Cadquery, Default::default(), move || {
            let mut engine = FakeEngine::new(vec!["script", "any"], script_counters.clone());
            engine.fail_init = fail_script_init;
            Box::new(engine)
        })
        .register(EngineKind::Openscad, Default::default(), move || {
            Box::new(FakeEngine::new(vec!["decl", "any"], decl_counters.clone()))
        });

    let (handle, events) = Kernel::spawn(registry, &config);
    Fixture {
        handle,
        events,
        declarative,
        script,
        _temp: temp,
    }
}

async fn initialized(config: KernelConfig) -> Fixture {
    let mut fixture = spawn_kernel(config, false);
    fixture.handle.initialize().await.unwrap();
    let event = next_terminal_or_init(&mut fixture.events).await;
    assert!(matches!(event, KernelEvent::KernelInitialized), "got {:?}", event);
    fixture
}

async fn next_event(events: &mut broadcast::Receiver<KernelEvent>) -> KernelEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("Timed out waiting for event")
        .expect("Event channel closed")
}

async fn next_terminal_or_init(events: &mut broadcast::Receiver<KernelEvent>) -> KernelEvent {
    loop {
        let event = next_event(events).await;
        if event.is_terminal() || matches!(event, KernelEvent::KernelInitialized) {
            return event;
        }
    }
}

async fn next_terminal(events: &mut broadcast::Receiver<KernelEvent>) -> KernelEvent {
    loop {
        let event = next_event(events).await;
        if event.is_terminal() {
            return event;
        }
    }
}

/// Abandoned passes must never report once the newest one has
async fn assert_no_late_terminal(events: &mut broadcast::Receiver<KernelEvent>) {
    let late = tokio::time::timeout(Duration::from_millis(600), next_terminal(events)).await;
    assert!(late.is_err(), "superseded pass reported: {:?}", late);
}

fn params(value: Value) -> Parameters {
    value.as_object().cloned().unwrap()
}

fn computed_engine(event: &KernelEvent) -> EngineKind {
    match event {
        KernelEvent::GeometryComputed { engine, .. } => *engine,
        other => panic!("Expected GeometryComputed, got {:?}", other),
    }
}

// =============================================================================
// Engine selection
// =============================================================================

#[tokio::test]
async fn test_priority_order_decides_between_acceptors() {
    let mut f = initialized(KernelConfig::default()).await;

    f.handle.compute(SourceFile::new("part.any", ""), Parameters::new()).await.unwrap();
    let event = next_terminal(&mut f.events).await;

    assert_eq!(computed_engine(&event), EngineKind::Openscad);
    assert_eq!(f.script.probes.load(Ordering::SeqCst), 0, "lower priority engine must not be probed");
}

#[tokio::test]
async fn test_capability_cache_skips_probing() {
    let mut f = initialized(KernelConfig::default()).await;

    for _ in 0..3 {
        f.handle.compute(SourceFile::new("part.script", ""), Parameters::new()).await.unwrap();
        assert_eq!(computed_engine(&next_terminal(&mut f.events).await), EngineKind::Cadquery);
    }

    // Declined once by openscad, accepted once by cadquery, then cached
    assert_eq!(f.declarative.probes.load(Ordering::SeqCst), 1);
    assert_eq!(f.script.probes.load(Ordering::SeqCst), 1);
    assert_eq!(f.script.computes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_no_engine_available() {
    let mut f = initialized(KernelConfig::default()).await;

    f.handle.compute(SourceFile::new("notes.txt", ""), Parameters::new()).await.unwrap();
    match next_terminal(&mut f.events).await {
        KernelEvent::KernelError { error } => {
            assert_eq!(error.stage, Stage::DetermineEngine);
            assert_eq!(error.kind, ErrorKind::NoEngineAvailable);
            assert!(error.message.contains("notes.txt"));
        }
        other => panic!("Expected KernelError, got {:?}", other),
    }
    f.handle.wait_for_state(PipelineState::Ready).await.unwrap();
}

// =============================================================================
// Compute pipeline
// =============================================================================

#[tokio::test]
async fn test_overrides_merge_over_defaults() {
    let mut f = initialized(KernelConfig::default()).await;

    f.handle
        .compute(SourceFile::new("bracket.decl", ""), params(json!({"width": 10})))
        .await
        .unwrap();

    match next_event(&mut f.events).await {
        KernelEvent::ParametersParsed {
            default_parameters,
            json_schema,
        } => {
            assert_eq!(Value::Object(default_parameters), json!({"width": 5, "height": 2}));
            assert_eq!(json_schema["type"], "object");
        }
        other => panic!("Expected ParametersParsed, got {:?}", other),
    }

    let event = next_terminal(&mut f.events).await;
    assert_eq!(computed_engine(&event), EngineKind::Openscad);
    let used = f.declarative.last_parameters.lock().unwrap().clone().unwrap();
    assert_eq!(Value::Object(used), json!({"width": 10, "height": 2}));
}

#[tokio::test]
async fn test_newer_request_supersedes_in_flight_pass() {
    let mut f = initialized(KernelConfig::default()).await;

    f.handle.compute(SourceFile::new("slow.decl", ""), Parameters::new()).await.unwrap();
    f.handle.compute(SourceFile::new("fast.decl", ""), Parameters::new()).await.unwrap();

    match next_terminal(&mut f.events).await {
        KernelEvent::GeometryComputed { geometries, .. } => {
            assert_eq!(geometries.len(), 1);
            assert_eq!(geometries[0].name, "fast.decl");
        }
        other => panic!("Expected GeometryComputed, got {:?}", other),
    }

    assert_no_late_terminal(&mut f.events).await;
    assert_eq!(f.handle.state(), PipelineState::Ready);
}

#[tokio::test]
async fn test_unexpected_extraction_failure_falls_back_to_empty_defaults() {
    let mut f = initialized(KernelConfig::default()).await;

    f.handle
        .compute(SourceFile::new("panic.decl", ""), params(json!({"width": 7})))
        .await
        .unwrap();

    let mut saw_warning = false;
    loop {
        match next_event(&mut f.events).await {
            KernelEvent::KernelLog { origin, .. } => saw_warning |= origin == Some(EngineKind::Openscad),
            KernelEvent::ParametersParsed { default_parameters, .. } => assert!(default_parameters.is_empty()),
            event @ KernelEvent::GeometryComputed { .. } => {
                assert_eq!(computed_engine(&event), EngineKind::Openscad);
                break;
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    assert!(saw_warning);
    let used = f.declarative.last_parameters.lock().unwrap().clone().unwrap();
    assert_eq!(Value::Object(used), json!({"width": 7}));
}

#[tokio::test]
async fn test_structured_extraction_failure_is_reported() {
    let mut f = initialized(KernelConfig::default()).await;

    f.handle.compute(SourceFile::new("bad.decl", ""), Parameters::new()).await.unwrap();
    match next_terminal(&mut f.events).await {
        KernelEvent::KernelError { error } => {
            assert_eq!(error.stage, Stage::ExtractParameters);
            assert_eq!(error.kind, ErrorKind::ParameterExtractionFailure);
            assert_eq!(error.engine, Some(EngineKind::Openscad));
            assert_eq!(error.line, Some(3));
        }
        other => panic!("Expected KernelError, got {:?}", other),
    }
    assert_eq!(f.declarative.computes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stage_timeout_fails_the_stage() {
    let config = KernelConfig {
        stage_timeout_ms: Some(50),
        ..KernelConfig::default()
    };
    let mut f = initialized(config).await;

    f.handle.compute(SourceFile::new("slow.decl", ""), Parameters::new()).await.unwrap();
    match next_terminal(&mut f.events).await {
        KernelEvent::KernelError { error } => {
            assert_eq!(error.stage, Stage::EvaluateGeometry);
            assert_eq!(error.kind, ErrorKind::GeometryEvaluationFailure);
            assert!(error.message.contains("timed out"));
        }
        other => panic!("Expected KernelError, got {:?}", other),
    }
}

// =============================================================================
// Export
// =============================================================================

#[tokio::test]
async fn test_export_after_compute() {
    let mut f = initialized(KernelConfig::default()).await;

    f.handle
        .compute(SourceFile::new("bracket.decl", ""), params(json!({"width": 10})))
        .await
        .unwrap();
    next_terminal(&mut f.events).await;

    f.handle.export(ExportFormat::Stl).await.unwrap();
    match next_terminal(&mut f.events).await {
        KernelEvent::GeometryExported { blob, format } => {
            assert_eq!(format, ExportFormat::Stl);
            assert_eq!(blob.file_name(), "model.stl");
            let data: Value = serde_json::from_slice(&blob.data).unwrap();
            assert_eq!(data, json!({"width": 10, "height": 2}));
        }
        other => panic!("Expected GeometryExported, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unsupported_export_format_never_reaches_engine() {
    let mut f = initialized(KernelConfig::default()).await;

    f.handle.compute(SourceFile::new("bracket.decl", ""), Parameters::new()).await.unwrap();
    next_terminal(&mut f.events).await;

    f.handle.export(ExportFormat::Step).await.unwrap();
    match next_terminal(&mut f.events).await {
        KernelEvent::GeometryExportFailed { error } => {
            assert_eq!(error.kind, ErrorKind::UnsupportedExportFormat);
            assert!(error.message.contains("step"));
        }
        other => panic!("Expected GeometryExportFailed, got {:?}", other),
    }
    assert_eq!(f.declarative.exports.load(Ordering::SeqCst), 0);
    f.handle.wait_for_state(PipelineState::Ready).await.unwrap();
}

#[tokio::test]
async fn test_export_interrupts_in_flight_compute() {
    let mut f = initialized(KernelConfig::default()).await;

    f.handle.compute(SourceFile::new("bracket.decl", ""), Parameters::new()).await.unwrap();
    next_terminal(&mut f.events).await;

    f.handle
        .compute(SourceFile::new("slow.decl", ""), params(json!({"width": 99})))
        .await
        .unwrap();
    f.handle.wait_for_state(PipelineState::EvaluatingGeometry).await.unwrap();
    f.handle.export(ExportFormat::Stl).await.unwrap();

    match next_terminal(&mut f.events).await {
        KernelEvent::GeometryExported { blob, format } => {
            assert_eq!(format, ExportFormat::Stl);
            // The engine finished the abandoned compute before serving the export
            let data: Value = serde_json::from_slice(&blob.data).unwrap();
            assert_eq!(data, json!({"width": 99, "height": 2}));
        }
        other => panic!("Expected GeometryExported, got {:?}", other),
    }
    assert_no_late_terminal(&mut f.events).await;
    assert_eq!(f.declarative.computes.load(Ordering::SeqCst), 2);
    assert_eq!(f.handle.state(), PipelineState::Ready);
}

#[tokio::test]
async fn test_compute_supersedes_in_flight_export() {
    let mut f = initialized(KernelConfig::default()).await;

    f.handle.compute(SourceFile::new("slow.decl", ""), Parameters::new()).await.unwrap();
    next_terminal(&mut f.events).await;

    f.handle.export(ExportFormat::Stl).await.unwrap();
    f.handle.compute(SourceFile::new("fast.decl", ""), Parameters::new()).await.unwrap();

    match next_terminal(&mut f.events).await {
        KernelEvent::GeometryComputed { geometries, .. } => {
            assert_eq!(geometries.len(), 1);
            assert_eq!(geometries[0].name, "fast.decl");
        }
        other => panic!("Expected GeometryComputed, got {:?}", other),
    }
    assert_no_late_terminal(&mut f.events).await;
    assert_eq!(f.handle.state(), PipelineState::Ready);
}

#[tokio::test]
async fn test_new_export_restarts_exporting() {
    let mut f = initialized(KernelConfig::default()).await;

    f.handle.compute(SourceFile::new("slow.decl", ""), Parameters::new()).await.unwrap();
    next_terminal(&mut f.events).await;

    f.handle.export(ExportFormat::Stl).await.unwrap();
    f.handle.wait_for_state(PipelineState::Exporting).await.unwrap();
    f.handle.export(ExportFormat::StlAscii).await.unwrap();

    match next_terminal(&mut f.events).await {
        KernelEvent::GeometryExported { blob, format } => {
            assert_eq!(format, ExportFormat::StlAscii);
            assert_eq!(blob.format, ExportFormat::StlAscii);
        }
        other => panic!("Expected GeometryExported, got {:?}", other),
    }
    assert_no_late_terminal(&mut f.events).await;
    assert_eq!(f.handle.state(), PipelineState::Ready);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_initialization_failure_keeps_other_engines() {
    let mut f = spawn_kernel(KernelConfig::default(), true);
    f.handle.initialize().await.unwrap();

    match next_terminal(&mut f.events).await {
        KernelEvent::KernelError { error } => {
            assert_eq!(error.stage, Stage::Initialize);
            assert_eq!(error.kind, ErrorKind::EngineInitializationFailure);
            assert_eq!(error.engine, Some(EngineKind::Cadquery));
        }
        other => panic!("Expected KernelError, got {:?}", other),
    }
    f.handle.wait_for_state(PipelineState::Ready).await.unwrap();

    f.handle.compute(SourceFile::new("part.decl", ""), Parameters::new()).await.unwrap();
    assert_eq!(computed_engine(&next_terminal(&mut f.events).await), EngineKind::Openscad);

    f.handle.compute(SourceFile::new("part.script", ""), Parameters::new()).await.unwrap();
    match next_terminal(&mut f.events).await {
        KernelEvent::KernelError { error } => assert_eq!(error.kind, ErrorKind::NoEngineAvailable),
        other => panic!("Expected KernelError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_then_requests_fail() {
    let f = initialized(KernelConfig::default()).await;

    f.handle.shutdown().await.unwrap();
    assert_eq!(f.handle.state(), PipelineState::Uninitialized);
    assert!(f.handle.compute(SourceFile::new("a.decl", ""), Parameters::new()).await.is_err());
}
