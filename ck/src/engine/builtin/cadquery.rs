//! CadQuery engine - general-purpose Python scripts
//!
//! Scripts are run by a small embedded Python harness in a scratch directory
//! holding the script and its sibling modules. The harness reports failures
//! as one JSON object on stderr and exits with [`HARNESS_FAILURE`]; any other
//! non-zero exit is an unexpected crash of the interpreter.

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use super::staging::{sandboxed, write_staged};
use crate::domain::{
    ExportFormat, ExportedBlob, ExtractedParameters, Geometry, Parameters, SourceFile, schema_from_defaults,
};
use crate::engine::{Engine, EngineContext, EngineError, EngineResult};

/// Interpreter used when no `python` option is configured
pub const DEFAULT_PYTHON: &str = "python3";

/// Exit code of a reported script failure
pub const HARNESS_FAILURE: i32 = 3;

/// Formats the harness can write
pub const CADQUERY_FORMATS: [ExportFormat; 2] = [ExportFormat::Stl, ExportFormat::Step];

const HARNESS: &str = r#"
import importlib.util, json, os, sys, traceback

def fail(message, line=None):
    sys.stderr.write(json.dumps({"message": message, "line": line}))
    sys.exit(3)

def load(path):
    sys.path.insert(0, os.path.dirname(os.path.abspath(path)))
    spec = importlib.util.spec_from_file_location("__cadkernel_model__", path)
    module = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(module)
    return module

def script_line(path, exc):
    if isinstance(exc, SyntaxError):
        return exc.lineno
    line = None
    for frame in traceback.extract_tb(exc.__traceback__):
        if os.path.abspath(frame.filename) == os.path.abspath(path):
            line = frame.lineno
    return line

mode, path = sys.argv[1], sys.argv[2]
try:
    module = load(path)
    if mode == "params":
        params = getattr(module, "DEFAULT_PARAMS", None) or getattr(module, "PARAMETERS", None) or {}
        if not isinstance(params, dict):
            fail("DEFAULT_PARAMS must be a dict")
        json.dump(params, sys.stdout)
    else:
        with open(sys.argv[3]) as f:
            params = json.load(f)
        if hasattr(module, "main"):
            result = module.main(params)
        else:
            result = getattr(module, "result", None)
        if result is None:
            fail("script defines neither main(params) nor result")
        import cadquery
        cadquery.exporters.export(result, sys.argv[5], exportType=sys.argv[4])
except SystemExit:
    raise
except BaseException as exc:
    fail("%s: %s" % (type(exc).__name__, exc), script_line(path, exc))
"#;

/// Failure report written by the harness
#[derive(Debug, Deserialize)]
struct HarnessFailure {
    message: String,
    line: Option<u32>,
}

/// Map a finished harness run to a result
fn harness_result(status: Option<i32>, stdout: Vec<u8>, stderr: &[u8]) -> EngineResult<Vec<u8>> {
    match status {
        Some(0) => Ok(stdout),
        Some(HARNESS_FAILURE) => match serde_json::from_slice::<HarnessFailure>(stderr) {
            Ok(HarnessFailure {
                message,
                line: Some(line),
            }) => Err(EngineError::failed_at(message, line)),
            Ok(HarnessFailure { message, line: None }) => Err(EngineError::failed(message)),
            Err(_) => Err(EngineError::Internal(String::from_utf8_lossy(stderr).trim().to_string())),
        },
        code => Err(EngineError::Internal(format!(
            "python exited with {:?}: {}",
            code,
            String::from_utf8_lossy(stderr).trim()
        ))),
    }
}

fn export_type(format: ExportFormat) -> Option<&'static str> {
    match format {
        ExportFormat::Stl => Some("STL"),
        ExportFormat::Step => Some("STEP"),
        _ => None,
    }
}

#[derive(Default)]
pub struct CadqueryEngine {
    ctx: Option<EngineContext>,
    python: String,
    last: Option<(SourceFile, Parameters)>,
}

impl CadqueryEngine {
    pub fn new() -> Self {
        Self {
            python: DEFAULT_PYTHON.to_string(),
            ..Default::default()
        }
    }

    fn ctx(&self) -> EngineResult<&EngineContext> {
        self.ctx
            .as_ref()
            .ok_or_else(|| EngineError::Internal("cadquery engine used before initialize".to_string()))
    }

    /// Lay out the script, its sibling modules and the harness in `dir`
    async fn stage(&self, file: &SourceFile, dir: &Path) -> EngineResult<()> {
        debug!(filename = %file.filename, ?dir, "CadqueryEngine::stage: called");
        let ctx = self.ctx()?;
        write_staged(dir, Path::new("harness.py"), HARNESS.as_bytes()).await?;
        write_staged(dir, Path::new("model.py"), &file.content).await?;

        // Sibling modules the script may import
        let directory = match file.directory() {
            d if d.is_empty() => ".".to_string(),
            d => d,
        };
        let entries = match ctx.files.list(&directory).await {
            Ok(entries) => entries,
            Err(e) => {
                ctx.logger.debug(&format!("sibling modules not listed: {e}"));
                return Ok(());
            }
        };

        for entry in entries {
            if !entry.ends_with(".py") || entry == file.basename() || entry == "harness.py" || entry == "model.py" {
                continue;
            }
            let path = sandboxed(&format!("{directory}/{entry}"));
            match ctx.files.read(&path.to_string_lossy()).await {
                Ok(bytes) => write_staged(dir, Path::new(&entry), &bytes).await?,
                Err(e) => ctx.logger.warn(&format!("module {entry} not staged: {e}")),
            }
        }
        Ok(())
    }

    async fn run_harness(&self, dir: &Path, args: &[&str]) -> EngineResult<Vec<u8>> {
        debug!(?args, "CadqueryEngine::run_harness: called");
        let output = Command::new(&self.python)
            .arg("harness.py")
            .args(args)
            .current_dir(dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::Internal(format!("failed to run {}: {e}", self.python)))?;
        harness_result(output.status.code(), output.stdout, &output.stderr)
    }

    async fn build(&self, file: &SourceFile, parameters: &Parameters, format: ExportFormat) -> EngineResult<Vec<u8>> {
        debug!(filename = %file.filename, %format, "CadqueryEngine::build: called");
        let kind = export_type(format).ok_or_else(|| EngineError::failed(format!("cadquery cannot write {format}")))?;

        let scratch = TempDir::new().map_err(|e| EngineError::Internal(format!("scratch dir: {e}")))?;
        self.stage(file, scratch.path()).await?;

        let params = serde_json::to_vec(parameters).map_err(|e| EngineError::Internal(e.to_string()))?;
        write_staged(scratch.path(), Path::new("params.json"), &params).await?;

        let output = format!("out.{}", format.extension());
        self.run_harness(scratch.path(), &["build", "model.py", "params.json", kind, &output])
            .await?;

        match tokio::fs::read(scratch.path().join(&output)).await {
            Ok(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(EngineError::failed("script produced no geometry")),
        }
    }
}

#[async_trait]
impl Engine for CadqueryEngine {
    async fn initialize(&mut self, ctx: EngineContext) -> EngineResult<()> {
        debug!("CadqueryEngine::initialize: called");
        if let Some(python) = ctx.option_str("python") {
            self.python = python.to_string();
        }

        let output = Command::new(&self.python)
            .args(["-c", "import cadquery; print(cadquery.__version__)"])
            .output()
            .await
            .map_err(|e| EngineError::failed(format!("python interpreter {} is not runnable: {e}", self.python)))?;
        if !output.status.success() {
            return Err(EngineError::failed(format!(
                "cadquery is not importable from {}",
                self.python
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(python = %self.python, %version, "CadQuery available");
        ctx.logger.info(&format!("using cadquery {version}"));
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn can_handle(&mut self, file: &SourceFile) -> EngineResult<bool> {
        debug!(filename = %file.filename, "CadqueryEngine::can_handle: called");
        if file.extension().as_deref() != Some("py") {
            return Ok(false);
        }
        let imports = Regex::new(r"(?m)^\s*(?:import\s+cadquery\b|from\s+cadquery\b)")
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        Ok(file.text().is_some_and(|text| imports.is_match(text)))
    }

    async fn extract_parameters(&mut self, file: &SourceFile) -> EngineResult<ExtractedParameters> {
        debug!(filename = %file.filename, "CadqueryEngine::extract_parameters: called");
        let scratch = TempDir::new().map_err(|e| EngineError::Internal(format!("scratch dir: {e}")))?;
        self.stage(file, scratch.path()).await?;

        let stdout = self.run_harness(scratch.path(), &["params", "model.py"]).await?;
        let defaults: Parameters =
            serde_json::from_slice(&stdout).map_err(|e| EngineError::Internal(format!("harness output: {e}")))?;
        Ok(ExtractedParameters {
            json_schema: schema_from_defaults(&defaults),
            default_parameters: defaults,
        })
    }

    async fn compute_geometry(&mut self, file: &SourceFile, parameters: &Parameters) -> EngineResult<Vec<Geometry>> {
        debug!(filename = %file.filename, params = parameters.len(), "CadqueryEngine::compute_geometry: called");
        let data = self.build(file, parameters, ExportFormat::Stl).await?;
        self.last = Some((file.clone(), parameters.clone()));
        Ok(vec![Geometry {
            name: file.stem(),
            format: ExportFormat::Stl,
            data,
        }])
    }

    fn supported_export_formats(&self) -> Vec<ExportFormat> {
        CADQUERY_FORMATS.to_vec()
    }

    async fn export_geometry(&mut self, format: ExportFormat) -> EngineResult<Vec<ExportedBlob>> {
        debug!(%format, "CadqueryEngine::export_geometry: called");
        let (file, parameters) = self
            .last
            .clone()
            .ok_or_else(|| EngineError::failed("no geometry has been computed"))?;
        let data = self.build(&file, &parameters, format).await?;
        Ok(vec![ExportedBlob {
            name: file.stem(),
            format,
            data,
        }])
    }

    async fn cleanup(&mut self) -> EngineResult<()> {
        debug!("CadqueryEngine::cleanup: called");
        self.last = None;
        Ok(())
    }
}
