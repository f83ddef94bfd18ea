//! OpenSCAD engine - declarative `.scad` sources
//!
//! Evaluation shells out to the `openscad` binary inside a scratch directory.
//! The source and every `include <...>`/`use <...>` dependency it references are
//! fetched over the engine's file channel and laid out there first, so the
//! binary never reads the project directly.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use super::customizer::{extract_customizer, to_scad_literal};
use super::staging::{sandboxed, write_staged};
use crate::domain::{ExportFormat, ExportedBlob, ExtractedParameters, Geometry, Parameters, SourceFile};
use crate::engine::{Engine, EngineContext, EngineError, EngineResult};

/// Binary used when no `binary` option is configured
pub const DEFAULT_OPENSCAD_BINARY: &str = "openscad";

/// Formats OpenSCAD can write
pub const OPENSCAD_FORMATS: [ExportFormat; 7] = [
    ExportFormat::Stl,
    ExportFormat::StlAscii,
    ExportFormat::ThreeMf,
    ExportFormat::Off,
    ExportFormat::Amf,
    ExportFormat::Dxf,
    ExportFormat::Svg,
];

/// Value for `--export-format`
fn export_flag(format: ExportFormat) -> Option<&'static str> {
    match format {
        ExportFormat::Stl => Some("binstl"),
        ExportFormat::StlAscii => Some("asciistl"),
        ExportFormat::ThreeMf => Some("3mf"),
        ExportFormat::Off => Some("off"),
        ExportFormat::Amf => Some("amf"),
        ExportFormat::Dxf => Some("dxf"),
        ExportFormat::Svg => Some("svg"),
        ExportFormat::Step => None,
    }
}

#[derive(Default)]
pub struct OpenscadEngine {
    ctx: Option<EngineContext>,
    binary: String,
    extra_args: Vec<String>,
    last: Option<(SourceFile, Parameters)>,
}

impl OpenscadEngine {
    pub fn new() -> Self {
        Self {
            binary: DEFAULT_OPENSCAD_BINARY.to_string(),
            ..Default::default()
        }
    }

    fn ctx(&self) -> EngineResult<&EngineContext> {
        self.ctx
            .as_ref()
            .ok_or_else(|| EngineError::Internal("openscad engine used before initialize".to_string()))
    }

    /// Copy the source and its dependency closure into `dir`
    async fn stage_sources(&self, file: &SourceFile, dir: &Path) -> EngineResult<PathBuf> {
        debug!(filename = %file.filename, ?dir, "OpenscadEngine::stage_sources: called");
        let ctx = self.ctx()?;
        let dependency = Regex::new(r#"(?m)^\s*(?:include|use)\s*<([^>]+)>"#)
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let main = sandboxed(&file.filename);
        write_staged(dir, &main, &file.content).await?;

        let mut seen: HashSet<PathBuf> = HashSet::from([main.clone()]);
        let mut queue: VecDeque<(PathBuf, String)> = VecDeque::new();
        queue.push_back((main.clone(), String::from_utf8_lossy(&file.content).into_owned()));

        while let Some((path, text)) = queue.pop_front() {
            let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
            let referenced: Vec<String> = dependency.captures_iter(&text).map(|caps| caps[1].to_string()).collect();
            for name in referenced {
                let dep = sandboxed(&base.join(&name).to_string_lossy());
                if !seen.insert(dep.clone()) {
                    continue;
                }

                let request = dep.to_string_lossy().into_owned();
                match ctx.files.read(&request).await {
                    Ok(bytes) => {
                        debug!(dependency = %request, "OpenscadEngine::stage_sources: staged dependency");
                        write_staged(dir, &dep, &bytes).await?;
                        queue.push_back((dep, String::from_utf8_lossy(&bytes).into_owned()));
                    }
                    Err(e) => {
                        // May still resolve from OPENSCADPATH libraries
                        ctx.logger.warn(&format!("dependency {request} not staged: {e}"));
                    }
                }
            }
        }

        Ok(dir.join(main))
    }

    /// Run the binary on a staged copy of `file`, returning the output bytes
    async fn render(&self, file: &SourceFile, parameters: &Parameters, format: ExportFormat) -> EngineResult<Vec<u8>> {
        debug!(filename = %file.filename, %format, "OpenscadEngine::render: called");
        let ctx = self.ctx()?;
        let flag = export_flag(format).ok_or_else(|| EngineError::failed(format!("openscad cannot write {format}")))?;

        let scratch = TempDir::new().map_err(|e| EngineError::Internal(format!("scratch dir: {e}")))?;
        let input = self.stage_sources(file, scratch.path()).await?;
        let output = scratch.path().join(format!("out.{}", format.extension()));

        let mut command = Command::new(&self.binary);
        command
            .arg("-o")
            .arg(&output)
            .arg("--export-format")
            .arg(flag)
            .args(&self.extra_args);
        for (name, value) in parameters {
            match to_scad_literal(value) {
                Some(literal) => {
                    command.arg("-D").arg(format!("{name}={literal}"));
                }
                None => ctx.logger.warn(&format!("parameter {name} has no OpenSCAD form; skipped")),
            }
        }
        command.arg(&input).current_dir(scratch.path()).kill_on_drop(true);

        let result = command
            .output()
            .await
            .map_err(|e| EngineError::failed(format!("failed to run {}: {e}", self.binary)))?;
        let stderr = String::from_utf8_lossy(&result.stderr);

        for warning in stderr.lines().filter(|l| l.starts_with("WARNING:")) {
            ctx.logger.warn(warning);
        }

        if !result.status.success() {
            debug!(status = ?result.status, "OpenscadEngine::render: openscad failed");
            return Err(parse_failure(&stderr));
        }

        match tokio::fs::read(&output).await {
            Ok(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(EngineError::failed("model produced no geometry")),
        }
    }
}

/// Turn OpenSCAD's stderr into a structured failure
///
/// Errors look like `ERROR: Parser error in file "main.scad", line 3: syntax error`.
pub fn parse_failure(stderr: &str) -> EngineError {
    let located = Regex::new(r#"ERROR:\s*(.*?)\s*in file\s+"?([^",]*)"?,\s*line\s+(\d+):?\s*(.*)"#).ok();

    for line in stderr.lines() {
        let Some(message) = line.strip_prefix("ERROR:") else {
            continue;
        };
        if let Some(caps) = located.as_ref().and_then(|re| re.captures(line)) {
            let detail = caps[4].trim();
            let message = match detail {
                "" => caps[1].to_string(),
                detail => format!("{}: {}", &caps[1], detail),
            };
            if let Ok(number) = caps[3].parse::<u32>() {
                return EngineError::failed_at(message, number);
            }
        }
        return EngineError::failed(message.trim());
    }

    let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("openscad failed");
    EngineError::failed(last.trim())
}

#[async_trait]
impl Engine for OpenscadEngine {
    async fn initialize(&mut self, ctx: EngineContext) -> EngineResult<()> {
        debug!("OpenscadEngine::initialize: called");
        if let Some(binary) = ctx.option_str("binary") {
            self.binary = binary.to_string();
        }
        self.extra_args = ctx.option_strings("extra-args");

        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| EngineError::failed(format!("openscad binary {} is not runnable: {e}", self.binary)))?;

        // OpenSCAD prints its version on stderr
        let version = String::from_utf8_lossy(if output.stderr.is_empty() {
            &output.stdout
        } else {
            &output.stderr
        })
        .trim()
        .to_string();
        info!(binary = %self.binary, %version, "OpenSCAD available");
        ctx.logger.info(&format!("using {version}"));

        self.ctx = Some(ctx);
        Ok(())
    }

    async fn can_handle(&mut self, file: &SourceFile) -> EngineResult<bool> {
        debug!(filename = %file.filename, "OpenscadEngine::can_handle: called");
        Ok(file.extension().as_deref() == Some("scad"))
    }

    async fn extract_parameters(&mut self, file: &SourceFile) -> EngineResult<ExtractedParameters> {
        debug!(filename = %file.filename, "OpenscadEngine::extract_parameters: called");
        let text = file
            .text()
            .ok_or_else(|| EngineError::failed(format!("{} is not valid UTF-8", file.filename)))?;
        extract_customizer(text).map_err(|e| EngineError::Internal(e.to_string()))
    }

    async fn compute_geometry(&mut self, file: &SourceFile, parameters: &Parameters) -> EngineResult<Vec<Geometry>> {
        debug!(filename = %file.filename, params = parameters.len(), "OpenscadEngine::compute_geometry: called");
        let data = self.render(file, parameters, ExportFormat::Stl).await?;
        self.last = Some((file.clone(), parameters.clone()));
        Ok(vec![Geometry {
            name: file.stem(),
            format: ExportFormat::Stl,
            data,
        }])
    }

    fn supported_export_formats(&self) -> Vec<ExportFormat> {
        OPENSCAD_FORMATS.to_vec()
    }

    async fn export_geometry(&mut self, format: ExportFormat) -> EngineResult<Vec<ExportedBlob>> {
        debug!(%format, "OpenscadEngine::export_geometry: called");
        let (file, parameters) = self
            .last
            .clone()
            .ok_or_else(|| EngineError::failed("no geometry has been computed"))?;
        let data = self.render(&file, &parameters, format).await?;
        Ok(vec![ExportedBlob {
            name: file.stem(),
            format,
            data,
        }])
    }

    async fn cleanup(&mut self) -> EngineResult<()> {
        debug!("OpenscadEngine::cleanup: called");
        self.last = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{FileService, channel_pair};
    use crate::domain::EngineKind;
    use crate::events::Reporter;
    use serde_json::json;

    #[test]
    fn test_parse_failure_with_line() {
        let stderr = "Compiling design\nERROR: Parser error in file \"/tmp/x/main.scad\", line 3: syntax error\n";
        let err = parse_failure(stderr);
        assert_eq!(err.line(), Some(3));
        assert_eq!(err.to_string(), "Parser error: syntax error");
    }

    #[test]
    fn test_parse_failure_without_location() {
        let err = parse_failure("WARNING: x\nERROR: Current top level object is not a 3D object.\n");
        assert_eq!(err.line(), None);
        assert_eq!(err.to_string(), "Current top level object is not a 3D object.");

        assert_eq!(parse_failure("boom\n\n").to_string(), "boom");
    }

    #[tokio::test]
    async fn test_initialize_missing_binary_fails() {
        let (files, _port) = channel_pair(1);
        let ctx = EngineContext {
            logger: Reporter::new(4).engine_logger(EngineKind::Openscad),
            files,
            options: json!({"binary": "/nonexistent/openscad-bin"}).as_object().cloned().unwrap(),
        };

        let mut engine = OpenscadEngine::new();
        let err = engine.initialize(ctx).await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/openscad-bin"));
    }

    #[tokio::test]
    async fn test_stage_sources_follows_includes() {
        let project = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(project.path().join("parts/lib")).unwrap();
        std::fs::write(project.path().join("parts/lib/gear.scad"), "use <teeth.scad>\nmodule gear() {}").unwrap();
        std::fs::write(project.path().join("parts/lib/teeth.scad"), "module teeth() {}").unwrap();

        let (files, port) = channel_pair(8);
        let _served = FileService::new(project.path()).attach(port);
        let mut engine = OpenscadEngine::new();
        engine.ctx = Some(EngineContext {
            logger: Reporter::new(4).engine_logger(EngineKind::Openscad),
            files,
            options: Default::default(),
        });

        let file = SourceFile::new("parts/main.scad", "include <lib/gear.scad>\ninclude <missing.scad>\ngear();");
        let scratch = tempfile::TempDir::new().unwrap();
        let input = engine.stage_sources(&file, scratch.path()).await.unwrap();

        assert_eq!(input, scratch.path().join("parts/main.scad"));
        assert!(scratch.path().join("parts/lib/gear.scad").is_file());
        assert!(scratch.path().join("parts/lib/teeth.scad").is_file());
        assert!(!scratch.path().join("parts/missing.scad").exists());
    }

    #[tokio::test]
    async fn test_extract_parameters() {
        let mut engine = OpenscadEngine::new();
        let file = SourceFile::new("box.scad", "size = 10; // [1:50]\ncube(size);");
        let extracted = engine.extract_parameters(&file).await.unwrap();
        assert_eq!(extracted.default_parameters["size"], json!(10));
    }
}
