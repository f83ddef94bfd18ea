//! cadkernel configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::channel::{ChannelManager, DEFAULT_FILE_CHANNEL_BUFFER, FileService};
use crate::domain::EngineKind;
use crate::engine::EngineOptions;
use crate::engine::builtin::{DEFAULT_OPENSCAD_BINARY, DEFAULT_PYTHON, create_engine};
use crate::pipeline::KernelConfig;
use crate::registry::EngineRegistry;

/// Main cadkernel configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pipeline controller settings
    pub kernel: KernelConfig,

    /// Project served to engines
    pub project: ProjectConfig,

    /// Builtin engine settings
    pub engines: EnginesConfig,
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `./.cadkernel.yml`, then
    /// `<config_dir>/cadkernel/cadkernel.yml`, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".cadkernel.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("cadkernel").join("cadkernel.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate configuration before use
    ///
    /// Call this early in startup so a bad buffer size fails with a clear
    /// message instead of a panic inside the runtime.
    pub fn validate(&self) -> Result<()> {
        debug!("Config::validate: called");
        self.kernel.validate()?;
        if self.project.file_channel_buffer == 0 {
            return Err(eyre::eyre!("project.file-channel-buffer must be at least 1"));
        }
        Ok(())
    }

    /// Build a registry holding every enabled builtin engine
    pub fn engine_registry(&self) -> EngineRegistry {
        debug!(root = ?self.project.root, "Config::engine_registry: called");
        let service = FileService::new(&self.project.root);
        let channels = ChannelManager::with_buffer(service, self.project.file_channel_buffer);

        let mut registry = EngineRegistry::new(channels);
        for kind in self.engines.enabled_kinds() {
            registry = registry.register(kind, self.engines.options(kind), move || create_engine(kind));
        }
        registry
    }
}

/// Project directory settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Root directory engines may read from
    pub root: PathBuf,

    /// Buffer of each engine's file channel
    #[serde(rename = "file-channel-buffer")]
    pub file_channel_buffer: usize,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            file_channel_buffer: DEFAULT_FILE_CHANNEL_BUFFER,
        }
    }
}

/// Per-engine settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesConfig {
    pub mesh: MeshConfig,
    pub openscad: OpenscadConfig,
    pub cadquery: CadqueryConfig,
}

impl EnginesConfig {
    pub fn is_enabled(&self, kind: EngineKind) -> bool {
        match kind {
            EngineKind::Mesh => self.mesh.enabled,
            EngineKind::Openscad => self.openscad.enabled,
            EngineKind::Cadquery => self.cadquery.enabled,
        }
    }

    /// Enabled kinds in priority order
    pub fn enabled_kinds(&self) -> Vec<EngineKind> {
        EngineKind::PRIORITY
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Options handed to the engine at initialization
    pub fn options(&self, kind: EngineKind) -> EngineOptions {
        let value = match kind {
            EngineKind::Mesh => json!({}),
            EngineKind::Openscad => json!({
                "binary": self.openscad.binary,
                "extra-args": self.openscad.extra_args,
            }),
            EngineKind::Cadquery => json!({"python": self.cadquery.python}),
        };
        match value {
            Value::Object(map) => map,
            _ => EngineOptions::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub enabled: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenscadConfig {
    pub enabled: bool,

    /// Path or name of the openscad executable
    pub binary: String,

    /// Extra arguments for every invocation
    #[serde(rename = "extra-args")]
    pub extra_args: Vec<String>,
}

impl Default for OpenscadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: DEFAULT_OPENSCAD_BINARY.to_string(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadqueryConfig {
    pub enabled: bool,

    /// Interpreter with cadquery installed
    pub python: String,
}

impl Default for CadqueryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            python: DEFAULT_PYTHON.to_string(),
        }
    }
}
