//! Geometry payloads and export formats

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Manufacturing and interchange formats an engine may export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportFormat {
    /// Binary STL
    #[serde(rename = "stl")]
    Stl,
    #[serde(rename = "stl-ascii")]
    StlAscii,
    #[serde(rename = "3mf")]
    ThreeMf,
    #[serde(rename = "off")]
    Off,
    #[serde(rename = "amf")]
    Amf,
    #[serde(rename = "dxf")]
    Dxf,
    #[serde(rename = "svg")]
    Svg,
    #[serde(rename = "step")]
    Step,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Stl => "stl",
            ExportFormat::StlAscii => "stl-ascii",
            ExportFormat::ThreeMf => "3mf",
            ExportFormat::Off => "off",
            ExportFormat::Amf => "amf",
            ExportFormat::Dxf => "dxf",
            ExportFormat::Svg => "svg",
            ExportFormat::Step => "step",
        }
    }

    /// File extension for written blobs
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Stl | ExportFormat::StlAscii => "stl",
            other => other.as_str(),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Stl | ExportFormat::StlAscii => "model/stl",
            ExportFormat::ThreeMf => "model/3mf",
            ExportFormat::Off | ExportFormat::Amf => "application/octet-stream",
            ExportFormat::Dxf => "image/vnd.dxf",
            ExportFormat::Svg => "image/svg+xml",
            ExportFormat::Step => "model/step",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "ExportFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "stl" | "binstl" => Ok(ExportFormat::Stl),
            "stl-ascii" | "asciistl" => Ok(ExportFormat::StlAscii),
            "3mf" => Ok(ExportFormat::ThreeMf),
            "off" => Ok(ExportFormat::Off),
            "amf" => Ok(ExportFormat::Amf),
            "dxf" => Ok(ExportFormat::Dxf),
            "svg" => Ok(ExportFormat::Svg),
            "step" | "stp" => Ok(ExportFormat::Step),
            _ => Err(format!(
                "Unknown export format: {}. Use: stl, stl-ascii, 3mf, off, amf, dxf, svg, or step",
                s
            )),
        }
    }
}

/// Render a list of formats as `a, b, c`
pub fn format_list(formats: &[ExportFormat]) -> String {
    formats.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", ")
}

/// One renderable piece of computed geometry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub name: String,
    pub format: ExportFormat,
    pub data: Vec<u8>,
}

/// An exported file produced by an engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedBlob {
    pub name: String,
    pub format: ExportFormat,
    pub data: Vec<u8>,
}

impl ExportedBlob {
    /// Suggested file name, `<name>.<extension>`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.format.extension())
    }
}
