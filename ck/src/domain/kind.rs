//! Engine kinds and their fixed probing priority

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The closed set of CAD engines the orchestrator knows how to host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Triangle mesh import (STL)
    Mesh,
    /// Declarative OpenSCAD sources
    Openscad,
    /// General-purpose Python scripts built on CadQuery
    Cadquery,
}

impl EngineKind {
    /// Probe order. Earlier kinds win when several engines accept the same file,
    /// so lightweight and declarative engines come before general-purpose scripting.
    pub const PRIORITY: [EngineKind; 3] = [EngineKind::Mesh, EngineKind::Openscad, EngineKind::Cadquery];

    /// Stable lowercase identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Mesh => "mesh",
            EngineKind::Openscad => "openscad",
            EngineKind::Cadquery => "cadquery",
        }
    }

    /// Position of this kind in [`EngineKind::PRIORITY`]
    pub fn priority(&self) -> usize {
        Self::PRIORITY.iter().position(|k| k == self).unwrap_or(Self::PRIORITY.len())
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "EngineKind::from_str: called");
        match s.to_lowercase().as_str() {
            "mesh" | "stl" => Ok(EngineKind::Mesh),
            "openscad" | "scad" => Ok(EngineKind::Openscad),
            "cadquery" | "cq" => Ok(EngineKind::Cadquery),
            _ => Err(format!("Unknown engine: {}. Use: mesh, openscad, or cadquery", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert_eq!(EngineKind::Mesh.priority(), 0);
        assert!(EngineKind::Openscad.priority() < EngineKind::Cadquery.priority());
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!("scad".parse::<EngineKind>(), Ok(EngineKind::Openscad));
        assert_eq!("CadQuery".parse::<EngineKind>(), Ok(EngineKind::Cadquery));
        assert!("freecad".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_serde_kebab_case() {
        let json = serde_json::to_string(&EngineKind::Openscad).unwrap();
        assert_eq!(json, r#""openscad""#);
    }
}
