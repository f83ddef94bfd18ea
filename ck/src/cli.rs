//! CLI command definitions and helpers

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::{ExportFormat, Parameters};

/// ck - CAD kernel orchestrator
#[derive(Parser)]
#[command(
    name = "ck",
    about = "Selects a CAD engine for a model, extracts its parameters, evaluates and exports geometry",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log at DEBUG instead of INFO
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List engines in priority order
    Engines,

    /// Print the engine that accepts FILE
    Probe {
        /// Model file
        file: PathBuf,
    },

    /// Run one compute pass over FILE
    Compute {
        /// Model file
        file: PathBuf,

        /// Parameter override (repeatable)
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Export the computed geometry in this format
        #[arg(short, long, value_name = "FORMAT")]
        export: Option<ExportFormat>,

        /// Where to write the exported file (defaults to the blob's name)
        #[arg(short, long, requires = "export")]
        output: Option<PathBuf>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Recompute FILE every time it changes
    Watch {
        /// Model file
        file: PathBuf,

        /// Parameter override (repeatable)
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },
}

/// Parse `key=value`; the value is JSON when it parses, otherwise a string
pub fn parse_param(arg: &str) -> Result<(String, Value), String> {
    debug!(%arg, "parse_param: called");
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", arg))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", arg));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Collect parsed `-p` pairs into an override map (later pairs win)
pub fn to_overrides(params: Vec<(String, Value)>) -> Parameters {
    params.into_iter().collect()
}

/// Name a file the way engines and the capability cache see it
///
/// Paths under `root` become root-relative with `/` separators; anything
/// else keeps its path as given.
pub fn project_filename(file: &Path, root: &Path) -> String {
    debug!(?file, ?root, "project_filename: called");
    let absolute = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    let file_abs = absolute(file);
    let root_abs = absolute(root);

    match file_abs.strip_prefix(&root_abs) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => file.to_string_lossy().into_owned(),
    }
}

/// Result of checking an external engine tool
pub struct ToolCheck {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
}

impl ToolCheck {
    /// Check if a tool is available and get its version
    pub fn check(name: &str, version_args: &[&str]) -> Self {
        debug!(name, ?version_args, "ToolCheck::check: called");
        match std::process::Command::new(name).args(version_args).output() {
            Ok(output) if output.status.success() => {
                // openscad prints its version on stderr
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push(' ');
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                Self {
                    name: name.to_string(),
                    available: true,
                    version: Some(parse_version(&text)),
                }
            }
            _ => {
                debug!(name, "ToolCheck::check: tool not available");
                Self {
                    name: name.to_string(),
                    available: false,
                    version: None,
                }
            }
        }
    }
}

/// First version-like word in command output
fn parse_version(output: &str) -> String {
    for word in output.split_whitespace() {
        let word = word.trim_start_matches('v');
        if word.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            let version: String = word.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
            if !version.is_empty() {
                return version;
            }
        }
    }
    "unknown".to_string()
}

/// Log file location
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadkernel")
        .join("logs")
        .join("cadkernel.log")
}

/// after_help text listing the external tools engines rely on
pub fn generate_after_help(openscad: &str, python: &str) -> String {
    debug!(openscad, python, "generate_after_help: called");
    let tools = [ToolCheck::check(openscad, &["--version"]), ToolCheck::check(python, &["--version"])];

    let mut help = String::from("Engine Tools:\n");
    for tool in &tools {
        let icon = if tool.available { "\u{2705}" } else { "\u{274C}" };
        let version = tool.version.as_deref().unwrap_or("not found");
        help.push_str(&format!("  {} {:<10} {}\n", icon, tool.name, version));
    }
    help.push_str(&format!("\nLogs: {}\n", get_log_path().display()));
    help
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_param_json_values() {
        assert_eq!(parse_param("width=10").unwrap(), ("width".to_string(), json!(10)));
        assert_eq!(parse_param("hollow=true").unwrap(), ("hollow".to_string(), json!(true)));
        assert_eq!(parse_param("size=[1, 2, 3]").unwrap(), ("size".to_string(), json!([1, 2, 3])));
        assert_eq!(parse_param("label=\"a=b\"").unwrap(), ("label".to_string(), json!("a=b")));
    }

    #[test]
    fn test_parse_param_falls_back_to_string() {
        assert_eq!(parse_param("label=hello").unwrap(), ("label".to_string(), json!("hello")));
        assert_eq!(parse_param("empty=").unwrap(), ("empty".to_string(), json!("")));
    }

    #[test]
    fn test_parse_param_rejects_bad_input() {
        assert!(parse_param("width").is_err());
        assert!(parse_param("=10").is_err());
    }

    #[test]
    fn test_later_overrides_win() {
        let overrides = to_overrides(vec![("w".to_string(), json!(1)), ("w".to_string(), json!(2))]);
        assert_eq!(overrides["w"], json!(2));
    }

    #[test]
    fn test_project_filename() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("parts");
        std::fs::create_dir_all(&nested).unwrap();
        let file = nested.join("bracket.scad");
        std::fs::write(&file, "cube(1);").unwrap();

        assert_eq!(project_filename(&file, temp.path()), "parts/bracket.scad");
        assert_eq!(
            project_filename(Path::new("/elsewhere/x.scad"), temp.path()),
            "/elsewhere/x.scad"
        );
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("OpenSCAD version 2021.01"), "2021.01");
        assert_eq!(parse_version("Python 3.12.1"), "3.12.1");
        assert_eq!(parse_version("no digits"), "unknown");
    }

    #[test]
    fn test_cli_parses_compute() {
        let cli = Cli::try_parse_from(["ck", "compute", "a.scad", "-p", "w=3", "--export", "stl", "--json"]).unwrap();
        match cli.command {
            Command::Compute {
                file,
                params,
                export,
                output,
                json,
            } => {
                assert_eq!(file, PathBuf::from("a.scad"));
                assert_eq!(params, vec![("w".to_string(), json!(3))]);
                assert_eq!(export, Some(ExportFormat::Stl));
                assert!(output.is_none());
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_output_requires_export() {
        assert!(Cli::try_parse_from(["ck", "compute", "a.scad", "--output", "out.stl"]).is_err());
    }
}
