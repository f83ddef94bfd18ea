//! Scratch-directory staging shared by the script engines

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::engine::{EngineError, EngineResult};

/// Keep only normal components so staged paths stay inside the scratch dir
pub fn sandboxed(path: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            _ => {}
        }
    }
    out
}

/// Write `bytes` to `dir/relative`, creating parents
pub async fn write_staged(dir: &Path, relative: &Path, bytes: &[u8]) -> EngineResult<()> {
    debug!(?relative, "write_staged: called");
    let target = dir.join(relative);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::Internal(format!("staging {}: {e}", relative.display())))?;
    }
    tokio::fs::write(&target, bytes)
        .await
        .map_err(|e| EngineError::Internal(format!("staging {}: {e}", relative.display())))
}
