//! FileService - serves project files to engines
//!
//! Every attached port is served by its own task so one engine's backlog never
//! delays another engine's reads.

use std::path::{Component, Path, PathBuf};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::endpoint::FilePort;
use super::messages::{ChannelError, ChannelResponse, FileRequest};

/// File-access service rooted at the project directory
#[derive(Debug, Clone)]
pub struct FileService {
    root: PathBuf,
}

impl FileService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(?root, "FileService::new: called");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Take ownership of a port and serve it until the engine side closes
    pub fn attach(&self, mut port: FilePort) -> JoinHandle<()> {
        let service = self.clone();
        debug!(port = %port.id(), "FileService::attach: called");
        tokio::spawn(async move {
            while let Some(request) = port.recv().await {
                service.handle(request).await;
            }
            debug!(port = %port.id(), "FileService: port closed");
        })
    }

    async fn handle(&self, request: FileRequest) {
        debug!(path = %request.path(), "FileService::handle: called");
        match request {
            FileRequest::Read { path, reply } => {
                let result = self.read(&path).await;
                let _ = reply.send(result);
            }
            FileRequest::Exists { path, reply } => {
                let result = self.resolve(&path).map(|p| p.is_file());
                let _ = reply.send(result);
            }
            FileRequest::List { path, reply } => {
                let result = self.list(&path).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn read(&self, path: &str) -> ChannelResponse<Vec<u8>> {
        let resolved = self.resolve(path)?;
        tokio::fs::read(&resolved).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ChannelError::NotFound(path.to_string()),
            _ => ChannelError::Io {
                path: path.to_string(),
                message: e.to_string(),
            },
        })
    }

    async fn list(&self, path: &str) -> ChannelResponse<Vec<String>> {
        let resolved = self.resolve(path)?;
        let io_err = |e: std::io::Error| match e.kind() {
            std::io::ErrorKind::NotFound => ChannelError::NotFound(path.to_string()),
            _ => ChannelError::Io {
                path: path.to_string(),
                message: e.to_string(),
            },
        };

        let mut entries = tokio::fs::read_dir(&resolved).await.map_err(io_err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Resolve a project-relative path, refusing anything outside the root
    pub fn resolve(&self, path: &str) -> ChannelResponse<PathBuf> {
        debug!(%path, "FileService::resolve: called");
        let requested = Path::new(path);
        if requested.is_absolute() {
            warn!(%path, "Rejected absolute path");
            return Err(ChannelError::OutsideRoot(path.to_string()));
        }

        // Lexical normalization first so `..` cannot climb above the root
        let mut relative = PathBuf::new();
        for component in requested.components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !relative.pop() {
                        warn!(%path, "Rejected path climbing above root");
                        return Err(ChannelError::OutsideRoot(path.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ChannelError::OutsideRoot(path.to_string()));
                }
            }
        }

        let joined = self.root.join(&relative);

        // Existing paths are canonicalized to catch symlinks pointing outside
        if joined.exists() {
            let canonical = joined.canonicalize().unwrap_or_else(|_| joined.clone());
            let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
            if !canonical.starts_with(&root) {
                warn!(%path, "Rejected path resolving outside root");
                return Err(ChannelError::OutsideRoot(path.to_string()));
            }
            return Ok(canonical);
        }

        Ok(joined)
    }
}
