//! File-access channel messages

use thiserror::Error;
use tokio::sync::oneshot;

/// Errors from file-access requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Path {0} escapes the project root")]
    OutsideRoot(String),

    #[error("IO error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("File channel closed")]
    Closed,
}

/// Response from the file-access service
pub type ChannelResponse<T> = Result<T, ChannelError>;

/// Requests an engine sends down its file channel
#[derive(Debug)]
pub enum FileRequest {
    /// Read a file relative to the project root
    Read {
        path: String,
        reply: oneshot::Sender<ChannelResponse<Vec<u8>>>,
    },

    /// Check whether a file exists
    Exists {
        path: String,
        reply: oneshot::Sender<ChannelResponse<bool>>,
    },

    /// List entries of a directory relative to the project root
    List {
        path: String,
        reply: oneshot::Sender<ChannelResponse<Vec<String>>>,
    },
}

impl FileRequest {
    /// Path this request refers to
    pub fn path(&self) -> &str {
        match self {
            FileRequest::Read { path, .. } | FileRequest::Exists { path, .. } | FileRequest::List { path, .. } => path,
        }
    }
}
