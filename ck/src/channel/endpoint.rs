//! Channel endpoints
//!
//! A file channel is a pair: the [`FileChannel`] goes to an engine, the
//! [`FilePort`] goes to the file-access service.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use super::messages::{ChannelError, ChannelResponse, FileRequest};

/// Engine-side endpoint of a file channel
#[derive(Debug, Clone)]
pub struct FileChannel {
    id: Uuid,
    tx: mpsc::Sender<FileRequest>,
}

/// Service-side endpoint of a file channel
#[derive(Debug)]
pub struct FilePort {
    id: Uuid,
    rx: mpsc::Receiver<FileRequest>,
}

/// Create a connected channel pair
pub fn channel_pair(buffer: usize) -> (FileChannel, FilePort) {
    let id = Uuid::now_v7();
    debug!(%id, buffer, "channel_pair: called");
    let (tx, rx) = mpsc::channel(buffer);
    (FileChannel { id, tx }, FilePort { id, rx })
}

impl FileChannel {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Read a file relative to the project root
    pub async fn read(&self, path: &str) -> ChannelResponse<Vec<u8>> {
        debug!(channel = %self.id, %path, "FileChannel::read: called");
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(FileRequest::Read {
                path: path.to_string(),
                reply,
            })
            .await
            .map_err(|_| ChannelError::Closed)?;
        reply_rx.await.map_err(|_| ChannelError::Closed)?
    }

    /// Read a file as UTF-8 text
    pub async fn read_to_string(&self, path: &str) -> ChannelResponse<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).map_err(|e| ChannelError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Check whether a file exists
    pub async fn exists(&self, path: &str) -> ChannelResponse<bool> {
        debug!(channel = %self.id, %path, "FileChannel::exists: called");
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(FileRequest::Exists {
                path: path.to_string(),
                reply,
            })
            .await
            .map_err(|_| ChannelError::Closed)?;
        reply_rx.await.map_err(|_| ChannelError::Closed)?
    }

    /// List the entries of a directory
    pub async fn list(&self, path: &str) -> ChannelResponse<Vec<String>> {
        debug!(channel = %self.id, %path, "FileChannel::list: called");
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(FileRequest::List {
                path: path.to_string(),
                reply,
            })
            .await
            .map_err(|_| ChannelError::Closed)?;
        reply_rx.await.map_err(|_| ChannelError::Closed)?
    }

    /// Check if the service side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl FilePort {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next request from the engine, `None` once the engine side is dropped
    pub async fn recv(&mut self) -> Option<FileRequest> {
        self.rx.recv().await
    }
}
