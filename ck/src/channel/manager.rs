//! ChannelManager - wires engines to the file-access service

use tokio::task::JoinHandle;
use tracing::debug;

use super::endpoint::{FileChannel, channel_pair};
use super::service::FileService;

/// Default buffer for each file channel
pub const DEFAULT_FILE_CHANNEL_BUFFER: usize = 64;

/// Opens one dedicated file channel per engine
pub struct ChannelManager {
    service: FileService,
    buffer: usize,
    served: Vec<JoinHandle<()>>,
}

impl ChannelManager {
    pub fn new(service: FileService) -> Self {
        Self::with_buffer(service, DEFAULT_FILE_CHANNEL_BUFFER)
    }

    pub fn with_buffer(service: FileService, buffer: usize) -> Self {
        debug!(root = ?service.root(), buffer, "ChannelManager::new: called");
        Self {
            service,
            buffer,
            served: Vec::new(),
        }
    }

    /// Open a fresh channel, hand the service its end, return the engine's end
    pub fn open_channel(&mut self) -> FileChannel {
        let (channel, port) = channel_pair(self.buffer);
        debug!(channel = %channel.id(), "ChannelManager::open_channel: called");
        self.served.retain(|task| !task.is_finished());
        self.served.push(self.service.attach(port));
        channel
    }

    /// Number of channels still being served
    pub fn open_count(&self) -> usize {
        self.served.iter().filter(|task| !task.is_finished()).count()
    }

    pub fn service(&self) -> &FileService {
        &self.service
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        for task in &self.served {
            task.abort();
        }
    }
}
