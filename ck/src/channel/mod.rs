//! Communication channels between engines and the file-access service
//!
//! Engines read project files (includes, assets, sibling modules) over their own
//! channel instead of routing every read through the pipeline controller.
//! Creating a channel yields two endpoints; the engine keeps one and the
//! [`FileService`] serves the other.

mod endpoint;
mod manager;
mod messages;
mod service;

pub use endpoint::{FileChannel, FilePort, channel_pair};
pub use manager::{ChannelManager, DEFAULT_FILE_CHANNEL_BUFFER};
pub use messages::{ChannelError, ChannelResponse, FileRequest};
pub use service::FileService;
