//! Host services the dispatcher forwards to without implementing itself

use async_trait::async_trait;
use process_manager::{Error, Result};
use std::fmt;
use wire_protocol::{DownloadInfo, MongoDbDownloadOptions};

/// Downloads and host events. Requests are validated before they get here.
#[async_trait]
pub trait Collaborators: Send + Sync + fmt::Debug {
    /// Fetch a file, unpacking it when asked
    async fn download_file(&self, info: DownloadInfo) -> Result<()>;

    /// Fetch and install a database server build
    async fn download_mongodb(&self, options: MongoDbDownloadOptions) -> Result<()>;

    /// Signal a named event on the host
    async fn signal_event(&self, name: &str) -> Result<()>;
}

/// Answers every request with `NotSupported`
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

#[async_trait]
impl Collaborators for Unsupported {
    async fn download_file(&self, _info: DownloadInfo) -> Result<()> {
        Err(Error::not_supported("file downloads"))
    }

    async fn download_mongodb(&self, _options: MongoDbDownloadOptions) -> Result<()> {
        Err(Error::not_supported("database downloads"))
    }

    async fn signal_event(&self, name: &str) -> Result<()> {
        Err(Error::not_supported(format!("event '{}'", name)))
    }
}
