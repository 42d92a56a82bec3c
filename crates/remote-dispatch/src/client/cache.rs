use async_trait::async_trait;
use chrono::{DateTime, Utc};
use process_manager::logging::OutputOptions;
use process_manager::{CachedLogger, LoggingCache, LoggingPayload, Result};
use wire_protocol::{Reply, Request};

use super::{Client, unexpected};

/// The logging cache of a remote manager
#[derive(Debug, Clone)]
pub struct RemoteLoggingCache {
    client: Client,
}

impl RemoteLoggingCache {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }

    async fn logger(&self, request: Request) -> Result<CachedLogger> {
        let command = request.command();
        match self.client.call(request).await? {
            Reply::Logger(logger) => Ok(logger),
            other => Err(unexpected(command, &other)),
        }
    }
}

#[async_trait]
impl LoggingCache for RemoteLoggingCache {
    async fn create(&self, id: &str, options: &OutputOptions) -> Result<CachedLogger> {
        self.logger(Request::LoggingCacheCreate {
            id: id.to_string(),
            output: options.clone(),
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<CachedLogger> {
        self.logger(Request::LoggingCacheGet(id.to_string())).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.client.call_empty(Request::LoggingCacheRemove(id.to_string())).await
    }

    async fn close_and_remove(&self, id: &str) -> Result<()> {
        self.client
            .call_empty(Request::LoggingCacheCloseAndRemove(id.to_string()))
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.client.call_empty(Request::LoggingCacheClear).await
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<()> {
        self.client.call_empty(Request::LoggingCachePrune(before)).await
    }

    async fn len(&self) -> Result<usize> {
        match self.client.call(Request::LoggingCacheSize).await? {
            Reply::Size(size) => Ok(size),
            other => Err(unexpected(Request::LoggingCacheSize.command(), &other)),
        }
    }

    async fn send(&self, payload: LoggingPayload) -> Result<()> {
        self.client.call_empty(Request::SendMessages(payload)).await
    }
}
