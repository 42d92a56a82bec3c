//! Manager and process proxies

use async_trait::async_trait;
use process_manager::{
    CacheOptions, CreateOptions, Error, Filter, LogStream, LoggingCache, Manager, Process, ProcessInfo,
    ProcessRef, ProcessTrigger, Result, Signal, SignalTrigger, SignalTriggerId, WriteFileInfo,
};
use std::sync::Arc;
use tracing::{debug, info};
use wire_protocol::{CommandName, DownloadInfo, MongoDbDownloadOptions, Reply, Request};

use super::{Client, RemoteLoggingCache, transport, unexpected};
use crate::config::ClientConfig;

/// A manager served by a remote dispatcher
#[derive(Debug, Clone)]
pub struct RemoteManager {
    id: String,
    client: Client,
    cache: Arc<RemoteLoggingCache>,
}

impl RemoteManager {
    /// Connect to the service described by `config` and learn its manager id
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let client = Client::new(transport(config), config.request_timeout);
        let id = match client.call(Request::Id).await? {
            Reply::Id(id) => id,
            other => return Err(unexpected(CommandName::Id, &other)),
        };
        info!(addr = %config.addr, protocol = %config.protocol, manager = %id, "connected to remote manager");

        Ok(Self {
            id,
            cache: Arc::new(RemoteLoggingCache::new(client.clone())),
            client,
        })
    }

    fn process(&self, id: String) -> ProcessRef {
        Arc::new(RemoteProcess {
            id,
            client: self.client.clone(),
        })
    }

    async fn processes(&self, request: Request) -> Result<Vec<ProcessRef>> {
        let command = request.command();
        match self.client.call(request).await? {
            Reply::Infos(infos) => Ok(infos.into_iter().map(|info| self.process(info.id)).collect()),
            other => Err(unexpected(command, &other)),
        }
    }

    /// Ask the service to fetch a file
    pub async fn download_file(&self, info: DownloadInfo) -> Result<()> {
        self.client.call_empty(Request::DownloadFile(info)).await
    }

    /// Ask the service to fetch and unpack a database build
    pub async fn download_mongodb(&self, options: MongoDbDownloadOptions) -> Result<()> {
        self.client.call_empty(Request::DownloadMongodb(options)).await
    }

    /// Signal a named event on the service host
    pub async fn signal_event(&self, name: &str) -> Result<()> {
        self.client.call_empty(Request::SignalEvent(name.to_string())).await
    }

    /// Build-logger URLs of process `id`
    pub async fn buildlogger_urls(&self, id: &str) -> Result<Vec<String>> {
        match self.client.call(Request::GetBuildloggerUrls(id.to_string())).await? {
            Reply::Urls(urls) => Ok(urls),
            other => Err(unexpected(CommandName::GetBuildloggerUrls, &other)),
        }
    }

    /// Release the connection. Later calls through this manager, its
    /// processes or its cache fail.
    pub async fn close_connection(&self) {
        debug!(manager = %self.id, "closing connection");
        self.client.transport().close().await;
    }
}

#[async_trait]
impl Manager for RemoteManager {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_process(&self, options: CreateOptions) -> Result<ProcessRef> {
        if options.standard_input.is_some() {
            return Err(Error::not_supported("input streams cannot cross the wire; use input bytes"));
        }
        match self.client.call(Request::CreateProcess(options)).await? {
            Reply::Info(info) => Ok(self.process(info.id)),
            other => Err(unexpected(CommandName::CreateProcess, &other)),
        }
    }

    async fn register(&self, _process: ProcessRef) -> Result<()> {
        Err(Error::not_supported("remote managers do not accept registered processes"))
    }

    async fn list(&self, filter: Filter) -> Result<Vec<ProcessRef>> {
        self.processes(Request::List(filter)).await
    }

    async fn group(&self, tag: &str) -> Result<Vec<ProcessRef>> {
        self.processes(Request::Group(tag.to_string())).await
    }

    async fn get(&self, id: &str) -> Result<ProcessRef> {
        match self.client.call(Request::Get(id.to_string())).await? {
            Reply::Info(info) => Ok(self.process(info.id)),
            other => Err(unexpected(CommandName::Get, &other)),
        }
    }

    async fn clear(&self) -> Result<()> {
        self.client.call_empty(Request::Clear).await
    }

    async fn close(&self) -> Result<()> {
        self.client.call_empty(Request::Close).await
    }

    fn logging_cache(&self) -> Arc<dyn LoggingCache> {
        self.cache.clone()
    }

    async fn write_file(&self, info: WriteFileInfo) -> Result<()> {
        self.client.call_empty(Request::WriteFile(info)).await
    }

    async fn configure_cache(&self, options: CacheOptions) -> Result<()> {
        self.client.call_empty(Request::ConfigureCache(options)).await
    }
}

/// A process owned by a remote manager
#[derive(Debug, Clone)]
pub struct RemoteProcess {
    id: String,
    client: Client,
}

impl RemoteProcess {
    async fn flag(&self, request: Request) -> Result<bool> {
        let command = request.command();
        match self.client.call(request).await? {
            Reply::Flag(flag) => Ok(flag),
            other => Err(unexpected(command, &other)),
        }
    }
}

#[async_trait]
impl Process for RemoteProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn info(&self) -> Result<ProcessInfo> {
        match self.client.call(Request::Info(self.id.clone())).await? {
            Reply::Info(info) => {
                // Remote processes report no pid
                let mut info = *info;
                info.pid = -1;
                Ok(info)
            }
            other => Err(unexpected(CommandName::Info, &other)),
        }
    }

    async fn running(&self) -> Result<bool> {
        self.flag(Request::Running(self.id.clone())).await
    }

    async fn complete(&self) -> Result<bool> {
        self.flag(Request::Complete(self.id.clone())).await
    }

    async fn signal(&self, signal: Signal) -> Result<()> {
        self.client
            .call_empty(Request::Signal {
                id: self.id.clone(),
                signal: signal.number(),
            })
            .await
    }

    async fn wait(&self) -> Result<i32> {
        match self.client.call(Request::Wait(self.id.clone())).await? {
            Reply::ExitCode(code) => Ok(code),
            other => Err(unexpected(CommandName::Wait, &other)),
        }
    }

    async fn respawn(&self) -> Result<ProcessRef> {
        match self.client.call(Request::Respawn(self.id.clone())).await? {
            Reply::Info(info) => Ok(Arc::new(RemoteProcess {
                id: info.id,
                client: self.client.clone(),
            })),
            other => Err(unexpected(CommandName::Respawn, &other)),
        }
    }

    async fn register_trigger(&self, _trigger: ProcessTrigger) -> Result<()> {
        Err(Error::not_supported("completion triggers run in-process only"))
    }

    async fn register_signal_trigger(&self, _trigger: SignalTrigger) -> Result<()> {
        Err(Error::not_supported("signal trigger callbacks run in-process only"))
    }

    async fn register_signal_trigger_id(&self, id: SignalTriggerId) -> Result<()> {
        self.client
            .call_empty(Request::RegisterSignalTriggerId {
                id: self.id.clone(),
                trigger: id,
            })
            .await
    }

    async fn tag(&self, tag: &str) -> Result<()> {
        self.client
            .call_empty(Request::Tag {
                id: self.id.clone(),
                tag: tag.to_string(),
            })
            .await
    }

    async fn get_tags(&self) -> Result<Vec<String>> {
        match self.client.call(Request::GetTags(self.id.clone())).await? {
            Reply::Tags(tags) => Ok(tags),
            other => Err(unexpected(CommandName::GetTags, &other)),
        }
    }

    async fn reset_tags(&self) -> Result<()> {
        self.client.call_empty(Request::ResetTags(self.id.clone())).await
    }

    async fn log_stream(&self, count: usize) -> Result<LogStream> {
        let request = Request::GetLogStream {
            id: self.id.clone(),
            count,
        };
        match self.client.call(request).await? {
            Reply::LogStream(stream) => Ok(stream),
            other => Err(unexpected(CommandName::GetLogStream, &other)),
        }
    }
}
