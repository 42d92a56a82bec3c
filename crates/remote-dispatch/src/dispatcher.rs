//! Binds decoded requests to a manager, its processes and its logging cache

use futures::channel::oneshot;
use process_manager::{Error, Manager, ProcessInfo, ProcessRef, Result, Signal};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use wire_protocol::{Reply, Request};

use crate::collaborators::{Collaborators, Unsupported};

/// Executes requests against a manager
#[derive(Debug, Clone)]
pub struct Dispatcher {
    manager: Arc<dyn Manager>,
    collaborators: Arc<dyn Collaborators>,
}

impl Dispatcher {
    /// A dispatcher for `manager` whose downloads and events are unsupported
    pub fn new(manager: Arc<dyn Manager>) -> Self {
        Self {
            manager,
            collaborators: Arc::new(Unsupported),
        }
    }

    /// Forward downloads and events to `collaborators`
    pub fn with_collaborators(mut self, collaborators: Arc<dyn Collaborators>) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// The served manager
    pub fn manager(&self) -> &Arc<dyn Manager> {
        &self.manager
    }

    async fn process(&self, id: &str) -> Result<ProcessRef> {
        self.manager.get(id).await
    }

    /// Execute one request
    pub async fn dispatch(&self, request: Request) -> Result<Reply> {
        let command = request.command();
        debug!(manager = self.manager.id(), %command, "dispatching request");

        let process = match request.process_id() {
            Some(id) => Some(self.process(id).await?),
            None => None,
        };
        let target = || process.clone().ok_or_else(|| Error::invalid(format!("{} needs a process", command)));

        let cache = self.manager.logging_cache();
        let reply = match request {
            Request::Id => Reply::Id(self.manager.id().to_string()),
            Request::CreateProcess(options) => {
                let manager = self.manager.clone();
                let info = detached(async move {
                    let process = manager.create_process(options).await?;
                    process.info().await
                })
                .await?;
                Reply::Info(Box::new(info))
            }
            Request::List(filter) => Reply::Infos(infos(self.manager.list(filter).await?).await?),
            Request::Group(tag) => Reply::Infos(infos(self.manager.group(&tag).await?).await?),
            Request::Get(_) | Request::Info(_) => Reply::Info(Box::new(target()?.info().await?)),
            Request::Clear => {
                self.manager.clear().await?;
                Reply::Empty
            }
            Request::Close => {
                self.manager.close().await?;
                Reply::Empty
            }
            Request::WriteFile(info) => {
                self.manager.write_file(info).await?;
                Reply::Empty
            }
            Request::ConfigureCache(options) => {
                self.manager.configure_cache(options).await?;
                Reply::Empty
            }
            Request::DownloadFile(info) => {
                info.validate()?;
                self.collaborators.download_file(info).await?;
                Reply::Empty
            }
            Request::DownloadMongodb(options) => {
                options.validate()?;
                self.collaborators.download_mongodb(options).await?;
                Reply::Empty
            }
            Request::SignalEvent(name) => {
                if name.is_empty() {
                    return Err(Error::invalid("event name must not be empty"));
                }
                self.collaborators.signal_event(&name).await?;
                Reply::Empty
            }
            Request::GetLogStream { count, .. } => Reply::LogStream(target()?.log_stream(count).await?),
            Request::GetBuildloggerUrls(id) => {
                let info = target()?.info().await?;
                let urls = info.options.output.buildlogger_urls()?;
                if urls.is_empty() {
                    return Err(Error::not_found(format!("build logger urls for process '{}'", id)));
                }
                Reply::Urls(urls)
            }
            Request::SendMessages(payload) => {
                cache.send(payload).await?;
                Reply::Empty
            }
            Request::Running(_) => Reply::Flag(target()?.running().await?),
            Request::Complete(_) => Reply::Flag(target()?.complete().await?),
            Request::Wait(_) => Reply::ExitCode(target()?.wait().await?),
            Request::Respawn(_) => {
                let process = target()?;
                let manager = self.manager.clone();
                let info = detached(async move { respawn(manager, process).await }).await?;
                Reply::Info(Box::new(info))
            }
            Request::Signal { signal, .. } => {
                target()?.signal(Signal::from(signal)).await?;
                Reply::Empty
            }
            Request::RegisterSignalTriggerId { trigger, .. } => {
                target()?.register_signal_trigger_id(trigger).await?;
                Reply::Empty
            }
            Request::Tag { tag, .. } => {
                target()?.tag(&tag).await?;
                Reply::Empty
            }
            Request::GetTags(_) => Reply::Tags(target()?.get_tags().await?),
            Request::ResetTags(_) => {
                target()?.reset_tags().await?;
                Reply::Empty
            }
            Request::LoggingCacheCreate { id, output } => Reply::Logger(cache.create(&id, &output).await?),
            Request::LoggingCacheGet(id) => Reply::Logger(cache.get(&id).await?),
            Request::LoggingCacheRemove(id) => {
                cache.remove(&id).await?;
                Reply::Empty
            }
            Request::LoggingCacheCloseAndRemove(id) => {
                cache.close_and_remove(&id).await?;
                Reply::Empty
            }
            Request::LoggingCacheClear => {
                cache.clear().await?;
                Reply::Empty
            }
            Request::LoggingCachePrune(before) => {
                cache.prune(before).await?;
                Reply::Empty
            }
            Request::LoggingCacheSize => Reply::Size(cache.len().await?),
        };
        Ok(reply)
    }
}

async fn infos(processes: Vec<ProcessRef>) -> Result<Vec<ProcessInfo>> {
    let mut infos = Vec::with_capacity(processes.len());
    for process in processes {
        infos.push(process.info().await?);
    }
    Ok(infos)
}

async fn respawn(manager: Arc<dyn Manager>, process: ProcessRef) -> Result<ProcessInfo> {
    let fresh = process.respawn().await?;
    if let Err(e) = manager.register(fresh.clone()).await {
        if !fresh.complete().await.unwrap_or(true) {
            if let Err(kill) = fresh.signal(Signal::KILL).await {
                warn!(process = fresh.id(), error = %kill, "failed to stop unregistered respawn");
            }
        }
        return Err(e);
    }
    fresh.info().await
}

/// Run `future` on its own task so that abandoning the request does not
/// abandon what it launched
async fn detached<T, F>(future: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    smol::spawn(async move {
        let _ = tx.send(future.await);
    })
    .detach();
    rx.await
        .map_err(|_| Error::cancelled("launch task ended without a result"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use process_manager::{CreateOptions, ErrorKind, LocalManager, ManagerOptions};

    fn dispatcher() -> Dispatcher {
        let manager = LocalManager::new(ManagerOptions::default()).unwrap();
        Dispatcher::new(Arc::new(manager))
    }

    #[smol_potat::test]
    async fn test_unknown_process_is_not_found() {
        let err = dispatcher().dispatch(Request::Wait("missing".into())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[smol_potat::test]
    async fn test_collaborators_default_to_unsupported() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .dispatch(Request::SignalEvent("ready".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);

        let err = dispatcher
            .dispatch(Request::DownloadFile(Default::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[smol_potat::test]
    async fn test_respawn_is_tracked() {
        let dispatcher = dispatcher();
        let Reply::Info(first) = dispatcher
            .dispatch(Request::CreateProcess(CreateOptions::new(["true"])))
            .await
            .unwrap()
        else {
            panic!("expected info");
        };
        dispatcher.dispatch(Request::Wait(first.id.clone())).await.unwrap();

        let Reply::Info(second) = dispatcher.dispatch(Request::Respawn(first.id.clone())).await.unwrap() else {
            panic!("expected info");
        };
        assert_ne!(first.id, second.id);
        assert_eq!(
            dispatcher.dispatch(Request::Wait(second.id.clone())).await.unwrap(),
            Reply::ExitCode(0)
        );
        dispatcher.dispatch(Request::Close).await.unwrap();
    }

    #[smol_potat::test]
    async fn test_buildlogger_urls_missing_is_not_found() {
        let dispatcher = dispatcher();
        let Reply::Info(info) = dispatcher
            .dispatch(Request::CreateProcess(CreateOptions::new(["true"])))
            .await
            .unwrap()
        else {
            panic!("expected info");
        };
        let err = dispatcher
            .dispatch(Request::GetBuildloggerUrls(info.id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        dispatcher.dispatch(Request::Close).await.unwrap();
    }
}
