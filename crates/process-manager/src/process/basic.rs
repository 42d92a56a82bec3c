//! Process strategy guarding its state with a lock

use async_trait::async_trait;
use command_executor::{Executor, Signal};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::launch::{self, Spawned};
use super::state::ProcessState;
use super::triggers::{ProcessTrigger, SignalTrigger, fire_triggers, suppressed};
use super::{Process, ProcessRef, SpawnContext, drain_logs, new_process};
use crate::error::{Error, Result};
use crate::info::{LogStream, ProcessInfo};
use crate::logging::ResolvedOutput;
use crate::sync::lock;

/// A process whose state sits behind a mutex.
///
/// A background task waits for the executor, records the exit, fires the
/// completion triggers and only then releases the waiters.
#[derive(Debug)]
pub struct BasicProcess {
    id: String,
    ctx: SpawnContext,
    executor: Arc<dyn Executor>,
    output: ResolvedOutput,
    state: Arc<Mutex<ProcessState>>,
    signalling: futures::lock::Mutex<()>,
    done: async_channel::Receiver<()>,
}

impl BasicProcess {
    /// Launch a process for `options`
    pub async fn start(options: crate::options::CreateOptions, ctx: SpawnContext) -> Result<Self> {
        let Spawned {
            executor,
            output,
            token,
            info,
        } = launch::spawn(options, &ctx).await?;

        let id = info.id.clone();
        let timeout = info.options.timeout();
        let state = Arc::new(Mutex::new(ProcessState::new(info)));
        let (notify, done) = async_channel::bounded::<()>(1);
        let finished = CancellationToken::new();

        if let Some(timeout) = timeout {
            let state = state.clone();
            launch::spawn_watchdog(id.clone(), timeout, finished.clone(), executor.clone(), async move {
                lock(&state).mark_timed_out();
            });
        }

        {
            let id = id.clone();
            let executor = executor.clone();
            let output = output.clone();
            let state = state.clone();
            smol::spawn(async move {
                let exit = launch::wait_for_exit(executor.as_ref()).await;
                finished.cancel();
                let (triggers, info) = lock(&state).complete(exit);
                debug!(process = %id, code = info.exit_code, timed_out = info.timed_out, "process complete");
                fire_triggers(triggers, &info);
                drop(notify);
                launch::release(&id, executor.as_ref(), &output, &token).await;
            })
            .detach();
        }

        Ok(Self {
            id,
            ctx,
            executor,
            output,
            state,
            signalling: futures::lock::Mutex::new(()),
            done,
        })
    }
}

#[async_trait]
impl Process for BasicProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn info(&self) -> Result<ProcessInfo> {
        Ok(lock(&self.state).info())
    }

    async fn running(&self) -> Result<bool> {
        Ok(lock(&self.state).info().is_running)
    }

    async fn complete(&self) -> Result<bool> {
        Ok(lock(&self.state).is_complete())
    }

    async fn signal(&self, signal: Signal) -> Result<()> {
        let _serial = self.signalling.lock().await;
        let (info, triggers) = {
            let state = lock(&self.state);
            if state.is_complete() {
                return Err(Error::AlreadyComplete);
            }
            (state.info(), state.signal_triggers())
        };

        if suppressed(&triggers, &info, signal) {
            debug!(process = %self.id, %signal, "signal suppressed by trigger");
            return Ok(());
        }

        match self.executor.signal(signal).await {
            Err(command_executor::Error::AlreadyExited) => Err(Error::AlreadyComplete),
            other => other.map_err(Error::from),
        }
    }

    async fn wait(&self) -> Result<i32> {
        // Never sent on; closes once completion triggers have run
        let _ = self.done.recv().await;
        lock(&self.state).wait_result()
    }

    async fn respawn(&self) -> Result<ProcessRef> {
        let options = lock(&self.state).info().options;
        new_process(options, &self.ctx).await
    }

    async fn register_trigger(&self, trigger: ProcessTrigger) -> Result<()> {
        lock(&self.state).register_trigger(trigger)
    }

    async fn register_signal_trigger(&self, trigger: SignalTrigger) -> Result<()> {
        lock(&self.state).register_signal_trigger(trigger);
        Ok(())
    }

    async fn tag(&self, tag: &str) -> Result<()> {
        lock(&self.state).tag(tag);
        Ok(())
    }

    async fn get_tags(&self) -> Result<Vec<String>> {
        Ok(lock(&self.state).tags())
    }

    async fn reset_tags(&self) -> Result<()> {
        lock(&self.state).reset_tags();
        Ok(())
    }

    async fn log_stream(&self, count: usize) -> Result<LogStream> {
        let complete = lock(&self.state).is_complete();
        Ok(drain_logs(&self.output, count, complete))
    }
}
