//! Process strategy that funnels every operation through one owning task

use async_trait::async_trait;
use command_executor::{Executor, Signal};
use futures::channel::oneshot;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::launch::{self, Spawned};
use super::state::{Exit, ProcessState};
use super::triggers::{ProcessTrigger, SignalTrigger, fire_triggers, suppressed};
use super::{Process, ProcessRef, SpawnContext, drain_logs, new_process};
use crate::error::{Error, Result};
use crate::info::{LogStream, ProcessInfo};
use crate::logging::ResolvedOutput;
use crate::options::CreateOptions;

enum Op {
    Info(oneshot::Sender<ProcessInfo>),
    Signal(Signal, oneshot::Sender<Result<()>>),
    Wait(oneshot::Sender<Result<i32>>),
    RegisterTrigger(ProcessTrigger, oneshot::Sender<Result<()>>),
    RegisterSignalTrigger(SignalTrigger, oneshot::Sender<()>),
    Tag(String, oneshot::Sender<()>),
    GetTags(oneshot::Sender<Vec<String>>),
    ResetTags(oneshot::Sender<()>),
    TimedOut,
    Exited(Exit),
}

/// A process whose state is owned by a single task.
///
/// Callers send requests and receive replies over channels, so operations on
/// one process are processed strictly one at a time.
#[derive(Debug)]
pub struct BlockingProcess {
    id: String,
    ctx: SpawnContext,
    output: ResolvedOutput,
    ops: async_channel::Sender<Op>,
}

impl BlockingProcess {
    /// Launch a process for `options`
    pub async fn start(options: CreateOptions, ctx: SpawnContext) -> Result<Self> {
        let Spawned {
            executor,
            output,
            token,
            info,
        } = launch::spawn(options, &ctx).await?;

        let id = info.id.clone();
        let timeout = info.options.timeout();
        let (ops, inbox) = async_channel::unbounded();
        let finished = CancellationToken::new();

        smol::spawn(run(
            ProcessState::new(info),
            inbox,
            executor.clone(),
            output.clone(),
            token,
        ))
        .detach();

        if let Some(timeout) = timeout {
            let ops = ops.clone();
            launch::spawn_watchdog(id.clone(), timeout, finished.clone(), executor.clone(), async move {
                let _ = ops.send(Op::TimedOut).await;
            });
        }

        {
            let ops = ops.clone();
            smol::spawn(async move {
                let exit = launch::wait_for_exit(executor.as_ref()).await;
                finished.cancel();
                let _ = ops.send(Op::Exited(exit)).await;
            })
            .detach();
        }

        Ok(Self {
            id,
            ctx,
            output,
            ops,
        })
    }

    async fn ask<T>(&self, op: impl FnOnce(oneshot::Sender<T>) -> Op) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.ops
            .send(op(reply))
            .await
            .map_err(|_| Error::cancelled("process task stopped"))?;
        response
            .await
            .map_err(|_| Error::cancelled("process task stopped"))
    }
}

async fn run(
    mut state: ProcessState,
    inbox: async_channel::Receiver<Op>,
    executor: Arc<dyn Executor>,
    output: ResolvedOutput,
    token: CancellationToken,
) {
    let mut waiters: Vec<oneshot::Sender<Result<i32>>> = Vec::new();

    while let Ok(op) = inbox.recv().await {
        match op {
            Op::Info(reply) => {
                let _ = reply.send(state.info());
            }
            Op::Signal(signal, reply) => {
                let result = if state.is_complete() {
                    Err(Error::AlreadyComplete)
                } else {
                    deliver(state.info(), state.signal_triggers(), executor.as_ref(), signal).await
                };
                let _ = reply.send(result);
            }
            Op::Wait(reply) => {
                if state.is_complete() {
                    let _ = reply.send(state.wait_result());
                } else {
                    waiters.push(reply);
                }
            }
            Op::RegisterTrigger(trigger, reply) => {
                let _ = reply.send(state.register_trigger(trigger));
            }
            Op::RegisterSignalTrigger(trigger, reply) => {
                state.register_signal_trigger(trigger);
                let _ = reply.send(());
            }
            Op::Tag(tag, reply) => {
                state.tag(&tag);
                let _ = reply.send(());
            }
            Op::GetTags(reply) => {
                let _ = reply.send(state.tags());
            }
            Op::ResetTags(reply) => {
                state.reset_tags();
                let _ = reply.send(());
            }
            Op::TimedOut => state.mark_timed_out(),
            Op::Exited(exit) => {
                let (triggers, info) = state.complete(exit);
                debug!(process = %info.id, code = info.exit_code, timed_out = info.timed_out, "process complete");
                fire_triggers(triggers, &info);
                for waiter in waiters.drain(..) {
                    let _ = waiter.send(state.wait_result());
                }

                let executor = executor.clone();
                let output = output.clone();
                let token = token.clone();
                smol::spawn(async move {
                    launch::release(&info.id, executor.as_ref(), &output, &token).await;
                })
                .detach();
            }
        }
    }
}

async fn deliver(
    info: ProcessInfo,
    triggers: Vec<SignalTrigger>,
    executor: &dyn Executor,
    signal: Signal,
) -> Result<()> {
    if suppressed(&triggers, &info, signal) {
        debug!(process = %info.id, %signal, "signal suppressed by trigger");
        return Ok(());
    }
    match executor.signal(signal).await {
        Err(command_executor::Error::AlreadyExited) => Err(Error::AlreadyComplete),
        other => other.map_err(Error::from),
    }
}

#[async_trait]
impl Process for BlockingProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn info(&self) -> Result<ProcessInfo> {
        self.ask(Op::Info).await
    }

    async fn running(&self) -> Result<bool> {
        Ok(self.info().await?.is_running)
    }

    async fn complete(&self) -> Result<bool> {
        Ok(self.info().await?.complete)
    }

    async fn signal(&self, signal: Signal) -> Result<()> {
        self.ask(|reply| Op::Signal(signal, reply)).await?
    }

    async fn wait(&self) -> Result<i32> {
        self.ask(Op::Wait).await?
    }

    async fn respawn(&self) -> Result<ProcessRef> {
        let options = self.info().await?.options;
        new_process(options, &self.ctx).await
    }

    async fn register_trigger(&self, trigger: ProcessTrigger) -> Result<()> {
        self.ask(|reply| Op::RegisterTrigger(trigger, reply)).await?
    }

    async fn register_signal_trigger(&self, trigger: SignalTrigger) -> Result<()> {
        self.ask(|reply| Op::RegisterSignalTrigger(trigger, reply)).await
    }

    async fn tag(&self, tag: &str) -> Result<()> {
        let tag = tag.to_string();
        self.ask(|reply| Op::Tag(tag, reply)).await
    }

    async fn get_tags(&self) -> Result<Vec<String>> {
        self.ask(Op::GetTags).await
    }

    async fn reset_tags(&self) -> Result<()> {
        self.ask(Op::ResetTags).await
    }

    async fn log_stream(&self, count: usize) -> Result<LogStream> {
        let complete = self.complete().await?;
        Ok(drain_logs(&self.output, count, complete))
    }
}
