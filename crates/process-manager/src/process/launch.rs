//! Launch plumbing shared by both process strategies

use command_executor::{Executor, InputStream, OutputStream, Signal};
use futures::future::{Either, select};
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::SpawnContext;
use super::state::Exit;
use crate::error::{Error, Result};
use crate::info::ProcessInfo;
use crate::logging::ResolvedOutput;
use crate::options::CreateOptions;

/// A started executor and everything attached to it
pub(crate) struct Spawned {
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) output: ResolvedOutput,
    pub(crate) token: CancellationToken,
    pub(crate) info: ProcessInfo,
}

/// Resolve output, build the executor, attach stdio and start it.
///
/// The executor's token is a child of the manager's, never of the caller's
/// request, so a finished request leaves the process running.
pub(crate) async fn spawn(mut options: CreateOptions, ctx: &SpawnContext) -> Result<Spawned> {
    options.validate()?;
    let id = Uuid::new_v4().to_string();
    let token = ctx.token.child_token();
    let output = options.output.resolve()?;

    let command = options.command(&ctx.manager_id)?;
    let executor: Arc<dyn Executor> = Arc::from(options.target.executor(command, token.clone()));

    if let Err(e) = attach(executor.as_ref(), &options, &output) {
        abandon(executor.as_ref(), &output, &token).await;
        return Err(e);
    }

    if let Err(e) = executor.start().await {
        abandon(executor.as_ref(), &output, &token).await;
        return Err(e.into());
    }

    let info = ProcessInfo::started(id, executor.pid(), options);
    info!(
        process = %info.id,
        pid = info.pid,
        target = info.options.target.kind(),
        args = ?info.options.args,
        "started process"
    );
    Ok(Spawned {
        executor,
        output,
        token,
        info,
    })
}

fn attach(
    executor: &dyn Executor,
    options: &CreateOptions,
    output: &ResolvedOutput,
) -> Result<()> {
    let stdin: Option<InputStream> = match (&options.standard_input_bytes, &options.standard_input) {
        (Some(bytes), _) => Some(Box::new(futures::io::Cursor::new(bytes.clone()))),
        (None, Some(handle)) => handle.take(),
        (None, None) => None,
    };
    executor.set_stdin(stdin)?;
    executor.set_stdout(output.output_writer().map(|w| Box::new(w) as OutputStream))?;
    executor.set_stderr(output.error_writer().map(|w| Box::new(w) as OutputStream))?;
    Ok(())
}

async fn abandon(executor: &dyn Executor, output: &ResolvedOutput, token: &CancellationToken) {
    executor.close().await;
    token.cancel();
    if let Err(e) = output.close() {
        warn!(error = %e, "failed to close output after failed start");
    }
}

/// Wait for the executor and describe how it ended
pub(crate) async fn wait_for_exit(executor: &dyn Executor) -> Exit {
    let result = executor.wait().await;
    let signal = executor.signal_info();
    match result {
        Ok(code) => Exit {
            code,
            signal,
            error: None,
        },
        Err(e) => {
            let code = executor.exit_code();
            let error = Error::from(e);
            Exit {
                code: if code < 0 { 1 } else { code },
                signal,
                error: Some((error.kind(), error.to_string())),
            }
        }
    }
}

/// Kill the process once `timeout` elapses unless `finished` fires first.
/// `mark` runs before the kill so the exit is attributed to the timeout.
pub(crate) fn spawn_watchdog<F>(
    id: String,
    timeout: Duration,
    finished: CancellationToken,
    executor: Arc<dyn Executor>,
    mark: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    smol::spawn(async move {
        let expired = {
            let timer = pin!(smol::Timer::after(timeout));
            let done = pin!(finished.cancelled());
            matches!(select(timer, done).await, Either::Left(_))
        };
        if !expired {
            return;
        }

        mark.await;
        debug!(process = %id, ?timeout, "process timed out, killing");
        match executor.signal(Signal::KILL).await {
            Ok(()) | Err(command_executor::Error::AlreadyExited) => {}
            Err(e) => warn!(process = %id, error = %e, "failed to kill timed out process"),
        }
    })
    .detach();
}

/// Release the substrate and sinks of a completed process
pub(crate) async fn release(
    id: &str,
    executor: &dyn Executor,
    output: &ResolvedOutput,
    token: &CancellationToken,
) {
    executor.close().await;
    token.cancel();
    if let Err(e) = output.close() {
        warn!(process = %id, error = %e, "failed to close process output");
    }
}
