//! Process supervision on top of `command-executor`.
//!
//! A [`Manager`] creates and tracks [`Process`]es. Each process wraps an
//! executor with an id, completion and signal triggers, tags, an optional
//! timeout and follow-up processes. Child output is routed into log sinks,
//! and each manager owns a [`LoggingCache`] of named sinks that can be fed
//! directly.
//!
//! ```no_run
//! use process_manager::{CreateOptions, LocalManager, Manager, ManagerOptions, Process};
//! use process_manager::logging::{LoggerConfig, OutputOptions};
//!
//! # async fn example() -> process_manager::Result<()> {
//! let manager = LocalManager::new(ManagerOptions::default())?;
//! let mut options = CreateOptions::new(["echo", "hello"]);
//! options.output = OutputOptions::with_loggers(vec![LoggerConfig::in_memory(100)]);
//!
//! let process = manager.create_process(options).await?;
//! assert_eq!(process.wait().await?, 0);
//! let stream = process.log_stream(10).await?;
//! assert_eq!(stream.logs, vec!["hello"]);
//! manager.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod files;
pub mod info;
pub mod logging;
pub mod manager;
pub mod options;
pub mod process;
mod sync;

pub use error::{Error, ErrorKind, Result};
pub use files::{WriteFileInfo, write_file};
pub use info::{LogStream, ProcessInfo};
pub use logging::{CacheOptions, CachedLogger, LocalLoggingCache, LoggingCache, LoggingPayload};
pub use manager::{LocalManager, Manager, ManagerOptions};
pub use options::{CreateOptions, Filter, ImplementationHint, MANAGER_ID_ENV, StdinHandle};
pub use process::{
    BasicProcess, BlockingProcess, Process, ProcessRef, ProcessTrigger, SignalTrigger, SignalTriggerId,
    SpawnContext, new_process,
};

// Re-exported so callers need not depend on the executor crate directly
pub use command_executor::{Signal, Target};
