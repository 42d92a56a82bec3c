//! Runtime-agnostic command execution library
//!
//! This crate provides one contract, [`Executor`], for running a command on
//! three substrates: local processes, Docker containers, and remote SSH
//! hosts. It also carries the per-platform signal tables those substrates
//! need and the pumps that connect a child's standard streams to the
//! caller's readers and writers.

#![warn(missing_docs)]

pub mod backends;
pub mod command;
pub mod error;
pub mod executor;
pub mod signal;
pub mod stdio;
pub mod target;

pub use command::Command;
pub use error::{Error, Result};
pub use executor::{ExitState, Executor, SignalInfo};
pub use signal::{Platform, Signal};
pub use stdio::{InputStream, OutputStream, SharedBuffer};
pub use target::Target;
