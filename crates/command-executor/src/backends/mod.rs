//! Backend implementations for different execution substrates
//!
//! Every backend implements [`Executor`](crate::executor::Executor). The ssh
//! backend reuses the local one to drive the `ssh` client; the docker backend
//! drives the `docker` CLI directly.

pub mod local;
pub use local::LocalExecutor;

#[cfg(feature = "ssh")]
pub mod ssh;
#[cfg(feature = "ssh")]
pub use ssh::{SshConfig, SshExecutor};

#[cfg(feature = "docker")]
pub mod docker;
#[cfg(feature = "docker")]
pub use docker::{DockerConfig, DockerExecutor};
