use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{
    domain::Report,
    exit::{ExitCondition, ExitReason},
    traits::reporter::Reporter,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("vm is unavailable: {msg}")]
    Unavailable { msg: String },
    #[error("failed to copy {}: {msg}", path.display())]
    Copy { path: PathBuf, msg: String },
    #[error("command transport failed: {msg}")]
    Transport { msg: String },
    #[error("command ended with {reason}, which the run does not allow")]
    UnexpectedExit { reason: ExitReason },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOptions {
    pub exit_condition: ExitCondition,
    /// How much console output preceding a crash the VM should retain.
    pub output_size: Option<usize>,
}

impl RunOptions {
    pub fn new(exit_condition: ExitCondition) -> Self {
        RunOptions {
            exit_condition,
            output_size: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmOutput {
    pub output: Vec<u8>,
    pub report: Option<Report>,
}

/// A single isolated virtual machine. Commands are issued serially.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Vm: std::fmt::Debug + Send + Sync {
    /// Copies a host file into the VM and returns the path it is reachable
    /// under inside the VM.
    async fn copy(&self, host_src: &Path) -> Result<String, VmError>;

    /// Runs `command` for at most `duration`. The implementation is
    /// responsible for killing the process at the deadline.
    async fn run(
        &self,
        duration: Duration,
        reporter: Arc<dyn Reporter>,
        command: &str,
        opts: RunOptions,
    ) -> Result<VmOutput, VmError>;

    async fn close(&mut self);
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait VmPool: std::fmt::Debug + Send + Sync {
    async fn create(&self, index: usize) -> Result<Box<dyn Vm>, VmError>;
}
