use std::fmt;

use crate::core::traits::{
    compiler::BuildError,
    vm::{Vm, VmError},
};

/// Files the instance places into the VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Artifact {
    Execprog,
    Executor,
    Tracer,
    Program,
    Binary,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Artifact::Execprog => "execprog binary",
            Artifact::Executor => "executor binary",
            Artifact::Tracer => "tracer binary",
            Artifact::Program => "program file",
            Artifact::Binary => "reproducer binary",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    VmCreation,
    Provisioning,
    RunInfrastructure,
    Compilation,
    LocalIo,
}

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("failed to create VM: {0}")]
    VmCreation(#[source] VmError),
    #[error("failed to copy {artifact} to VM: {source}")]
    Provisioning {
        artifact: Artifact,
        #[source]
        source: VmError,
    },
    #[error("failed to run command in VM: {0}")]
    RunInfrastructure(#[source] VmError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("local file operation failed: {0}")]
    LocalIo(#[from] std::io::Error),
}

impl InstanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstanceError::VmCreation(_) => ErrorKind::VmCreation,
            InstanceError::Provisioning { .. } => ErrorKind::Provisioning,
            InstanceError::RunInfrastructure(_) => ErrorKind::RunInfrastructure,
            InstanceError::Build(_) => ErrorKind::Compilation,
            InstanceError::LocalIo(_) => ErrorKind::LocalIo,
        }
    }
}

/// Setup failure that returns ownership of the VM to the caller.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SetupError {
    pub vm: Box<dyn Vm>,
    #[source]
    pub error: InstanceError,
}
