pub mod config;
pub mod constants;
pub mod core;
pub mod native;

#[cfg(test)]
mod integration_test;

pub use crate::core::{
    domain::{CompileOptions, Os, Program, Report, Sandbox, Target},
    errors::{ErrorKind, InstanceError},
    exit::{ExitCondition, ExitReason},
    instance::{ExecProgInstance, RunResult},
    options::{InstanceOptions, ManagerConfig},
};
