use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::core::{
    domain::Target,
    traits::{
        compiler::{Compiler, SourceGenerator},
        logger::{InstanceLogger, NoopLogger},
    },
};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct Timeouts {
    /// Multiplier applied to every timeout inside the harness on slow VMs.
    #[serde(default = "default_slowdown")]
    pub slowdown: u32,
}

fn default_slowdown() -> u32 {
    1
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            slowdown: default_slowdown(),
        }
    }
}

/// Platform and binary locations of the fuzzing target.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    pub target: Target,
    pub vm_type: String,
    pub execprog_bin: PathBuf,
    pub executor_bin: PathBuf,
    /// Executor already present in the VM image, used instead of copying
    /// `executor_bin`.
    #[serde(default)]
    pub sys_executor_bin: Option<String>,
    #[serde(default)]
    pub timeouts: Timeouts,
}

#[derive(Clone, Debug)]
pub struct InstanceOptions {
    pub logger: Arc<dyn InstanceLogger>,
    pub old_flags_compat_mode: bool,
    pub before_context_len: Option<usize>,
    pub tracer_bin: Option<PathBuf>,
    pub source_generator: Option<Arc<dyn SourceGenerator>>,
    pub compiler: Option<Arc<dyn Compiler>>,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        InstanceOptions {
            logger: Arc::new(NoopLogger),
            old_flags_compat_mode: false,
            before_context_len: None,
            tracer_bin: None,
            source_generator: None,
            compiler: None,
        }
    }
}

impl InstanceOptions {
    pub fn with_logger(self, logger: Arc<dyn InstanceLogger>) -> Self {
        Self { logger, ..self }
    }

    pub fn with_old_flags_compat_mode(self, old_flags_compat_mode: bool) -> Self {
        Self {
            old_flags_compat_mode,
            ..self
        }
    }

    pub fn with_before_context_len(self, len: usize) -> Self {
        Self {
            before_context_len: Some(len),
            ..self
        }
    }

    pub fn with_tracer_bin<P: Into<PathBuf>>(self, path: P) -> Self {
        Self {
            tracer_bin: Some(path.into()),
            ..self
        }
    }

    pub fn with_source_generator(self, generator: Arc<dyn SourceGenerator>) -> Self {
        Self {
            source_generator: Some(generator),
            ..self
        }
    }

    pub fn with_compiler(self, compiler: Arc<dyn Compiler>) -> Self {
        Self {
            compiler: Some(compiler),
            ..self
        }
    }
}
