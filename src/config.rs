use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::DEFAULT_COMPILE_TIMEOUT_SECS;
use crate::core::{
    options::{InstanceOptions, ManagerConfig},
    traits::logger::InstanceLogger,
};
use crate::native::compiler::NativeCompiler;

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct InstanceSettings {
    #[serde(default)]
    pub old_flags_compat_mode: bool,
    #[serde(default)]
    pub before_context_len: Option<usize>,
    #[serde(default)]
    pub tracer_bin: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PoolSettings {
    #[serde(default = "default_pool_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
}

pub fn default_pool_dir() -> PathBuf {
    PathBuf::from("./.execprog_vms")
}

fn default_shell() -> PathBuf {
    PathBuf::from("/bin/sh")
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            base_dir: default_pool_dir(),
            shell: default_shell(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CompilerSettings {
    #[serde(default = "default_cc")]
    pub cc: PathBuf,
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    #[serde(default = "default_compile_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_cc() -> PathBuf {
    PathBuf::from("/usr/bin/cc")
}

fn default_build_dir() -> PathBuf {
    std::env::temp_dir().join("execprog-runner")
}

fn default_compile_timeout_secs() -> u64 {
    DEFAULT_COMPILE_TIMEOUT_SECS
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            cc: default_cc(),
            build_dir: default_build_dir(),
            timeout_secs: default_compile_timeout_secs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    pub manager: ManagerConfig,
    #[serde(default)]
    pub instance: InstanceSettings,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub compiler: CompilerSettings,
}

impl RunnerConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: RunnerConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    pub fn instance_options(&self, logger: Arc<dyn InstanceLogger>) -> InstanceOptions {
        let mut options = InstanceOptions::default()
            .with_logger(logger)
            .with_old_flags_compat_mode(self.instance.old_flags_compat_mode)
            .with_compiler(Arc::new(
                NativeCompiler::new(&self.compiler.build_dir, &self.compiler.cc)
                    .with_timeout(Duration::from_secs(self.compiler.timeout_secs)),
            ));
        if let Some(len) = self.instance.before_context_len {
            options = options.with_before_context_len(len);
        }
        if let Some(tracer) = &self.instance.tracer_bin {
            options = options.with_tracer_bin(tracer);
        }
        options
    }
}
