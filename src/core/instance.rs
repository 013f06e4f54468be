use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempPath;
use tokio::time::Instant;

use crate::constants::{LOG_IMPORTANT, LOG_VERBOSE};
use crate::core::{
    command::{ExecprogCmd, tracer_preamble, wrap_with_tracer},
    domain::{CompileOptions, Program, Report, Target},
    errors::{Artifact, InstanceError, SetupError},
    exit::ExitCondition,
    options::{InstanceOptions, ManagerConfig},
    traits::{
        compiler::BuildError,
        reporter::Reporter,
        vm::{RunOptions, Vm, VmOutput, VmPool},
    },
};

#[derive(Clone, Debug)]
pub struct RunResult {
    pub output: Vec<u8>,
    /// `None` when the output carried no recognized fault signature.
    pub report: Option<Report>,
    pub duration: Duration,
}

/// Runs programs inside one VM.
///
/// The instance owns its VM until [`ExecProgInstance::close`] is called.
/// `close` must be called on every instance, also after a run failed with
/// [`InstanceError::RunInfrastructure`]; dropping an instance does not
/// release the VM.
#[derive(Debug)]
pub struct ExecProgInstance {
    execprog_bin: String,
    executor_bin: String,
    tracer_bin: Option<String>,
    reporter: Arc<dyn Reporter>,
    config: Arc<ManagerConfig>,
    options: InstanceOptions,
    vm: Box<dyn Vm>,
}

impl ExecProgInstance {
    /// Copies the harness, executor and optional tracer into `vm`. On failure
    /// the VM is handed back inside the error and stays the caller's to close.
    #[tracing::instrument(skip_all)]
    pub async fn setup(
        vm: Box<dyn Vm>,
        config: Arc<ManagerConfig>,
        reporter: Arc<dyn Reporter>,
        options: InstanceOptions,
    ) -> Result<Self, SetupError> {
        match Self::provision(vm.as_ref(), &config, &options).await {
            Ok((execprog_bin, executor_bin, tracer_bin)) => Ok(ExecProgInstance {
                execprog_bin,
                executor_bin,
                tracer_bin,
                reporter,
                config,
                options,
                vm,
            }),
            Err(error) => Err(SetupError { vm, error }),
        }
    }

    /// Allocates VM `index` from `pool` and sets it up. The VM is closed
    /// again if setup fails.
    #[tracing::instrument(skip(pool, config, reporter, options))]
    pub async fn create(
        pool: &dyn VmPool,
        index: usize,
        config: Arc<ManagerConfig>,
        reporter: Arc<dyn Reporter>,
        options: InstanceOptions,
    ) -> Result<Self, InstanceError> {
        let vm = pool.create(index).await.map_err(InstanceError::VmCreation)?;
        match Self::setup(vm, config, reporter, options).await {
            Ok(instance) => Ok(instance),
            Err(SetupError { mut vm, error }) => {
                tracing::debug!("Setup of VM {} failed, closing it: {}", index, error);
                vm.close().await;
                Err(error)
            }
        }
    }

    async fn provision(
        vm: &dyn Vm,
        config: &ManagerConfig,
        options: &InstanceOptions,
    ) -> Result<(String, String, Option<String>), InstanceError> {
        let execprog_bin = copy_artifact(vm, &config.execprog_bin, Artifact::Execprog).await?;
        let executor_bin = match &config.sys_executor_bin {
            Some(bin) => bin.clone(),
            None => copy_artifact(vm, &config.executor_bin, Artifact::Executor).await?,
        };
        let tracer_bin = match &options.tracer_bin {
            Some(bin) => Some(copy_artifact(vm, bin, Artifact::Tracer).await?),
            None => None,
        };
        Ok((execprog_bin, executor_bin, tracer_bin))
    }

    /// Generates reproducer source for `program`, compiles and runs it.
    #[tracing::instrument(skip(self, program, opts))]
    pub async fn run_c_prog(
        &self,
        program: &Program,
        duration: Duration,
        opts: &CompileOptions,
    ) -> Result<RunResult, InstanceError> {
        let generator = self
            .options
            .source_generator
            .as_ref()
            .ok_or_else(|| BuildError::Unavailable {
                what: "source generator".to_string(),
            })?;
        let source = generator.generate(program, opts)?;
        self.options.logger.log(
            LOG_VERBOSE,
            &format!(
                "testing compiled C program (duration={:?}, {:?}): {}",
                duration, opts, program
            ),
        );
        self.run_c_prog_raw(&source, &program.target, duration).await
    }

    /// Compiles `source` on the host and runs the binary in the VM. The
    /// binary is removed when the call returns.
    #[tracing::instrument(skip(self, source))]
    pub async fn run_c_prog_raw(
        &self,
        source: &[u8],
        target: &Target,
        duration: Duration,
    ) -> Result<RunResult, InstanceError> {
        let compiler = self
            .options
            .compiler
            .as_ref()
            .ok_or_else(|| BuildError::Unavailable {
                what: "compiler".to_string(),
            })?;
        let bin = compiler.compile(target, source).await?;
        let bin = match TempPath::try_from_path(&bin) {
            Ok(bin) => bin,
            Err(e) => {
                let _ = tokio::fs::remove_file(&bin).await;
                return Err(e.into());
            }
        };
        self.run_binary(&bin, duration).await
    }

    async fn run_binary(&self, bin: &Path, duration: Duration) -> Result<RunResult, InstanceError> {
        let vm_bin = copy_artifact(self.vm.as_ref(), bin, Artifact::Binary).await?;
        self.run_command(vm_bin, duration, ExitCondition::RAW_BINARY).await
    }

    /// Runs a serialized program already stored on the host through the
    /// harness.
    #[tracing::instrument(skip(self, opts))]
    pub async fn run_syz_prog_file(
        &self,
        prog_file: &Path,
        duration: Duration,
        opts: &CompileOptions,
        exit_condition: ExitCondition,
    ) -> Result<RunResult, InstanceError> {
        let vm_prog_file = copy_artifact(self.vm.as_ref(), prog_file, Artifact::Program).await?;
        let target = &self.config.target;
        let command = ExecprogCmd {
            execprog: &self.execprog_bin,
            executor: &self.executor_bin,
            os: target.os,
            arch: &target.arch,
            vm_type: &self.config.vm_type,
            opts,
            optional_flags: !self.options.old_flags_compat_mode,
            slowdown: self.config.timeouts.slowdown,
            prog_file: &vm_prog_file,
        }
        .build();
        self.run_command(command, duration, exit_condition).await
    }

    /// Writes `prog` to a temporary host file and runs it through the
    /// harness. The file is removed when the call returns.
    #[tracing::instrument(skip(self, prog, opts))]
    pub async fn run_syz_prog(
        &self,
        prog: &[u8],
        duration: Duration,
        opts: &CompileOptions,
        exit_condition: ExitCondition,
    ) -> Result<RunResult, InstanceError> {
        let prog_file = write_temp_file(prog).await?;
        self.run_syz_prog_file(&prog_file, duration, opts, exit_condition).await
    }

    async fn run_command(
        &self,
        mut command: String,
        duration: Duration,
        exit_condition: ExitCondition,
    ) -> Result<RunResult, InstanceError> {
        let mut prefix_output = Vec::new();
        if let Some(tracer) = &self.tracer_bin {
            command = wrap_with_tracer(tracer, self.config.target.os, &command);
            prefix_output = tracer_preamble(&command);
        }

        let run_opts = RunOptions {
            exit_condition,
            output_size: self.options.before_context_len,
        };
        tracing::debug!("Running in VM: {}", command);
        let start = Instant::now();
        let VmOutput { output, report } = self
            .vm
            .run(duration, self.reporter.clone(), &command, run_opts)
            .await
            .map_err(InstanceError::RunInfrastructure)?;
        let duration = start.elapsed();

        let report = match report {
            None => {
                self.options.logger.log(LOG_VERBOSE, "program did not crash");
                None
            }
            Some(report) => {
                let report = self.symbolize(report);
                self.options
                    .logger
                    .log(LOG_VERBOSE, &format!("program crashed: {}", report.title));
                Some(report)
            }
        };

        prefix_output.extend_from_slice(&output);
        Ok(RunResult {
            output: prefix_output,
            report,
            duration,
        })
    }

    /// Returns the symbolized report, or the original one if symbolization
    /// failed.
    fn symbolize(&self, report: Report) -> Report {
        let mut symbolized = report.clone();
        match self.reporter.symbolize(&mut symbolized) {
            Ok(()) => symbolized,
            Err(err) => {
                self.options.logger.log(
                    LOG_IMPORTANT,
                    &format!("failed to symbolize report: {}", err),
                );
                report
            }
        }
    }

    pub fn execprog_bin(&self) -> &str {
        &self.execprog_bin
    }

    pub fn executor_bin(&self) -> &str {
        &self.executor_bin
    }

    pub fn tracer_bin(&self) -> Option<&str> {
        self.tracer_bin.as_deref()
    }

    /// Releases the VM.
    pub async fn close(mut self) {
        self.vm.close().await;
    }
}

async fn copy_artifact(
    vm: &dyn Vm,
    path: &Path,
    artifact: Artifact,
) -> Result<String, InstanceError> {
    vm.copy(path)
        .await
        .map_err(|source| InstanceError::Provisioning { artifact, source })
}

async fn write_temp_file(data: &[u8]) -> Result<TempPath, InstanceError> {
    let temp_path = tempfile::Builder::new()
        .prefix("prog-")
        .tempfile()?
        .into_temp_path();
    tokio::fs::write(&temp_path, data).await?;
    Ok(temp_path)
}
