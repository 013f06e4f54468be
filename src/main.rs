use std::io::Write;
use std::panic;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use execprog_runner::config::RunnerConfig;
use execprog_runner::core::traits::logger::TracingLogger;
use execprog_runner::native::{reporter::ConsoleReporter, vm::LocalPool};
use execprog_runner::{CompileOptions, ExecProgInstance, ExitCondition, RunResult, Sandbox};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config: PathBuf,
    /// Index of the VM to allocate from the pool.
    #[clap(long, default_value_t = 0)]
    index: usize,
    #[clap(short, long, default_value_t = 60)]
    duration_secs: u64,
    #[clap(subcommand)]
    command: RunCommand,
}

#[derive(Subcommand, Debug)]
enum RunCommand {
    /// Replay a serialized program through the harness.
    Prog {
        file: PathBuf,
        /// Treat a nonzero harness exit as an ordinary outcome.
        #[clap(long)]
        allow_error_exit: bool,
        #[clap(long)]
        repeat: bool,
        #[clap(long)]
        threaded: bool,
        #[clap(long, default_value_t = 1)]
        procs: u32,
        #[clap(long, value_enum, default_value_t = SandboxArg::None)]
        sandbox: SandboxArg,
    },
    /// Compile a C reproducer on the host and run it.
    Source { file: PathBuf },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SandboxArg {
    None,
    Setuid,
    Namespace,
    Android,
}

impl From<SandboxArg> for Sandbox {
    fn from(arg: SandboxArg) -> Self {
        match arg {
            SandboxArg::None => Sandbox::None,
            SandboxArg::Setuid => Sandbox::Setuid,
            SandboxArg::Namespace => Sandbox::Namespace,
            SandboxArg::Android => Sandbox::Android,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let cli = Cli::parse();
    let config = RunnerConfig::load_from_file(&cli.config)?;
    tracing::debug!("Effective configuration: {:?}", config);

    let pool = LocalPool::new(&config.pool.base_dir, &config.pool.shell);
    let instance = ExecProgInstance::create(
        &pool,
        cli.index,
        Arc::new(config.manager.clone()),
        Arc::new(ConsoleReporter::new()),
        config.instance_options(Arc::new(TracingLogger)),
    )
    .await
    .with_context(|| format!("Failed to create VM {}", cli.index))?;

    let duration = Duration::from_secs(cli.duration_secs);
    let result = run_and_close(instance, &config, cli.index, cli.command, duration).await?;
    print_result(&result)?;
    Ok(())
}

/// Runs `command` and closes the instance whatever the outcome.
async fn run_and_close(
    instance: ExecProgInstance,
    config: &RunnerConfig,
    index: usize,
    command: RunCommand,
    duration: Duration,
) -> Result<RunResult, anyhow::Error> {
    let result = run(&instance, config, command, duration)
        .await
        .with_context(|| format!("Run in VM {} failed", index));
    if let Err(e) = &result {
        tracing::warn!("{:#}, closing the VM", e);
    }
    instance.close().await;
    result
}

async fn run(
    instance: &ExecProgInstance,
    config: &RunnerConfig,
    command: RunCommand,
    duration: Duration,
) -> Result<RunResult, anyhow::Error> {
    let result = match command {
        RunCommand::Prog {
            file,
            allow_error_exit,
            repeat,
            threaded,
            procs,
            sandbox,
        } => {
            let opts = CompileOptions {
                repeat,
                threaded,
                procs,
                sandbox: sandbox.into(),
                ..Default::default()
            };
            let exit_condition = if allow_error_exit {
                ExitCondition::RAW_BINARY
            } else {
                ExitCondition::HARNESS
            };
            instance
                .run_syz_prog_file(&file, duration, &opts, exit_condition)
                .await?
        }
        RunCommand::Source { file } => {
            let source = tokio::fs::read(&file)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read source {:?}: {}", file, e))?;
            instance
                .run_c_prog_raw(&source, &config.manager.target, duration)
                .await?
        }
    };
    Ok(result)
}

fn print_result(result: &RunResult) -> Result<(), anyhow::Error> {
    std::io::stdout().write_all(&result.output)?;
    match &result.report {
        Some(report) => tracing::info!(
            "Program crashed after {:?}: {}",
            result.duration,
            report.title
        ),
        None => tracing::info!("Program did not crash ({:?})", result.duration),
    }
    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
