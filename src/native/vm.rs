use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::{
    fs,
    io::AsyncReadExt,
    process::{ChildStdout, Command},
    sync::mpsc,
    time::{Instant, timeout, timeout_at},
};
use uuid::Uuid;

use crate::constants::OUTPUT_DRAIN_GRACE_MS;
use crate::core::{
    domain::Report,
    exit::ExitReason,
    traits::{
        reporter::Reporter,
        vm::{RunOptions, Vm, VmError, VmOutput, VmPool},
    },
};

/// Hands out [`LocalVm`]s, each backed by a fresh directory under
/// `base_dir`.
#[derive(Clone, Debug)]
pub struct LocalPool {
    base_dir: PathBuf,
    shell: PathBuf,
}

impl LocalPool {
    pub fn new<T, U>(base_dir: T, shell: U) -> Self
    where
        T: AsRef<Path>,
        U: AsRef<Path>,
    {
        LocalPool {
            base_dir: base_dir.as_ref().into(),
            shell: shell.as_ref().into(),
        }
    }
}

#[async_trait::async_trait]
impl VmPool for LocalPool {
    async fn create(&self, index: usize) -> Result<Box<dyn Vm>, VmError> {
        let workdir = self
            .base_dir
            .join(format!("vm-{}-{}", index, Uuid::new_v4()));
        fs::create_dir_all(&workdir)
            .await
            .map_err(|e| VmError::Unavailable {
                msg: format!("failed to create {}: {}", workdir.display(), e),
            })?;
        tracing::debug!("Created local VM {} in {}", index, workdir.display());

        Ok(Box::new(LocalVm {
            index,
            workdir,
            shell: self.shell.clone(),
        }))
    }
}

/// Runs commands on the host through a shell, inside a private work
/// directory.
#[derive(Debug)]
pub struct LocalVm {
    index: usize,
    workdir: PathBuf,
    shell: PathBuf,
}

impl LocalVm {
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}

#[async_trait::async_trait]
impl Vm for LocalVm {
    async fn copy(&self, host_src: &Path) -> Result<String, VmError> {
        let copy_error = |msg: String| VmError::Copy {
            path: host_src.to_path_buf(),
            msg,
        };
        let name = host_src
            .file_name()
            .ok_or_else(|| copy_error("path has no file name".to_string()))?;
        let dst = self.workdir.join(name);
        fs::copy(host_src, &dst)
            .await
            .map_err(|e| copy_error(e.to_string()))?;

        dst.to_str()
            .map(str::to_string)
            .ok_or_else(|| copy_error("destination path is not valid UTF-8".to_string()))
    }

    async fn run(
        &self,
        duration: Duration,
        reporter: Arc<dyn Reporter>,
        command: &str,
        opts: RunOptions,
    ) -> Result<VmOutput, VmError> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(format!("exec 2>&1; {}", command))
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VmError::Transport {
                msg: format!("failed to spawn {}: {}", self.shell.display(), e),
            })?;
        let mut group = ProcessGroup::of(child.id());

        let stdout = child.stdout.take().ok_or_else(|| VmError::Transport {
            msg: "child stdout is not piped".to_string(),
        })?;
        let mut chunks = spawn_reader(stdout);

        let waited = timeout(duration, child.wait()).await;
        let reason = match waited {
            Ok(Ok(status)) if status.success() => ExitReason::Normal,
            Ok(Ok(_)) => ExitReason::Error,
            Ok(Err(e)) => {
                return Err(VmError::Transport {
                    msg: format!("failed to wait for command: {}", e),
                });
            }
            Err(_) => {
                group.kill();
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill timed out command in VM {}: {}", self.index, e);
                }
                ExitReason::Timeout
            }
        };
        // Nothing the command started may outlive the run.
        group.kill();
        tracing::debug!("Command in VM {} ended with {}", self.index, reason);

        let mut output = drain_output(&mut chunks).await;
        let report = reporter.parse(&output);
        if let Some(size) = opts.output_size {
            retain_context(&mut output, report.as_ref(), size);
        }

        if report.is_none() && !opts.exit_condition.contains(reason) {
            return Err(VmError::UnexpectedExit { reason });
        }
        Ok(VmOutput { output, report })
    }

    async fn close(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.workdir).await {
            tracing::warn!(
                "Failed to remove work directory {} of VM {}: {}",
                self.workdir.display(),
                self.index,
                e
            );
        }
    }
}

/// Process group led by a spawned shell. Killed at most once, at the latest
/// when dropped.
struct ProcessGroup {
    pgid: Option<libc::pid_t>,
}

impl ProcessGroup {
    fn of(pid: Option<u32>) -> Self {
        ProcessGroup {
            pgid: pid.and_then(|pid| libc::pid_t::try_from(pid).ok()),
        }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            // ESRCH only means every member has already exited.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Keeps at most `size` bytes of output preceding the report and everything
/// from the report on. Without a report the last `size` bytes are kept.
fn retain_context(output: &mut Vec<u8>, report: Option<&Report>, size: usize) {
    let start = report
        .and_then(|r| report_offset(output, r))
        .unwrap_or(output.len());
    output.drain(..start.saturating_sub(size));
}

fn report_offset(output: &[u8], report: &Report) -> Option<usize> {
    [report.report.as_slice(), report.title.as_bytes()]
        .into_iter()
        .filter(|needle| !needle.is_empty())
        .find_map(|needle| {
            if output.ends_with(needle) {
                return Some(output.len() - needle.len());
            }
            output.windows(needle.len()).position(|w| w == needle)
        })
}

fn spawn_reader(mut stdout: ChildStdout) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Collects output until the pipe closes. Descendants of a killed command
/// may keep the pipe open, so collection stops after a short grace period.
async fn drain_output(chunks: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_millis(OUTPUT_DRAIN_GRACE_MS);
    let mut output = Vec::new();
    while let Ok(Some(chunk)) = timeout_at(deadline, chunks.recv()).await {
        output.extend_from_slice(&chunk);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exit::ExitCondition;
    use crate::native::reporter::ConsoleReporter;

    async fn local_vm(base: &Path) -> LocalVm {
        LocalVm {
            index: 0,
            workdir: {
                let dir = base.join("vm-0");
                fs::create_dir_all(&dir).await.unwrap();
                dir
            },
            shell: PathBuf::from("/bin/sh"),
        }
    }

    fn reporter() -> Arc<dyn Reporter> {
        Arc::new(ConsoleReporter::new())
    }

    #[tokio::test]
    async fn test_pool_creates_distinct_workdirs() {
        let base = tempfile::tempdir().unwrap();
        let pool = LocalPool::new(base.path(), "/bin/sh");

        let mut first = pool.create(0).await.unwrap();
        let mut second = pool.create(0).await.unwrap();

        let mut dirs: Vec<_> = std::fs::read_dir(base.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        dirs.sort();
        assert_eq!(dirs.len(), 2);
        assert!(dirs.iter().all(|d| d.starts_with("vm-0-")));

        first.close().await;
        second.close().await;
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_copy_places_file_in_workdir() {
        let base = tempfile::tempdir().unwrap();
        let vm = local_vm(base.path()).await;
        let src = base.path().join("syz-execprog");
        std::fs::write(&src, b"#!/bin/sh\n").unwrap();

        let remote = vm.copy(&src).await.unwrap();

        assert_eq!(Path::new(&remote), vm.workdir().join("syz-execprog"));
        assert_eq!(std::fs::read(&remote).unwrap(), b"#!/bin/sh\n");
    }

    #[tokio::test]
    async fn test_copy_missing_file() {
        let base = tempfile::tempdir().unwrap();
        let vm = local_vm(base.path()).await;

        let result = vm.copy(&base.path().join("missing")).await;

        assert!(matches!(result, Err(VmError::Copy { .. })));
    }

    #[tokio::test]
    async fn test_run_captures_stdout_and_stderr() {
        let base = tempfile::tempdir().unwrap();
        let vm = local_vm(base.path()).await;

        let out = vm
            .run(
                Duration::from_secs(5),
                reporter(),
                "echo out; echo err >&2",
                RunOptions::new(ExitCondition::HARNESS),
            )
            .await
            .unwrap();

        assert_eq!(out.output, b"out\nerr\n");
        assert!(out.report.is_none());
    }

    #[tokio::test]
    async fn test_run_error_exit_depends_on_condition() {
        let base = tempfile::tempdir().unwrap();
        let vm = local_vm(base.path()).await;

        let harness = vm
            .run(
                Duration::from_secs(5),
                reporter(),
                "exit 3",
                RunOptions::new(ExitCondition::HARNESS),
            )
            .await;
        assert_eq!(
            harness,
            Err(VmError::UnexpectedExit {
                reason: ExitReason::Error
            })
        );

        let raw = vm
            .run(
                Duration::from_secs(5),
                reporter(),
                "exit 3",
                RunOptions::new(ExitCondition::RAW_BINARY),
            )
            .await;
        assert!(raw.is_ok());
    }

    #[tokio::test]
    async fn test_run_kills_at_deadline() {
        let base = tempfile::tempdir().unwrap();
        let vm = local_vm(base.path()).await;
        let start = std::time::Instant::now();

        let out = vm
            .run(
                Duration::from_millis(200),
                reporter(),
                "echo started; exec sleep 10",
                RunOptions::new(ExitCondition::HARNESS),
            )
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(out.output, b"started\n");

        let only_normal = ExitCondition::from_reasons(&[ExitReason::Normal]).unwrap();
        let result = vm
            .run(
                Duration::from_millis(200),
                reporter(),
                "exec sleep 10",
                RunOptions::new(only_normal),
            )
            .await;
        assert_eq!(
            result,
            Err(VmError::UnexpectedExit {
                reason: ExitReason::Timeout
            })
        );
    }

    #[tokio::test]
    async fn test_run_reports_crash_even_on_error_exit() {
        let base = tempfile::tempdir().unwrap();
        let vm = local_vm(base.path()).await;

        let out = vm
            .run(
                Duration::from_secs(5),
                reporter(),
                "echo 'BUG: unable to handle page fault for address: 0000'; exit 1",
                RunOptions::new(ExitCondition::HARNESS),
            )
            .await
            .unwrap();

        let report = out.report.unwrap();
        assert_eq!(report.title, "BUG: unable to handle page fault for address: 0000");
    }

    #[tokio::test]
    async fn test_run_kills_descendants_at_deadline() {
        let base = tempfile::tempdir().unwrap();
        let vm = local_vm(base.path()).await;
        let marker = vm.workdir().join("alive");
        let start = std::time::Instant::now();

        let out = vm
            .run(
                Duration::from_millis(200),
                reporter(),
                "sh -c 'sleep 2; touch alive'",
                RunOptions::new(ExitCondition::HARNESS),
            )
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(out.output.is_empty());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists(), "child of the command survived the deadline");
    }

    #[tokio::test]
    async fn test_run_reaps_background_processes() {
        let base = tempfile::tempdir().unwrap();
        let vm = local_vm(base.path()).await;
        let marker = vm.workdir().join("alive");

        let out = vm
            .run(
                Duration::from_secs(5),
                reporter(),
                "(sleep 1; touch alive) & echo started",
                RunOptions::new(ExitCondition::HARNESS),
            )
            .await
            .unwrap();

        assert_eq!(out.output, b"started\n");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!marker.exists(), "background process outlived the run");
    }

    #[tokio::test]
    async fn test_run_keeps_crash_and_context_before_it() {
        let base = tempfile::tempdir().unwrap();
        let vm = local_vm(base.path()).await;

        let out = vm
            .run(
                Duration::from_secs(5),
                reporter(),
                "seq 1 100; echo 'BUG: KASAN: use-after-free in foo'; seq 1 50",
                RunOptions {
                    exit_condition: ExitCondition::HARNESS,
                    output_size: Some(16),
                },
            )
            .await
            .unwrap();

        let report = out.report.unwrap();
        assert_eq!(report.title, "BUG: KASAN: use-after-free in foo");
        let head: &[u8] = b"96\n97\n98\n99\n100\nBUG: KASAN: use-after-free in foo\n1\n";
        assert!(out.output.starts_with(head));
        assert!(out.output.ends_with(b"\n49\n50\n"));
    }

    #[tokio::test]
    async fn test_run_keeps_output_tail() {
        let base = tempfile::tempdir().unwrap();
        let vm = local_vm(base.path()).await;

        let out = vm
            .run(
                Duration::from_secs(5),
                reporter(),
                "printf 0123456789",
                RunOptions {
                    exit_condition: ExitCondition::HARNESS,
                    output_size: Some(4),
                },
            )
            .await
            .unwrap();

        assert_eq!(out.output, b"6789");
    }

    #[tokio::test]
    async fn test_run_in_workdir() {
        let base = tempfile::tempdir().unwrap();
        let vm = local_vm(base.path()).await;

        let out = vm
            .run(
                Duration::from_secs(5),
                reporter(),
                "pwd",
                RunOptions::new(ExitCondition::HARNESS),
            )
            .await
            .unwrap();

        let pwd = String::from_utf8(out.output).unwrap();
        assert_eq!(
            std::fs::canonicalize(pwd.trim()).unwrap(),
            std::fs::canonicalize(vm.workdir()).unwrap()
        );
    }
}
