use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::{fs, process::Command, time::timeout};
use uuid::Uuid;

use crate::constants::DEFAULT_COMPILE_TIMEOUT_SECS;
use crate::core::{
    domain::Target,
    traits::compiler::{BuildError, Compiler},
};

/// Builds reproducer sources with a host C compiler.
#[derive(Clone, Debug)]
pub struct NativeCompiler {
    dir: PathBuf,
    cc_path: PathBuf,
    timeout: Duration,
}

impl NativeCompiler {
    pub fn new<T, U>(dir: T, cc_path: U) -> Self
    where
        T: AsRef<Path>,
        U: AsRef<Path>,
    {
        NativeCompiler {
            dir: dir.as_ref().into(),
            cc_path: cc_path.as_ref().into(),
            timeout: Duration::from_secs(DEFAULT_COMPILE_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

#[async_trait::async_trait]
impl Compiler for NativeCompiler {
    async fn compile(&self, target: &Target, source: &[u8]) -> Result<PathBuf, BuildError> {
        let artifact_id = Uuid::new_v4();
        let bin_path = self.dir.join(format!("{}.out", artifact_id));
        let source_path = self.dir.join(format!("{}.c", artifact_id));

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BuildError::Internal { msg: e.to_string() })?;
        fs::write(&source_path, source)
            .await
            .map_err(|e| BuildError::Internal { msg: e.to_string() })?;

        let mut cmd = Command::new(&self.cc_path);
        cmd.arg("-o")
            .arg(&bin_path)
            .arg(&source_path)
            .arg("-pthread")
            .arg("-w");
        if target.arch == "386" {
            cmd.arg("-m32");
        }
        let compile_future = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let out = timeout(self.timeout, compile_future).await;

        let _ = fs::remove_file(&source_path).await;
        let out = match out {
            Ok(out) => out.map_err(|e| BuildError::Internal {
                msg: format!("failed to execute {}: {}", self.cc_path.display(), e),
            })?,
            Err(_) => {
                let _ = fs::remove_file(&bin_path).await;
                return Err(BuildError::Internal {
                    msg: format!("compilation did not finish within {:?}", self.timeout),
                });
            }
        };

        if !out.status.success() {
            let _ = fs::remove_file(&bin_path).await;
            return Err(BuildError::CompilationFailed {
                msg: String::from_utf8_lossy(&out.stderr).to_string(),
            });
        }
        tracing::debug!("Compiled reproducer {}", bin_path.display());

        Ok(bin_path)
    }
}
