use std::path::PathBuf;

use crate::core::domain::{CompileOptions, Program, Target};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("failed to generate source: {msg}")]
    Generation { msg: String },
    #[error("compilation failed: {msg}")]
    CompilationFailed { msg: String },
    #[error("no {what} configured")]
    Unavailable { what: String },
    #[error("internal toolchain error: {msg}")]
    Internal { msg: String },
}

#[mockall::automock]
pub trait SourceGenerator: std::fmt::Debug + Send + Sync {
    fn generate(&self, program: &Program, opts: &CompileOptions) -> Result<Vec<u8>, BuildError>;
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait Compiler: std::fmt::Debug + Send + Sync {
    /// Builds `source` for `target` and returns the path of the binary on
    /// the host. The caller owns the returned file.
    async fn compile(&self, target: &Target, source: &[u8]) -> Result<PathBuf, BuildError>;
}
