use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

/// Collected result of a finished child process
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, if the process exited normally
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args` inside `cwd` and wait for it to exit.
    /// Errors only when the process could not be started.
    async fn run(&self, program: &Path, args: &[String], cwd: &Path) -> Result<ProcessOutput>;
}
