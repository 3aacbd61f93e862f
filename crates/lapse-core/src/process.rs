use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use lapse_platform::process::{ProcessOutput, ProcessRunner};

/// Runs external tools with `tokio::process`, collecting stdout and stderr
#[derive(Debug, Default, Clone)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &Path, args: &[String], cwd: &Path) -> Result<ProcessOutput> {
        debug!("running {} {:?} in {}", program.display(), args, cwd.display());

        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            // a dropped encode must not leave the tool writing its output
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to start {}", program.display()))?;

        Ok(ProcessOutput {
            status: output.status.code(),
            success: output.status.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
