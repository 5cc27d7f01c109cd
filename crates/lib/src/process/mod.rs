//! External process execution.
//!
//! Every call into the build toolchain, the interpreter or `patch` goes
//! through [`CommandRunner`]. Stages only see exit status and captured output,
//! which lets tests substitute a scripted runner for the real toolchain.

mod types;

pub use types::*;

use std::future::Future;
use std::io;
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, info};

use crate::install::InstallError;

/// Runs an [`Invocation`] to completion and captures its output.
///
/// A non-zero exit is not an error at this layer; callers decide how to
/// classify it. `Err` means the process could not be started at all.
pub trait CommandRunner: Send + Sync {
  fn run(&self, invocation: &Invocation) -> impl Future<Output = io::Result<ProcessOutput>> + Send;
}

/// Runs invocations as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
  async fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
    info!(cmd = %invocation, "executing command");

    let mut command = Command::new(&invocation.program);
    command.args(&invocation.args).envs(&invocation.env).kill_on_drop(true);

    if let Some(cwd) = &invocation.cwd {
      command.current_dir(cwd);
    }

    debug!(cwd = ?invocation.cwd, env = ?invocation.env, "spawning process");

    let start = Instant::now();
    let output = command.output().await?;
    let duration = start.elapsed();

    let result = ProcessOutput {
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).to_string(),
      stderr: String::from_utf8_lossy(&output.stderr).to_string(),
      duration,
    };

    if !result.success() {
      if !result.stderr.is_empty() {
        debug!(stderr = %result.stderr, "command stderr");
      }
      if !result.stdout.is_empty() {
        debug!(stdout = %result.stdout, "command stdout");
      }
    }

    Ok(result)
  }
}

/// Run `invocation`, turning a failure to start into [`InstallError::Spawn`].
pub async fn spawn<R: CommandRunner>(runner: &R, invocation: &Invocation) -> Result<ProcessOutput, InstallError> {
  runner.run(invocation).await.map_err(|source| InstallError::Spawn {
    program: invocation.program.display().to_string(),
    source,
  })
}

/// Run a toolchain step; a non-zero exit becomes [`InstallError::Toolchain`]
/// carrying the captured output verbatim.
pub async fn run_step<R: CommandRunner>(
  runner: &R,
  invocation: &Invocation,
  step: &str,
) -> Result<ProcessOutput, InstallError> {
  let output = spawn(runner, invocation).await?;
  if !output.success() {
    return Err(InstallError::Toolchain {
      step: step.to_string(),
      code: output.code,
      stdout: output.stdout,
      stderr: output.stderr,
    });
  }
  Ok(output)
}
