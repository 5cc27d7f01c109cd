//! Build driver: configure, compile and install in an out-of-tree directory.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::config::BuildEnv;
use crate::configure::BuildConfig;
use crate::consts::BUILD_SUBDIR;
use crate::install::InstallError;
use crate::process::{CommandRunner, Invocation, run_step};

/// Outcome of one successful toolchain step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
  pub step: String,
  pub command: String,
  pub duration: Duration,
}

pub struct Driver<'a, R: CommandRunner> {
  runner: &'a R,
  env: &'a BuildEnv,
  jobs: usize,
}

impl<'a, R: CommandRunner> Driver<'a, R> {
  pub fn new(runner: &'a R, env: &'a BuildEnv, jobs: usize) -> Self {
    Self { runner, env, jobs }
  }

  /// Build `tree` with `config` and install into the configured prefix.
  ///
  /// The build directory is recreated from scratch on every run.
  pub async fn run(&self, tree: &Path, config: &BuildConfig) -> Result<Vec<StepReport>, InstallError> {
    let build_dir = tree.join(BUILD_SUBDIR);
    if tokio::fs::try_exists(&build_dir).await? {
      tokio::fs::remove_dir_all(&build_dir).await?;
    }
    tokio::fs::create_dir_all(&build_dir).await?;

    let steps = [
      (
        "cmake",
        Invocation::new("cmake").args([".."]).arg("-Wno-dev").args(config.to_args()),
      ),
      ("make", Invocation::new("make").arg(format!("-j{}", self.jobs))),
      ("make install", Invocation::new("make").arg("install")),
    ];

    let mut reports = Vec::with_capacity(steps.len());
    for (step, invocation) in steps {
      let invocation = invocation.cwd(&build_dir).envs(self.env.vars());
      info!(step = %step, "running build step");
      let output = run_step(self.runner, &invocation, step).await?;
      reports.push(StepReport {
        step: step.to_string(),
        command: invocation.to_string(),
        duration: output.duration,
      });
    }

    Ok(reports)
  }
}
