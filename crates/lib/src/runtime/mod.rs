//! Isolated interpreter environment.
//!
//! The build needs a handful of pure-Python helpers (template engines, YAML,
//! CLI toolkits) that must not leak into or depend on the host interpreter's
//! own packages. They are installed from source into a private virtual
//! environment inside the prefix.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::BuildEnv;
use crate::fetch::Fetcher;
use crate::install::InstallError;
use crate::process::{CommandRunner, Invocation, run_step};
use crate::recipe::RuntimeSpec;

const VERSION_PROBE: &str = "import sys; print('%d.%d' % sys.version_info[:2])";

/// Handle to a created environment.
///
/// `version` is the base interpreter's `major.minor`, queried once. Every
/// later stage derives paths and options from this one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PythonEnv {
  pub root: PathBuf,
  pub interpreter: PathBuf,
  pub version: String,
}

impl PythonEnv {
  pub fn new(root: PathBuf, version: String) -> Self {
    let interpreter = root.join("bin").join("python");
    Self {
      root,
      interpreter,
      version,
    }
  }

  pub fn site_packages(&self) -> PathBuf {
    self
      .root
      .join("lib")
      .join(format!("python{}", self.version))
      .join("site-packages")
  }

  /// Major component of the interpreter version (`3` for `3.9`).
  pub fn major(&self) -> &str {
    self.version.split('.').next().unwrap_or(&self.version)
  }
}

fn parse_version(stdout: &str) -> Option<String> {
  let version = stdout.trim();
  let (major, minor) = version.split_once('.')?;
  let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
  (numeric(major) && numeric(minor)).then(|| version.to_string())
}

/// Creates the isolated environment and installs its helper packages.
pub struct RuntimeBuilder<'a, R: CommandRunner> {
  runner: &'a R,
  fetcher: &'a Fetcher,
  env: &'a BuildEnv,
}

impl<'a, R: CommandRunner> RuntimeBuilder<'a, R> {
  pub fn new(runner: &'a R, fetcher: &'a Fetcher, env: &'a BuildEnv) -> Self {
    Self { runner, fetcher, env }
  }

  /// Ask `interpreter` for its `major.minor` version.
  pub async fn query_version(&self, interpreter: &Path) -> Result<String, InstallError> {
    let invocation = Invocation::new(interpreter)
      .arg("-c")
      .arg(VERSION_PROBE)
      .envs(self.env.vars());
    let output = run_step(self.runner, &invocation, "python version query").await?;

    parse_version(&output.stdout).ok_or_else(|| {
      InstallError::Configuration(format!(
        "could not determine version of {}: unexpected output '{}'",
        interpreter.display(),
        output.stdout.trim()
      ))
    })
  }

  /// Create a fresh environment at `root` from `base_interpreter` and install
  /// `spec.helpers` in listed order.
  pub async fn create_environment(
    &self,
    base_interpreter: &Path,
    root: &Path,
    spec: &RuntimeSpec,
  ) -> Result<PythonEnv, InstallError> {
    let version = self.query_version(base_interpreter).await?;
    info!(interpreter = ?base_interpreter, version = %version, "creating isolated environment");

    if tokio::fs::try_exists(root).await? {
      debug!(root = ?root, "removing previous environment");
      tokio::fs::remove_dir_all(root).await?;
    }

    let mut venv = Invocation::new(base_interpreter).args(["-m", "venv"]);
    if spec.system_site_packages {
      venv = venv.arg("--system-site-packages");
    }
    let venv = venv.path_arg(root).envs(self.env.vars());
    run_step(self.runner, &venv, "venv").await?;

    let python = PythonEnv::new(root.to_path_buf(), version);

    for helper in &spec.helpers {
      let archive = self.fetcher.fetch(helper).await?;
      info!(package = %helper.name, "installing helper package");

      let pip = Invocation::new(&python.interpreter)
        .args([
          "-m",
          "pip",
          "install",
          "-v",
          "--no-deps",
          "--no-binary",
          ":all:",
          "--ignore-installed",
        ])
        .path_arg(&archive)
        .envs(self.env.vars());
      run_step(self.runner, &pip, &format!("pip install {}", helper.name)).await?;
    }

    Ok(python)
  }
}
