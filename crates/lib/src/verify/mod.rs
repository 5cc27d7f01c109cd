//! Smoke tests against the installed tree.
//!
//! Checks run in a fixed order and stop at the first failure: the diagnostic
//! binary must report the recipe version, a native program must compile, link
//! and run against the installed libraries, and a Python program must run in
//! the isolated environment.

mod sources;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::{BuildEnv, DependencyIndex, InstallLayout};
use crate::install::InstallError;
use crate::platform::os::Os;
use crate::process::{CommandRunner, Invocation, ProcessOutput, spawn};
use crate::recipe::Recipe;
use crate::runtime::PythonEnv;

/// Outcome of one smoke check.
const LOADER_PATH_VAR: &str = "LD_LIBRARY_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
  pub name: String,
  pub passed: bool,
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl CheckResult {
  fn from_output(name: &str, passed: bool, output: &ProcessOutput) -> Self {
    Self {
      name: name.to_string(),
      passed,
      code: output.code,
      stdout: output.stdout.clone(),
      stderr: output.stderr.clone(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
  pub checks: Vec<CheckResult>,
}

impl VerificationResult {
  pub fn is_success(&self) -> bool {
    !self.checks.is_empty() && self.checks.iter().all(|c| c.passed)
  }
}

pub struct Verifier<'a, R: CommandRunner> {
  runner: &'a R,
  env: &'a BuildEnv,
  recipe: &'a Recipe,
  layout: &'a InstallLayout,
  deps: &'a DependencyIndex,
  cxx: &'a Path,
  python: &'a PythonEnv,
  os: Os,
}

impl<'a, R: CommandRunner> Verifier<'a, R> {
  pub fn new(
    runner: &'a R,
    env: &'a BuildEnv,
    recipe: &'a Recipe,
    layout: &'a InstallLayout,
    deps: &'a DependencyIndex,
    cxx: &'a Path,
    python: &'a PythonEnv,
  ) -> Self {
    Self {
      runner,
      env,
      recipe,
      layout,
      deps,
      cxx,
      python,
      os: Os::host(),
    }
  }

  pub fn with_os(mut self, os: Os) -> Self {
    self.os = os;
    self
  }

  pub async fn run(&self) -> Result<VerificationResult, InstallError> {
    let mut result = VerificationResult::default();
    let scratch = TempDir::new()?;
    let lib_dirs = self.lib_dirs()?;

    self.check_diagnostic(&mut result).await?;
    let binary = self.compile_native(scratch.path(), &lib_dirs, &mut result).await?;
    let run = self.with_loader_path(Invocation::new(&binary).cwd(scratch.path()), &lib_dirs);
    self.check(&mut result, "native run", run).await?;
    self.check_python(scratch.path(), &lib_dirs, &mut result).await?;

    info!(checks = result.checks.len(), "installed tree verified");
    Ok(result)
  }

  async fn check_diagnostic(&self, result: &mut VerificationResult) -> Result<(), InstallError> {
    let smoke = &self.recipe.smoke;
    let name = "diagnostic";
    let invocation = Invocation::new(self.layout.bin().join(&smoke.diagnostic)).arg(&smoke.version_flag);
    let output = self.exec(&invocation).await?;

    let version = self.recipe.version.to_string();
    let passed = output.success() && output.stdout.contains(&version);
    result.checks.push(CheckResult::from_output(name, passed, &output));
    if !passed {
      let message = if output.success() {
        format!("{} did not report version {}", smoke.diagnostic, version)
      } else {
        format!("{} exited with {:?}", smoke.diagnostic, output.code)
      };
      return Err(failure(name, message, output));
    }
    Ok(())
  }

  /// Installed library directory followed by each link dependency's.
  fn lib_dirs(&self) -> Result<Vec<PathBuf>, InstallError> {
    let mut dirs = vec![self.layout.lib()];
    for dep in &self.recipe.smoke.link_dependencies {
      dirs.push(self.deps.require(self.recipe, dep)?.join("lib"));
    }
    Ok(dirs)
  }

  async fn compile_native(
    &self,
    scratch: &Path,
    lib_dirs: &[PathBuf],
    result: &mut VerificationResult,
  ) -> Result<PathBuf, InstallError> {
    let smoke = &self.recipe.smoke;
    let source = scratch.join("test.c++");
    let binary = scratch.join("test");
    tokio::fs::write(&source, sources::native_program()).await?;

    // GNU ld resolves libraries left to right, so the source goes first.
    let mut invocation = Invocation::new(self.cxx)
      .arg(format!("-std={}", smoke.cxx_standard))
      .path_arg(&source)
      .args(lib_dirs.iter().map(|dir| format!("-L{}", dir.display())));
    if !self.os.uses_frameworks() {
      invocation = invocation.args(lib_dirs.iter().map(|dir| format!("-Wl,-rpath,{}", dir.display())));
    }
    let invocation = invocation
      .args(smoke.link_libraries.iter().map(|lib| format!("-l{}", lib)))
      .arg("-o")
      .path_arg(&binary)
      .cwd(scratch);

    self.check(result, "native compile", invocation).await?;
    Ok(binary)
  }

  async fn check_python(
    &self,
    scratch: &Path,
    lib_dirs: &[PathBuf],
    result: &mut VerificationResult,
  ) -> Result<(), InstallError> {
    let script = scratch.join("test.py");
    tokio::fs::write(&script, sources::python_program()).await?;
    let invocation = Invocation::new(&self.python.interpreter)
      .path_arg(&script)
      .cwd(scratch);
    let invocation = self.with_loader_path(invocation, lib_dirs);
    self.check(result, "python", invocation).await
  }

  /// Put the library directories on the dynamic loader path where the
  /// platform loader honours `LD_LIBRARY_PATH`.
  fn with_loader_path(&self, invocation: Invocation, lib_dirs: &[PathBuf]) -> Invocation {
    if self.os.uses_frameworks() {
      return invocation;
    }
    let mut dirs: Vec<String> = lib_dirs.iter().map(|dir| dir.display().to_string()).collect();
    if let Some(inherited) = std::env::var(LOADER_PATH_VAR).ok().filter(|v| !v.is_empty()) {
      dirs.push(inherited);
    }
    let mut env = BTreeMap::new();
    env.insert(LOADER_PATH_VAR.to_string(), dirs.join(":"));
    invocation.envs(&env)
  }

  /// Run a check that passes on exit 0.
  async fn check(&self, result: &mut VerificationResult, name: &str, invocation: Invocation) -> Result<(), InstallError> {
    let output = self.exec(&invocation).await?;
    let passed = output.success();
    result.checks.push(CheckResult::from_output(name, passed, &output));
    if !passed {
      return Err(failure(name, format!("exited with {:?}", output.code), output));
    }
    Ok(())
  }

  async fn exec(&self, invocation: &Invocation) -> Result<ProcessOutput, InstallError> {
    let mut merged = self.env.vars().clone();
    merged.extend(invocation.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    let invocation = Invocation {
      env: merged,
      ..invocation.clone()
    };
    spawn(self.runner, &invocation).await
  }
}

fn failure(check: &str, message: String, output: ProcessOutput) -> InstallError {
  warn!(check = %check, "smoke check failed");
  InstallError::Verification {
    check: check.to_string(),
    message,
    stdout: output.stdout,
    stderr: output.stderr,
  }
}
