//! Types for install orchestration.
//!
//! This module defines the stages of an install run, the error taxonomy
//! shared by every stage, and the report produced by a completed run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::configure::BuildConfig;
use crate::driver::StepReport;
use crate::util::hash::{ContentHash, HashError};
use crate::verify::VerificationResult;

/// One step of the install state machine, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
  Fetch,
  Runtime,
  Patch,
  Configure,
  Build,
  Normalize,
  Verify,
}

impl Stage {
  pub const ALL: [Stage; 7] = [
    Stage::Fetch,
    Stage::Runtime,
    Stage::Patch,
    Stage::Configure,
    Stage::Build,
    Stage::Normalize,
    Stage::Verify,
  ];

  /// Stages that must have completed before this one may start.
  pub fn prerequisites(self) -> &'static [Stage] {
    match self {
      Stage::Fetch => &[],
      Stage::Runtime => &[Stage::Fetch],
      Stage::Patch => &[Stage::Fetch],
      Stage::Configure => &[Stage::Runtime, Stage::Patch],
      Stage::Build => &[Stage::Configure],
      Stage::Normalize => &[Stage::Build],
      Stage::Verify => &[Stage::Normalize],
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Stage::Fetch => "fetch",
      Stage::Runtime => "runtime",
      Stage::Patch => "patch",
      Stage::Configure => "configure",
      Stage::Build => "build",
      Stage::Normalize => "normalize",
      Stage::Verify => "verify",
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Stage {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Stage::ALL
      .into_iter()
      .find(|stage| stage.as_str() == s)
      .ok_or_else(|| {
        let names: Vec<_> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown stage '{}' (expected one of: {})", s, names.join(", "))
      })
  }
}

/// Errors raised by install stages.
#[derive(Debug, Error)]
pub enum InstallError {
  /// Fetched bytes do not hash to the declared value.
  #[error("integrity check failed for '{resource}' ({url}): expected {expected}, got {actual}")]
  Integrity {
    resource: String,
    url: String,
    expected: String,
    actual: String,
  },

  /// The resource could not be retrieved.
  #[error("fetch failed for {url}: {message}")]
  Fetch { url: String, message: String },

  /// The source archive could not be extracted.
  #[error("failed to unpack {archive}: {message}")]
  Unpack { archive: PathBuf, message: String },

  /// A diff or substitution did not apply.
  #[error("patch '{patch}' failed: {message}")]
  Patch { patch: String, message: String },

  /// A required path, version or option could not be resolved.
  #[error("configuration error: {0}")]
  Configuration(String),

  /// An external toolchain step exited non-zero.
  #[error("{step} failed with exit code {code:?}")]
  Toolchain {
    step: String,
    code: Option<i32>,
    stdout: String,
    stderr: String,
  },

  /// An external program could not be started.
  #[error("failed to run {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// Post-install filesystem normalization failed.
  #[error("normalization failed at {path}: {message}")]
  Normalize { path: PathBuf, message: String },

  /// A smoke check failed to compile, run or match.
  #[error("smoke check '{check}' failed: {message}")]
  Verification {
    check: String,
    message: String,
    stdout: String,
    stderr: String,
  },

  /// A stage was started before one of its prerequisites completed.
  #[error("stage '{stage}' cannot start before '{missing}' has completed")]
  StageOrder { stage: Stage, missing: Stage },

  #[error("hash error: {0}")]
  Hash(#[from] HashError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl InstallError {
  /// Captured output of the external tool behind this error, if any.
  pub fn captured_output(&self) -> Option<(&str, &str)> {
    match self {
      InstallError::Toolchain { stdout, stderr, .. } | InstallError::Verification { stdout, stderr, .. } => {
        Some((stdout.as_str(), stderr.as_str()))
      }
      _ => None,
    }
  }
}

/// A failed run: the stage that failed and why.
#[derive(Debug, Error)]
#[error("stage '{stage}' failed: {source}")]
pub struct RunError {
  pub stage: Stage,
  #[source]
  pub source: InstallError,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
  pub stage: Stage,
  pub elapsed: Duration,
}

/// File counts per top-level directory of the installed prefix.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TreeSummary {
  pub files: BTreeMap<String, usize>,
  pub content_hash: Option<ContentHash>,
}

/// Result of an install run that did not fail.
///
/// When the run was bounded with `until`, later fields stay empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
  pub recipe: String,
  pub version: String,
  pub prefix: PathBuf,
  pub stages: Vec<StageReport>,
  pub build_config: Option<BuildConfig>,
  pub build_steps: Vec<StepReport>,
  pub verification: Option<VerificationResult>,
  pub tree: Option<TreeSummary>,
}

impl InstallReport {
  pub fn completed(&self, stage: Stage) -> bool {
    self.stages.iter().any(|s| s.stage == stage)
  }

  /// True once the verifier has passed; only then is the tree valid.
  pub fn is_verified(&self) -> bool {
    self.verification.as_ref().is_some_and(|v| v.is_success())
  }

  pub fn total_elapsed(&self) -> Duration {
    self.stages.iter().map(|s| s.elapsed).sum()
  }
}
