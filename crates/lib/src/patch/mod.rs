//! Source patching.
//!
//! Patches are applied exactly once, in declared order, to a pristine tree.
//! Neither kind is idempotent: a second run fails because `patch --forward`
//! refuses reversed hunks and substitutions no longer find their pattern.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{info, warn};

use crate::config::BuildEnv;
use crate::fetch::Fetcher;
use crate::install::InstallError;
use crate::process::{CommandRunner, Invocation, spawn};
use crate::recipe::{PatchSpec, RecipeVersion};

/// Replace every occurrence of `find` in the file at `path`.
///
/// Returns the number of replacements. The file is left untouched when the
/// pattern does not occur.
pub fn substitute_in_file(path: &Path, find: &str, replace: &str) -> io::Result<usize> {
  let content = fs::read_to_string(path)?;
  let count = content.matches(find).count();
  if count > 0 {
    fs::write(path, content.replace(find, replace))?;
  }
  Ok(count)
}

/// Applies a recipe's patches to an unpacked source tree.
pub struct Patcher<'a, R: CommandRunner> {
  runner: &'a R,
  fetcher: &'a Fetcher,
  env: &'a BuildEnv,
}

impl<'a, R: CommandRunner> Patcher<'a, R> {
  pub fn new(runner: &'a R, fetcher: &'a Fetcher, env: &'a BuildEnv) -> Self {
    Self { runner, fetcher, env }
  }

  /// Apply `patches` to `tree` in order, skipping those obsolete for
  /// `version`. Returns the labels of the patches applied.
  pub async fn apply(
    &self,
    tree: &Path,
    patches: &[PatchSpec],
    version: &RecipeVersion,
  ) -> Result<Vec<String>, InstallError> {
    let mut applied = Vec::new();

    for patch in patches {
      let label = patch.label();
      if !patch.applies_to(version) {
        warn!(patch = %label, version = %version, "patch is obsolete for this version, skipping");
        continue;
      }

      match patch {
        PatchSpec::Diff { resource, strip, .. } => {
          let file = self.fetcher.fetch(resource).await?;
          self.apply_diff(tree, &label, &file, *strip).await?;
        }
        PatchSpec::Substitute { file, find, replace, .. } => {
          apply_substitution(tree, &label, file, find, replace)?;
        }
      }

      info!(patch = %label, "applied patch");
      applied.push(label);
    }

    Ok(applied)
  }

  async fn apply_diff(&self, tree: &Path, label: &str, file: &Path, strip: u32) -> Result<(), InstallError> {
    let invocation = Invocation::new("patch")
      .arg(format!("-p{}", strip))
      .args(["--forward", "--batch", "-i"])
      .path_arg(file)
      .cwd(tree)
      .envs(self.env.vars());

    let output = spawn(self.runner, &invocation).await?;
    if !output.success() {
      return Err(InstallError::Patch {
        patch: label.to_string(),
        message: format!(
          "patch exited with {:?}\n{}{}",
          output.code, output.stdout, output.stderr
        ),
      });
    }
    Ok(())
  }
}

fn apply_substitution(tree: &Path, label: &str, file: &str, find: &str, replace: &str) -> Result<(), InstallError> {
  let path = tree.join(file);
  let patch_err = |message: String| InstallError::Patch {
    patch: label.to_string(),
    message,
  };

  if !path.is_file() {
    return Err(patch_err(format!("{} does not exist", path.display())));
  }
  let count = substitute_in_file(&path, find, replace).map_err(|e| patch_err(e.to_string()))?;
  if count == 0 {
    return Err(patch_err(format!("pattern '{}' not found in {}", find, file)));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::process::ProcessOutput;
  use crate::util::testutil::{FakeRunner, local_resource};
  use std::sync::Mutex;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  fn version(s: &str) -> RecipeVersion {
    s.parse().unwrap()
  }

  fn substitute(file: &str, find: &str, replace: &str) -> PatchSpec {
    PatchSpec::Substitute {
      file: file.to_string(),
      find: find.to_string(),
      replace: replace.to_string(),
      reason: None,
    }
  }

  #[test]
  fn substitute_in_file_replaces_all_occurrences() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("CMakeLists.txt");
    fs::write(&path, "${CMAKE_C_COMPILER} and ${CMAKE_C_COMPILER}").unwrap();

    assert_eq!(substitute_in_file(&path, "${CMAKE_C_COMPILER}", "/usr/bin/cc").unwrap(), 2);
    assert_eq!(fs::read_to_string(&path).unwrap(), "/usr/bin/cc and /usr/bin/cc");
  }

  #[test]
  fn substitute_in_file_without_match_leaves_file_alone() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("f");
    fs::write(&path, "unchanged").unwrap();
    assert_eq!(substitute_in_file(&path, "absent", "x").unwrap(), 0);
    assert_eq!(fs::read_to_string(&path).unwrap(), "unchanged");
  }

  #[tokio::test]
  async fn second_substitution_run_fails() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("config.h"), "#define LEGACY 1\n").unwrap();
    let runner = FakeRunner::succeeding();
    let fetcher = Fetcher::new(temp.path().join("cache"));
    let env = BuildEnv::default();
    let patcher = Patcher::new(&runner, &fetcher, &env);
    let patches = [substitute("config.h", "LEGACY 1", "LEGACY 0")];

    let applied = patcher.apply(temp.path(), &patches, &version("3.8.2.0")).await.unwrap();
    assert_eq!(applied, ["substitute in config.h"]);
    assert_eq!(fs::read_to_string(temp.path().join("config.h")).unwrap(), "#define LEGACY 0\n");

    let result = patcher.apply(temp.path(), &patches, &version("3.8.2.0")).await;
    assert!(matches!(result, Err(InstallError::Patch { message, .. }) if message.contains("not found")));
  }

  #[tokio::test]
  async fn substitution_in_missing_file_fails() {
    let temp = TempDir::new().unwrap();
    let runner = FakeRunner::succeeding();
    let fetcher = Fetcher::new(temp.path().join("cache"));
    let env = BuildEnv::default();

    let result = Patcher::new(&runner, &fetcher, &env)
      .apply(temp.path(), &[substitute("nope.txt", "a", "b")], &version("3.8.2.0"))
      .await;
    assert!(matches!(result, Err(InstallError::Patch { message, .. }) if message.contains("does not exist")));
  }

  #[tokio::test]
  async fn diff_is_applied_with_forward_batch_in_tree() {
    let temp = TempDir::new().unwrap();
    let tree = temp.path().join("src");
    fs::create_dir_all(&tree).unwrap();
    let resource = local_resource(temp.path(), "boost-1.73.0.patch", b"--- a/x\n+++ b/x\n");
    let patches = [PatchSpec::Diff {
      resource,
      strip: 1,
      reason: None,
      obsolete_from: None,
    }];
    let runner = FakeRunner::succeeding();
    let fetcher = Fetcher::new(temp.path().join("cache"));
    let env = BuildEnv::default();

    Patcher::new(&runner, &fetcher, &env)
      .apply(&tree, &patches, &version("3.8.2.0"))
      .await
      .unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program_name(), "patch");
    assert_eq!(calls[0].args[..4], ["-p1", "--forward", "--batch", "-i"]);
    assert!(calls[0].args[4].ends_with("boost-1.73.0.patch"));
    assert_eq!(calls[0].cwd.as_deref(), Some(tree.as_path()));
  }

  #[tokio::test]
  async fn reapplying_diff_fails_with_tool_output() {
    let temp = TempDir::new().unwrap();
    let resource = local_resource(temp.path(), "fix.patch", b"--- a/x\n+++ b/x\n");
    let patches = [PatchSpec::Diff {
      resource,
      strip: 1,
      reason: None,
      obsolete_from: None,
    }];
    let applied = Mutex::new(false);
    let runner = FakeRunner::new(move |_| {
      let mut done = applied.lock().unwrap();
      if *done {
        ProcessOutput::failed(1, "Reversed (or previously applied) patch detected!  Skipping patch.")
      } else {
        *done = true;
        ProcessOutput::ok("patching file x\n")
      }
    });
    let fetcher = Fetcher::new(temp.path().join("cache"));
    let env = BuildEnv::default();
    let patcher = Patcher::new(&runner, &fetcher, &env);

    patcher.apply(temp.path(), &patches, &version("3.8.2.0")).await.unwrap();
    let result = patcher.apply(temp.path(), &patches, &version("3.8.2.0")).await;

    match result {
      Err(InstallError::Patch { patch, message }) => {
        assert_eq!(patch, "fix.patch");
        assert!(message.contains("previously applied"));
      }
      other => panic!("expected patch error, got {:?}", other),
    }
  }

  #[traced_test]
  #[tokio::test]
  async fn obsolete_patch_is_skipped_with_warning() {
    let temp = TempDir::new().unwrap();
    let resource = local_resource(temp.path(), "boost-1.73.0.patch", b"diff");
    let patches = [PatchSpec::Diff {
      resource,
      strip: 1,
      reason: None,
      obsolete_from: Some(version("3.8.3.0")),
    }];
    let runner = FakeRunner::succeeding();
    let fetcher = Fetcher::new(temp.path().join("cache"));
    let env = BuildEnv::default();

    let applied = Patcher::new(&runner, &fetcher, &env)
      .apply(temp.path(), &patches, &version("3.8.3.0"))
      .await
      .unwrap();

    assert!(applied.is_empty());
    assert!(runner.calls().is_empty());
    assert!(logs_contain("patch is obsolete for this version"));
  }
}
