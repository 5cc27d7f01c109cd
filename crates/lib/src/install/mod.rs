//! Install orchestration.
//!
//! An [`Installer`] drives one recipe through the [`Stage`] state machine:
//! fetch, runtime, patch, configure, build, normalize, verify. Stages run
//! strictly in order and the first failure aborts the run; there is no retry
//! and no rollback. A stage whose prerequisites have not completed is refused
//! with [`InstallError::StageOrder`].

mod types;

pub use types::*;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::config::{BuildEnv, DependencyIndex, InstallLayout, RunConfig};
use crate::configure::{BuildConfig, Configurator};
use crate::driver::Driver;
use crate::fetch::{self, Fetcher};
use crate::normalize::Normalizer;
use crate::patch::Patcher;
use crate::platform::os::Os;
use crate::process::CommandRunner;
use crate::recipe::Recipe;
use crate::runtime::{PythonEnv, RuntimeBuilder};
use crate::util::hash::hash_directory;
use crate::verify::Verifier;

/// Values produced by one stage and consumed by later ones.
#[derive(Debug, Default)]
struct RunState {
  source: Option<PathBuf>,
  python: Option<PythonEnv>,
  env: Option<BuildEnv>,
  build_config: Option<BuildConfig>,
}

fn produced<'s, T>(value: Option<&'s T>, what: &str) -> Result<&'s T, InstallError> {
  value.ok_or_else(|| InstallError::Configuration(format!("{} is not available yet", what)))
}

pub struct Installer<'a, R: CommandRunner> {
  runner: &'a R,
  recipe: &'a Recipe,
  config: &'a RunConfig,
  layout: InstallLayout,
  deps: DependencyIndex,
  fetcher: Fetcher,
  base_env: BuildEnv,
  os: Os,
  until: Option<Stage>,
  state: RunState,
  report: InstallReport,
}

impl<'a, R: CommandRunner> Installer<'a, R> {
  /// Prepare a run. Fails when the build environment cannot be resolved
  /// from the dependency index.
  pub fn new(
    runner: &'a R,
    recipe: &'a Recipe,
    config: &'a RunConfig,
    deps: DependencyIndex,
  ) -> Result<Self, InstallError> {
    let base_env = BuildEnv::new(config, recipe, &deps)?;
    let layout = config.layout(recipe);
    let report = InstallReport {
      recipe: recipe.name.clone(),
      version: recipe.full_version(),
      prefix: config.prefix.clone(),
      ..Default::default()
    };

    Ok(Self {
      runner,
      recipe,
      config,
      layout,
      deps,
      fetcher: Fetcher::new(&config.cache_dir),
      base_env,
      os: Os::host(),
      until: None,
      state: RunState::default(),
      report,
    })
  }

  /// Stop cleanly after `stage` completes.
  pub fn until(mut self, stage: Option<Stage>) -> Self {
    self.until = stage;
    self
  }

  pub fn with_os(mut self, os: Os) -> Self {
    self.os = os;
    self
  }

  pub fn report(&self) -> &InstallReport {
    &self.report
  }

  /// Run every stage in order, or up to the configured `until` stage.
  pub async fn run(mut self) -> Result<InstallReport, RunError> {
    info!(recipe = %self.recipe.name, version = %self.report.version, prefix = ?self.config.prefix, "starting install");

    for stage in Stage::ALL {
      self.run_stage(stage).await?;
      if self.until == Some(stage) {
        info!(stage = %stage, "stopping after requested stage");
        break;
      }
    }

    info!(
      stages = self.report.stages.len(),
      elapsed = ?self.report.total_elapsed(),
      "install finished"
    );
    Ok(self.report)
  }

  /// Run a single stage. Its prerequisites must already have completed.
  pub async fn run_stage(&mut self, stage: Stage) -> Result<(), RunError> {
    info!(stage = %stage, "starting stage");
    let start = Instant::now();

    if let Err(source) = self.execute(stage).await {
      error!(stage = %stage, error = %source, "stage failed");
      return Err(RunError { stage, source });
    }

    let elapsed = start.elapsed();
    debug!(stage = %stage, elapsed = ?elapsed, "stage complete");
    self.report.stages.push(StageReport { stage, elapsed });
    Ok(())
  }

  async fn execute(&mut self, stage: Stage) -> Result<(), InstallError> {
    if let Some(missing) = stage.prerequisites().iter().find(|p| !self.report.completed(**p)) {
      return Err(InstallError::StageOrder {
        stage,
        missing: *missing,
      });
    }

    match stage {
      Stage::Fetch => self.fetch().await,
      Stage::Runtime => self.runtime().await,
      Stage::Patch => self.patch().await,
      Stage::Configure => self.configure(),
      Stage::Build => self.build().await,
      Stage::Normalize => self.normalize(),
      Stage::Verify => self.verify().await,
    }
  }

  /// Verify every resource, unpack the source and stage auxiliary files.
  async fn fetch(&mut self) -> Result<(), InstallError> {
    let resources = self.recipe.all_resources();
    let mut archive = None;
    for resource in &resources {
      let path = self.fetcher.fetch(resource).await?;
      archive.get_or_insert(path);
    }
    let archive = produced(archive.as_ref(), "source archive")?;

    let source = fetch::unpack(archive, &self.config.source_dir(self.recipe))?;
    info!(source = ?source, "unpacked source");

    for resource in self.recipe.resources.iter().filter(|r| r.destination.is_some()) {
      self.fetcher.stage(resource, &self.layout.prefix).await?;
    }

    self.state.source = Some(source);
    Ok(())
  }

  async fn runtime(&mut self) -> Result<(), InstallError> {
    let python = RuntimeBuilder::new(self.runner, &self.fetcher, &self.base_env)
      .create_environment(&self.config.python, &self.layout.venv(), &self.recipe.runtime)
      .await?;

    self.state.env = Some(self.base_env.clone().with_python(&python));
    self.state.python = Some(python);
    Ok(())
  }

  async fn patch(&mut self) -> Result<(), InstallError> {
    let source = produced(self.state.source.as_ref(), "source tree")?;
    let env = self.state.env.as_ref().unwrap_or(&self.base_env);

    let applied = Patcher::new(self.runner, &self.fetcher, env)
      .apply(source, &self.recipe.patches, &self.recipe.version)
      .await?;
    info!(applied = applied.len(), declared = self.recipe.patches.len(), "patched source");
    Ok(())
  }

  fn configure(&mut self) -> Result<(), InstallError> {
    let source = produced(self.state.source.as_ref(), "source tree")?;
    let python = produced(self.state.python.as_ref(), "isolated environment")?;

    let configurator = Configurator::new(self.recipe, self.config, &self.deps).with_os(self.os);
    configurator.prepare_tree(source)?;
    let build_config = configurator.build_args(python)?;

    self.report.build_config = Some(build_config.clone());
    self.state.build_config = Some(build_config);
    Ok(())
  }

  async fn build(&mut self) -> Result<(), InstallError> {
    let source = produced(self.state.source.as_ref(), "source tree")?;
    let build_config = produced(self.state.build_config.as_ref(), "build configuration")?;
    let env = produced(self.state.env.as_ref(), "build environment")?;

    let steps = Driver::new(self.runner, env, self.config.jobs)
      .run(source, build_config)
      .await?;
    self.report.build_steps = steps;
    Ok(())
  }

  fn normalize(&mut self) -> Result<(), InstallError> {
    let python = produced(self.state.python.as_ref(), "isolated environment")?;
    let summary = Normalizer::new(&self.recipe.normalize, &self.layout, python).run()?;
    debug!(summary = ?summary, "normalization summary");
    Ok(())
  }

  async fn verify(&mut self) -> Result<(), InstallError> {
    let python = produced(self.state.python.as_ref(), "isolated environment")?;
    let env = produced(self.state.env.as_ref(), "build environment")?;

    let verification = Verifier::new(
      self.runner,
      env,
      self.recipe,
      &self.layout,
      &self.deps,
      &self.config.cxx,
      python,
    )
    .with_os(self.os)
    .run()
    .await?;

    self.report.verification = Some(verification);
    self.report.tree = Some(summarize_tree(&self.layout.prefix)?);
    Ok(())
  }
}

/// Count files per top-level directory and hash the whole prefix.
pub fn summarize_tree(prefix: &Path) -> Result<TreeSummary, InstallError> {
  let mut files = BTreeMap::new();
  for entry in WalkDir::new(prefix).min_depth(1) {
    let entry = entry.map_err(|e| InstallError::Io(e.into()))?;
    if !entry.file_type().is_file() {
      continue;
    }
    let top = entry
      .path()
      .strip_prefix(prefix)
      .ok()
      .and_then(|rel| rel.components().next())
      .map(|c| c.as_os_str().to_string_lossy().to_string())
      .unwrap_or_default();
    *files.entry(top).or_insert(0) += 1;
  }

  Ok(TreeSummary {
    files,
    content_hash: Some(hash_directory(prefix, &[])?),
  })
}
