//! Implementation of the `kiln install` command.
//!
//! Resolves the run configuration, drives the recipe through every stage (or
//! up to `--until`) and prints a summary. When a stage fails the captured tool
//! output is replayed verbatim and the command exits non-zero.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde::Serialize;

use kiln_lib::config::{DependencyIndex, RunConfig};
use kiln_lib::install::{InstallReport, Installer, RunError, Stage};
use kiln_lib::process::SystemRunner;

use crate::output::{
  OutputFormat, format_duration, print_captured, print_error, print_info, print_json, print_stat, print_success,
  symbols, truncate_hash,
};
use crate::{LocationArgs, RecipeArgs};

#[derive(Serialize)]
struct FailureOutput<'a> {
  stage: Stage,
  error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  stdout: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  stderr: Option<&'a str>,
}

pub fn cmd_install(
  recipe_args: &RecipeArgs,
  locations: &LocationArgs,
  until: Option<Stage>,
  output: OutputFormat,
) -> Result<()> {
  let recipe = super::load_recipe(recipe_args)?;
  let config = RunConfig::from_env(&recipe, &locations.overrides()).context("Failed to resolve run configuration")?;
  let deps = DependencyIndex::under_root(&config.deps_root, &recipe.dependencies);

  let runner = SystemRunner;
  let installer = Installer::new(&runner, &recipe, &config, deps)
    .context("Failed to prepare install")?
    .until(until);

  if !output.is_json() {
    print_info(&format!(
      "Installing {} {} into {}",
      recipe.name,
      recipe.full_version(),
      config.prefix.display()
    ));
  }

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  match rt.block_on(installer.run()) {
    Ok(report) => {
      if output.is_json() {
        print_json(&report)?;
      } else {
        print_report(&report);
      }
      Ok(())
    }
    Err(err) => {
      report_failure(&err, output)?;
      std::process::exit(1);
    }
  }
}

fn print_report(report: &InstallReport) {
  for stage in &report.stages {
    println!(
      "  {} {:<10} {}",
      symbols::SUCCESS.green(),
      stage.stage.as_str(),
      format_duration(stage.elapsed).dimmed()
    );
  }
  println!();

  if !report.is_verified() {
    if let Some(last) = report.stages.last() {
      print_success(&format!("Stopped after {}", last.stage));
    }
    print_stat("Prefix", &report.prefix.display().to_string());
    return;
  }

  print_success(&format!("Installed {} {}", report.recipe, report.version));
  print_stat("Prefix", &report.prefix.display().to_string());
  print_stat("Elapsed", &format_duration(report.total_elapsed()));
  if let Some(verification) = &report.verification {
    print_stat("Smoke checks", &format!("{} passed", verification.checks.len()));
  }
  if let Some(tree) = &report.tree {
    let files: usize = tree.files.values().sum();
    print_stat("Files", &files.to_string());
    if let Some(hash) = &tree.content_hash {
      print_stat("Tree hash", truncate_hash(hash.as_str()));
    }
  }
}

fn report_failure(err: &RunError, output: OutputFormat) -> Result<()> {
  let captured = err.source.captured_output();

  if output.is_json() {
    return print_json(&FailureOutput {
      stage: err.stage,
      error: err.source.to_string(),
      stdout: captured.map(|(out, _)| out),
      stderr: captured.map(|(_, errout)| errout),
    });
  }

  print_error(&err.to_string());
  if let Some((stdout, stderr)) = captured {
    print_captured(stdout, stderr);
  }
  Ok(())
}
