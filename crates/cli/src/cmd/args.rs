//! Implementation of the `kiln args` command.
//!
//! Prints the `-D` flags a run would pass to cmake for the given Python
//! version. Nothing is fetched or modified.

use anyhow::{Context, Result};

use kiln_lib::config::{DependencyIndex, RunConfig};
use kiln_lib::configure::Configurator;
use kiln_lib::runtime::PythonEnv;

use crate::output::{OutputFormat, print_json};
use crate::{LocationArgs, RecipeArgs};

pub fn cmd_args(
  recipe_args: &RecipeArgs,
  locations: &LocationArgs,
  python_version: &str,
  output: OutputFormat,
) -> Result<()> {
  let recipe = super::load_recipe(recipe_args)?;
  let config = RunConfig::from_env(&recipe, &locations.overrides()).context("Failed to resolve run configuration")?;
  let deps = DependencyIndex::under_root(&config.deps_root, &recipe.dependencies);
  let python = PythonEnv::new(config.layout(&recipe).venv(), python_version.to_string());

  let build_config = Configurator::new(&recipe, &config, &deps)
    .build_args(&python)
    .context("Failed to derive build configuration")?;

  if output.is_json() {
    return print_json(&build_config);
  }
  for arg in build_config.to_args() {
    println!("{}", arg);
  }
  Ok(())
}
