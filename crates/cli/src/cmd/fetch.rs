//! Implementation of the `kiln fetch` command.
//!
//! Downloads every resource a recipe references into the hash-keyed cache
//! without building anything, so a later install can run offline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use kiln_lib::config::resolve_cache_dir;
use kiln_lib::fetch::Fetcher;

use crate::RecipeArgs;
use crate::output::{OutputFormat, format_bytes, print_json, print_stat, print_success, symbols, truncate_hash};

#[derive(Serialize)]
struct FetchedResource {
  name: String,
  sha256: String,
  path: PathBuf,
  size: u64,
}

pub fn cmd_fetch(recipe_args: &RecipeArgs, cache_dir: Option<PathBuf>, output: OutputFormat) -> Result<()> {
  let recipe = super::load_recipe(recipe_args)?;
  let fetcher = Fetcher::new(resolve_cache_dir(cache_dir.as_deref()));

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let fetched = rt.block_on(async {
    let mut fetched = Vec::new();
    for resource in recipe.all_resources() {
      let path = fetcher
        .fetch(resource)
        .await
        .with_context(|| format!("Failed to fetch {}", resource.name))?;
      let size = std::fs::metadata(&path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
      fetched.push(FetchedResource {
        name: resource.name.clone(),
        sha256: resource.sha256.clone(),
        path,
        size,
      });
    }
    anyhow::Ok(fetched)
  })?;

  if output.is_json() {
    return print_json(&fetched);
  }

  for resource in &fetched {
    println!(
      "  {} {} {} ({})",
      symbols::SUCCESS,
      resource.name,
      truncate_hash(&resource.sha256),
      format_bytes(resource.size)
    );
  }
  println!();
  print_success(&format!("Fetched {} resource(s)", fetched.len()));
  print_stat("Cache", &fetcher.cache_dir().display().to_string());
  Ok(())
}
