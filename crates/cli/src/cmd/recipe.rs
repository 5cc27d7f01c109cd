use anyhow::{Context, Result};

use crate::RecipeArgs;

/// Validate the selected recipe and print it as JSON, ready to be edited and
/// passed back with `--recipe`.
pub fn cmd_recipe(recipe_args: &RecipeArgs) -> Result<()> {
  let recipe = super::load_recipe(recipe_args)?;
  recipe.validate().context("Recipe is invalid")?;
  println!("{}", recipe.to_json().context("Failed to serialize recipe")?);
  Ok(())
}
