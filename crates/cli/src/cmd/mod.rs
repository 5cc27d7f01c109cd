mod args;
mod fetch;
mod info;
mod install;
mod recipe;

pub use args::cmd_args;
pub use fetch::cmd_fetch;
pub use info::cmd_info;
pub use install::cmd_install;
pub use recipe::cmd_recipe;

use anyhow::{Context, Result};
use kiln_lib::recipe::{Recipe, gnuradio};

use crate::RecipeArgs;

/// Load the recipe named on the command line, or the built-in one.
fn load_recipe(args: &RecipeArgs) -> Result<Recipe> {
  match &args.recipe {
    Some(path) => Recipe::load(path).with_context(|| format!("Failed to load recipe: {}", path.display())),
    None => Ok(gnuradio::recipe()),
  }
}
