//! Recipes: the static, declarative half of an install.
//!
//! The built-in [`gnuradio::recipe`] is the default. Any recipe can be dumped
//! to JSON with [`Recipe::to_json`], edited, and loaded back with
//! [`Recipe::load`].

pub mod gnuradio;
mod types;
mod version;

pub use types::*;
pub use version::{RecipeVersion, VersionParseError};
