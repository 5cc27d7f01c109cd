mod cmd;
mod output;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use kiln_lib::config::ConfigOverrides;
use kiln_lib::install::Stage;
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// kiln - build and install GNU Radio from a verified recipe
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

/// Recipe selection shared by every recipe-driven command.
#[derive(Args, Debug, Clone)]
pub struct RecipeArgs {
  /// Recipe file (JSON); the built-in GNU Radio recipe when omitted
  #[arg(long, value_name = "FILE")]
  pub recipe: Option<PathBuf>,
}

/// Location overrides; each takes precedence over its `KILN_*` variable.
#[derive(Args, Debug, Clone, Default)]
pub struct LocationArgs {
  /// Versioned installation prefix
  #[arg(long, value_name = "DIR")]
  pub prefix: Option<PathBuf>,

  /// Root that relocated configuration must reference
  #[arg(long, value_name = "DIR")]
  pub install_root: Option<PathBuf>,

  /// Directory whose opt/<name> entries are dependency prefixes
  #[arg(long, value_name = "DIR")]
  pub deps_root: Option<PathBuf>,

  /// Scratch directory for the unpacked source tree
  #[arg(long, value_name = "DIR")]
  pub work_dir: Option<PathBuf>,

  /// Download cache directory
  #[arg(long, value_name = "DIR")]
  pub cache_dir: Option<PathBuf>,

  /// Base Python interpreter for the isolated environment
  #[arg(long, value_name = "PATH")]
  pub python: Option<PathBuf>,

  /// Parallel build jobs
  #[arg(short, long)]
  pub jobs: Option<usize>,
}

impl LocationArgs {
  pub fn overrides(&self) -> ConfigOverrides {
    ConfigOverrides {
      prefix: self.prefix.clone(),
      install_root: self.install_root.clone(),
      work_dir: self.work_dir.clone(),
      cache_dir: self.cache_dir.clone(),
      deps_root: self.deps_root.clone(),
      python: self.python.clone(),
      jobs: self.jobs,
    }
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Fetch, build, install and verify a recipe
  Install {
    #[command(flatten)]
    recipe: RecipeArgs,

    #[command(flatten)]
    locations: LocationArgs,

    /// Stop after this stage (fetch, runtime, patch, configure, build, normalize, verify)
    #[arg(long, value_name = "STAGE")]
    until: Option<Stage>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Download and verify every resource of a recipe into the cache
  Fetch {
    #[command(flatten)]
    recipe: RecipeArgs,

    /// Download cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Print the build configuration flags a run would pass to cmake
  Args {
    #[command(flatten)]
    recipe: RecipeArgs,

    #[command(flatten)]
    locations: LocationArgs,

    /// Python version of the isolated environment (major.minor)
    #[arg(long, value_name = "X.Y")]
    python_version: String,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Validate a recipe and print it as JSON
  Recipe {
    #[command(flatten)]
    recipe: RecipeArgs,
  },

  /// Display platform and directory information
  Info,
}

fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Install {
      recipe,
      locations,
      until,
      output,
    } => cmd::cmd_install(&recipe, &locations, until, output),
    Commands::Fetch {
      recipe,
      cache_dir,
      output,
    } => cmd::cmd_fetch(&recipe, cache_dir, output),
    Commands::Args {
      recipe,
      locations,
      python_version,
      output,
    } => cmd::cmd_args(&recipe, &locations, &python_version, output),
    Commands::Recipe { recipe } => cmd::cmd_recipe(&recipe),
    Commands::Info => {
      cmd::cmd_info();
      Ok(())
    }
  }
}
