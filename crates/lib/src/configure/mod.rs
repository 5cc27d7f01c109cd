//! Build configuration.
//!
//! [`Configurator::prepare_tree`] performs the one-shot source rewrites the
//! build needs. [`Configurator::build_args`] is pure: it derives the complete
//! ordered option set from the recipe, the run configuration and the isolated
//! environment, and yields the same result for the same inputs.

mod args;

pub use args::{BuildConfig, ConfigValue};

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{DependencyIndex, InstallLayout, RunConfig};
use crate::install::InstallError;
use crate::patch::substitute_in_file;
use crate::platform::os::Os;
use crate::recipe::Recipe;
use crate::runtime::PythonEnv;

const C_COMPILER_REF: &str = "${CMAKE_C_COMPILER}";
const CXX_COMPILER_REF: &str = "${CMAKE_CXX_COMPILER}";
const GTK_VERSION_CHECK: &str = "     from gi.repository import Gtk; Gtk.check_version(3, 10, 8)";
const GRC_BUILD_FILE: &str = "grc/CMakeLists.txt";

pub struct Configurator<'a> {
  recipe: &'a Recipe,
  config: &'a RunConfig,
  deps: &'a DependencyIndex,
  os: Os,
}

impl<'a> Configurator<'a> {
  pub fn new(recipe: &'a Recipe, config: &'a RunConfig, deps: &'a DependencyIndex) -> Self {
    Self {
      recipe,
      config,
      deps,
      os: Os::host(),
    }
  }

  /// Target a specific platform layout instead of the host's.
  pub fn with_os(mut self, os: Os) -> Self {
    self.os = os;
    self
  }

  fn compilers(&self) -> Result<(&Path, &Path), InstallError> {
    for compiler in [&self.config.cc, &self.config.cxx] {
      if !compiler.is_absolute() {
        return Err(InstallError::Configuration(format!(
          "compiler path must be absolute: {}",
          compiler.display()
        )));
      }
    }
    Ok((self.config.cc.as_path(), self.config.cxx.as_path()))
  }

  /// Rewrite compiler references in the source tree to concrete paths and,
  /// when requested, drop the GUI toolkit version probe.
  pub fn prepare_tree(&self, tree: &Path) -> Result<(), InstallError> {
    let (cc, cxx) = self.compilers()?;

    let top = tree.join("CMakeLists.txt");
    for (reference, compiler) in [(C_COMPILER_REF, cc), (CXX_COMPILER_REF, cxx)] {
      rewrite(&top, reference, &compiler.to_string_lossy())?;
    }
    debug!(file = ?top, "pinned compiler paths");

    if self.recipe.configure.skip_gui_toolkit_version_check {
      rewrite(&tree.join(GRC_BUILD_FILE), GTK_VERSION_CHECK, "")?;
      info!("removed GUI toolkit version check");
    }

    Ok(())
  }

  /// Derive the ordered option set for `python`'s environment.
  pub fn build_args(&self, python: &PythonEnv) -> Result<BuildConfig, InstallError> {
    self.compilers()?;
    let layout = self.config.layout(self.recipe);
    let mut args = BuildConfig::new();

    standard_args(&mut args, &layout);

    args
      .set("GR_PKG_CONF_DIR", layout.conf_dir())
      .set("GR_PREFSDIR", layout.conf_dir());

    args.set("ENABLE_DEFAULT", false);
    for component in &self.recipe.configure.components {
      if component.is_empty() || component.eq_ignore_ascii_case("DEFAULT") {
        return Err(InstallError::Configuration(format!(
          "invalid component name '{}'",
          component
        )));
      }
      args.set(format!("ENABLE_{}", component), true);
    }

    args
      .set("PYTHON_EXECUTABLE", python.interpreter.clone())
      .set("PYTHON_VERSION_MAJOR", python.major());

    let qwt = self.deps.require(self.recipe, "qwt")?;
    let (qwt_libraries, qwt_includes) = qwt_layout(qwt, self.os);
    let qt = self.deps.require(self.recipe, "qt")?;
    args
      .set("QWT_LIBRARIES", qwt_libraries)
      .set("QWT_INCLUDE_DIRS", qwt_includes)
      .set("CMAKE_PREFIX_PATH", qt.join("lib"))
      .set("QT_BINARY_DIR", qt.join("bin"));

    args.set("ENABLE_TESTING", false);
    args.set("ENABLE_INTERNAL_VOLK", false);

    debug!(options = args.len(), "derived build options");
    Ok(args)
  }
}

fn standard_args(args: &mut BuildConfig, layout: &InstallLayout) {
  args
    .set("CMAKE_INSTALL_PREFIX", layout.prefix.clone())
    .set("CMAKE_INSTALL_LIBDIR", "lib")
    .set("CMAKE_BUILD_TYPE", "Release")
    .set("CMAKE_FIND_FRAMEWORK", "LAST")
    .set("CMAKE_VERBOSE_MAKEFILE", true)
    .set("BUILD_TESTING", false);
}

/// macOS ships qwt as a framework; elsewhere it is a plain library.
fn qwt_layout(qwt: &Path, os: Os) -> (PathBuf, PathBuf) {
  if os.uses_frameworks() {
    let framework = qwt.join("lib").join("qwt.framework");
    (framework.join("qwt"), framework.join("Headers"))
  } else {
    (qwt.join("lib").join("libqwt.so"), qwt.join("include"))
  }
}

/// In-place source rewrite; failures surface as patch errors.
fn rewrite(path: &Path, find: &str, replace: &str) -> Result<(), InstallError> {
  let patch_err = |message: String| InstallError::Patch {
    patch: path.display().to_string(),
    message,
  };
  let count = substitute_in_file(path, find, replace).map_err(|e| patch_err(format!("cannot rewrite: {}", e)))?;
  if count == 0 {
    return Err(patch_err(format!("'{}' not found", find.trim())));
  }
  Ok(())
}
