//! Run configuration.
//!
//! Everything that depends on the host environment is resolved once into a
//! [`RunConfig`] and threaded explicitly through the stages. Explicit
//! overrides (CLI flags) win over `KILN_*` variables, which win over XDG
//! defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::consts::{ENV_PREFIX, VENV_SUBDIR};
use crate::install::InstallError;
use crate::platform::Platform;
use crate::platform::arch::Arch;
use crate::platform::os::Os;
use crate::platform::paths;
use crate::recipe::{Dependency, Recipe};
use crate::runtime::PythonEnv;

/// Explicit values that take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
  pub prefix: Option<PathBuf>,
  pub install_root: Option<PathBuf>,
  pub work_dir: Option<PathBuf>,
  pub cache_dir: Option<PathBuf>,
  pub deps_root: Option<PathBuf>,
  pub python: Option<PathBuf>,
  pub jobs: Option<usize>,
}

/// Every environment-dependent value for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
  /// Versioned installation directory.
  pub prefix: PathBuf,
  /// Canonical root that relocated configuration must reference.
  pub install_root: PathBuf,
  pub work_dir: PathBuf,
  pub cache_dir: PathBuf,
  pub cc: PathBuf,
  pub cxx: PathBuf,
  /// Base interpreter the isolated environment is created from.
  pub python: PathBuf,
  pub jobs: usize,
  /// Directory whose `opt/<name>` entries are dependency prefixes.
  pub deps_root: PathBuf,
  /// `PATH` captured at startup; the build overlay prepends to it.
  pub inherited_path: String,
}

fn env_var(suffix: &str) -> Option<String> {
  std::env::var(format!("{}{}", ENV_PREFIX, suffix))
    .ok()
    .filter(|v| !v.is_empty())
}

fn default_deps_root() -> PathBuf {
  match Platform::current() {
    Some(Platform {
      arch: Arch::Aarch64,
      os: Os::MacOs,
    }) => PathBuf::from("/opt/homebrew"),
    _ => PathBuf::from("/usr/local"),
  }
}

/// Download cache location: the explicit value, then `KILN_CACHE`, then the
/// XDG default.
pub fn resolve_cache_dir(explicit: Option<&Path>) -> PathBuf {
  explicit
    .map(Path::to_path_buf)
    .or_else(|| env_var("CACHE").map(PathBuf::from))
    .unwrap_or_else(paths::downloads_dir)
}

/// Resolve a tool given as a bare name or path.
///
/// Absolute paths are taken as-is; anything else is looked up on `PATH`.
fn resolve_tool(value: &str) -> Result<PathBuf, InstallError> {
  let path = Path::new(value);
  if path.is_absolute() {
    return Ok(path.to_path_buf());
  }
  which::which(value).map_err(|e| InstallError::Configuration(format!("cannot resolve '{}' on PATH: {}", value, e)))
}

impl RunConfig {
  /// Resolve a configuration for `recipe` from overrides and the environment.
  pub fn from_env(recipe: &Recipe, overrides: &ConfigOverrides) -> Result<Self, InstallError> {
    let deps_root = overrides
      .deps_root
      .clone()
      .or_else(|| env_var("DEPS_ROOT").map(PathBuf::from))
      .unwrap_or_else(default_deps_root);

    let prefix = overrides
      .prefix
      .clone()
      .or_else(|| env_var("PREFIX").map(PathBuf::from))
      .unwrap_or_else(|| {
        paths::data_dir()
          .join("prefix")
          .join(&recipe.name)
          .join(recipe.full_version())
      });

    let install_root = overrides
      .install_root
      .clone()
      .or_else(|| env_var("INSTALL_ROOT").map(PathBuf::from))
      .unwrap_or_else(|| deps_root.clone());

    let work_dir = overrides
      .work_dir
      .clone()
      .or_else(|| env_var("WORK_DIR").map(PathBuf::from))
      .unwrap_or_else(paths::work_dir);

    let cache_dir = resolve_cache_dir(overrides.cache_dir.as_deref());

    let cc = resolve_tool(&std::env::var("CC").unwrap_or_else(|_| "cc".to_string()))?;
    let cxx = resolve_tool(&std::env::var("CXX").unwrap_or_else(|_| "c++".to_string()))?;

    let python = match &overrides.python {
      Some(path) => resolve_tool(&path.to_string_lossy())?,
      None => resolve_tool(&env_var("PYTHON").unwrap_or_else(|| "python3".to_string()))?,
    };

    let jobs = match overrides.jobs {
      Some(jobs) => jobs,
      None => match env_var("JOBS") {
        Some(raw) => raw
          .parse::<usize>()
          .map_err(|_| InstallError::Configuration(format!("{}JOBS must be a positive integer, got '{}'", ENV_PREFIX, raw)))?,
        None => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
      },
    };
    if jobs == 0 {
      return Err(InstallError::Configuration("parallel jobs must be at least 1".to_string()));
    }

    let config = Self {
      prefix,
      install_root,
      work_dir,
      cache_dir,
      cc,
      cxx,
      python,
      jobs,
      deps_root,
      inherited_path: std::env::var("PATH").unwrap_or_default(),
    };
    debug!(config = ?config, "resolved run configuration");
    Ok(config)
  }

  pub fn layout(&self, recipe: &Recipe) -> InstallLayout {
    InstallLayout {
      prefix: self.prefix.clone(),
      install_root: self.install_root.clone(),
      package: recipe.name.clone(),
    }
  }

  /// Scratch directory for this recipe's unpacked source.
  pub fn source_dir(&self, recipe: &Recipe) -> PathBuf {
    self.work_dir.join(format!("{}-{}", recipe.name, recipe.full_version()))
  }
}

/// Paths inside the installed tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallLayout {
  pub prefix: PathBuf,
  pub install_root: PathBuf,
  /// Package name used for the `etc/<package>` configuration subtree.
  pub package: String,
}

impl InstallLayout {
  pub fn bin(&self) -> PathBuf {
    self.prefix.join("bin")
  }

  pub fn lib(&self) -> PathBuf {
    self.prefix.join("lib")
  }

  pub fn share(&self) -> PathBuf {
    self.prefix.join("share")
  }

  pub fn etc(&self) -> PathBuf {
    self.prefix.join("etc")
  }

  pub fn conf_dir(&self) -> PathBuf {
    self.etc().join(&self.package).join("conf.d")
  }

  pub fn plugins_dir(&self) -> PathBuf {
    self.etc().join(&self.package).join("plugins.d")
  }

  pub fn venv(&self) -> PathBuf {
    self.prefix.join(VENV_SUBDIR)
  }

  /// `lib/python<version>/<dir>` under the prefix.
  pub fn python_lib(&self, python_version: &str, dir: &str) -> PathBuf {
    self.lib().join(format!("python{}", python_version)).join(dir)
  }

  pub fn site_packages(&self, python_version: &str) -> PathBuf {
    self.python_lib(python_version, "site-packages")
  }

  pub fn install_root_share(&self) -> PathBuf {
    self.install_root.join("share")
  }
}

/// Maps dependency names to their installed prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyIndex {
  prefixes: BTreeMap<String, PathBuf>,
}

impl DependencyIndex {
  /// Index every declared dependency at `<root>/opt/<name>`.
  pub fn under_root(root: &Path, deps: &[Dependency]) -> Self {
    let prefixes = deps
      .iter()
      .map(|d| (d.name.clone(), root.join("opt").join(&d.name)))
      .collect();
    Self { prefixes }
  }

  pub fn insert(&mut self, name: &str, prefix: PathBuf) {
    self.prefixes.insert(name.to_string(), prefix);
  }

  pub fn remove(&mut self, name: &str) -> Option<PathBuf> {
    self.prefixes.remove(name)
  }

  pub fn prefix(&self, name: &str) -> Option<&Path> {
    self.prefixes.get(name).map(PathBuf::as_path)
  }

  /// Prefix of a dependency the recipe must declare and the index must hold.
  pub fn require(&self, recipe: &Recipe, name: &str) -> Result<&Path, InstallError> {
    if recipe.dependency(name).is_none() {
      return Err(InstallError::Configuration(format!(
        "recipe '{}' does not declare dependency '{}'",
        recipe.name, name
      )));
    }
    self
      .prefix(name)
      .ok_or_else(|| InstallError::Configuration(format!("dependency '{}' not found in dependency index", name)))
  }
}

/// Environment overlay attached to every toolchain invocation.
///
/// Computed once per run from the [`RunConfig`]; `PYTHONPATH` is added once
/// the isolated environment exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildEnv {
  vars: BTreeMap<String, String>,
}

impl BuildEnv {
  pub fn new(config: &RunConfig, recipe: &Recipe, deps: &DependencyIndex) -> Result<Self, InstallError> {
    let qt = deps.require(recipe, "qt")?;

    let qt_bin = qt.join("bin").to_string_lossy().to_string();
    let path = if config.inherited_path.is_empty() {
      qt_bin
    } else {
      format!("{}:{}", qt_bin, config.inherited_path)
    };

    let mut vars = BTreeMap::new();
    vars.insert("CC".to_string(), config.cc.to_string_lossy().to_string());
    vars.insert("CXX".to_string(), config.cxx.to_string_lossy().to_string());
    vars.insert("PATH".to_string(), path);
    vars.insert(
      "XML_CATALOG_FILES".to_string(),
      config
        .install_root
        .join("etc")
        .join("xml")
        .join("catalog")
        .to_string_lossy()
        .to_string(),
    );

    Ok(Self { vars })
  }

  /// Add the isolated environment's site directory to `PYTHONPATH`.
  pub fn with_python(mut self, python: &PythonEnv) -> Self {
    self.vars.insert(
      "PYTHONPATH".to_string(),
      python.site_packages().to_string_lossy().to_string(),
    );
    self
  }

  pub fn vars(&self) -> &BTreeMap<String, String> {
    &self.vars
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.vars.get(key).map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::recipe::gnuradio;
  use serial_test::serial;

  fn run_vars(set: &[(&'static str, &'static str)]) -> Vec<(&'static str, Option<&'static str>)> {
    let base = vec![
      ("KILN_PREFIX", None),
      ("KILN_INSTALL_ROOT", None),
      ("KILN_WORK_DIR", None),
      ("KILN_CACHE", None),
      ("KILN_DEPS_ROOT", None),
      ("KILN_JOBS", None),
      ("KILN_PYTHON", Some("/opt/py/bin/python3")),
      ("CC", Some("/usr/bin/clang")),
      ("CXX", Some("/usr/bin/clang++")),
      ("XDG_DATA_HOME", Some("/data")),
      ("XDG_CACHE_HOME", Some("/cache")),
    ];
    let mut vars: Vec<_> = base
      .into_iter()
      .filter(|(key, _)| !set.iter().any(|(k, _)| k == key))
      .collect();
    vars.extend(set.iter().map(|(k, v)| (*k, Some(*v))));
    vars
  }

  #[test]
  #[serial]
  fn defaults_follow_xdg_directories() {
    temp_env::with_vars(run_vars(&[]), || {
      let recipe = gnuradio::recipe();
      let config = RunConfig::from_env(&recipe, &ConfigOverrides::default()).unwrap();

      assert_eq!(config.prefix, PathBuf::from("/data/kiln/prefix/gnuradio/3.8.2.0_6"));
      assert_eq!(config.work_dir, PathBuf::from("/data/kiln/work"));
      assert_eq!(config.cache_dir, PathBuf::from("/cache/kiln/downloads"));
      assert_eq!(config.cc, PathBuf::from("/usr/bin/clang"));
      assert_eq!(config.python, PathBuf::from("/opt/py/bin/python3"));
      assert_eq!(config.install_root, config.deps_root);
      assert!(config.jobs >= 1);
    });
  }

  #[test]
  #[serial]
  fn env_vars_override_defaults() {
    let vars = run_vars(&[
      ("KILN_PREFIX", "/env/prefix"),
      ("KILN_DEPS_ROOT", "/env/deps"),
      ("KILN_JOBS", "3"),
    ]);

    temp_env::with_vars(vars, || {
      let recipe = gnuradio::recipe();
      let config = RunConfig::from_env(&recipe, &ConfigOverrides::default()).unwrap();
      assert_eq!(config.prefix, PathBuf::from("/env/prefix"));
      assert_eq!(config.deps_root, PathBuf::from("/env/deps"));
      assert_eq!(config.install_root, PathBuf::from("/env/deps"));
      assert_eq!(config.jobs, 3);
    });
  }

  #[test]
  #[serial]
  fn overrides_win_over_env_vars() {
    let vars = run_vars(&[("KILN_PREFIX", "/env/prefix"), ("KILN_JOBS", "3")]);

    temp_env::with_vars(vars, || {
      let overrides = ConfigOverrides {
        prefix: Some(PathBuf::from("/flag/prefix")),
        jobs: Some(8),
        ..Default::default()
      };
      let config = RunConfig::from_env(&gnuradio::recipe(), &overrides).unwrap();
      assert_eq!(config.prefix, PathBuf::from("/flag/prefix"));
      assert_eq!(config.jobs, 8);
    });
  }

  #[test]
  #[serial]
  fn invalid_jobs_is_configuration_error() {
    let vars = run_vars(&[("KILN_JOBS", "many")]);

    temp_env::with_vars(vars, || {
      let result = RunConfig::from_env(&gnuradio::recipe(), &ConfigOverrides::default());
      assert!(matches!(result, Err(InstallError::Configuration(_))));
    });
  }

  #[test]
  fn dependency_index_requires_declared_dependency() {
    let recipe = gnuradio::recipe();
    let mut index = DependencyIndex::under_root(Path::new("/deps"), &recipe.dependencies);
    assert_eq!(index.require(&recipe, "qwt").unwrap(), Path::new("/deps/opt/qwt"));

    assert!(matches!(
      index.require(&recipe, "openssl"),
      Err(InstallError::Configuration(msg)) if msg.contains("does not declare")
    ));

    index.remove("qwt");
    assert!(matches!(
      index.require(&recipe, "qwt"),
      Err(InstallError::Configuration(msg)) if msg.contains("dependency index")
    ));
  }

  #[test]
  fn layout_places_config_under_prefix_etc() {
    let layout = InstallLayout {
      prefix: PathBuf::from("/p"),
      install_root: PathBuf::from("/root"),
      package: "gnuradio".to_string(),
    };
    assert_eq!(layout.conf_dir(), PathBuf::from("/p/etc/gnuradio/conf.d"));
    assert_eq!(layout.plugins_dir(), PathBuf::from("/p/etc/gnuradio/plugins.d"));
    assert_eq!(layout.site_packages("3.9"), PathBuf::from("/p/lib/python3.9/site-packages"));
    assert_eq!(layout.venv(), PathBuf::from("/p/libexec/venv"));
    assert_eq!(layout.install_root_share(), PathBuf::from("/root/share"));
  }

  #[test]
  fn build_env_prepends_qt_bin_to_inherited_path() {
    let recipe = gnuradio::recipe();
    let config = RunConfig {
      prefix: PathBuf::from("/p"),
      install_root: PathBuf::from("/root"),
      work_dir: PathBuf::from("/w"),
      cache_dir: PathBuf::from("/c"),
      cc: PathBuf::from("/usr/bin/cc"),
      cxx: PathBuf::from("/usr/bin/c++"),
      python: PathBuf::from("/usr/bin/python3"),
      jobs: 2,
      deps_root: PathBuf::from("/deps"),
      inherited_path: "/usr/bin:/bin".to_string(),
    };
    let deps = DependencyIndex::under_root(&config.deps_root, &recipe.dependencies);
    let env = BuildEnv::new(&config, &recipe, &deps).unwrap();

    assert_eq!(env.get("PATH"), Some("/deps/opt/qt/bin:/usr/bin:/bin"));
    assert_eq!(env.get("CXX"), Some("/usr/bin/c++"));
    assert_eq!(env.get("XML_CATALOG_FILES"), Some("/root/etc/xml/catalog"));
    assert_eq!(env.get("PYTHONPATH"), None);

    let python = PythonEnv::new(PathBuf::from("/p/libexec/venv"), "3.9".to_string());
    let env = env.with_python(&python);
    assert_eq!(
      env.get("PYTHONPATH"),
      Some("/p/libexec/venv/lib/python3.9/site-packages")
    );
  }
}
