//! Post-install normalization of the installed tree.
//!
//! The upstream install leaves Python modules in a distribution-specific
//! package directory, embeds the versioned prefix in its configuration and
//! drops non-executable files into `bin`. This stage rewrites the tree in
//! place so it fits the packaging layout.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::InstallLayout;
use crate::install::InstallError;
use crate::patch::substitute_in_file;
use crate::recipe::NormalizeSpec;
use crate::runtime::PythonEnv;

fn normalize_err(path: &Path, message: impl ToString) -> InstallError {
  InstallError::Normalize {
    path: path.to_path_buf(),
    message: message.to_string(),
  }
}

trait NormalizeContext<T> {
  fn at(self, path: &Path) -> Result<T, InstallError>;
}

impl<T> NormalizeContext<T> for io::Result<T> {
  fn at(self, path: &Path) -> Result<T, InstallError> {
    self.map_err(|e| normalize_err(path, e))
  }
}

/// What normalization changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeSummary {
  pub relocated_packages: Vec<String>,
  pub removed_from_bin: Vec<String>,
}

pub struct Normalizer<'a> {
  spec: &'a NormalizeSpec,
  layout: &'a InstallLayout,
  python: &'a PythonEnv,
}

impl<'a> Normalizer<'a> {
  pub fn new(spec: &'a NormalizeSpec, layout: &'a InstallLayout, python: &'a PythonEnv) -> Self {
    Self { spec, layout, python }
  }

  pub fn run(&self) -> Result<NormalizeSummary, InstallError> {
    let relocated_packages = self.merge_legacy_site_dir()?;
    let plugins = self.create_plugins_dir()?;
    self.register_plugins_dir(&plugins)?;
    self.relocate_config()?;
    let removed_from_bin = self.prune_bin()?;

    info!(
      relocated = relocated_packages.len(),
      pruned = removed_from_bin.len(),
      "normalized installed tree"
    );
    Ok(NormalizeSummary {
      relocated_packages,
      removed_from_bin,
    })
  }

  /// Move everything from the legacy package directory into site-packages.
  fn merge_legacy_site_dir(&self) -> Result<Vec<String>, InstallError> {
    let legacy = self.layout.python_lib(&self.python.version, &self.spec.legacy_site_dir);
    if !legacy.is_dir() {
      debug!(path = ?legacy, "no legacy package directory");
      return Ok(Vec::new());
    }

    let site = self.layout.site_packages(&self.python.version);
    fs::create_dir_all(&site).at(&site)?;

    let mut moved = Vec::new();
    for entry in fs::read_dir(&legacy).at(&legacy)? {
      let entry = entry.at(&legacy)?;
      let target = site.join(entry.file_name());
      if target.exists() {
        return Err(normalize_err(&target, "already exists in site-packages"));
      }
      fs::rename(entry.path(), &target).at(&target)?;
      moved.push(entry.file_name().to_string_lossy().to_string());
    }
    moved.sort();

    fs::remove_dir_all(&legacy).at(&legacy)?;
    Ok(moved)
  }

  fn create_plugins_dir(&self) -> Result<PathBuf, InstallError> {
    let plugins = self.layout.plugins_dir();
    fs::create_dir_all(&plugins).at(&plugins)?;
    Ok(plugins)
  }

  /// Make the isolated environment load the prefix's packages and any
  /// plugin `.pth` files dropped into the plugins directory.
  fn register_plugins_dir(&self, plugins: &Path) -> Result<(), InstallError> {
    let venv_site = self.python.site_packages();
    fs::create_dir_all(&venv_site).at(&venv_site)?;

    let module = venv_site.join(format!("{}.py", self.spec.plugin_module));
    let module_contents = format!("import site\nsite.addsitedir(\"{}\")\n", plugins.display());
    fs::write(&module, module_contents).at(&module)?;

    let pth = venv_site.join(&self.spec.pth_file);
    let pth_contents = format!(
      "{}\nimport {}\n",
      self.layout.site_packages(&self.python.version).display(),
      self.spec.plugin_module
    );
    fs::write(&pth, pth_contents).at(&pth)?;
    Ok(())
  }

  /// Point the installed config at the install root instead of the prefix.
  fn relocate_config(&self) -> Result<(), InstallError> {
    let conf = self
      .layout
      .etc()
      .join(&self.layout.package)
      .join(&self.spec.relocated_config);
    let from = self.layout.share().to_string_lossy().to_string();
    let to = self.layout.install_root_share().to_string_lossy().to_string();

    let count = substitute_in_file(&conf, &from, &to).at(&conf)?;
    if count == 0 {
      return Err(normalize_err(&conf, format!("no reference to {}", from)));
    }
    debug!(path = ?conf, count, "relocated config");
    Ok(())
  }

  /// Remove every non-executable file from `bin`. A symlink whose target is
  /// missing counts as non-executable.
  fn prune_bin(&self) -> Result<Vec<String>, InstallError> {
    let bin = self.layout.bin();
    if !bin.is_dir() {
      return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    for entry in fs::read_dir(&bin).at(&bin)? {
      let path = entry.at(&bin)?.path();
      let link = fs::symlink_metadata(&path).at(&path)?;
      let prune = if link.file_type().is_symlink() {
        match fs::metadata(&path) {
          Ok(target) => target.is_file() && !is_executable(&target),
          Err(_) => true,
        }
      } else {
        link.is_file() && !is_executable(&link)
      };
      if prune {
        fs::remove_file(&path).at(&path)?;
        removed.push(path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
      }
    }
    removed.sort();
    Ok(removed)
  }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
  use std::os::unix::fs::PermissionsExt;
  metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::recipe::gnuradio;
  use crate::util::testutil::simulate_make_install;
  use tempfile::TempDir;

  struct Fixture {
    temp: TempDir,
    spec: NormalizeSpec,
    layout: InstallLayout,
    python: PythonEnv,
  }

  fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let layout = InstallLayout {
      prefix: temp.path().join("Cellar/gnuradio/3.8.2.0_6"),
      install_root: temp.path().join("brew"),
      package: "gnuradio".to_string(),
    };
    let python = PythonEnv::new(layout.venv(), "3.9".to_string());
    Fixture {
      temp,
      spec: gnuradio::recipe().normalize,
      layout,
      python,
    }
  }

  #[test]
  fn full_normalization_of_installed_tree() {
    let f = fixture();
    simulate_make_install(&f.layout.prefix, "3.9");

    let summary = Normalizer::new(&f.spec, &f.layout, &f.python).run().unwrap();

    let site = f.layout.site_packages("3.9");
    assert!(site.join("gnuradio/__init__.py").exists());
    assert!(!f.layout.python_lib("3.9", "dist-packages").exists());
    assert_eq!(summary.relocated_packages, ["gnuradio"]);

    assert!(f.layout.plugins_dir().is_dir());

    let conf = fs::read_to_string(f.layout.conf_dir().join("grc.conf")).unwrap();
    assert!(conf.contains(&format!("{}/gnuradio/grc/blocks", f.temp.path().join("brew/share").display())));
    assert!(!conf.contains(&f.layout.share().display().to_string()));

    assert_eq!(summary.removed_from_bin, ["gr_filter_design.README"]);
    assert!(f.layout.bin().join("gnuradio-config-info").exists());
  }

  #[test]
  fn plugin_registration_files_point_at_prefix() {
    let f = fixture();
    simulate_make_install(&f.layout.prefix, "3.9");

    Normalizer::new(&f.spec, &f.layout, &f.python).run().unwrap();

    let venv_site = f.python.site_packages();
    let module = fs::read_to_string(venv_site.join("kiln_gr_plugins.py")).unwrap();
    assert_eq!(
      module,
      format!("import site\nsite.addsitedir(\"{}\")\n", f.layout.plugins_dir().display())
    );

    let pth = fs::read_to_string(venv_site.join("kiln-gnuradio.pth")).unwrap();
    assert_eq!(
      pth,
      format!("{}\nimport kiln_gr_plugins\n", f.layout.site_packages("3.9").display())
    );
  }

  #[test]
  fn missing_legacy_dir_is_a_no_op() {
    let f = fixture();
    simulate_make_install(&f.layout.prefix, "3.9");
    fs::remove_dir_all(f.layout.python_lib("3.9", "dist-packages")).unwrap();

    let summary = Normalizer::new(&f.spec, &f.layout, &f.python).run().unwrap();

    assert!(summary.relocated_packages.is_empty());
    assert!(!f.layout.site_packages("3.9").join("gnuradio").exists());
  }

  #[test]
  fn colliding_package_is_normalize_error() {
    let f = fixture();
    simulate_make_install(&f.layout.prefix, "3.9");
    fs::create_dir_all(f.layout.site_packages("3.9").join("gnuradio")).unwrap();

    let result = Normalizer::new(&f.spec, &f.layout, &f.python).run();
    assert!(matches!(result, Err(InstallError::Normalize { message, .. }) if message.contains("already exists")));
  }

  #[test]
  fn missing_config_is_normalize_error() {
    let f = fixture();
    simulate_make_install(&f.layout.prefix, "3.9");
    fs::remove_file(f.layout.conf_dir().join("grc.conf")).unwrap();

    let result = Normalizer::new(&f.spec, &f.layout, &f.python).run();
    assert!(matches!(result, Err(InstallError::Normalize { path, .. }) if path.ends_with("grc.conf")));
  }

  #[cfg(unix)]
  #[test]
  fn dangling_link_in_bin_is_pruned() {
    use std::os::unix::fs::symlink;

    let f = fixture();
    simulate_make_install(&f.layout.prefix, "3.9");
    let bin = f.layout.bin();
    symlink("/nonexistent/target", bin.join("stale-link")).unwrap();
    symlink(bin.join("gnuradio-config-info"), bin.join("gr-config")).unwrap();

    let summary = Normalizer::new(&f.spec, &f.layout, &f.python).run().unwrap();

    assert_eq!(summary.removed_from_bin, ["gr_filter_design.README", "stale-link"]);
    assert!(fs::symlink_metadata(bin.join("stale-link")).is_err());
    assert!(bin.join("gr-config").exists());
  }
}
