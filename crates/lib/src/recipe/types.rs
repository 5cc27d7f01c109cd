//! Declarative recipe types.
//!
//! A [`Recipe`] is static data: where the sources live, what they hash to,
//! which patches apply, which optional subsystems to enable and how the
//! installed tree is checked. The install stages interpret it; nothing here
//! touches the filesystem.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::version::RecipeVersion;
use crate::util::hash::ContentHash;

/// Errors loading or validating a recipe.
#[derive(Debug, Error)]
pub enum RecipeError {
  #[error("failed to read recipe {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse recipe: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("resource '{name}' declares an invalid sha256 '{sha256}'")]
  InvalidHash { name: String, sha256: String },

  #[error("resource name '{0}' is declared more than once")]
  DuplicateResource(String),

  #[error("dependency '{0}' is declared more than once")]
  DuplicateDependency(String),

  #[error("smoke test links against '{0}', which is not a declared dependency")]
  UnknownLinkDependency(String),
}

/// A named, content-addressed external artifact.
///
/// Identity is the content hash: two specs with the same `sha256` refer to
/// the same bytes regardless of name or URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
  pub name: String,
  pub url: String,
  pub sha256: String,
  /// Directory, relative to the install prefix, that the fetched file is
  /// copied into before the build (e.g. `include` for a header-only library).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub destination: Option<String>,
}

impl ResourceSpec {
  pub fn new(name: &str, url: &str, sha256: &str) -> Self {
    Self {
      name: name.to_string(),
      url: url.to_string(),
      sha256: sha256.to_string(),
      destination: None,
    }
  }

  pub fn staged_into(mut self, destination: &str) -> Self {
    self.destination = Some(destination.to_string());
    self
  }
}

fn default_strip() -> u32 {
  1
}

/// One source modification, applied exactly once in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchSpec {
  /// A unified diff fetched as a resource and applied with `patch -p<strip>`.
  Diff {
    resource: ResourceSpec,
    #[serde(default = "default_strip")]
    strip: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    /// First upstream version that no longer needs this patch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    obsolete_from: Option<RecipeVersion>,
  },

  /// Replace every occurrence of `find` with `replace` in `file`.
  Substitute {
    file: String,
    find: String,
    replace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
  },
}

impl PatchSpec {
  /// Short human-readable label for logs and errors.
  pub fn label(&self) -> String {
    match self {
      PatchSpec::Diff { resource, .. } => resource.name.clone(),
      PatchSpec::Substitute { file, .. } => format!("substitute in {}", file),
    }
  }

  /// Whether this patch still applies to `version`.
  pub fn applies_to(&self, version: &RecipeVersion) -> bool {
    match self {
      PatchSpec::Diff {
        obsolete_from: Some(bound),
        ..
      } => version < bound,
      _ => true,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
  /// Needed only while building (cmake, swig, ...).
  Build,
  /// Linked or imported by the installed artifacts.
  Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
  pub name: String,
  pub kind: DependencyKind,
}

impl Dependency {
  pub fn build(name: &str) -> Self {
    Self {
      name: name.to_string(),
      kind: DependencyKind::Build,
    }
  }

  pub fn runtime(name: &str) -> Self {
    Self {
      name: name.to_string(),
      kind: DependencyKind::Runtime,
    }
  }
}

/// The isolated interpreter environment and its helper packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSpec {
  /// Installed in listed order.
  pub helpers: Vec<ResourceSpec>,
  /// Keep host site-packages (numpy, PyQt) visible inside the environment.
  #[serde(default)]
  pub system_site_packages: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureSpec {
  /// Subsystems switched on after the global default is switched off.
  pub components: Vec<String>,
  /// Remove the GUI toolkit version probe from the GRC build description.
  #[serde(default)]
  pub skip_gui_toolkit_version_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeSpec {
  /// Package directory name the upstream build installs Python modules into.
  pub legacy_site_dir: String,
  /// Module written into the isolated environment to register plugin paths.
  pub plugin_module: String,
  /// `.pth` file that imports `plugin_module`.
  pub pth_file: String,
  /// Config file under `<etc>/<name>/` whose embedded prefix is relocated.
  pub relocated_config: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeSpec {
  /// Diagnostic binary in `<prefix>/bin`.
  pub diagnostic: String,
  pub version_flag: String,
  pub cxx_standard: String,
  /// Libraries passed as `-l<name>` when compiling the native smoke test.
  pub link_libraries: Vec<String>,
  /// Dependencies whose `lib` directory is added with `-L`.
  pub link_dependencies: Vec<String>,
}

/// A complete build-and-install recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
  pub name: String,
  pub version: RecipeVersion,
  #[serde(default)]
  pub revision: u32,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub homepage: String,
  #[serde(default)]
  pub license: String,
  pub source: ResourceSpec,
  pub runtime: RuntimeSpec,
  /// Auxiliary resources; those with a destination are staged before the build.
  #[serde(default)]
  pub resources: Vec<ResourceSpec>,
  #[serde(default)]
  pub patches: Vec<PatchSpec>,
  #[serde(default)]
  pub dependencies: Vec<Dependency>,
  pub configure: ConfigureSpec,
  pub normalize: NormalizeSpec,
  pub smoke: SmokeSpec,
}

impl Recipe {
  /// Load and validate a recipe from a JSON file.
  pub fn load(path: &Path) -> Result<Self, RecipeError> {
    let content = fs::read_to_string(path).map_err(|source| RecipeError::Read {
      path: path.display().to_string(),
      source,
    })?;
    let recipe: Recipe = serde_json::from_str(&content)?;
    recipe.validate()?;
    Ok(recipe)
  }

  pub fn to_json(&self) -> Result<String, RecipeError> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  /// Every resource the recipe references, in the order stages fetch them.
  pub fn all_resources(&self) -> Vec<&ResourceSpec> {
    let mut all = vec![&self.source];
    all.extend(self.resources.iter());
    all.extend(self.patches.iter().filter_map(|p| match p {
      PatchSpec::Diff { resource, .. } => Some(resource),
      PatchSpec::Substitute { .. } => None,
    }));
    all.extend(self.runtime.helpers.iter());
    all
  }

  pub fn dependency(&self, name: &str) -> Option<&Dependency> {
    self.dependencies.iter().find(|d| d.name == name)
  }

  /// Version string including the packaging revision (`3.8.2.0_6`).
  pub fn full_version(&self) -> String {
    if self.revision == 0 {
      self.version.to_string()
    } else {
      format!("{}_{}", self.version, self.revision)
    }
  }

  /// Check hashes, uniqueness of names and smoke-test dependency references.
  pub fn validate(&self) -> Result<(), RecipeError> {
    let mut names = HashSet::new();
    for resource in self.all_resources() {
      if ContentHash::parse(&resource.sha256).is_none() {
        return Err(RecipeError::InvalidHash {
          name: resource.name.clone(),
          sha256: resource.sha256.clone(),
        });
      }
      if !names.insert(resource.name.as_str()) {
        return Err(RecipeError::DuplicateResource(resource.name.clone()));
      }
    }

    let mut deps = HashSet::new();
    for dep in &self.dependencies {
      if !deps.insert(dep.name.as_str()) {
        return Err(RecipeError::DuplicateDependency(dep.name.clone()));
      }
    }

    for name in &self.smoke.link_dependencies {
      if !deps.contains(name.as_str()) {
        return Err(RecipeError::UnknownLinkDependency(name.clone()));
      }
    }

    Ok(())
  }
}
