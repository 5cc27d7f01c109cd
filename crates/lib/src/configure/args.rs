//! Ordered build options.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Value of a single `-D` option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
  Str(String),
  Path(PathBuf),
  Bool(bool),
}

impl fmt::Display for ConfigValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigValue::Str(s) => write!(f, "{}", s),
      ConfigValue::Path(p) => write!(f, "{}", p.display()),
      ConfigValue::Bool(true) => write!(f, "ON"),
      ConfigValue::Bool(false) => write!(f, "OFF"),
    }
  }
}

impl From<&str> for ConfigValue {
  fn from(s: &str) -> Self {
    ConfigValue::Str(s.to_string())
  }
}

impl From<String> for ConfigValue {
  fn from(s: String) -> Self {
    ConfigValue::Str(s)
  }
}

impl From<PathBuf> for ConfigValue {
  fn from(p: PathBuf) -> Self {
    ConfigValue::Path(p)
  }
}

impl From<bool> for ConfigValue {
  fn from(b: bool) -> Self {
    ConfigValue::Bool(b)
  }
}

/// Insertion-ordered option map.
///
/// Keys are unique. Setting an existing key replaces its value but keeps the
/// key at its original position, so the rendered argument list is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildConfig {
  entries: Vec<(String, ConfigValue)>,
}

impl BuildConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> &mut Self {
    let key = key.into();
    let value = value.into();
    match self.entries.iter_mut().find(|(k, _)| *k == key) {
      Some(entry) => entry.1 = value,
      None => self.entries.push((key, value)),
    }
    self
  }

  pub fn get(&self, key: &str) -> Option<&ConfigValue> {
    self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(k, _)| k.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Render as `-DKEY=VALUE` arguments in insertion order.
  pub fn to_args(&self) -> Vec<String> {
    self.iter().map(|(k, v)| format!("-D{}={}", k, v)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bools_render_as_on_off() {
    let mut config = BuildConfig::new();
    config.set("ENABLE_DEFAULT", false).set("ENABLE_GRC", true);
    assert_eq!(config.to_args(), ["-DENABLE_DEFAULT=OFF", "-DENABLE_GRC=ON"]);
  }

  #[test]
  fn last_write_wins_in_original_position() {
    let mut config = BuildConfig::new();
    config
      .set("A", "1")
      .set("B", PathBuf::from("/opt/b"))
      .set("A", "2");

    assert_eq!(config.len(), 2);
    assert_eq!(config.keys().collect::<Vec<_>>(), ["A", "B"]);
    assert_eq!(config.get("A"), Some(&ConfigValue::Str("2".to_string())));
  }

  #[test]
  fn serializes_values_without_tags() {
    let mut config = BuildConfig::new();
    config.set("CMAKE_BUILD_TYPE", "Release").set("BUILD_TESTING", false);
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["entries"][0][1], "Release");
    assert_eq!(json["entries"][1][1], false);
  }
}
