use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A dotted numeric version such as `3.8.2.0`.
///
/// Missing trailing components compare as zero, so `3.8` equals `3.8.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecipeVersion {
  raw: String,
  parts: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version '{0}': expected dot-separated numbers")]
pub struct VersionParseError(pub String);

impl RecipeVersion {
  pub fn new(parts: &[u64]) -> Self {
    let raw = parts.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(".");
    Self {
      raw,
      parts: parts.to_vec(),
    }
  }
}

impl FromStr for RecipeVersion {
  type Err = VersionParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
      return Err(VersionParseError(s.to_string()));
    }
    let parts = trimmed
      .split('.')
      .map(|p| p.parse::<u64>())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|_| VersionParseError(s.to_string()))?;
    Ok(Self {
      raw: trimmed.to_string(),
      parts,
    })
  }
}

impl TryFrom<String> for RecipeVersion {
  type Error = VersionParseError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<RecipeVersion> for String {
  fn from(value: RecipeVersion) -> Self {
    value.raw
  }
}

impl fmt::Display for RecipeVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.raw)
  }
}

impl Ord for RecipeVersion {
  fn cmp(&self, other: &Self) -> Ordering {
    let len = self.parts.len().max(other.parts.len());
    for i in 0..len {
      let a = self.parts.get(i).copied().unwrap_or(0);
      let b = other.parts.get(i).copied().unwrap_or(0);
      match a.cmp(&b) {
        Ordering::Equal => continue,
        ord => return ord,
      }
    }
    Ordering::Equal
  }
}

impl PartialOrd for RecipeVersion {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for RecipeVersion {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for RecipeVersion {}
