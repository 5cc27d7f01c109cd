use std::fmt;

use serde::{Deserialize, Serialize};

/// Operating systems kiln can drive a build on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
  Linux,
  #[serde(rename = "darwin")]
  MacOs,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      _ => None,
    }
  }

  /// The host OS, treating unsupported systems like Linux (plain
  /// `lib`/`include` layouts)
  pub fn host() -> Self {
    Self::current().unwrap_or(Self::Linux)
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
    }
  }

  /// Whether libraries on this OS ship as frameworks (`Foo.framework/Foo`)
  pub fn uses_frameworks(&self) -> bool {
    matches!(self, Self::MacOs)
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
