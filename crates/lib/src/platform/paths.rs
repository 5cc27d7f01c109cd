use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Returns the user's home directory
///
/// Falls back to the system temp directory when `HOME` is unset, which only
/// happens in stripped-down build sandboxes.
pub fn home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the directory for data files for the application
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Directory holding fetched resources, keyed by content hash
pub fn downloads_dir() -> PathBuf {
  cache_dir().join("downloads")
}

/// Scratch directory where source trees are unpacked and built
pub fn work_dir() -> PathBuf {
  data_dir().join("work")
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn xdg_cache_home_takes_precedence() {
    temp_env::with_vars(
      [
        ("XDG_CACHE_HOME", Some("/custom/cache")),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(cache_dir(), PathBuf::from("/custom/cache").join(APP_NAME));
        assert_eq!(downloads_dir(), PathBuf::from("/custom/cache/kiln/downloads"));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directories() {
    temp_env::with_vars(
      [
        ("XDG_DATA_HOME", None::<&str>),
        ("XDG_CACHE_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(data_dir(), PathBuf::from("/home/user/.local/share").join(APP_NAME));
        assert_eq!(cache_dir(), PathBuf::from("/home/user/.cache").join(APP_NAME));
        assert_eq!(work_dir(), PathBuf::from("/home/user/.local/share/kiln/work"));
      },
    );
  }
}
