/// Application name used for cache and data directories.
pub const APP_NAME: &str = "kiln";

/// Prefix for environment variables that configure a run.
pub const ENV_PREFIX: &str = "KILN_";

/// Subdirectory of the source tree used for the out-of-tree build.
pub const BUILD_SUBDIR: &str = "build";

/// Subdirectory of the prefix holding the isolated interpreter environment.
pub const VENV_SUBDIR: &str = "libexec/venv";

/// Length of hash prefixes shown in logs and CLI output.
pub const HASH_DISPLAY_LEN: usize = 12;
