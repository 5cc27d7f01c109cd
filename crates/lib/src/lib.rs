//! kiln-lib: build-and-install recipe orchestration
//!
//! This crate drives a versioned source release through a fixed sequence of
//! stages and produces a verified installed tree:
//! - `recipe`: declarative recipes (the built-in GNU Radio recipe lives here)
//! - `fetch`: content-addressed resource cache
//! - `runtime`, `patch`, `configure`, `driver`, `normalize`, `verify`: stages
//! - `install`: the stage state machine tying them together
//! - `process`: the seam through which every external tool is called

pub mod config;
pub mod configure;
pub mod consts;
pub mod driver;
pub mod fetch;
pub mod install;
pub mod normalize;
pub mod patch;
pub mod platform;
pub mod process;
pub mod recipe;
pub mod runtime;
pub mod util;
pub mod verify;
