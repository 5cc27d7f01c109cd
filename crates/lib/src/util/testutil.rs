//! Test utilities for kiln-lib.
//!
//! Provides a scripted [`CommandRunner`], local `file://` resources and a
//! toolchain simulator that stands in for cmake, make, the compilers and the
//! interpreter during end-to-end tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::config::RunConfig;
use crate::process::{CommandRunner, Invocation, ProcessOutput};
use crate::recipe::{PatchSpec, Recipe, ResourceSpec, gnuradio};
use crate::util::hash::hash_file;

type Handler = Box<dyn Fn(&Invocation) -> io::Result<ProcessOutput> + Send + Sync>;

/// A [`CommandRunner`] that records every invocation and answers from a
/// handler closure.
pub struct FakeRunner {
  calls: Mutex<Vec<Invocation>>,
  handler: Handler,
}

impl FakeRunner {
  pub fn new(handler: impl Fn(&Invocation) -> ProcessOutput + Send + Sync + 'static) -> Self {
    Self::fallible(move |inv| Ok(handler(inv)))
  }

  pub fn fallible(handler: impl Fn(&Invocation) -> io::Result<ProcessOutput> + Send + Sync + 'static) -> Self {
    Self {
      calls: Mutex::new(Vec::new()),
      handler: Box::new(handler),
    }
  }

  /// Every call exits 0 with empty output.
  pub fn succeeding() -> Self {
    Self::new(|_| ProcessOutput::ok(""))
  }

  pub fn calls(&self) -> Vec<Invocation> {
    self.calls.lock().unwrap().clone()
  }

  /// Program file names of every call, in order.
  pub fn programs(&self) -> Vec<String> {
    self.calls().iter().map(Invocation::program_name).collect()
  }

  pub fn was_called(&self, program: &str) -> bool {
    self.programs().iter().any(|p| p == program)
  }
}

impl CommandRunner for FakeRunner {
  async fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
    self.calls.lock().unwrap().push(invocation.clone());
    (self.handler)(invocation)
  }
}

/// Write `contents` to `dir/name` and describe it as a `file://` resource.
pub fn local_resource(dir: &Path, name: &str, contents: &[u8]) -> ResourceSpec {
  let path = dir.join(name);
  fs::write(&path, contents).unwrap();
  resource_for(&path, name)
}

/// Describe an existing file as a `file://` resource with its real hash.
pub fn resource_for(path: &Path, name: &str) -> ResourceSpec {
  let sha256 = hash_file(path).unwrap();
  ResourceSpec::new(name, &format!("file://{}", path.display()), sha256.as_str())
}

/// Create a gzipped tarball whose entries all live under `top/`.
pub fn write_tar_gz(path: &Path, top: &str, files: &[(&str, &str)]) {
  let file = fs::File::create(path).unwrap();
  let encoder = GzEncoder::new(file, Compression::default());
  let mut builder = tar::Builder::new(encoder);
  for (name, contents) in files {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    builder
      .append_data(&mut header, format!("{}/{}", top, name), contents.as_bytes())
      .unwrap();
  }
  builder.into_inner().unwrap().finish().unwrap();
}

pub const GTK_CHECK_LINE: &str = "     from gi.repository import Gtk; Gtk.check_version(3, 10, 8)";

pub fn top_level_cmakelists() -> String {
  "project(gnuradio CXX C)\n\
   set(GR_C_COMPILER ${CMAKE_C_COMPILER})\n\
   set(GR_CXX_COMPILER ${CMAKE_CXX_COMPILER})\n"
    .to_string()
}

pub fn grc_cmakelists() -> String {
  format!("GR_PYTHON_CHECK_MODULE(\"Gtk (GI) >= 3.10.8\" gi \"\"\"\n{}\n\"\"\" GTK_GI_FOUND)\n", GTK_CHECK_LINE)
}

/// A copy of the built-in recipe whose resources all resolve to local files
/// under `dir`.
pub fn fixture_recipe(dir: &Path) -> Recipe {
  let mut recipe = gnuradio::recipe();

  let tarball = dir.join("gnuradio-3.8.2.0.tar.gz");
  write_tar_gz(
    &tarball,
    "gnuradio-3.8.2.0",
    &[
      ("CMakeLists.txt", &top_level_cmakelists()),
      ("grc/CMakeLists.txt", &grc_cmakelists()),
      ("README.md", "GNU Radio\n"),
    ],
  );
  recipe.source = resource_for(&tarball, "gnuradio");

  recipe.resources = vec![local_resource(dir, "zmq.hpp", b"// cppzmq\n").staged_into("include")];

  recipe.runtime.helpers = vec![
    local_resource(dir, "Mako-1.1.3.tar.gz", b"mako sdist"),
    local_resource(dir, "six-1.15.0.tar.gz", b"six sdist"),
  ];

  recipe.patches = vec![
    PatchSpec::Diff {
      resource: local_resource(dir, "boost-1.73.0.patch", b"--- a/x\n+++ b/x\n"),
      strip: 1,
      reason: None,
      obsolete_from: Some("3.8.3.0".parse().unwrap()),
    },
    PatchSpec::Substitute {
      file: "README.md".to_string(),
      find: "GNU Radio".to_string(),
      replace: "GNU Radio (kiln)".to_string(),
      reason: None,
    },
  ];

  recipe
}

/// Run configuration rooted entirely inside `root`.
pub fn test_config(root: &Path) -> RunConfig {
  RunConfig {
    prefix: root.join("prefix"),
    install_root: root.join("install-root"),
    work_dir: root.join("work"),
    cache_dir: root.join("cache"),
    cc: PathBuf::from("/usr/bin/cc"),
    cxx: PathBuf::from("/usr/bin/c++"),
    python: PathBuf::from("/usr/bin/python3"),
    jobs: 4,
    deps_root: root.join("deps"),
    inherited_path: "/usr/bin:/bin".to_string(),
  }
}

fn arg_after<'a>(inv: &'a Invocation, flag: &str) -> Option<&'a str> {
  inv
    .args
    .iter()
    .position(|a| a == flag)
    .and_then(|i| inv.args.get(i + 1))
    .map(String::as_str)
}

#[cfg(unix)]
fn write_executable(path: &Path, contents: &str) {
  use std::os::unix::fs::PermissionsExt;
  fs::write(path, contents).unwrap();
  fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(not(unix))]
fn write_executable(path: &Path, contents: &str) {
  fs::write(path, contents).unwrap();
}

/// Lay out what `make install` would produce for the recipe under `prefix`.
pub fn simulate_make_install(prefix: &Path, python_version: &str) {
  let bin = prefix.join("bin");
  fs::create_dir_all(&bin).unwrap();
  write_executable(&bin.join("gnuradio-config-info"), "#!/bin/sh\n");
  write_executable(&bin.join("gnuradio-companion"), "#!/bin/sh\n");
  fs::write(bin.join("gr_filter_design.README"), "docs\n").unwrap();

  let dist = prefix
    .join("lib")
    .join(format!("python{}", python_version))
    .join("dist-packages")
    .join("gnuradio");
  fs::create_dir_all(&dist).unwrap();
  fs::write(dist.join("__init__.py"), "").unwrap();

  let conf = prefix.join("etc/gnuradio/conf.d");
  fs::create_dir_all(&conf).unwrap();
  fs::write(
    conf.join("grc.conf"),
    format!(
      "[grc]\nglobal_blocks_path = {}/share/gnuradio/grc/blocks\n",
      prefix.display()
    ),
  )
  .unwrap();

  fs::create_dir_all(prefix.join("include/gnuradio")).unwrap();
  fs::write(prefix.join("include/gnuradio/api.h"), "").unwrap();
}

/// Build a handler that plays every external tool an install run calls.
///
/// `make install` populates `prefix`; `python -m venv` creates the
/// environment skeleton; compilers touch their `-o` output.
pub fn toolchain_simulator(
  prefix: PathBuf,
  python_version: &'static str,
  version: &'static str,
) -> impl Fn(&Invocation) -> ProcessOutput + Send + Sync + 'static {
  move |inv| {
    let args: Vec<&str> = inv.args.iter().map(String::as_str).collect();
    match (inv.program_name().as_str(), args.as_slice()) {
      ("python3", ["-c", ..]) => ProcessOutput::ok(&format!("{}\n", python_version)),
      ("python3", ["-m", "venv", .., root]) => {
        let root = Path::new(root);
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/python"), "").unwrap();
        fs::create_dir_all(root.join(format!("lib/python{}/site-packages", python_version))).unwrap();
        ProcessOutput::ok("")
      }
      ("make", ["install"]) => {
        simulate_make_install(&prefix, python_version);
        ProcessOutput::ok("-- Installing: ...\n")
      }
      ("gnuradio-config-info", _) => ProcessOutput::ok(&format!("{}\n", version)),
      ("c++", _) => {
        if let Some(out) = arg_after(inv, "-o") {
          fs::write(out, "").unwrap();
        }
        ProcessOutput::ok("")
      }
      _ => ProcessOutput::ok(""),
    }
  }
}
