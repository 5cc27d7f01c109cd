//! Built-in recipe for GNU Radio.

use super::types::{
  ConfigureSpec, Dependency, NormalizeSpec, PatchSpec, Recipe, ResourceSpec, RuntimeSpec, SmokeSpec,
};
use super::version::RecipeVersion;

const VERSION: [u64; 4] = [3, 8, 2, 0];

/// The release that carries both upstream fixes for our diff patches.
const NEXT_RELEASE: [u64; 4] = [3, 8, 3, 0];

/// Subsystems enabled on top of `ENABLE_DEFAULT=OFF`. Upstream builds many
/// optional components by default that need dependencies we do not ship.
pub const COMPONENTS: &[&str] = &[
  "GNURADIO_RUNTIME",
  "GR_ANALOG",
  "GR_AUDIO",
  "GR_BLOCKS",
  "GRC",
  "GR_CHANNELS",
  "GR_DIGITAL",
  "GR_DTV",
  "GR_FEC",
  "GR_FFT",
  "GR_FILTER",
  "GR_MODTOOL",
  "GR_QTGUI",
  "GR_TRELLIS",
  "GR_UHD",
  "GR_UTILS",
  "GR_VOCODER",
  "GR_WAVELET",
  "GR_ZEROMQ",
  "PYTHON",
  "VOLK",
];

fn helpers() -> Vec<ResourceSpec> {
  vec![
    ResourceSpec::new(
      "Mako",
      "https://files.pythonhosted.org/packages/72/89/402d2b4589e120ca76a6aed8fee906a0f5ae204b50e455edd36eda6e778d/Mako-1.1.3.tar.gz",
      "8195c8c1400ceb53496064314c6736719c6f25e7479cd24c77be3d9361cddc27",
    ),
    ResourceSpec::new(
      "six",
      "https://files.pythonhosted.org/packages/6b/34/415834bfdafca3c5f451532e8a8d9ba89a21c9743a0c59fbd0205c7f9426/six-1.15.0.tar.gz",
      "30639c035cdb23534cd4aa2dd52c3bf48f06e5f4a941509c8bafd8ce11080259",
    ),
    ResourceSpec::new(
      "Cheetah",
      "https://files.pythonhosted.org/packages/50/d5/34b30f650e889d0d48e6ea9337f7dcd6045c828b9abaac71da26b6bdc543/Cheetah3-3.2.5.tar.gz",
      "ececc9ca7c58b9a86ce71eb95594c4619949e2a058d2a1af74c7ae8222515eb1",
    ),
    ResourceSpec::new(
      "PyYAML",
      "https://files.pythonhosted.org/packages/64/c2/b80047c7ac2478f9501676c988a5411ed5572f35d1beff9cae07d321512c/PyYAML-5.3.1.tar.gz",
      "b8eac752c5e14d3eca0e6dd9199cd627518cb5ec06add0de9d32baeee6fe645d",
    ),
    ResourceSpec::new(
      "click",
      "https://files.pythonhosted.org/packages/27/6f/be940c8b1f1d69daceeb0032fee6c34d7bd70e3e649ccac0951500b4720e/click-7.1.2.tar.gz",
      "d2b5255c7c6349bc1bd1e59e08cd12acbbd63ce649f2588755783aa94dfb6b1a",
    ),
    ResourceSpec::new(
      "click-plugins",
      "https://files.pythonhosted.org/packages/5f/1d/45434f64ed749540af821fd7e42b8e4d23ac04b1eda7c26613288d6cd8a8/click-plugins-1.1.1.tar.gz",
      "46ab999744a9d831159c3411bb0c79346d94a444df9a3a3742e9ed63645f264b",
    ),
  ]
}

fn patches(next_release: &RecipeVersion) -> Vec<PatchSpec> {
  vec![
    PatchSpec::Diff {
      resource: ResourceSpec::new(
        "boost-1.73.0.patch",
        "https://raw.githubusercontent.com/Homebrew/formula-patches/0d2af1812716a874d1e49268e999ea1a8ca9fc3c/gnuradio/boost-1.73.0.patch",
        "7e4abd08210d242d65807b7e2419f163a58b4630027a3beaff0e325d044266d7",
      ),
      strip: 1,
      reason: Some("Boost 1.73 compatibility (gnuradio/gnuradio#3566)".to_string()),
      obsolete_from: Some(next_release.clone()),
    },
    PatchSpec::Diff {
      resource: ResourceSpec::new(
        "undefined-dynamic-lookup.patch",
        "https://github.com/gnuradio/gnuradio/commit/80ba62cb11cf604495e87a5e302e68eaf441eea9.patch?full_index=1",
        "d12640f62b266b244950d84f2deb1544f41574229106a525e693159fb3fc80eb",
      ),
      strip: 1,
      reason: Some("restore -undefined dynamic_lookup on macOS (gnuradio/gnuradio#3674)".to_string()),
      obsolete_from: Some(next_release.clone()),
    },
  ]
}

fn dependencies() -> Vec<Dependency> {
  let mut deps: Vec<Dependency> = ["cmake", "doxygen", "pkg-config", "swig"]
    .into_iter()
    .map(Dependency::build)
    .collect();
  deps.extend(
    [
      "adwaita-icon-theme",
      "boost",
      "fftw",
      "gmp",
      "gsl",
      "gtk+3",
      "log4cpp",
      "numpy",
      "portaudio",
      "pygobject3",
      "pyqt",
      "python@3.9",
      "qt",
      "qwt",
      "uhd",
      "volk",
      "zeromq",
      "mpir",
    ]
    .into_iter()
    .map(Dependency::runtime),
  );
  deps
}

/// The GNU Radio recipe.
pub fn recipe() -> Recipe {
  let version = RecipeVersion::new(&VERSION);
  let next_release = RecipeVersion::new(&NEXT_RELEASE);

  Recipe {
    name: "gnuradio".to_string(),
    version,
    revision: 6,
    description: "SDK for signal processing blocks to implement software radios".to_string(),
    homepage: "https://gnuradio.org/".to_string(),
    license: "GPL-3.0-or-later".to_string(),
    source: ResourceSpec::new(
      "gnuradio",
      "https://github.com/gnuradio/gnuradio/releases/download/v3.8.2.0/gnuradio-3.8.2.0.tar.gz",
      "3e293541a9ac8d78660762bae8b80c0f6195b3494e1c50c01a9fd79cc60bb624",
    ),
    runtime: RuntimeSpec {
      helpers: helpers(),
      system_site_packages: true,
    },
    resources: vec![
      ResourceSpec::new(
        "cppzmq",
        "https://raw.githubusercontent.com/zeromq/cppzmq/46fc0572c5e9f09a32a23d6f22fd79b841f77e00/zmq.hpp",
        "964031c0944f913933f55ad1610938105a6657a69d1ac5a6dd50e16a679104d5",
      )
      .staged_into("include"),
    ],
    patches: patches(&next_release),
    dependencies: dependencies(),
    configure: ConfigureSpec {
      components: COMPONENTS.iter().map(|c| c.to_string()).collect(),
      skip_gui_toolkit_version_check: true,
    },
    normalize: NormalizeSpec {
      legacy_site_dir: "dist-packages".to_string(),
      plugin_module: "kiln_gr_plugins".to_string(),
      pth_file: "kiln-gnuradio.pth".to_string(),
      relocated_config: "conf.d/grc.conf".to_string(),
    },
    smoke: SmokeSpec {
      diagnostic: "gnuradio-config-info".to_string(),
      version_flag: "-v".to_string(),
      cxx_standard: "c++11".to_string(),
      link_libraries: ["gnuradio-blocks", "gnuradio-runtime", "gnuradio-pmt", "boost_system", "log4cpp"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      link_dependencies: vec!["boost".to_string(), "log4cpp".to_string()],
    },
  }
}
