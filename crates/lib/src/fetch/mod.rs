//! Resource fetching.
//!
//! Resources are content-addressed: each lands in `<cache>/<sha256>/<filename>`
//! and is only ever written after its bytes hash to the declared value. A
//! cached entry that no longer verifies is discarded and fetched again.

use std::fs;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::consts::HASH_DISPLAY_LEN;
use crate::install::InstallError;
use crate::recipe::ResourceSpec;
use crate::util::hash::{ContentHash, hash_bytes};

/// Downloads and verifies resources into a local cache.
#[derive(Debug, Clone)]
pub struct Fetcher {
  cache_dir: PathBuf,
  client: reqwest::Client,
}

impl Fetcher {
  pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
    Self {
      cache_dir: cache_dir.into(),
      client: reqwest::Client::new(),
    }
  }

  pub fn cache_dir(&self) -> &Path {
    &self.cache_dir
  }

  /// Where `spec` lives once cached.
  pub fn cache_path(&self, spec: &ResourceSpec) -> PathBuf {
    self
      .cache_dir
      .join(spec.sha256.to_ascii_lowercase())
      .join(url_to_filename(&spec.url))
  }

  /// Return a local path to `spec`'s verified bytes.
  pub async fn fetch(&self, spec: &ResourceSpec) -> Result<PathBuf, InstallError> {
    let expected = ContentHash::parse(&spec.sha256).ok_or_else(|| {
      InstallError::Configuration(format!(
        "resource '{}' declares an invalid sha256 '{}'",
        spec.name, spec.sha256
      ))
    })?;
    let dest = self.cache_path(spec);

    if tokio::fs::try_exists(&dest).await? {
      debug!(path = ?dest, "checking cached resource");
      let cached = tokio::fs::read(&dest).await?;
      let actual = hash_bytes(&cached);
      if actual == expected {
        info!(resource = %spec.name, path = ?dest, "using cached resource");
        return Ok(dest);
      }
      warn!(
        resource = %spec.name,
        expected = %short(&expected),
        actual = %short(&actual),
        "cached resource is corrupt, discarding"
      );
      tokio::fs::remove_file(&dest).await?;
    }

    info!(resource = %spec.name, url = %spec.url, "fetching resource");
    let bytes = self.retrieve(&spec.url).await?;

    let actual = hash_bytes(&bytes);
    if actual != expected {
      return Err(InstallError::Integrity {
        resource: spec.name.clone(),
        url: spec.url.clone(),
        expected: expected.0,
        actual: actual.0,
      });
    }

    if let Some(parent) = dest.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let partial = dest.with_extension("partial");
    tokio::fs::write(&partial, &bytes).await?;
    tokio::fs::rename(&partial, &dest).await?;

    info!(resource = %spec.name, path = ?dest, size = bytes.len(), "resource cached");
    Ok(dest)
  }

  /// Fetch `spec` and copy it into `root/<destination>`.
  pub async fn stage(&self, spec: &ResourceSpec, root: &Path) -> Result<PathBuf, InstallError> {
    let cached = self.fetch(spec).await?;
    let dir = match &spec.destination {
      Some(destination) => root.join(destination),
      None => root.to_path_buf(),
    };
    tokio::fs::create_dir_all(&dir).await?;

    let target = dir.join(url_to_filename(&spec.url));
    tokio::fs::copy(&cached, &target).await?;
    debug!(resource = %spec.name, target = ?target, "staged resource");
    Ok(target)
  }

  async fn retrieve(&self, url: &str) -> Result<Vec<u8>, InstallError> {
    if let Some(path) = local_path(url) {
      return tokio::fs::read(&path).await.map_err(|e| InstallError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
      });
    }

    if !(url.starts_with("https://") || url.starts_with("http://")) {
      return Err(InstallError::Fetch {
        url: url.to_string(),
        message: "unsupported URL scheme".to_string(),
      });
    }

    let response = self.client.get(url).send().await.map_err(|e| InstallError::Fetch {
      url: url.to_string(),
      message: e.to_string(),
    })?;

    if !response.status().is_success() {
      return Err(InstallError::Fetch {
        url: url.to_string(),
        message: format!("HTTP {}", response.status()),
      });
    }

    let bytes = response.bytes().await.map_err(|e| InstallError::Fetch {
      url: url.to_string(),
      message: e.to_string(),
    })?;
    Ok(bytes.to_vec())
  }
}

fn short(hash: &ContentHash) -> &str {
  &hash.as_str()[..HASH_DISPLAY_LEN]
}

/// `file://` URLs and bare absolute paths are read from disk.
fn local_path(url: &str) -> Option<PathBuf> {
  if let Some(path) = url.strip_prefix("file://") {
    return Some(PathBuf::from(path));
  }
  let path = Path::new(url);
  path.is_absolute().then(|| path.to_path_buf())
}

/// Extract a tarball into a fresh `dest`.
///
/// Returns the archive's single top-level directory when it has one,
/// otherwise `dest` itself.
pub fn unpack(archive: &Path, dest: &Path) -> Result<PathBuf, InstallError> {
  let filename = archive.file_name().and_then(|n| n.to_str()).unwrap_or("");
  let unpack_err = |message: String| InstallError::Unpack {
    archive: archive.to_path_buf(),
    message,
  };

  if dest.exists() {
    fs::remove_dir_all(dest)?;
  }
  fs::create_dir_all(dest)?;

  let file = fs::File::open(archive).map_err(|e| unpack_err(e.to_string()))?;
  if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
    tar::Archive::new(GzDecoder::new(file))
      .unpack(dest)
      .map_err(|e| unpack_err(e.to_string()))?;
  } else if filename.ends_with(".tar") {
    tar::Archive::new(file)
      .unpack(dest)
      .map_err(|e| unpack_err(e.to_string()))?;
  } else {
    return Err(unpack_err(format!("unknown archive format: {}", filename)));
  }

  let entries: Vec<_> = fs::read_dir(dest)?.filter_map(|e| e.ok()).collect();
  if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
    let source = entries[0].path();
    debug!(source = ?source, "archive has a single top-level directory");
    return Ok(source);
  }
  Ok(dest.to_path_buf())
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to hash of URL
/// if no suitable filename can be extracted.
pub fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  format!("download_{}", &hex::encode(hasher.finalize())[..16])
}
