//! Build tool installation.
//!
//! The build tool is used from `PATH` when present. Otherwise the prebuilt
//! release archive for the host is downloaded once per version into the cache
//! directory and unpacked there.

use std::fmt;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{BUILD_TOOL, BUILD_TOOL_RELEASES};
use crate::env::EnvironmentSet;
use crate::platform::Platform;

#[derive(Debug, Error)]
pub enum ToolError {
  #[error("download failed for {url}: {message}")]
  Download { url: String, message: String },

  #[error("failed to unpack {asset}: {message}")]
  Archive { asset: String, message: String },

  #[error("archive {asset} did not contain {}", .path.display())]
  Missing { asset: String, path: PathBuf },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// A release tag: `latest` or `vX.Y.Z`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVersion(String);

impl ToolVersion {
  /// Normalize user input. Empty means `latest`; a missing `v` is added.
  pub fn parse(raw: &str) -> Self {
    let raw = raw.trim().to_ascii_lowercase();
    if raw.is_empty() || raw == "latest" {
      Self("latest".to_string())
    } else if raw.starts_with('v') {
      Self(raw)
    } else {
      Self(format!("v{raw}"))
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_latest(&self) -> bool {
    self.0 == "latest"
  }
}

impl fmt::Display for ToolVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Release asset name of the prebuilt build tool for `platform`.
pub fn release_asset(platform: Platform) -> String {
  format!(
    "{BUILD_TOOL}-{}-{}.{}",
    platform.release_arch(),
    platform.os.release_triple_suffix(),
    platform.os.archive_extension()
  )
}

pub fn release_url(version: &ToolVersion, asset: &str) -> String {
  if version.is_latest() {
    format!("{BUILD_TOOL_RELEASES}/latest/download/{asset}")
  } else {
    format!("{BUILD_TOOL_RELEASES}/download/{version}/{asset}")
  }
}

/// Locates or installs the build tool for the host.
#[derive(Debug, Clone)]
pub struct ToolInstaller {
  platform: Platform,
  cache_dir: PathBuf,
}

impl ToolInstaller {
  pub fn new(platform: Platform, cache_dir: impl Into<PathBuf>) -> Self {
    Self {
      platform,
      cache_dir: cache_dir.into(),
    }
  }

  /// Directory a given version is unpacked into.
  pub fn version_dir(&self, version: &ToolVersion) -> PathBuf {
    self.cache_dir.join(BUILD_TOOL).join(version.as_str())
  }

  /// Find the build tool on `PATH`, in the cache, or download it.
  pub async fn ensure(&self, version: &ToolVersion, env: &EnvironmentSet, cwd: &Path) -> Result<PathBuf, ToolError> {
    if let Some(found) = find_on_path(env, cwd) {
      info!(path = ?found, "found {BUILD_TOOL} on PATH");
      return Ok(found);
    }

    let exe = self.version_dir(version).join(self.platform.os.executable(BUILD_TOOL));
    if exe.exists() && !version.is_latest() {
      debug!(path = ?exe, "using cached {BUILD_TOOL}");
      return Ok(exe);
    }

    self.download(version, &exe).await?;
    info!(path = ?exe, version = %version, "installed {BUILD_TOOL}");
    Ok(exe)
  }

  async fn download(&self, version: &ToolVersion, exe: &Path) -> Result<(), ToolError> {
    let asset = release_asset(self.platform);
    let url = release_url(version, &asset);
    info!(url = %url, "downloading {BUILD_TOOL}");

    let response = reqwest::get(&url).await.map_err(|e| ToolError::Download {
      url: url.clone(),
      message: e.to_string(),
    })?;
    if !response.status().is_success() {
      return Err(ToolError::Download {
        url,
        message: format!("HTTP {}", response.status()),
      });
    }
    let bytes = response.bytes().await.map_err(|e| ToolError::Download {
      url: url.clone(),
      message: e.to_string(),
    })?;

    let dest = exe.parent().map(Path::to_path_buf).unwrap_or_default();
    let owned_asset = asset.clone();
    tokio::task::spawn_blocking(move || unpack(&owned_asset, &bytes, &dest))
      .await
      .map_err(|e| ToolError::Archive {
        asset: asset.clone(),
        message: e.to_string(),
      })??;

    if !exe.exists() {
      return Err(ToolError::Missing {
        asset,
        path: exe.to_path_buf(),
      });
    }
    make_executable(exe)?;
    Ok(())
  }
}

fn find_on_path(env: &EnvironmentSet, cwd: &Path) -> Option<PathBuf> {
  which::which_in(BUILD_TOOL, env.get("PATH"), cwd).ok()
}

/// Unpack a release archive into `dest`.
pub fn unpack(asset: &str, bytes: &[u8], dest: &Path) -> Result<(), ToolError> {
  fs::create_dir_all(dest)?;

  if asset.ends_with(".zip") {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| archive_error(asset, e))?;
    for i in 0..archive.len() {
      let mut file = archive.by_index(i).map_err(|e| archive_error(asset, e))?;
      let Some(path) = file.enclosed_name() else {
        continue;
      };
      let dest_path = dest.join(path);
      if file.is_dir() {
        fs::create_dir_all(&dest_path)?;
        continue;
      }
      if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent)?;
      }
      let mut contents = Vec::new();
      file.read_to_end(&mut contents)?;
      fs::write(&dest_path, contents)?;
    }
  } else {
    let mut archive = Archive::new(GzDecoder::new(Cursor::new(bytes)));
    for entry in archive.entries()? {
      entry?.unpack_in(dest)?;
    }
  }

  debug!(asset = %asset, dest = ?dest, "unpacked archive");
  Ok(())
}

fn archive_error(asset: &str, e: impl fmt::Display) -> ToolError {
  ToolError::Archive {
    asset: asset.to_string(),
    message: e.to_string(),
  }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
  Ok(())
}
