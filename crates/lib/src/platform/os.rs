use std::fmt;

/// Host operating systems a build can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

impl Os {
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Key used by the alias tables. macOS is `darwin`.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
      Self::Windows => "windows",
    }
  }

  /// Vendor and system part of the Rust triple for prebuilt host binaries.
  ///
  /// Linux binaries are the statically linked musl builds so they run on any
  /// distribution.
  pub fn release_triple_suffix(&self) -> &'static str {
    match self {
      Self::Linux => "unknown-linux-musl",
      Self::MacOs => "apple-darwin",
      Self::Windows => "pc-windows-msvc",
    }
  }

  /// Archive format of release assets: `zip` on Windows, `tar.gz` elsewhere.
  pub fn archive_extension(&self) -> &'static str {
    match self {
      Self::Windows => "zip",
      _ => "tar.gz",
    }
  }

  pub fn executable(&self, name: &str) -> String {
    match self {
      Self::Windows => format!("{name}.exe"),
      _ => name.to_string(),
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn macos_uses_darwin_identifier() {
    assert_eq!(Os::MacOs.as_str(), "darwin");
  }

  #[test]
  fn windows_assets_are_zip_executables() {
    assert_eq!(Os::Windows.archive_extension(), "zip");
    assert_eq!(Os::Windows.executable("maturin"), "maturin.exe");
    assert_eq!(Os::Linux.archive_extension(), "tar.gz");
    assert_eq!(Os::Linux.executable("maturin"), "maturin");
  }

  #[test]
  fn linux_releases_are_musl() {
    assert_eq!(Os::Linux.release_triple_suffix(), "unknown-linux-musl");
  }
}
