//! Target triple resolution.
//!
//! Users usually ask for an architecture alias (`x64`, `aarch64`, `armv7`)
//! rather than a full Rust target triple. The alias is expanded with a table
//! chosen by the host OS, or on Linux by the requested ABI family.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::platform::Platform;
use crate::platform::arch::Arch;
use crate::platform::os::Os;

/// A canonical Rust target triple such as `aarch64-unknown-linux-musl`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetTriple(String);

impl TargetTriple {
  pub fn new(triple: impl Into<String>) -> Self {
    Self(triple.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// The architecture component, e.g. `armv7` for `armv7-unknown-linux-gnueabihf`.
  pub fn arch_component(&self) -> &str {
    self.0.split('-').next().unwrap_or_default()
  }

  pub fn arch(&self) -> Option<Arch> {
    Arch::parse(self.arch_component())
  }

  pub fn is_linux(&self) -> bool {
    self.0.contains("linux")
  }

  pub fn is_musl(&self) -> bool {
    self.0.contains("musl")
  }

  pub fn is_apple(&self) -> bool {
    self.0.contains("apple")
  }

  /// Whether the target architecture is x86_64 or 32-bit x86.
  pub fn is_x86_family(&self) -> bool {
    self.0.contains("x86_64") || self.0.contains("i686") || self.0.contains("i586")
  }

  /// A request counts as fully qualified once it names more than an architecture.
  pub fn is_fully_qualified(request: &str) -> bool {
    request.contains('-')
  }
}

impl fmt::Display for TargetTriple {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Which Linux C library baseline the alias should expand to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiFamily {
  /// glibc based
  Manylinux,
  /// musl based
  Musllinux,
}

/// Architecture alias tables, one per host OS (or Linux ABI family).
#[derive(Debug, Clone, Deserialize)]
pub struct TargetAliases {
  pub darwin: BTreeMap<String, String>,
  pub manylinux: BTreeMap<String, String>,
  pub musllinux: BTreeMap<String, String>,
  pub windows: BTreeMap<String, String>,
}

impl TargetAliases {
  pub fn table_for(&self, os: Os, family: AbiFamily) -> &BTreeMap<String, String> {
    match (os, family) {
      (Os::MacOs, _) => &self.darwin,
      (Os::Windows, _) => &self.windows,
      (Os::Linux, AbiFamily::Manylinux) => &self.manylinux,
      (Os::Linux, AbiFamily::Musllinux) => &self.musllinux,
    }
  }
}

#[derive(Debug, Error)]
pub enum TargetError {
  #[error("unsupported target '{alias}' on {host}")]
  Unsupported { alias: String, host: String },
}

/// Maps a requested architecture alias to a [`TargetTriple`].
#[derive(Debug, Clone, Copy)]
pub struct TargetResolver<'a> {
  aliases: &'a TargetAliases,
}

impl<'a> TargetResolver<'a> {
  pub fn new(aliases: &'a TargetAliases) -> Self {
    Self { aliases }
  }

  /// Resolve a target request.
  ///
  /// - An empty request resolves to the host's native Linux target on Linux
  ///   hosts and to `None` (native build, no `--target`) elsewhere.
  /// - A fully qualified triple is returned unchanged.
  /// - Otherwise the alias is looked up in the table for the host.
  pub fn resolve(&self, requested: &str, host: Platform, family: AbiFamily) -> Result<Option<TargetTriple>, TargetError> {
    let requested = requested.trim();
    if requested.is_empty() {
      if !host.is_linux() {
        return Ok(None);
      }
      return self
        .lookup(host.arch.as_str(), host.os, family)
        .map(Some)
        .ok_or_else(|| TargetError::Unsupported {
          alias: host.arch.as_str().to_string(),
          host: host.triple(),
        });
    }

    if TargetTriple::is_fully_qualified(requested) {
      return Ok(Some(TargetTriple::new(requested)));
    }

    self
      .lookup(requested, host.os, family)
      .map(Some)
      .ok_or_else(|| TargetError::Unsupported {
        alias: requested.to_string(),
        host: host.triple(),
      })
  }

  /// Resolve a target request, falling back to the raw alias.
  ///
  /// An unknown alias is not fatal: it is passed through as a best-effort
  /// triple and a single warning is logged.
  pub fn resolve_lenient(&self, requested: &str, host: Platform, family: AbiFamily) -> Option<TargetTriple> {
    match self.resolve(requested, host, family) {
      Ok(target) => {
        debug!(requested = %requested, target = ?target.as_ref().map(TargetTriple::as_str), "resolved target");
        target
      }
      Err(e) => {
        warn!(error = %e, "using target alias as-is");
        let raw = requested.trim();
        (!raw.is_empty()).then(|| TargetTriple::new(raw))
      }
    }
  }

  fn lookup(&self, alias: &str, os: Os, family: AbiFamily) -> Option<TargetTriple> {
    self.aliases.table_for(os, family).get(alias).map(TargetTriple::new)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tables::Tables;
  use tracing_test::traced_test;

  fn linux_x64() -> Platform {
    Platform::new(Arch::X86_64, Os::Linux)
  }

  #[test]
  fn every_alias_resolves_to_its_documented_triple() {
    let tables = Tables::embedded().unwrap();
    let resolver = TargetResolver::new(&tables.aliases);
    let cases = [
      (Os::MacOs, AbiFamily::Manylinux, &tables.aliases.darwin),
      (Os::Windows, AbiFamily::Manylinux, &tables.aliases.windows),
      (Os::Linux, AbiFamily::Manylinux, &tables.aliases.manylinux),
      (Os::Linux, AbiFamily::Musllinux, &tables.aliases.musllinux),
    ];
    for (os, family, table) in cases {
      let host = Platform::new(Arch::X86_64, os);
      for (alias, triple) in table {
        let resolved = resolver.resolve(alias, host, family).unwrap();
        assert_eq!(resolved, Some(TargetTriple::new(triple.clone())), "alias {alias} on {os}");
      }
    }
  }

  #[test]
  fn documented_aliases() {
    let tables = Tables::embedded().unwrap();
    let resolver = TargetResolver::new(&tables.aliases);
    let mac = Platform::new(Arch::Aarch64, Os::MacOs);

    assert_eq!(
      resolver.resolve("aarch64", linux_x64(), AbiFamily::Musllinux).unwrap().unwrap().as_str(),
      "aarch64-unknown-linux-musl"
    );
    assert_eq!(
      resolver.resolve("armv7", linux_x64(), AbiFamily::Manylinux).unwrap().unwrap().as_str(),
      "armv7-unknown-linux-gnueabihf"
    );
    assert_eq!(
      resolver.resolve("x64", mac, AbiFamily::Manylinux).unwrap().unwrap().as_str(),
      "x86_64-apple-darwin"
    );
  }

  #[test]
  fn explicit_triple_returned_unchanged() {
    let tables = Tables::embedded().unwrap();
    let resolver = TargetResolver::new(&tables.aliases);
    let resolved = resolver
      .resolve("riscv64gc-unknown-linux-gnu", linux_x64(), AbiFamily::Manylinux)
      .unwrap();
    assert_eq!(resolved.unwrap().as_str(), "riscv64gc-unknown-linux-gnu");
  }

  #[test]
  fn empty_request_on_linux_uses_native_target() {
    let tables = Tables::embedded().unwrap();
    let resolver = TargetResolver::new(&tables.aliases);
    let resolved = resolver.resolve("", linux_x64(), AbiFamily::Manylinux).unwrap();
    assert_eq!(resolved.unwrap().as_str(), "x86_64-unknown-linux-gnu");
  }

  #[test]
  fn empty_request_elsewhere_is_native_build() {
    let tables = Tables::embedded().unwrap();
    let resolver = TargetResolver::new(&tables.aliases);
    let mac = Platform::new(Arch::Aarch64, Os::MacOs);
    assert_eq!(resolver.resolve("", mac, AbiFamily::Manylinux).unwrap(), None);
  }

  #[test]
  fn unknown_alias_is_an_error() {
    let tables = Tables::embedded().unwrap();
    let resolver = TargetResolver::new(&tables.aliases);
    let err = resolver.resolve("s390x", linux_x64(), AbiFamily::Musllinux).unwrap_err();
    assert!(matches!(err, TargetError::Unsupported { ref alias, .. } if alias == "s390x"));
  }

  #[test]
  #[traced_test]
  fn lenient_resolution_passes_alias_through_with_one_warning() {
    let tables = Tables::embedded().unwrap();
    let resolver = TargetResolver::new(&tables.aliases);
    let mac = Platform::new(Arch::X86_64, Os::MacOs);

    let resolved = resolver.resolve_lenient("mips", mac, AbiFamily::Manylinux);

    assert_eq!(resolved, Some(TargetTriple::new("mips")));
    logs_assert(|lines: &[&str]| {
      match lines.iter().filter(|l| l.contains("WARN") && l.contains("using target alias as-is")).count() {
        1 => Ok(()),
        n => Err(format!("expected exactly one warning, got {n}")),
      }
    });
  }

  #[test]
  fn triple_predicates() {
    let t = TargetTriple::new("armv7-unknown-linux-musleabihf");
    assert_eq!(t.arch_component(), "armv7");
    assert_eq!(t.arch(), Some(Arch::Armv7));
    assert!(t.is_linux());
    assert!(t.is_musl());
    assert!(!t.is_x86_family());
    assert!(TargetTriple::new("i686-unknown-linux-gnu").is_x86_family());
  }
}
