//! Container image selection.
//!
//! Images are chosen from a matrix keyed by host architecture, then target
//! triple, then ABI policy. Matrices are per host architecture because a cross
//! toolchain image for x86_64 hosts is a different image from a native one
//! even when the target triple is the same.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::platform::arch::Arch;
use crate::policy::AbiPolicy;
use crate::target::TargetTriple;

/// Image families whose native entrypoint is the build tool itself.
pub const ENTRYPOINT_OVERRIDE_PREFIXES: &[&str] = &["pyo3/maturin", "konstin2/maturin"];

/// Entrypoint used for images in [`ENTRYPOINT_OVERRIDE_PREFIXES`].
pub const OVERRIDE_ENTRYPOINT: &str = "/bin/bash";

/// Per host architecture: the native default target and the target table.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchMatrix {
  pub default: String,
  pub targets: BTreeMap<String, BTreeMap<String, String>>,
}

/// The complete (host arch, target, policy) -> image matrix.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct ContainerMatrix {
  arches: BTreeMap<String, ArchMatrix>,
}

impl ContainerMatrix {
  pub fn arch(&self, host: &str) -> Option<&ArchMatrix> {
    self.arches.get(host)
  }

  pub fn lookup(&self, host: Arch, target: &str, key: &str) -> Option<&str> {
    self
      .arch(host.as_str())?
      .targets
      .get(target)?
      .get(key)
      .map(String::as_str)
  }
}

/// A resolved image reference plus an optional entrypoint override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerImage {
  pub reference: String,
  pub entrypoint: Option<String>,
}

impl ContainerImage {
  pub fn new(reference: impl Into<String>) -> Self {
    let reference = reference.into();
    let entrypoint = needs_entrypoint_override(&reference).then(|| OVERRIDE_ENTRYPOINT.to_string());
    Self { reference, entrypoint }
  }
}

impl fmt::Display for ContainerImage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.reference)
  }
}

fn needs_entrypoint_override(reference: &str) -> bool {
  ENTRYPOINT_OVERRIDE_PREFIXES.iter().any(|p| reference.starts_with(p))
}

/// What the user asked for through the container input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRequest {
  /// Empty, `auto`, `on` or `true`: consult the matrix.
  Automatic,
  /// `off` or `false`: never sandbox.
  Disabled,
  /// A registry reference (contains `:` or `/`), used verbatim.
  Reference(String),
  /// A bare token such as `2_28`, resolved through the matrix.
  Token(String),
}

impl ContainerRequest {
  pub fn parse(raw: &str) -> Self {
    match raw.trim() {
      "" | "auto" | "on" | "true" => Self::Automatic,
      "off" | "false" => Self::Disabled,
      r if r.contains(':') || r.contains('/') => Self::Reference(r.to_string()),
      token => Self::Token(token.to_string()),
    }
  }
}

/// Inputs to [`ContainerSelector::select`].
#[derive(Debug, Clone, Copy)]
pub struct SelectRequest<'a> {
  pub host_arch: Arch,
  pub target: &'a TargetTriple,
  pub policy: &'a AbiPolicy,
  pub explicit: &'a ContainerRequest,
  /// Build tool release tag, used to tag bare build-tool images.
  pub tool_tag: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct ContainerSelector<'a> {
  matrix: &'a ContainerMatrix,
}

impl<'a> ContainerSelector<'a> {
  pub fn new(matrix: &'a ContainerMatrix) -> Self {
    Self { matrix }
  }

  /// Pick an image, or `None` when the build should run on the host instead.
  ///
  /// Order: explicit reference, explicit matrix token, matrix entry for the
  /// policy, then the host architecture's default target entry. The default
  /// entry is only used for Linux targets of the host's own architecture so a
  /// wrong-architecture image is never picked.
  pub fn select(&self, request: &SelectRequest<'_>) -> Option<ContainerImage> {
    let target = request.target.as_str();
    match request.explicit {
      ContainerRequest::Disabled => None,
      ContainerRequest::Reference(reference) => {
        if !reference.contains(':') && needs_entrypoint_override(reference) {
          return Some(ContainerImage::new(format!("{reference}:{}", request.tool_tag)));
        }
        Some(ContainerImage::new(reference.clone()))
      }
      ContainerRequest::Token(token) => {
        let image = self.matrix.lookup(request.host_arch, target, token).map(ContainerImage::new);
        debug!(token = %token, target = %target, found = image.is_some(), "container token lookup");
        image
      }
      ContainerRequest::Automatic => {
        let key = request.policy.matrix_key()?;
        if let Some(reference) = self.matrix.lookup(request.host_arch, target, key) {
          debug!(target = %target, policy = %key, image = %reference, "container matrix hit");
          return Some(ContainerImage::new(reference));
        }
        self.arch_default(request, key)
      }
    }
  }

  fn arch_default(&self, request: &SelectRequest<'_>, key: &str) -> Option<ContainerImage> {
    if !request.target.is_linux() || request.target.arch() != Some(request.host_arch) {
      return None;
    }
    let arch = self.matrix.arch(request.host_arch.as_str())?;
    let reference = arch.targets.get(&arch.default)?.get(key)?;
    debug!(default = %arch.default, policy = %key, image = %reference, "using architecture default container");
    Some(ContainerImage::new(reference.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tables::Tables;

  fn synthetic() -> ContainerMatrix {
    serde_json::from_str(
      r#"{
        "x86_64": {
          "default": "x86_64-unknown-linux-gnu",
          "targets": {
            "x86_64-unknown-linux-gnu": { "auto": "img/native:auto", "2_28": "img/native:2_28" },
            "aarch64-unknown-linux-gnu": { "auto": "img/cross:aarch64" }
          }
        }
      }"#,
    )
    .unwrap()
  }

  fn select(matrix: &ContainerMatrix, target: &str, policy: AbiPolicy, explicit: &str) -> Option<ContainerImage> {
    let target = TargetTriple::new(target);
    let explicit = ContainerRequest::parse(explicit);
    ContainerSelector::new(matrix).select(&SelectRequest {
      host_arch: Arch::X86_64,
      target: &target,
      policy: &policy,
      explicit: &explicit,
      tool_tag: "v1.7.4",
    })
  }

  #[test]
  fn parse_request_kinds() {
    assert_eq!(ContainerRequest::parse(""), ContainerRequest::Automatic);
    assert_eq!(ContainerRequest::parse("on"), ContainerRequest::Automatic);
    assert_eq!(ContainerRequest::parse("true"), ContainerRequest::Automatic);
    assert_eq!(ContainerRequest::parse("off"), ContainerRequest::Disabled);
    assert_eq!(ContainerRequest::parse("2_28"), ContainerRequest::Token("2_28".into()));
    assert_eq!(
      ContainerRequest::parse("quay.io/pypa/manylinux2014_x86_64:latest"),
      ContainerRequest::Reference("quay.io/pypa/manylinux2014_x86_64:latest".into())
    );
  }

  #[test]
  fn matrix_entry_for_policy() {
    let image = select(&synthetic(), "x86_64-unknown-linux-gnu", AbiPolicy::Auto, "").unwrap();
    assert_eq!(image.reference, "img/native:auto");
    assert_eq!(image.entrypoint, None);
  }

  #[test]
  fn explicit_reference_always_wins() {
    for policy in [AbiPolicy::Auto, AbiPolicy::Tag("2_28".into()), AbiPolicy::Tag("9_99".into())] {
      for target in ["x86_64-unknown-linux-gnu", "aarch64-unknown-linux-gnu", "sparc-unknown-linux-gnu"] {
        let image = select(&synthetic(), target, policy.clone(), "registry.example/custom:1").unwrap();
        assert_eq!(image.reference, "registry.example/custom:1");
      }
    }
  }

  #[test]
  fn short_token_resolves_through_matrix() {
    let image = select(&synthetic(), "x86_64-unknown-linux-gnu", AbiPolicy::Auto, "2_28").unwrap();
    assert_eq!(image.reference, "img/native:2_28");
  }

  #[test]
  fn unknown_token_yields_nothing() {
    assert_eq!(select(&synthetic(), "x86_64-unknown-linux-gnu", AbiPolicy::Auto, "2_99"), None);
  }

  #[test]
  fn architecture_default_only_for_native_arch() {
    // same arch, unknown vendor/abi: falls back to the default target's entry
    let image = select(&synthetic(), "x86_64-unknown-linux-gnux32", AbiPolicy::Tag("2_28".into()), "").unwrap();
    assert_eq!(image.reference, "img/native:2_28");

    // different arch: never borrow another architecture's image
    assert_eq!(
      select(&synthetic(), "powerpc64le-unknown-linux-gnu", AbiPolicy::Auto, ""),
      None
    );
  }

  #[test]
  fn missing_policy_entry_for_cross_target_is_none() {
    assert_eq!(
      select(&synthetic(), "aarch64-unknown-linux-gnu", AbiPolicy::Tag("2_28".into()), ""),
      None
    );
  }

  #[test]
  fn bare_build_tool_image_gets_tag_and_entrypoint() {
    let image = select(&synthetic(), "x86_64-unknown-linux-gnu", AbiPolicy::Auto, "pyo3/maturin").unwrap();
    assert_eq!(image.reference, "pyo3/maturin:v1.7.4");
    assert_eq!(image.entrypoint.as_deref(), Some(OVERRIDE_ENTRYPOINT));
  }

  #[test]
  fn disabled_request_selects_nothing() {
    assert_eq!(select(&synthetic(), "x86_64-unknown-linux-gnu", AbiPolicy::Auto, "off"), None);
  }

  #[test]
  fn embedded_matrix_native_x86_64_auto() {
    let tables = Tables::embedded().unwrap();
    let image = select(&tables.containers, "x86_64-unknown-linux-gnu", AbiPolicy::Auto, "").unwrap();
    assert_eq!(image.reference, "quay.io/pypa/manylinux2014_x86_64:latest");
  }

  #[test]
  fn embedded_matrix_short_token() {
    let tables = Tables::embedded().unwrap();
    let image = select(&tables.containers, "x86_64-unknown-linux-gnu", AbiPolicy::Auto, "2_28").unwrap();
    assert_eq!(image.reference, "quay.io/pypa/manylinux_2_28_x86_64:latest");
  }
}
