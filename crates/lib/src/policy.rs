//! ABI compatibility policy (manylinux / musllinux) resolution.

use std::fmt;

use tracing::debug;

use crate::platform::Platform;
use crate::target::{AbiFamily, TargetTriple};

/// Lowest glibc baseline that pre-release toolchains still support.
pub const PRERELEASE_MINIMUM_POLICY: &str = "2_17";

/// The build tool subcommand being run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
  Build,
  Publish,
  Upload,
  Other(String),
}

impl CommandKind {
  pub fn parse(raw: &str) -> Self {
    match raw.trim() {
      "build" => Self::Build,
      "publish" => Self::Publish,
      "upload" => Self::Upload,
      other => Self::Other(other.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Build => "build",
      Self::Publish => "publish",
      Self::Upload => "upload",
      Self::Other(name) => name,
    }
  }

  /// Only commands that compile binary artifacts take `--target` and `--manylinux`.
  pub fn produces_artifacts(&self) -> bool {
    matches!(self, Self::Build | Self::Publish)
  }
}

impl fmt::Display for CommandKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A compatibility baseline for the produced artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AbiPolicy {
  /// Not applicable: the command does not produce binaries, or nothing was requested.
  #[default]
  Inert,
  /// Pick the lowest baseline the selected container supports.
  Auto,
  /// Disable the policy and sandboxing entirely.
  Off,
  /// An explicit generation such as `2014`, `2_28` or `musllinux_1_2`.
  Tag(String),
}

impl AbiPolicy {
  /// Parse user input, stripping a leading `manylinux` / `manylinux_`.
  pub fn parse(raw: &str) -> Self {
    let raw = raw.trim();
    let stripped = raw
      .strip_prefix("manylinux_")
      .or_else(|| raw.strip_prefix("manylinux"))
      .unwrap_or(raw);
    match stripped {
      "" => Self::Inert,
      "auto" => Self::Auto,
      "off" => Self::Off,
      tag => Self::Tag(tag.to_string()),
    }
  }

  pub fn family(&self) -> AbiFamily {
    match self {
      Self::Tag(tag) if tag.starts_with("musllinux") => AbiFamily::Musllinux,
      _ => AbiFamily::Manylinux,
    }
  }

  /// Key used to look this policy up in a container matrix.
  pub fn matrix_key(&self) -> Option<&str> {
    match self {
      Self::Auto => Some("auto"),
      Self::Tag(tag) => Some(tag),
      Self::Inert | Self::Off => None,
    }
  }

  /// Value passed to the build tool's `--manylinux` flag, if any.
  pub fn cli_value(&self) -> Option<&str> {
    match self {
      Self::Off => Some("off"),
      Self::Tag(tag) => Some(tag),
      Self::Inert | Self::Auto => None,
    }
  }

  /// Whether this policy asks for a containerised build.
  pub fn wants_sandbox(&self) -> bool {
    matches!(self, Self::Auto | Self::Tag(_))
  }

  pub fn is_inert(&self) -> bool {
    matches!(self, Self::Inert)
  }
}

impl fmt::Display for AbiPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Inert => f.write_str(""),
      Self::Auto => f.write_str("auto"),
      Self::Off => f.write_str("off"),
      Self::Tag(tag) => f.write_str(tag),
    }
  }
}

/// Inputs to [`resolve_policy`].
#[derive(Debug, Clone, Copy)]
pub struct PolicyRequest<'a> {
  pub command: &'a CommandKind,
  pub explicit: &'a str,
  pub host: Platform,
  pub target: Option<&'a TargetTriple>,
  pub toolchain: &'a str,
}

/// Determine the ABI policy for a run.
///
/// Precedence, first match wins:
/// 1. an explicit policy
/// 2. `publish` defaults to `auto`
/// 3. an x86 host cross compiling to a non-x86 Linux target defaults to `auto`
/// 4. a Linux host building a Linux target of its own architecture defaults to `auto`
///
/// A pre-release toolchain then raises `auto` to [`PRERELEASE_MINIMUM_POLICY`]
/// for glibc targets. Explicit tags and `off` are never changed.
pub fn resolve_policy(request: &PolicyRequest<'_>) -> AbiPolicy {
  if !request.command.produces_artifacts() {
    return AbiPolicy::Inert;
  }

  let explicit = AbiPolicy::parse(request.explicit);
  let policy = if !explicit.is_inert() {
    explicit
  } else if *request.command == CommandKind::Publish
    || is_x86_cross_to_linux(request)
    || is_native_linux(request)
  {
    AbiPolicy::Auto
  } else {
    AbiPolicy::Inert
  };

  let policy = tighten_for_prerelease(policy, request);
  debug!(command = %request.command, policy = %policy, "resolved abi policy");
  policy
}

fn is_x86_cross_to_linux(request: &PolicyRequest<'_>) -> bool {
  request.host.arch.is_x86_family() && request.target.is_some_and(|t| t.is_linux() && !t.is_x86_family())
}

fn is_native_linux(request: &PolicyRequest<'_>) -> bool {
  request.host.is_linux() && request.target.is_some_and(|t| t.is_linux() && t.arch() == Some(request.host.arch))
}

fn tighten_for_prerelease(policy: AbiPolicy, request: &PolicyRequest<'_>) -> AbiPolicy {
  let prerelease = request.toolchain.starts_with("nightly") || request.toolchain.starts_with("beta");
  let glibc_target = request.target.is_some_and(|t| t.is_linux() && !t.is_musl());
  if policy == AbiPolicy::Auto && prerelease && glibc_target {
    AbiPolicy::Tag(PRERELEASE_MINIMUM_POLICY.to_string())
  } else {
    policy
  }
}
