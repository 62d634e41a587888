//! Build tool argument handling.
//!
//! The user passes build arguments as a single shell-style string. It is split
//! once into tokens, the command token is put in front, and every later change
//! (injected `--target`, dropped `--zig`) produces a new [`BuildArgs`].

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::env::EnvironmentSet;
use crate::target::TargetTriple;

/// Target architectures the zig cross linker cannot produce code for.
const ZIG_UNSUPPORTED_ARCHES: &[&str] = &["s390x"];

#[derive(Debug, Error)]
pub enum ArgsError {
  #[error("unbalanced quotes in build arguments: {0}")]
  Unbalanced(String),

  #[error("build argument cannot be quoted for a shell script: {0}")]
  Quote(#[from] shlex::QuoteError),
}

/// The build tool command line: the command token followed by user arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArgs {
  tokens: Vec<String>,
}

impl BuildArgs {
  /// Tokenize `raw` and prepend `command`.
  pub fn parse(command: &str, raw: &str) -> Result<Self, ArgsError> {
    let rest = shlex::split(raw).ok_or_else(|| ArgsError::Unbalanced(raw.to_string()))?;
    let mut tokens = Vec::with_capacity(rest.len() + 1);
    tokens.push(command.to_string());
    tokens.extend(rest);
    Ok(Self { tokens })
  }

  pub fn from_tokens<I, S>(tokens: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      tokens: tokens.into_iter().map(Into::into).collect(),
    }
  }

  pub fn command(&self) -> &str {
    self.tokens.first().map(String::as_str).unwrap_or_default()
  }

  /// Every token including the command.
  pub fn tokens(&self) -> &[String] {
    &self.tokens
  }

  /// Tokens after the command.
  pub fn rest(&self) -> &[String] {
    self.tokens.get(1..).unwrap_or_default()
  }

  pub fn contains(&self, flag: &str) -> bool {
    self.rest().iter().any(|t| t == flag || is_inline(t, flag))
  }

  /// Value of `--key value` or `--key=value`.
  pub fn value_of(&self, key: &str) -> Option<&str> {
    let rest = self.rest();
    rest.iter().enumerate().find_map(|(i, token)| {
      if token == key {
        rest.get(i + 1).map(String::as_str)
      } else if is_inline(token, key) {
        token.get(key.len() + 1..)
      } else {
        None
      }
    })
  }

  /// Returns new args with `flag value` appended.
  pub fn with_flag_value(&self, flag: &str, value: &str) -> Self {
    let mut tokens = self.tokens.clone();
    tokens.push(flag.to_string());
    tokens.push(value.to_string());
    Self { tokens }
  }

  /// Returns new args with every occurrence of the boolean `flag` removed.
  pub fn without(&self, flag: &str) -> Self {
    let mut tokens = Vec::with_capacity(self.tokens.len());
    tokens.extend(self.tokens.first().cloned());
    tokens.extend(self.rest().iter().filter(|t| *t != flag).cloned());
    Self { tokens }
  }

  /// Cargo target directory the build writes to, relative to `workdir` unless absolute.
  ///
  /// `--target-dir`, then `CARGO_TARGET_DIR`, then `target` next to the
  /// manifest given with `--manifest-path`/`-m`, then `target`.
  pub fn target_dir(&self, env: &EnvironmentSet, workdir: &Path) -> PathBuf {
    let dir = if let Some(dir) = self.value_of("--target-dir").filter(|v| !v.is_empty()) {
      PathBuf::from(dir)
    } else if let Some(dir) = env.non_empty("CARGO_TARGET_DIR") {
      PathBuf::from(dir)
    } else if let Some(manifest) = self.manifest_path() {
      Path::new(manifest)
        .parent()
        .map(|p| p.join("target"))
        .unwrap_or_else(|| PathBuf::from("target"))
    } else {
      PathBuf::from("target")
    };
    workdir.join(dir)
  }

  /// Explicit wheel output directory (`--out`/`-o`), if one was requested.
  pub fn out_dir(&self, workdir: &Path) -> Option<PathBuf> {
    self
      .value_of("--out")
      .or_else(|| self.value_of("-o"))
      .filter(|v| !v.is_empty())
      .map(|dir| workdir.join(dir))
  }

  fn manifest_path(&self) -> Option<&str> {
    self
      .value_of("--manifest-path")
      .or_else(|| self.value_of("-m"))
      .filter(|v| !v.is_empty())
  }

  /// Drop `--zig` for targets the zig linker does not support.
  pub fn normalize_zig(&self, target: Option<&TargetTriple>) -> Self {
    let Some(target) = target else {
      return self.clone();
    };
    if self.contains("--zig") && ZIG_UNSUPPORTED_ARCHES.contains(&target.arch_component()) {
      warn!(target = %target, "zig does not support this target, ignoring --zig");
      return self.without("--zig");
    }
    self.clone()
  }

  /// Render as a single shell-quoted line for the build script.
  pub fn to_shell(&self) -> Result<String, ArgsError> {
    Ok(shlex::try_join(self.tokens.iter().map(String::as_str))?)
  }
}

fn is_inline(token: &str, key: &str) -> bool {
  token.len() > key.len() && token.starts_with(key) && token.as_bytes()[key.len()] == b'='
}
