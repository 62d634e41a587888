//! Host ownership restoration after sandboxed builds.
//!
//! Containers usually run as root, so everything they write into the mounted
//! workspace ends up owned by root. These helpers hand it back to the invoking
//! user. All of them are best-effort: failures are logged and swallowed so
//! they can never replace the build's own exit code.

use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::ALLOW_ROOT_ENV;
use crate::env::EnvironmentSet;
use crate::process::{CommandSpec, ProcessError, ProcessRunner};

#[derive(Debug, Error)]
pub enum PermissionError {
  #[error("'{command}' exited with code {code}")]
  Exit { command: String, code: i32 },

  #[error(transparent)]
  Process(#[from] ProcessError),
}

/// A numeric user and group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
  pub uid: u32,
  pub gid: u32,
}

impl fmt::Display for Owner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.uid, self.gid)
  }
}

/// The real user and group of this process.
#[cfg(unix)]
pub fn current_owner() -> Option<Owner> {
  Some(Owner {
    uid: rustix::process::getuid().as_raw(),
    gid: rustix::process::getgid().as_raw(),
  })
}

#[cfg(not(unix))]
pub fn current_owner() -> Option<Owner> {
  None
}

#[cfg(unix)]
fn running_as_root() -> bool {
  rustix::process::geteuid().is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
  false
}

/// Runs privileged cleanup commands, prefixed with `sudo` unless that is unnecessary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionFixer {
  use_sudo: bool,
}

impl PermissionFixer {
  pub fn new(use_sudo: bool) -> Self {
    Self { use_sudo }
  }

  /// `sudo` is skipped when already root or when [`ALLOW_ROOT_ENV`] is truthy.
  pub fn from_env(env: &EnvironmentSet) -> Self {
    Self::new(!env.is_truthy(ALLOW_ROOT_ENV) && !running_as_root())
  }

  pub fn uses_sudo(&self) -> bool {
    self.use_sudo
  }

  /// Recursively chown `path` to `owner`. Never fails.
  pub async fn fix<R: ProcessRunner>(&self, runner: &R, path: &Path, owner: Owner) {
    if !path.exists() {
      debug!(path = ?path, "nothing to fix, path does not exist");
      return;
    }
    info!(path = ?path, owner = %owner, "fixing file ownership");
    let spec = self.command("chown", [owner.to_string(), "-R".to_string(), path.display().to_string()]);
    if let Err(e) = self.run(runner, &spec).await {
      warn!(path = ?path, error = %e, "failed to fix file ownership, continuing");
    }
  }

  /// Remove `debug/build` and `release/build` under `target_dir`.
  ///
  /// Build script outputs left by an earlier sandboxed run are root-owned and
  /// make the next run fail when it tries to overwrite them.
  pub async fn remove_stale_build_dirs<R: ProcessRunner>(&self, runner: &R, target_dir: &Path) {
    for profile in ["debug", "release"] {
      let dir = target_dir.join(profile).join("build");
      if !dir.exists() {
        continue;
      }
      info!(path = ?dir, "removing stale build script artifacts");
      let spec = self.command("rm", ["-rf".to_string(), dir.display().to_string()]);
      if let Err(e) = self.run(runner, &spec).await {
        warn!(path = ?dir, error = %e, "failed to remove build script artifacts, continuing");
      }
    }
  }

  fn command<I>(&self, program: &str, args: I) -> CommandSpec
  where
    I: IntoIterator<Item = String>,
  {
    if self.use_sudo {
      CommandSpec::new("sudo").arg(program).args(args)
    } else {
      CommandSpec::new(program).args(args)
    }
  }

  async fn run<R: ProcessRunner>(&self, runner: &R, spec: &CommandSpec) -> Result<(), PermissionError> {
    match runner.status(spec).await? {
      0 => Ok(()),
      code => Err(PermissionError::Exit {
        command: spec.to_string(),
        code,
      }),
    }
  }
}
