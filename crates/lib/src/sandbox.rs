//! Container execution of the composed build script.
//!
//! The workspace is mounted at the same path inside the container so absolute
//! paths recorded during the build resolve identically on both sides. When the
//! container engine runs somewhere else (a remote or rootless daemon) a host
//! mount prefix is put in front of every host-side path, because the engine
//! resolves them against its own filesystem.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::container::ContainerImage;
use crate::env::EnvironmentSet;
use crate::platform::paths::home_dir;
use crate::permissions::{Owner, PermissionFixer};
use crate::process::{CommandSpec, ProcessError, ProcessRunner};

/// Container engine binary.
pub const ENGINE: &str = "docker";

/// Path the host SSH agent socket is mounted at.
pub const SSH_AGENT_GUEST: &str = "/ssh-agent";

/// Variables always forwarded, with fixed values or passed by name.
const FIXED_ENV: &[&str] = &[
  "DEBIAN_FRONTEND=noninteractive",
  "LANG=C.UTF-8",
  "ARCHFLAGS",
  "_PYTHON_SYSCONFIGDATA_NAME",
];

#[derive(Debug, Error)]
pub enum SandboxError {
  #[error("'docker pull {image}' exited with code {code}")]
  Pull { image: String, code: i32 },

  #[error(transparent)]
  Process(#[from] ProcessError),
}

/// A bind mount. `host` is as seen by this process, before any prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
  pub host: PathBuf,
  pub guest: PathBuf,
  pub read_only: bool,
}

impl Mount {
  /// Mount `path` at the same location inside the container.
  pub fn identity(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    Self {
      guest: path.clone(),
      host: path,
      read_only: false,
    }
  }

  pub fn read_only(host: impl Into<PathBuf>, guest: impl Into<PathBuf>) -> Self {
    Self {
      host: host.into(),
      guest: guest.into(),
      read_only: true,
    }
  }

  fn volume_arg(&self, prefix: Option<&str>) -> String {
    let host = with_prefix(&self.host, prefix);
    let mode = if self.read_only { ":ro" } else { "" };
    format!("{host}:{}{mode}", self.guest.display())
  }
}

fn with_prefix(path: &Path, prefix: Option<&str>) -> String {
  match prefix.map(|p| p.trim_end_matches('/')).filter(|p| !p.is_empty()) {
    Some(prefix) => format!("{prefix}{}", path.display()),
    None => path.display().to_string(),
  }
}

/// Mounts that are added when their sources exist: the SSH agent socket and
/// the git credential pair. Returns the mounts and extra `NAME=value` env.
pub fn credential_mounts(env: &EnvironmentSet) -> (Vec<Mount>, Vec<String>) {
  let mut mounts = Vec::new();
  let mut extra_env = Vec::new();

  if let Some(sock) = env.non_empty("SSH_AUTH_SOCK").map(PathBuf::from)
    && sock.exists()
  {
    mounts.push(Mount::read_only(sock, SSH_AGENT_GUEST));
    extra_env.push(format!("SSH_AUTH_SOCK={SSH_AGENT_GUEST}"));
  }

  if let Some(home) = home_dir(env) {
    let config = home.join(".gitconfig");
    let credentials = home.join(".git-credentials");
    if config.is_file() && credentials.is_file() {
      mounts.push(Mount::read_only(config, "/root/.gitconfig"));
      mounts.push(Mount::read_only(credentials, "/root/.git-credentials"));
    } else {
      debug!(home = ?home, "git credentials not found, not mounting");
    }
  }

  (mounts, extra_env)
}

/// Everything needed for one sandboxed run.
#[derive(Debug, Clone)]
pub struct SandboxRun<'a> {
  pub image: &'a ContainerImage,
  /// Host path of the generated script; mounted at the same path.
  pub script: &'a Path,
  /// Workspace root, mounted at the same path.
  pub workspace: &'a Path,
  /// Directory the script starts in, inside the workspace.
  pub workdir: &'a Path,
  /// Variables forwarded by name (the environment filter's output).
  pub forward: &'a EnvironmentSet,
  /// Extra `NAME=value` variables.
  pub extra_env: &'a [String],
  /// Mounts beyond the workspace and the script.
  pub mounts: &'a [Mount],
  /// User supplied engine options, placed before the image.
  pub engine_options: &'a [String],
  pub host_mount_prefix: Option<&'a str>,
  /// Cargo target directory, cleaned before and chowned after the run.
  pub target_dir: &'a Path,
  /// Explicit wheel output directory, chowned after the run.
  pub out_dir: Option<&'a Path>,
}

impl SandboxRun<'_> {
  /// Arguments to `docker`, starting with `run`.
  pub fn engine_args(&self) -> Vec<String> {
    let prefix = self.host_mount_prefix;
    let mut args = vec![
      "run".to_string(),
      "--rm".to_string(),
      "--workdir".to_string(),
      self.workdir.display().to_string(),
    ];

    let env_args = FIXED_ENV
      .iter()
      .map(|v| v.to_string())
      .chain(self.forward.names().map(str::to_string))
      .chain(self.extra_env.iter().cloned());
    for value in env_args {
      args.push("-e".to_string());
      args.push(value);
    }

    let workspace = Mount::identity(self.workspace);
    let script = Mount {
      read_only: true,
      ..Mount::identity(self.script)
    };
    for mount in [&workspace, &script].into_iter().chain(self.mounts) {
      args.push("-v".to_string());
      args.push(mount.volume_arg(prefix));
    }

    if let Some(entrypoint) = &self.image.entrypoint {
      args.push("--entrypoint".to_string());
      args.push(entrypoint.clone());
    }
    args.extend(self.engine_options.iter().cloned());
    args.push(self.image.reference.clone());
    args.push(self.script.display().to_string());
    args
  }
}

/// Runs build scripts inside containers.
pub struct SandboxOrchestrator<'r, R> {
  runner: &'r R,
  fixer: PermissionFixer,
  owner: Option<Owner>,
}

impl<'r, R: ProcessRunner> SandboxOrchestrator<'r, R> {
  pub fn new(runner: &'r R, fixer: PermissionFixer, owner: Option<Owner>) -> Self {
    Self { runner, fixer, owner }
  }

  /// Pull `image` unless it is already present locally.
  pub async fn ensure_image(&self, image: &ContainerImage) -> Result<(), SandboxError> {
    let inspect = CommandSpec::new(ENGINE)
      .args(["inspect", "--type=image", image.reference.as_str()])
      .quiet();
    if self.runner.status(&inspect).await? == 0 {
      info!(image = %image, "using existing container image");
      return Ok(());
    }

    info!(image = %image, "pulling container image");
    let pull = CommandSpec::new(ENGINE).args(["pull", image.reference.as_str()]);
    match self.runner.status(&pull).await? {
      0 => Ok(()),
      code => Err(SandboxError::Pull {
        image: image.reference.clone(),
        code,
      }),
    }
  }

  /// Run the script and return the container's exit code untouched.
  ///
  /// Ownership of the build outputs is restored afterwards whatever the
  /// outcome; that step never fails the run.
  pub async fn run(&self, run: &SandboxRun<'_>) -> Result<i32, SandboxError> {
    self.ensure_image(run.image).await?;
    self.fixer.remove_stale_build_dirs(self.runner, run.target_dir).await;

    let spec = CommandSpec::new(ENGINE).args(run.engine_args());
    info!(image = %run.image, workdir = ?run.workdir, "running sandboxed build");
    let result = self.runner.status(&spec).await;

    if let Some(owner) = self.owner {
      self.fixer.fix(self.runner, run.target_dir, owner).await;
      if let Some(out) = run.out_dir {
        self.fixer.fix(self.runner, out, owner).await;
      }
    }

    let code = result?;
    debug!(code, "sandboxed build finished");
    Ok(code)
  }
}
