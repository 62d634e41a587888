//! Building directly on the calling machine.
//!
//! Mirrors the toolchain and target steps of the sandbox script without the
//! container, then runs the build tool with the prepared environment.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::args::BuildArgs;
use crate::env::EnvironmentSet;
use crate::platform::Platform;
use crate::policy::CommandKind;
use crate::process::{CommandSpec, ProcessError, ProcessRunner};
use crate::target::TargetTriple;

pub const DEVELOPER_DIR: &str = "/Applications/Xcode.app/Contents/Developer";

/// Upload flags whose value is a credential or a location, never a file pattern.
const UPLOAD_VALUE_FLAGS: &[&str] = &[
  "-r",
  "--repository",
  "--repository-url",
  "-u",
  "--username",
  "-p",
  "--password",
];

/// Everything needed for one host build.
#[derive(Debug, Clone, Copy)]
pub struct HostRun<'a> {
  pub platform: Platform,
  pub command: &'a CommandKind,
  pub target: Option<&'a TargetTriple>,
  /// Toolchain to pin with `rustup override`; empty leaves the default.
  pub toolchain: &'a str,
  pub components: &'a str,
  pub args: &'a BuildArgs,
  pub tool: &'a Path,
  pub workdir: &'a Path,
  /// The full captured host environment.
  pub env: &'a EnvironmentSet,
  pub sccache: bool,
}

impl HostRun<'_> {
  fn is_universal2(&self) -> bool {
    self.args.contains("--universal2")
  }

  /// Apple target of a different architecture than the host.
  fn is_macos_cross(&self) -> bool {
    self
      .target
      .is_some_and(|t| t.is_apple() && t.arch() != Some(self.platform.arch))
  }
}

/// Runs builds on the host.
pub struct HostOrchestrator<'r, R> {
  runner: &'r R,
}

impl<'r, R: ProcessRunner> HostOrchestrator<'r, R> {
  pub fn new(runner: &'r R) -> Self {
    Self { runner }
  }

  /// Prepare the toolchain and run the build. Returns the first non-zero
  /// setup exit code, or the build tool's exit code.
  pub async fn run(&self, run: &HostRun<'_>) -> Result<i32, ProcessError> {
    if run.command.produces_artifacts() {
      let code = self.prepare_toolchain(run).await?;
      if code != 0 {
        return Ok(code);
      }
    }

    let code = self.install_helpers(run).await?;
    if code != 0 {
      return Ok(code);
    }

    let env = build_env(run);
    let args = if *run.command == CommandKind::Upload {
      expand_upload_args(run.args, run.workdir)
    } else {
      run.args.tokens().to_vec()
    };

    let spec = CommandSpec::new(run.tool.display().to_string())
      .args(args)
      .cwd(run.workdir)
      .env(env);
    info!(command = %spec, "running build on host");
    self.runner.status(&spec).await
  }

  async fn prepare_toolchain(&self, run: &HostRun<'_>) -> Result<i32, ProcessError> {
    let toolchain = run.toolchain.trim();
    if !toolchain.is_empty() {
      let code = self.step(CommandSpec::new("rustup").args(["override", "set", toolchain]).cwd(run.workdir)).await?;
      if code != 0 {
        return Ok(code);
      }
      let optional = CommandSpec::new("rustup")
        .args(["component", "add", "llvm-tools-preview"])
        .cwd(run.workdir);
      if self.runner.status(&optional).await? != 0 {
        debug!("llvm-tools-preview not available, continuing");
      }
    }

    let components: Vec<&str> = run.components.split_whitespace().collect();
    if !components.is_empty() {
      let code = self
        .step(
          CommandSpec::new("rustup")
            .args(["component", "add"])
            .args(components)
            .cwd(run.workdir),
        )
        .await?;
      if code != 0 {
        return Ok(code);
      }
    }

    let mut targets: Vec<TargetTriple> = run.target.cloned().into_iter().collect();
    if run.platform.is_macos() && (run.is_universal2() || run.is_macos_cross()) {
      if run.is_universal2() {
        targets.push(TargetTriple::new("x86_64-apple-darwin"));
      }
      targets.push(TargetTriple::new("aarch64-apple-darwin"));
    }
    targets.dedup();
    for target in &targets {
      let code = self.install_target(target, toolchain, run.workdir).await?;
      if code != 0 {
        return Ok(code);
      }
    }
    Ok(0)
  }

  /// Add `target` unless its standard library is already installed.
  ///
  /// Both commands run in `workdir` so a directory toolchain override applies.
  pub async fn install_target(
    &self,
    target: &TargetTriple,
    toolchain: &str,
    workdir: &Path,
  ) -> Result<i32, ProcessError> {
    let mut probe = CommandSpec::new("rustc").cwd(workdir);
    if !toolchain.is_empty() {
      probe = probe.arg(format!("+{toolchain}"));
    }
    let probe = probe.args(["--print", "target-libdir", "--target", target.as_str()]);
    let libdir = self.runner.output(&probe).await?;
    if libdir.success() && Path::new(&libdir.stdout).is_dir() {
      debug!(target = %target, "target already installed");
      return Ok(0);
    }

    let mut add = CommandSpec::new("rustup").args(["target", "add"]).cwd(workdir);
    if !toolchain.is_empty() {
      add = add.args(["--toolchain", toolchain]);
    }
    self.step(add.arg(target.as_str())).await
  }

  async fn install_helpers(&self, run: &HostRun<'_>) -> Result<i32, ProcessError> {
    if run.platform.is_linux() && run.command.produces_artifacts() && which_in("patchelf", run).is_none() {
      let code = self
        .step(CommandSpec::new("python3").args(["-m", "pip", "install", "patchelf"]).cwd(run.workdir))
        .await?;
      if code != 0 {
        return Ok(code);
      }
    }
    if run.args.contains("--zig") {
      return self
        .step(CommandSpec::new("python3").args(["-m", "pip", "install", "ziglang"]).cwd(run.workdir))
        .await;
    }
    Ok(0)
  }

  async fn step(&self, spec: CommandSpec) -> Result<i32, ProcessError> {
    let code = self.runner.status(&spec).await?;
    if code != 0 {
      error!(command = %spec, code, "setup step failed");
    }
    Ok(code)
  }
}

fn build_env(run: &HostRun<'_>) -> EnvironmentSet {
  let mut env = run.env.clone();

  if run.platform.is_macos() && run.env.non_empty("pythonLocation").is_none() {
    env = with_tool_cache_pythons(&env);
  }

  if run.platform.is_macos() && (run.is_universal2() || run.is_macos_cross()) {
    let deployment = if !run.is_universal2() && run.target.is_some_and(|t| t.arch_component() == "aarch64") {
      "11.0"
    } else {
      "10.12"
    };
    info!(deployment_target = %deployment, "preparing macOS cross build environment");
    env = env
      .with_default("DEVELOPER_DIR", DEVELOPER_DIR)
      .with_default(
        "SDKROOT",
        format!("{DEVELOPER_DIR}/Platforms/MacOSX.platform/Developer/SDKs/MacOSX.sdk"),
      )
      .with_default("MACOSX_DEPLOYMENT_TARGET", deployment);
  }

  if run.sccache {
    if which_in("sccache", run).is_some() {
      env = env
        .with_default("RUSTC_WRAPPER", "sccache")
        .with_default("SCCACHE_GHA_ENABLED", "true");
    } else {
      warn!("sccache requested but not found on PATH, building without it");
    }
  }

  env
}

fn which_in(binary: &str, run: &HostRun<'_>) -> Option<PathBuf> {
  which::which_in(binary, run.env.get("PATH"), run.workdir).ok()
}

/// Prepend tool-cache interpreter directories (`<cache>/Python/<version>/<arch>`
/// and their `bin`) to `PATH`.
fn with_tool_cache_pythons(env: &EnvironmentSet) -> EnvironmentSet {
  let Some(cache) = env.non_empty("RUNNER_TOOL_CACHE") else {
    return env.clone();
  };
  let pattern = format!("{}/Python/*/*", glob::Pattern::escape(cache));
  let Ok(paths) = glob::glob(&pattern) else {
    return env.clone();
  };
  let mut dirs: Vec<PathBuf> = Vec::new();
  for install in paths.flatten().filter(|p| p.is_dir()) {
    info!(path = ?install, "found cached Python installation");
    dirs.push(install.join("bin"));
    dirs.push(install);
  }
  if dirs.is_empty() {
    return env.clone();
  }
  let existing = env.get("PATH").map(PathBuf::from);
  match std::env::join_paths(dirs.into_iter().chain(existing)) {
    Ok(path) => env.with("PATH", path.to_string_lossy()),
    Err(e) => {
      warn!(error = %e, "could not extend PATH with cached Python installations");
      env.clone()
    }
  }
}

/// Expand file patterns in upload arguments against `base`.
///
/// Flags, and the values of [`UPLOAD_VALUE_FLAGS`], pass through untouched.
/// A pattern with no matches is passed on literally so the build tool can
/// report it.
pub fn expand_upload_args(args: &BuildArgs, base: &Path) -> Vec<String> {
  let mut out = vec![args.command().to_string()];
  let mut value_next = false;
  for token in args.rest() {
    if value_next || token.starts_with('-') {
      value_next = !value_next && UPLOAD_VALUE_FLAGS.contains(&token.as_str());
      out.push(token.clone());
      continue;
    }

    let pattern = if Path::new(token).is_absolute() {
      token.clone()
    } else {
      format!("{}/{}", glob::Pattern::escape(&base.display().to_string()), token)
    };
    let mut matches: Vec<String> = glob::glob(&pattern)
      .map(|paths| paths.flatten().map(|p| p.display().to_string()).collect())
      .unwrap_or_default();
    if matches.is_empty() {
      warn!(pattern = %token, "upload pattern matched no files");
      out.push(token.clone());
    } else {
      matches.sort();
      out.append(&mut matches);
    }
  }
  out
}
