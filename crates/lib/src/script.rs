//! Sandboxed build script composition.
//!
//! A build script is a fixed sequence of [`Step`]s. Optional steps are either
//! present or absent; they never move. Every install step probes before it
//! installs, so re-running the script in a warm container is cheap.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use tempfile::TempPath;

use crate::args::{ArgsError, BuildArgs};
use crate::consts::BUILD_TOOL;
use crate::platform::Platform;
use crate::platform::arch::Arch;
use crate::platform::os::Os;
use crate::target::TargetTriple;
use crate::tool::{ToolVersion, release_asset, release_url};

/// Toolchain used inside the sandbox when none is requested.
pub const DEFAULT_TOOLCHAIN: &str = "stable";

/// Build cache release installed into the sandbox.
pub const SCCACHE_VERSION: &str = "v0.8.1";

/// Interpreter installations shipped by the manylinux images.
const INTERPRETER_DIRS: &[&str] = &[
  "/opt/python/cp37-cp37m/bin",
  "/opt/python/cp38-cp38/bin",
  "/opt/python/cp39-cp39/bin",
  "/opt/python/cp310-cp310/bin",
  "/opt/python/cp311-cp311/bin",
  "/opt/python/cp312-cp312/bin",
  "/opt/python/cp313-cp313/bin",
];

/// Script sections, in the only order they are ever emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
  Preamble,
  SystemFixup,
  Toolchain,
  InterpreterPath,
  BuildTool,
  Zig,
  Target,
  Components,
  BeforeScript,
  CacheSetup,
  Build,
  CacheStats,
}

impl Step {
  pub const ALL: [Step; 12] = [
    Step::Preamble,
    Step::SystemFixup,
    Step::Toolchain,
    Step::InterpreterPath,
    Step::BuildTool,
    Step::Zig,
    Step::Target,
    Step::Components,
    Step::BeforeScript,
    Step::CacheSetup,
    Step::Build,
    Step::CacheStats,
  ];

  pub fn title(&self) -> &'static str {
    match self {
      Step::Preamble => "Preamble",
      Step::SystemFixup => "Install system dependencies",
      Step::Toolchain => "Install Rust",
      Step::InterpreterPath => "Add Python interpreters to PATH",
      Step::BuildTool => "Install maturin",
      Step::Zig => "Install Zig",
      Step::Target => "Install Rust target",
      Step::Components => "Install extra Rust components",
      Step::BeforeScript => "Run before script",
      Step::CacheSetup => "Install sccache",
      Step::Build => "Build",
      Step::CacheStats => "sccache stats",
    }
  }

  /// Whether the step is wrapped in a collapsible log group.
  fn grouped(&self) -> bool {
    !matches!(self, Step::Preamble | Step::InterpreterPath | Step::Build)
  }
}

impl fmt::Display for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.title())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSection {
  pub step: Step,
  pub lines: Vec<String>,
}

/// A composed script, sections in [`Step`] order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildScript {
  sections: Vec<ScriptSection>,
}

impl BuildScript {
  pub fn sections(&self) -> &[ScriptSection] {
    &self.sections
  }

  pub fn steps(&self) -> Vec<Step> {
    self.sections.iter().map(|s| s.step).collect()
  }

  pub fn has(&self, step: Step) -> bool {
    self.sections.iter().any(|s| s.step == step)
  }

  pub fn render(&self) -> String {
    let mut out = String::from("#!/bin/bash\n");
    for section in &self.sections {
      if section.step.grouped() {
        out.push_str(&format!("echo \"::group::{}\"\n", section.step.title()));
      }
      for line in &section.lines {
        out.push_str(line);
        out.push('\n');
      }
      if section.step.grouped() {
        out.push_str("echo \"::endgroup::\"\n");
      }
    }
    out
  }

  /// Write the script to a new executable file in `dir`.
  ///
  /// The file is closed before returning so it can be executed, and removed
  /// when the returned path is dropped.
  pub fn write_temp(&self, dir: &Path) -> io::Result<TempPath> {
    let mut file = tempfile::Builder::new()
      .prefix("wheelhouse-build-")
      .suffix(".sh")
      .tempfile_in(dir)?;
    file.write_all(self.render().as_bytes())?;
    file.flush()?;
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(file.into_temp_path())
  }
}

/// Inputs to [`compose`].
#[derive(Debug, Clone, Copy)]
pub struct ScriptRequest<'a> {
  /// Architecture of the container, which is the host's.
  pub container_arch: Arch,
  pub target: Option<&'a TargetTriple>,
  /// Toolchain channel; empty means [`DEFAULT_TOOLCHAIN`].
  pub toolchain: &'a str,
  /// Space-delimited extra toolchain components.
  pub components: &'a str,
  pub before_script: &'a str,
  pub sccache: bool,
  pub tool_version: &'a ToolVersion,
  /// Final build tool arguments, command first.
  pub args: &'a BuildArgs,
}

/// Compose the sandbox build script.
pub fn compose(request: &ScriptRequest<'_>) -> Result<BuildScript, ArgsError> {
  let toolchain = match request.toolchain.trim() {
    "" => DEFAULT_TOOLCHAIN,
    t => t,
  };
  let mut sections = Vec::with_capacity(Step::ALL.len());
  let mut push = |step: Step, lines: Vec<String>| sections.push(ScriptSection { step, lines });

  push(Step::Preamble, vec!["set -e".to_string()]);

  if request.target.is_some_and(|t| t.as_str() == "i686-unknown-linux-gnu") {
    push(
      Step::SystemFixup,
      vec!["if command -v yum > /dev/null; then yum install -y libatomic; fi".to_string()],
    );
  }

  push(
    Step::Toolchain,
    vec![
      format!(
        "which rustup > /dev/null || curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y --profile minimal --default-toolchain {toolchain}"
      ),
      "export PATH=\"$HOME/.cargo/bin:$PATH\"".to_string(),
      format!("rustup override set {toolchain}"),
      "rustup component add llvm-tools-preview || true".to_string(),
    ],
  );

  push(
    Step::InterpreterPath,
    vec![format!("export PATH=\"$PATH:{}\"", INTERPRETER_DIRS.join(":"))],
  );

  let container = Platform::new(request.container_arch, Os::Linux);
  let tool_url = release_url(request.tool_version, &release_asset(container));
  push(
    Step::BuildTool,
    vec![
      format!("which {BUILD_TOOL} > /dev/null || curl -L {tool_url} | tar -xz -C /usr/local/bin"),
      format!("{BUILD_TOOL} --version || true"),
      "which patchelf > /dev/null || python3 -m pip install patchelf".to_string(),
    ],
  );

  if request.args.contains("--zig") {
    push(
      Step::Zig,
      vec!["python3 -m ziglang version > /dev/null 2>&1 || python3 -m pip install ziglang".to_string()],
    );
  }

  if let Some(target) = request.target {
    push(
      Step::Target,
      vec![format!(
        "if [[ ! -d $(rustc --print target-libdir --target {target}) ]]; then rustup target add {target}; fi"
      )],
    );
  }

  let components: Vec<&str> = request.components.split_whitespace().collect();
  if !components.is_empty() {
    push(Step::Components, vec![format!("rustup component add {}", components.join(" "))]);
  }

  if !request.before_script.trim().is_empty() {
    push(
      Step::BeforeScript,
      request.before_script.lines().map(str::to_string).collect(),
    );
  }

  if request.sccache {
    let arch = container.release_arch();
    let dir = format!("sccache-{SCCACHE_VERSION}-{arch}-unknown-linux-musl");
    push(
      Step::CacheSetup,
      vec![
        format!(
          "which sccache > /dev/null || curl -L https://github.com/mozilla/sccache/releases/download/{SCCACHE_VERSION}/{dir}.tar.gz | tar -xz --strip-components=1 -C /usr/local/bin {dir}/sccache"
        ),
        "export RUSTC_WRAPPER=sccache".to_string(),
        "export SCCACHE_GHA_ENABLED=true".to_string(),
      ],
    );
  }

  push(Step::Build, vec![format!("{BUILD_TOOL} {}", request.args.to_shell()?)]);

  if request.sccache {
    push(Step::CacheStats, vec!["sccache --show-stats".to_string()]);
  }

  Ok(BuildScript { sections })
}
