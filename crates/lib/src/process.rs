//! Subprocess execution.
//!
//! Every external program (container engine, rustup, the build tool) is run
//! through [`ProcessRunner`], so orchestrators can be tested against a
//! recording fake instead of real binaries.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::env::EnvironmentSet;

#[derive(Debug, Error)]
pub enum ProcessError {
  #[error("failed to spawn '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("'{program}' was terminated by a signal")]
  Terminated { program: String },
}

/// A single program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: Option<PathBuf>,
  /// Replaces the inherited environment when set.
  pub env: Option<EnvironmentSet>,
  /// Discard stdout and stderr.
  pub quiet: bool,
}

impl CommandSpec {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: None,
      env: None,
      quiet: false,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
    self.cwd = Some(dir.as_ref().to_path_buf());
    self
  }

  pub fn env(mut self, env: EnvironmentSet) -> Self {
    self.env = Some(env);
    self
  }

  pub fn quiet(mut self) -> Self {
    self.quiet = true;
    self
  }

  fn to_command(&self) -> Command {
    let mut command = Command::new(&self.program);
    command.args(&self.args);
    if let Some(dir) = &self.cwd {
      command.current_dir(dir);
    }
    if let Some(env) = &self.env {
      command.env_clear().envs(env.iter());
    }
    command
  }
}

impl fmt::Display for CommandSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.program)?;
    for arg in &self.args {
      write!(f, " {arg}")?;
    }
    Ok(())
  }
}

/// Captured result of [`ProcessRunner::output`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
  pub code: i32,
  pub stdout: String,
  pub stderr: String,
}

impl ProcessOutput {
  pub fn success(&self) -> bool {
    self.code == 0
  }
}

/// Runs programs to completion, one at a time.
#[allow(async_fn_in_trait)]
pub trait ProcessRunner {
  /// Run with inherited stdio and return the exit code.
  async fn status(&self, spec: &CommandSpec) -> Result<i32, ProcessError>;

  /// Run with captured stdout/stderr.
  async fn output(&self, spec: &CommandSpec) -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

impl ProcessRunner for TokioRunner {
  async fn status(&self, spec: &CommandSpec) -> Result<i32, ProcessError> {
    debug!(command = %spec, cwd = ?spec.cwd, "running");
    let mut command = spec.to_command();
    if spec.quiet {
      command.stdout(Stdio::null()).stderr(Stdio::null());
    }
    let status = command.status().await.map_err(|source| spawn_error(spec, source))?;
    exit_code(spec, status)
  }

  async fn output(&self, spec: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
    debug!(command = %spec, cwd = ?spec.cwd, "capturing");
    let output = spec
      .to_command()
      .stdin(Stdio::null())
      .output()
      .await
      .map_err(|source| spawn_error(spec, source))?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    Ok(ProcessOutput {
      code: exit_code(spec, output.status)?,
      stdout,
      stderr,
    })
  }
}

fn spawn_error(spec: &CommandSpec, source: std::io::Error) -> ProcessError {
  ProcessError::Spawn {
    program: spec.program.clone(),
    source,
  }
}

fn exit_code(spec: &CommandSpec, status: std::process::ExitStatus) -> Result<i32, ProcessError> {
  status.code().ok_or_else(|| ProcessError::Terminated {
    program: spec.program.clone(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{echo_msg, shell_cmd, shell_echo_env};

  #[tokio::test]
  async fn status_returns_exit_code() {
    let (shell, args) = shell_cmd("exit 3");
    let code = TokioRunner.status(&CommandSpec::new(shell).args(args)).await.unwrap();
    assert_eq!(code, 3);
  }

  #[tokio::test]
  async fn output_captures_trimmed_stdout() {
    let (program, args) = echo_msg("hello");
    let out = TokioRunner.output(&CommandSpec::new(program).args(args)).await.unwrap();
    assert!(out.success());
    assert_eq!(out.stdout, "hello");
  }

  #[tokio::test]
  async fn explicit_env_replaces_inherited() {
    let (shell, args) = shell_echo_env("WHEELHOUSE_PROBE");
    let mut env: EnvironmentSet = [("WHEELHOUSE_PROBE", "from-set")].into_iter().collect();
    if let Ok(path) = std::env::var("PATH") {
      env = env.with("PATH", path);
    }
    let out = TokioRunner
      .output(&CommandSpec::new(shell).args(args).env(env))
      .await
      .unwrap();
    assert_eq!(out.stdout, "from-set");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn cwd_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    let (shell, args) = shell_cmd("pwd");
    let out = TokioRunner
      .output(&CommandSpec::new(shell).args(args).cwd(dir.path()))
      .await
      .unwrap();
    let expected = dunce::canonicalize(dir.path()).unwrap();
    assert_eq!(dunce::canonicalize(out.stdout).unwrap(), expected);
  }

  #[tokio::test]
  async fn missing_program_is_spawn_error() {
    let err = TokioRunner
      .status(&CommandSpec::new("wheelhouse-definitely-not-a-program"))
      .await
      .unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }));
  }

  #[test]
  fn display_joins_args() {
    let spec = CommandSpec::new("docker").args(["pull", "img:1"]);
    assert_eq!(spec.to_string(), "docker pull img:1");
  }
}
