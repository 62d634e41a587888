//! Test utilities for wheelhouse-lib.
//!
//! Cross-platform shell helpers for tests that spawn real processes, and a
//! [`RecordingRunner`] for tests that must not.

use std::sync::Mutex;

use crate::process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};

/// Returns the shell command and args to echo an environment variable.
#[cfg(unix)]
pub fn shell_echo_env(var: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), format!("echo \"${}\"", var)])
}

#[cfg(windows)]
pub fn shell_echo_env(var: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), format!("echo %{}%", var)])
}

/// Returns the shell command and args to execute a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), script.to_string()])
}

/// Returns the command and args to echo a message.
#[cfg(unix)]
pub fn echo_msg(msg: &str) -> (&'static str, Vec<String>) {
  ("/bin/echo", vec![msg.to_string()])
}

#[cfg(windows)]
pub fn echo_msg(msg: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), format!("echo {}", msg)])
}

type Responder = Box<dyn Fn(&CommandSpec) -> ProcessOutput + Send + Sync>;

/// A [`ProcessRunner`] that records every call and answers from a closure.
///
/// By default every command succeeds with empty output.
pub struct RecordingRunner {
  calls: Mutex<Vec<CommandSpec>>,
  responder: Responder,
}

impl Default for RecordingRunner {
  fn default() -> Self {
    Self::new()
  }
}

impl RecordingRunner {
  pub fn new() -> Self {
    Self::with_responder(|_| ProcessOutput::default())
  }

  pub fn with_responder(responder: impl Fn(&CommandSpec) -> ProcessOutput + Send + Sync + 'static) -> Self {
    Self {
      calls: Mutex::new(Vec::new()),
      responder: Box::new(responder),
    }
  }

  /// Every command that was run, in order.
  pub fn calls(&self) -> Vec<CommandSpec> {
    self.calls.lock().unwrap().clone()
  }

  /// Every command rendered as a single line, in order.
  pub fn lines(&self) -> Vec<String> {
    self.calls().iter().map(ToString::to_string).collect()
  }

  /// Index of the first recorded line starting with `prefix`.
  pub fn position(&self, prefix: &str) -> Option<usize> {
    self.lines().iter().position(|l| l.starts_with(prefix))
  }

  fn record(&self, spec: &CommandSpec) -> ProcessOutput {
    self.calls.lock().unwrap().push(spec.clone());
    (self.responder)(spec)
  }
}

impl ProcessRunner for RecordingRunner {
  async fn status(&self, spec: &CommandSpec) -> Result<i32, ProcessError> {
    Ok(self.record(spec).code)
  }

  async fn output(&self, spec: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
    Ok(self.record(spec))
  }
}

/// A [`ProcessOutput`] with the given exit code and no output.
pub fn exited(code: i32) -> ProcessOutput {
  ProcessOutput {
    code,
    ..Default::default()
  }
}
