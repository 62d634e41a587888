//! CLI output formatting utilities.
//!
//! Status lines go to stdout, failures to stderr. Colors are dropped when the
//! stream is not a terminal.

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const INFO: &str = "•";
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// Like [`print_stat`], showing `fallback` dimmed when `value` is missing or empty.
pub fn print_optional_stat(label: &str, value: Option<&str>, fallback: &str) {
  match value.filter(|v| !v.is_empty()) {
    Some(value) => print_stat(label, value),
    None => print_stat(label, &fallback.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string()),
  }
}

/// Print a composed build script. Log-group markers are dimmed so the commands stand out.
pub fn print_script(script: &str) {
  for line in script.lines() {
    if line.starts_with("echo \"::group::") || line == "echo \"::endgroup::\"" {
      println!("{}", line.if_supports_color(Stream::Stdout, |s| s.dimmed()));
    } else {
      println!("{}", line);
    }
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
