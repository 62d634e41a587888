//! Implementation of the `wheelhouse run` command.

use anyhow::{Context as _, Result};
use tracing::info;

use wheelhouse_lib::pipeline::{execute, plan};
use wheelhouse_lib::process::TokioRunner;

use super::BuildOpts;
use crate::output::{print_error, print_success};

/// Plan and execute a build. Returns the exit code of the build.
pub fn cmd_run(opts: &BuildOpts) -> Result<i32> {
  let ctx = opts.context()?;
  let plan = plan(&opts.to_request(), &ctx)?;
  info!(
    command = %plan.command,
    sandboxed = plan.is_sandboxed(),
    workdir = ?plan.workdir,
    "starting build"
  );

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt.block_on(execute(&plan, &ctx, &TokioRunner))?;

  if outcome.success() {
    print_success(&format!("{} finished", plan.command));
  } else {
    print_error(&format!("{} exited with code {}", plan.command, outcome.exit_code));
  }
  Ok(outcome.exit_code)
}
