//! Implementation of the `wheelhouse plan` command.
//!
//! Resolves the target, the manylinux policy, the container image and the
//! build script exactly as `run` would, then prints them without executing.

use anyhow::Result;

use wheelhouse_lib::pipeline::plan;

use super::BuildOpts;
use crate::output::{print_info, print_json, print_optional_stat, print_script, print_stat, print_success};

pub fn cmd_plan(opts: &BuildOpts, json: bool, verbose: bool) -> Result<()> {
  let ctx = opts.context()?;
  let summary = plan(&opts.to_request(), &ctx)?.summary();

  if json {
    return print_json(&summary);
  }

  print_success(&format!("Plan: {}", summary.command));
  print_optional_stat("Target", summary.target.as_deref(), "host default");
  print_optional_stat("Manylinux", Some(summary.policy.as_str()), "unset");
  print_optional_stat("Container", summary.image.as_deref(), "none, building on the host");
  print_stat("Arguments", &summary.args.join(" "));
  print_stat("Working directory", &summary.workdir.display().to_string());
  print_stat("Target directory", &summary.target_dir.display().to_string());
  if !summary.forwarded_env.is_empty() {
    print_stat("Forwarded env", &summary.forwarded_env.join(", "));
  }

  if let Some(script) = &summary.script {
    if verbose {
      println!();
      print_script(script);
    } else {
      print_info("Run with --verbose to print the build script");
    }
  }

  Ok(())
}
