mod cmd;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::BuildOpts;

/// wheelhouse - build Python native extension wheels in a manylinux sandbox or on the host
#[derive(Parser)]
#[command(name = "wheelhouse")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve and run a build
  Run {
    #[command(flatten)]
    opts: BuildOpts,
  },

  /// Show what a run would do without executing anything
  Plan {
    #[command(flatten)]
    opts: BuildOpts,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
  },

  /// Show the detected host platform and directories
  Info,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Run { opts } => {
      let code = cmd::cmd_run(&opts)?;
      if code != 0 {
        std::process::exit(code);
      }
    }
    Commands::Plan { opts, json } => cmd::cmd_plan(&opts, json, cli.verbose)?,
    Commands::Info => cmd::cmd_info(),
  }

  Ok(())
}
