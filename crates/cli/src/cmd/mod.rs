mod info;
mod plan;
mod run;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use clap::builder::FalseyValueParser;

use wheelhouse_lib::pipeline::{BuildRequest, Context};
use wheelhouse_lib::tables::Tables;

pub use info::cmd_info;
pub use plan::cmd_plan;
pub use run::cmd_run;

/// Inputs shared by `run` and `plan`. Every flag falls back to a `WHEELHOUSE_*` variable.
#[derive(Debug, Args)]
pub struct BuildOpts {
  /// Build tool subcommand (build, develop, sdist, publish, ...)
  #[arg(long, env = "WHEELHOUSE_COMMAND", default_value = "build")]
  pub command: String,

  /// Extra arguments passed to the build tool, as one shell-quoted string
  #[arg(long, env = "WHEELHOUSE_ARGS", default_value = "", allow_hyphen_values = true)]
  pub args: String,

  /// Target triple or architecture alias (x86_64, aarch64, armv7, ...)
  #[arg(long, env = "WHEELHOUSE_TARGET", default_value = "")]
  pub target: String,

  /// Manylinux policy: auto, off, 2014, 2_28, musllinux_1_2, ...
  #[arg(long, env = "WHEELHOUSE_MANYLINUX", default_value = "")]
  pub manylinux: String,

  /// Container image: auto, off, a full reference, or a tag in the default repository
  #[arg(long, env = "WHEELHOUSE_CONTAINER", default_value = "")]
  pub container: String,

  /// Extra options for `docker run`
  #[arg(long, env = "WHEELHOUSE_DOCKER_OPTIONS", default_value = "", allow_hyphen_values = true)]
  pub docker_options: String,

  /// Rust toolchain to install and use
  #[arg(long, env = "WHEELHOUSE_RUST_TOOLCHAIN", default_value = "")]
  pub rust_toolchain: String,

  /// Space-separated rustup components to install
  #[arg(long, env = "WHEELHOUSE_RUSTUP_COMPONENTS", default_value = "")]
  pub rustup_components: String,

  /// Shell snippet run inside the container before the build
  #[arg(long, env = "WHEELHOUSE_BEFORE_SCRIPT_LINUX", default_value = "", allow_hyphen_values = true)]
  pub before_script_linux: String,

  /// Enable sccache
  #[arg(long, env = "WHEELHOUSE_SCCACHE", value_parser = FalseyValueParser::new())]
  pub sccache: bool,

  /// Build tool version, `latest` or `vX.Y.Z`
  #[arg(long, env = "WHEELHOUSE_MATURIN_VERSION", default_value = "latest")]
  pub maturin_version: String,

  /// Directory the build runs in, relative to the workspace
  #[arg(long, env = "WHEELHOUSE_WORKING_DIRECTORY")]
  pub working_directory: Option<PathBuf>,

  /// Prefix applied to host paths of volume mounts (for docker-in-docker setups)
  #[arg(long, env = "WHEELHOUSE_HOST_MOUNT_PREFIX")]
  pub host_mount_prefix: Option<String>,

  /// JSON file replacing the bundled container matrix
  #[arg(long, env = "WHEELHOUSE_MATRIX_FILE")]
  pub matrix_file: Option<PathBuf>,
}

impl BuildOpts {
  pub fn to_request(&self) -> BuildRequest {
    BuildRequest {
      command: self.command.clone(),
      args: self.args.clone(),
      target: self.target.clone(),
      manylinux: self.manylinux.clone(),
      container: self.container.clone(),
      docker_options: self.docker_options.clone(),
      toolchain: self.rust_toolchain.clone(),
      components: self.rustup_components.clone(),
      before_script: self.before_script_linux.clone(),
      sccache: self.sccache,
      tool_version: self.maturin_version.clone(),
      working_directory: self.working_directory.clone(),
      host_mount_prefix: self.host_mount_prefix.clone(),
    }
  }

  /// Load the lookup tables and capture the ambient host state.
  pub fn context(&self) -> Result<Context> {
    let mut tables = Tables::embedded().context("Failed to load bundled lookup tables")?;
    if let Some(path) = &self.matrix_file {
      tables = tables
        .with_container_file(path)
        .with_context(|| format!("Failed to load container matrix: {}", path.display()))?;
    }
    Context::capture(tables).context("Failed to inspect the host")
  }
}
