//! wheelhouse-lib: target resolution and build orchestration for Python native extensions
//!
//! This crate decides where a build runs and what it runs:
//! - `target` / `policy`: resolve the target triple and the manylinux/musllinux policy
//! - `container`: pick a container image from the per-architecture matrix
//! - `env`: filter which variables cross into the container
//! - `script`: compose the fail-fast build script for the container
//! - `sandbox` / `host`: run the build in a container or on the host
//! - `pipeline`: tie the above together into a plan and an execution

pub mod args;
pub mod consts;
pub mod container;
pub mod env;
pub mod host;
pub mod permissions;
pub mod pipeline;
pub mod platform;
pub mod policy;
pub mod process;
pub mod sandbox;
pub mod script;
pub mod tables;
pub mod target;
pub mod tool;
pub mod util;
