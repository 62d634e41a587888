//! Static lookup tables: architecture aliases and container matrices.
//!
//! The tables ship as JSON next to the crate and are parsed once at startup.
//! Resolvers receive them by reference instead of reading globals, so tests
//! can hand them synthetic tables.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::container::ContainerMatrix;
use crate::target::TargetAliases;

const EMBEDDED_TARGETS: &str = include_str!("../data/targets.json");
const EMBEDDED_CONTAINERS: &str = include_str!("../data/containers.json");

#[derive(Debug, Error)]
pub enum TableError {
  #[error("failed to parse {name} table: {source}")]
  Parse {
    name: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to read table file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// All lookup data needed by the resolvers.
#[derive(Debug, Clone)]
pub struct Tables {
  pub aliases: TargetAliases,
  pub containers: ContainerMatrix,
}

impl Tables {
  /// Parse the tables bundled with the binary.
  pub fn embedded() -> Result<Self, TableError> {
    Ok(Self {
      aliases: parse("target alias", EMBEDDED_TARGETS)?,
      containers: parse("container", EMBEDDED_CONTAINERS)?,
    })
  }

  /// Returns a copy of these tables with the container matrix read from `path`.
  pub fn with_container_file(self, path: &Path) -> Result<Self, TableError> {
    let raw = std::fs::read_to_string(path).map_err(|source| TableError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = ?path, "loaded container matrix override");
    Ok(Self {
      containers: parse(&path.display().to_string(), &raw)?,
      ..self
    })
  }
}

fn parse<T: serde::de::DeserializeOwned>(name: &str, raw: &str) -> Result<T, TableError> {
  serde_json::from_str(raw).map_err(|source| TableError::Parse {
    name: name.to_string(),
    source,
  })
}
