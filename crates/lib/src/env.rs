//! Environment snapshots and the sandbox passthrough filter.
//!
//! The process environment is read exactly once, at the start of a run, into an
//! [`EnvironmentSet`]. Everything downstream works on that value: it is never
//! mutated in place, and every "change" produces a new set.

use std::collections::BTreeMap;

/// Prefixes of variables that are forwarded into a sandboxed build.
///
/// Grouped by concern: build tool, Rust toolchain, C/C++ toolchain, CI cache
/// service, build cache.
pub const ALLOWED_PREFIXES: &[&str] = &[
  "MATURIN_",
  "PYO3_",
  "CARGO_",
  "RUST",
  "TARGET_",
  "CC",
  "CFLAGS",
  "CXX",
  "CXXFLAGS",
  "CPPFLAGS",
  "LDFLAGS",
  "CMAKE_",
  "JEMALLOC_",
  "ACTIONS_",
  "SCCACHE_",
];

/// Variables that are never forwarded even when an allowed prefix matches.
///
/// `CARGO_HOME` holds the registry credential cache and is a host-only path.
pub const DENIED_NAMES: &[&str] = &["CARGO_HOME"];

/// An ordered, immutable mapping of variable name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSet {
  vars: BTreeMap<String, String>,
}

impl EnvironmentSet {
  /// Capture the current process environment.
  ///
  /// Variables whose name or value is not valid UTF-8 are skipped.
  pub fn from_process() -> Self {
    let vars = std::env::vars_os()
      .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
      .collect();
    Self { vars }
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.vars.get(name).map(String::as_str)
  }

  /// Like [`get`](Self::get), but treats an empty value as absent.
  pub fn non_empty(&self, name: &str) -> Option<&str> {
    self.get(name).filter(|v| !v.is_empty())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.vars.contains_key(name)
  }

  /// Interpret a variable as a boolean flag (`1`, `true`, `yes`, `on`).
  pub fn is_truthy(&self, name: &str) -> bool {
    self
      .get(name)
      .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
      .unwrap_or(false)
  }

  /// Returns a new set with `name` set to `value`.
  pub fn with(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
    let mut vars = self.vars.clone();
    vars.insert(name.into(), value.into());
    Self { vars }
  }

  /// Returns a new set with `name` set to `value` only if it is not already present.
  pub fn with_default(&self, name: &str, value: impl Into<String>) -> Self {
    if self.contains(name) {
      self.clone()
    } else {
      self.with(name, value)
    }
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.vars.keys().map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn len(&self) -> usize {
    self.vars.len()
  }

  pub fn is_empty(&self) -> bool {
    self.vars.is_empty()
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvironmentSet {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self {
      vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
    }
  }
}

/// Decides which variables cross the sandbox boundary.
///
/// A name is forwarded iff it starts with an allowed prefix and is not denied.
/// Matching is case-sensitive and never looks at values.
#[derive(Debug, Clone)]
pub struct EnvironmentFilter {
  allowed_prefixes: Vec<String>,
  denied: Vec<String>,
}

impl Default for EnvironmentFilter {
  fn default() -> Self {
    Self::new(ALLOWED_PREFIXES, DENIED_NAMES)
  }
}

impl EnvironmentFilter {
  pub fn new(allowed_prefixes: &[&str], denied: &[&str]) -> Self {
    Self {
      allowed_prefixes: allowed_prefixes.iter().map(|s| s.to_string()).collect(),
      denied: denied.iter().map(|s| s.to_string()).collect(),
    }
  }

  pub fn allows(&self, name: &str) -> bool {
    !self.denied.iter().any(|d| d == name) && self.allowed_prefixes.iter().any(|p| name.starts_with(p.as_str()))
  }

  pub fn filter(&self, env: &EnvironmentSet) -> EnvironmentSet {
    env.iter().filter(|(name, _)| self.allows(name)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn host_env() -> EnvironmentSet {
    [
      ("CARGO_TERM_COLOR", "always"),
      ("CARGO_HOME", "/home/runner/.cargo"),
      ("RUSTFLAGS", "-C target-cpu=native"),
      ("MATURIN_PYPI_TOKEN", "secret"),
      ("PYO3_CROSS_LIB_DIR", "/opt/lib"),
      ("SCCACHE_GHA_ENABLED", "true"),
      ("ACTIONS_CACHE_URL", "https://cache.example"),
      ("HOME", "/home/runner"),
      ("PATH", "/usr/bin"),
      ("cargo_lowercase", "x"),
    ]
    .into_iter()
    .collect()
  }

  #[test]
  fn forwards_only_allowed_prefixes() {
    let filtered = EnvironmentFilter::default().filter(&host_env());
    let names: Vec<_> = filtered.names().collect();
    assert_eq!(
      names,
      vec![
        "ACTIONS_CACHE_URL",
        "CARGO_TERM_COLOR",
        "MATURIN_PYPI_TOKEN",
        "PYO3_CROSS_LIB_DIR",
        "RUSTFLAGS",
        "SCCACHE_GHA_ENABLED",
      ]
    );
  }

  #[test]
  fn denied_name_never_forwarded() {
    let filtered = EnvironmentFilter::default().filter(&host_env());
    assert!(!filtered.contains("CARGO_HOME"));
    assert!(!EnvironmentFilter::default().allows("CARGO_HOME"));
  }

  #[test]
  fn matching_is_case_sensitive() {
    assert!(!EnvironmentFilter::default().allows("cargo_lowercase"));
  }

  #[test]
  fn filter_is_idempotent() {
    let filter = EnvironmentFilter::default();
    let once = filter.filter(&host_env());
    let twice = filter.filter(&once);
    assert_eq!(once, twice);
    assert_eq!(filter.filter(&host_env()), once);
  }

  #[test]
  fn filter_ignores_insertion_order() {
    let forward: EnvironmentSet = [("RUSTFLAGS", "a"), ("PATH", "b")].into_iter().collect();
    let backward: EnvironmentSet = [("PATH", "b"), ("RUSTFLAGS", "a")].into_iter().collect();
    let filter = EnvironmentFilter::default();
    assert_eq!(filter.filter(&forward), filter.filter(&backward));
  }

  #[test]
  fn with_returns_new_set() {
    let base = host_env();
    let extended = base.with("NEW_VAR", "1");
    assert!(!base.contains("NEW_VAR"));
    assert_eq!(extended.get("NEW_VAR"), Some("1"));
  }

  #[test]
  fn with_default_keeps_existing_value() {
    let env = host_env().with_default("HOME", "/root");
    assert_eq!(env.get("HOME"), Some("/home/runner"));
  }

  #[test]
  fn truthy_values() {
    let env: EnvironmentSet = [("A", "true"), ("B", "1"), ("C", "no")].into_iter().collect();
    assert!(env.is_truthy("A"));
    assert!(env.is_truthy("B"));
    assert!(!env.is_truthy("C"));
    assert!(!env.is_truthy("D"));
  }
}
