//! Target records and naming.
//!
//! A [`Target`] is a named unit of work bound to a user-supplied closure.
//! Target identity is case-insensitive everywhere in the engine: lookups,
//! dependency recording, cycle checks and result deduplication all compare
//! the canonical (lowercased) form, while user-facing output keeps the
//! original spelling.

use std::fmt;
use std::sync::Arc;

use crate::run::TargetParameter;

/// The user-supplied action bound to a target.
///
/// Bodies are ordinary synchronous closures; the runner drives them on the
/// blocking pool, so blocking I/O and child processes inside a body are fine.
pub type TargetBody = Arc<dyn Fn(&TargetParameter) -> anyhow::Result<()> + Send + Sync>;

/// The kind of edge between two targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
  /// Must run before the dependent, always.
  Hard,
  /// Must run before the dependent, but only when the dependency is also
  /// hard-reachable from the chosen root.
  Soft,
}

/// A named unit of work bound to a user function.
#[derive(Clone)]
pub struct Target {
  /// Original-case name; identity is case-insensitive.
  pub name: String,

  /// Optional one-line description, shown by `--list`.
  pub description: Option<String>,

  /// Hard dependencies, by name, in declaration order.
  pub dependencies: Vec<String>,

  /// Soft dependencies, by name, in declaration order.
  pub soft_dependencies: Vec<String>,

  /// The action invoked when the target runs.
  pub body: TargetBody,
}

impl Target {
  pub(crate) fn new(name: &str, description: Option<String>, body: TargetBody) -> Self {
    Self {
      name: name.to_string(),
      description,
      dependencies: Vec::new(),
      soft_dependencies: Vec::new(),
      body,
    }
  }

  /// The canonical form of this target's name.
  pub fn canonical(&self) -> String {
    canonical_name(&self.name)
  }
}

impl fmt::Debug for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Target")
      .field("name", &self.name)
      .field("description", &self.description)
      .field("dependencies", &self.dependencies)
      .field("soft_dependencies", &self.soft_dependencies)
      .finish_non_exhaustive()
  }
}

/// Canonical form used as the key for every name comparison.
pub fn canonical_name(name: &str) -> String {
  name.to_lowercase()
}
