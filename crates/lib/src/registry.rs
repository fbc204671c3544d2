//! Target registry and declaration API.
//!
//! An [`Engine`] bundles everything a build program declares before a run:
//! the target map, the final/build-failure activation maps and the pending
//! description slot. Declaration is single-threaded; the runner takes a
//! clone of the engine and treats it as read-only.
//!
//! Every dependency insertion is preceded by a depth-first acyclicity check
//! over the edge kind being added, so the hard-edge graph (and the
//! soft-edge graph) stays acyclic at all times.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::run::TargetParameter;
use crate::target::{DependencyKind, Target, TargetBody, canonical_name};

/// Errors raised while declaring targets and dependencies.
///
/// All of these are fatal at declaration time: the build cannot start.
#[derive(Debug, Error)]
pub enum DeclarationError {
  /// Target names must be non-empty.
  #[error("target name cannot be empty")]
  EmptyName,

  /// A target with the same (case-insensitive) name already exists.
  #[error("target '{name}' is already registered")]
  DuplicateTarget { name: String },

  /// A lookup missed; the message lists every known target.
  #[error("target '{}' is not registered. Known targets: {}", .name, .known.join(", "))]
  UnknownTarget { name: String, known: Vec<String> },

  /// The target is registered, but not as a final/build-failure target.
  #[error("target '{name}' is not registered as a {kind} target")]
  NotRegistered { name: String, kind: &'static str },

  /// Adding the edge would close a cycle.
  #[error("Cyclic dependency between {target} and {dependency}")]
  CyclicDependency { target: String, dependency: String },

  /// `describe` was called twice without a `create` in between.
  #[error("a target description is already pending: {pending}")]
  DescriptionAlreadyPending { pending: String },

  /// A description was armed but never consumed by a `create` call.
  #[error("a pending target description was never attached to a target: {pending}")]
  DanglingDescription { pending: String },
}

/// The mutable declaration-time state of a build program.
#[derive(Debug, Clone, Default)]
pub struct Engine {
  /// Canonical name -> target.
  targets: HashMap<String, Target>,

  /// Canonical name -> activation flag for final targets.
  final_targets: HashMap<String, bool>,

  /// Canonical name -> activation flag for build-failure targets.
  build_failure_targets: HashMap<String, bool>,

  /// Description armed for the next `create` call.
  pending_description: Option<String>,
}

impl Engine {
  pub fn new() -> Self {
    Self::default()
  }

  /// Arm a description for the next `create` call.
  ///
  /// Fails if a description is already pending, which would otherwise attach
  /// it to the wrong target.
  pub fn describe(&mut self, text: impl Into<String>) -> Result<(), DeclarationError> {
    if let Some(pending) = &self.pending_description {
      return Err(DeclarationError::DescriptionAlreadyPending {
        pending: pending.clone(),
      });
    }
    self.pending_description = Some(text.into());
    Ok(())
  }

  /// Register a target, consuming any pending description.
  pub fn create<F>(&mut self, name: &str, body: F) -> Result<(), DeclarationError>
  where
    F: Fn(&TargetParameter) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    self.insert_target(name, Arc::new(body))
  }

  /// Register a final target; it stays inactive until `activate_final`.
  pub fn create_final<F>(&mut self, name: &str, body: F) -> Result<(), DeclarationError>
  where
    F: Fn(&TargetParameter) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    self.insert_target(name, Arc::new(body))?;
    self.final_targets.insert(canonical_name(name), false);
    Ok(())
  }

  /// Register a build-failure target; it stays inactive until
  /// `activate_build_failure`.
  pub fn create_build_failure<F>(&mut self, name: &str, body: F) -> Result<(), DeclarationError>
  where
    F: Fn(&TargetParameter) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    self.insert_target(name, Arc::new(body))?;
    self.build_failure_targets.insert(canonical_name(name), false);
    Ok(())
  }

  fn insert_target(&mut self, name: &str, body: TargetBody) -> Result<(), DeclarationError> {
    if name.is_empty() {
      return Err(DeclarationError::EmptyName);
    }
    let key = canonical_name(name);
    if self.targets.contains_key(&key) {
      return Err(DeclarationError::DuplicateTarget { name: name.to_string() });
    }
    let description = self.pending_description.take();
    debug!(task = %name, has_description = description.is_some(), "target registered");
    self.targets.insert(key, Target::new(name, description, body));
    Ok(())
  }

  pub fn activate_final(&mut self, name: &str) -> Result<(), DeclarationError> {
    Self::set_activation(&mut self.final_targets, name, "final", true)
  }

  pub fn deactivate_final(&mut self, name: &str) -> Result<(), DeclarationError> {
    Self::set_activation(&mut self.final_targets, name, "final", false)
  }

  pub fn activate_build_failure(&mut self, name: &str) -> Result<(), DeclarationError> {
    Self::set_activation(&mut self.build_failure_targets, name, "build-failure", true)
  }

  pub fn deactivate_build_failure(&mut self, name: &str) -> Result<(), DeclarationError> {
    Self::set_activation(&mut self.build_failure_targets, name, "build-failure", false)
  }

  fn set_activation(
    map: &mut HashMap<String, bool>,
    name: &str,
    kind: &'static str,
    value: bool,
  ) -> Result<(), DeclarationError> {
    match map.get_mut(&canonical_name(name)) {
      Some(flag) => {
        *flag = value;
        Ok(())
      }
      None => Err(DeclarationError::NotRegistered {
        name: name.to_string(),
        kind,
      }),
    }
  }

  /// Record a hard dependency: `dependency` must run before `target`.
  pub fn add_dependency(&mut self, target: &str, dependency: &str) -> Result<(), DeclarationError> {
    self.add_edge(target, dependency, DependencyKind::Hard)
  }

  /// Record a soft dependency: `dependency` runs before `target` only when
  /// it is also hard-reachable from the chosen root.
  ///
  /// The dependency name need not be declared yet; an undeclared soft
  /// dependency can never become hard-reachable and is ignored at run time.
  pub fn add_soft_dependency(&mut self, target: &str, dependency: &str) -> Result<(), DeclarationError> {
    self.add_edge(target, dependency, DependencyKind::Soft)
  }

  fn add_edge(&mut self, target: &str, dependency: &str, kind: DependencyKind) -> Result<(), DeclarationError> {
    let target_key = canonical_name(target);
    if !self.targets.contains_key(&target_key) {
      return Err(self.unknown_target(target));
    }
    if kind == DependencyKind::Hard && !self.targets.contains_key(&canonical_name(dependency)) {
      return Err(self.unknown_target(dependency));
    }

    self.check_acyclic(target, dependency, kind)?;

    let dependency_key = canonical_name(dependency);
    // Presence of target_key was checked above.
    if let Some(entry) = self.targets.get_mut(&target_key) {
      match kind {
        DependencyKind::Hard => {
          // A name lives in the hard list or the soft list, never both.
          entry.soft_dependencies.retain(|d| canonical_name(d) != dependency_key);
          if !entry.dependencies.iter().any(|d| canonical_name(d) == dependency_key) {
            entry.dependencies.insert(0, dependency.to_string());
          }
        }
        DependencyKind::Soft => {
          let already_hard = entry.dependencies.iter().any(|d| canonical_name(d) == dependency_key);
          let already_soft = entry.soft_dependencies.iter().any(|d| canonical_name(d) == dependency_key);
          if !already_hard && !already_soft {
            entry.soft_dependencies.insert(0, dependency.to_string());
          }
        }
      }
      debug!(task = %target, dependency = %dependency, ?kind, "dependency recorded");
    }
    Ok(())
  }

  /// Depth-first walk from `dependency` over edges of the given kind; if it
  /// reaches `target`, the proposed edge would close a cycle.
  fn check_acyclic(&self, target: &str, dependency: &str, kind: DependencyKind) -> Result<(), DeclarationError> {
    let goal = canonical_name(target);
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack = vec![canonical_name(dependency)];

    while let Some(current) = stack.pop() {
      if current == goal {
        return Err(DeclarationError::CyclicDependency {
          target: target.to_string(),
          dependency: dependency.to_string(),
        });
      }
      if !visited.insert(current.clone()) {
        continue;
      }
      if let Some(node) = self.targets.get(&current) {
        let edges = match kind {
          DependencyKind::Hard => &node.dependencies,
          DependencyKind::Soft => &node.soft_dependencies,
        };
        stack.extend(edges.iter().map(|d| canonical_name(d)));
      }
    }

    Ok(())
  }

  /// Case-insensitive lookup; a miss lists every known target.
  pub fn get(&self, name: &str) -> Result<&Target, DeclarationError> {
    self
      .targets
      .get(&canonical_name(name))
      .ok_or_else(|| self.unknown_target(name))
  }

  /// Lookup by an already-canonical key.
  pub(crate) fn target_by_key(&self, key: &str) -> Option<&Target> {
    self.targets.get(key)
  }

  fn unknown_target(&self, name: &str) -> DeclarationError {
    DeclarationError::UnknownTarget {
      name: name.to_string(),
      known: self.target_names(),
    }
  }

  /// All target names (original case), sorted case-insensitively.
  pub fn target_names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.targets.values().map(|t| t.name.clone()).collect();
    names.sort_by_key(|n| canonical_name(n));
    names
  }

  /// All targets, sorted case-insensitively by name.
  pub fn targets_sorted(&self) -> Vec<&Target> {
    let mut targets: Vec<&Target> = self.targets.values().collect();
    targets.sort_by_key(|t| t.canonical());
    targets
  }

  /// Activated final targets, sorted case-insensitively by name.
  pub fn activated_final_targets(&self) -> Vec<Target> {
    Self::activated(&self.final_targets, &self.targets)
  }

  /// Activated build-failure targets, sorted case-insensitively by name.
  pub fn activated_build_failure_targets(&self) -> Vec<Target> {
    Self::activated(&self.build_failure_targets, &self.targets)
  }

  fn activated(map: &HashMap<String, bool>, targets: &HashMap<String, Target>) -> Vec<Target> {
    let mut keys: Vec<&String> = map.iter().filter(|&(_, &on)| on).map(|(key, _)| key).collect();
    keys.sort();
    keys.into_iter().filter_map(|key| targets.get(key)).cloned().collect()
  }

  /// Fatal at run start: a description was armed but never attached.
  pub fn ensure_description_consumed(&self) -> Result<(), DeclarationError> {
    match &self.pending_description {
      Some(pending) => Err(DeclarationError::DanglingDescription {
        pending: pending.clone(),
      }),
      None => Ok(()),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }

  /// Clear all declaration state. Primarily for test harnesses.
  pub fn reset(&mut self) {
    self.targets.clear();
    self.final_targets.clear();
    self.build_failure_targets.clear();
    self.pending_description = None;
  }
}
