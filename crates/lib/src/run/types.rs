//! Run-time types: contexts, results, options and errors.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::graph::GraphError;
use crate::registry::DeclarationError;
use crate::target::{Target, canonical_name};
use crate::trace::{LogTracer, Tracer};

/// Why a target result carries an error.
#[derive(Debug, Clone, Error)]
pub enum TargetError {
  /// The target body returned an error or panicked.
  #[error("{message}")]
  Failed {
    message: String,
    /// Cause chain below the top-level message, outermost first.
    chain: Vec<String>,
  },

  /// The target was skipped because cancellation was requested.
  #[error("build was cancelled before this target started")]
  Cancelled,
}

impl TargetError {
  pub(crate) fn from_anyhow(err: &anyhow::Error) -> Self {
    Self::Failed {
      message: err.to_string(),
      chain: err.chain().skip(1).map(|cause| cause.to_string()).collect(),
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, TargetError::Cancelled)
  }
}

/// One record per attempted target, in completion order.
#[derive(Debug, Clone)]
pub struct TargetResult {
  pub target: Target,
  pub duration: Duration,
  pub error: Option<TargetError>,
  /// True when a prior failure or cancellation short-circuited this target.
  pub was_skipped: bool,
}

impl TargetResult {
  pub(crate) fn completed(target: Target, duration: Duration, error: Option<TargetError>) -> Self {
    Self {
      target,
      duration,
      error,
      was_skipped: false,
    }
  }

  pub(crate) fn skipped(target: Target, error: Option<TargetError>) -> Self {
    Self {
      target,
      duration: Duration::ZERO,
      error,
      was_skipped: true,
    }
  }

  /// True for body failures; cancellation does not count.
  pub fn is_failure(&self) -> bool {
    matches!(self.error, Some(TargetError::Failed { .. }))
  }
}

/// Which pass of the run is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
  /// The scheduled transitive closure of the root target.
  Main,
  /// Activated build-failure targets, run after a failed main pass.
  BuildFailure,
  /// Activated final targets, always run last.
  Final,
}

/// The immutable-per-step carrier threaded through a run.
///
/// Every driver step produces a new snapshot; the parallel coordinator
/// holds the authoritative one and merges worker copies back in.
#[derive(Debug, Clone)]
pub struct TargetContext {
  /// The root target chosen for this run.
  pub final_target: String,

  /// Original-case names of every target scheduled for the main pass.
  pub all_executing_targets: Vec<String>,

  /// Results in completion order.
  pub previous_targets: Vec<TargetResult>,

  /// Script arguments forwarded from the command line.
  pub arguments: Vec<String>,

  pub phase: RunPhase,

  pub cancellation: CancellationToken,
}

impl TargetContext {
  pub(crate) fn new(
    final_target: String,
    all_executing_targets: Vec<String>,
    arguments: Vec<String>,
    cancellation: CancellationToken,
  ) -> Self {
    Self {
      final_target,
      all_executing_targets,
      previous_targets: Vec::new(),
      arguments,
      phase: RunPhase::Main,
      cancellation,
    }
  }

  /// True when any previous result carries an error.
  pub fn has_error(&self) -> bool {
    self.previous_targets.iter().any(|result| result.error.is_some())
  }

  /// True while the post-run final-target pass executes.
  pub fn is_running_final_targets(&self) -> bool {
    self.phase == RunPhase::Final
  }

  pub(crate) fn push(&mut self, result: TargetResult) {
    self.previous_targets.push(result);
  }

  /// Result of a target by (case-insensitive) name, if attempted.
  pub fn result_for(&self, name: &str) -> Option<&TargetResult> {
    let key = canonical_name(name);
    self.previous_targets.iter().find(|result| result.target.canonical() == key)
  }

  /// Distinct names of targets whose body failed, in completion order.
  pub fn failing_targets(&self) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut names = Vec::new();
    for result in &self.previous_targets {
      if result.is_failure() && seen.insert(result.target.canonical()) {
        names.push(result.target.name.clone());
      }
    }
    names
  }
}

/// What each target body receives: its own descriptor plus the context.
#[derive(Debug, Clone)]
pub struct TargetParameter {
  pub target: Target,
  pub context: TargetContext,
}

/// Options controlling a run.
#[derive(Clone)]
pub struct RunOptions {
  /// Number of workers; 1 selects the sequential runner.
  pub parallelism: usize,

  /// Execute only the chosen target, skipping its transitive dependencies.
  pub single_target: bool,

  /// Arguments forwarded to target bodies via the context.
  pub arguments: Vec<String>,

  pub tracer: Arc<dyn Tracer>,

  /// Token cancelled by the interrupt handler; fresh per run by default.
  pub cancellation: CancellationToken,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      parallelism: 1,
      single_target: false,
      arguments: Vec::new(),
      tracer: Arc::new(LogTracer),
      cancellation: CancellationToken::new(),
    }
  }
}

impl fmt::Debug for RunOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RunOptions")
      .field("parallelism", &self.parallelism)
      .field("single_target", &self.single_target)
      .field("arguments", &self.arguments)
      .field("cancellation", &self.cancellation)
      .finish_non_exhaustive()
  }
}

/// Errors surfaced by the run entry points.
#[derive(Debug, Error)]
pub enum RunError {
  #[error(transparent)]
  Declaration(#[from] DeclarationError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  /// One or more targets failed; the message lists the distinct names.
  #[error("{}", format_build_failed(.targets))]
  BuildFailed { targets: Vec<String> },

  /// The coordinator found work remaining with nothing runnable and nothing
  /// running. Only reachable on a scheduling logic bug.
  #[error("scheduler deadlock: resolution {resolution}, known {known}")]
  SchedulerDeadlock { resolution: usize, known: usize },

  /// The coordinator task died before the run completed.
  #[error("scheduler terminated unexpectedly")]
  SchedulerGone,

  #[error("failed to start async runtime: {0}")]
  Runtime(#[source] std::io::Error),

  #[error(transparent)]
  Cli(#[from] clap::Error),
}

fn format_build_failed(targets: &[String]) -> String {
  match targets {
    [single] => format!("Target '{single}' failed."),
    many => {
      let quoted: Vec<String> = many.iter().map(|name| format!("'{name}'")).collect();
      format!("Targets {} failed.", quoted.join(", "))
    }
  }
}
