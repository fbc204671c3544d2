//! Target execution.
//!
//! Orchestrates one run end to end: build-order analysis, the printed
//! running order, sequential or parallel execution of the main pass,
//! build-failure and final lifecycle targets, build-state tracing and the
//! timing summary. Body failures never escape the drivers; the top-level
//! [`run`] aggregates them into [`RunError::BuildFailed`] while
//! [`run_with_context`] hands the final context back to the caller.

mod driver;
mod parallel;
pub mod types;

pub use types::{
  RunError, RunOptions, RunPhase, TargetContext, TargetError, TargetParameter, TargetResult,
};

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::graph::ExecutionPlan;
use crate::interrupt;
use crate::registry::Engine;
use crate::report;
use crate::trace::{BuildStatus, Severity, Tracer};

/// Run `root` and its transitive closure, returning the final context.
///
/// Raises [`RunError::BuildFailed`] when any target failed and cancellation
/// was not requested.
pub async fn run(engine: &Engine, root: &str, options: RunOptions) -> Result<TargetContext, RunError> {
  let ctx = run_with_context(engine, root, options).await?;
  if ctx.has_error() && !ctx.cancellation.is_cancelled() {
    let targets = ctx.failing_targets();
    if !targets.is_empty() {
      return Err(RunError::BuildFailed { targets });
    }
  }
  Ok(ctx)
}

/// Like [`run`], but target failures are only reflected in the returned
/// context; the caller inspects `has_error` itself.
pub async fn run_with_context(engine: &Engine, root: &str, options: RunOptions) -> Result<TargetContext, RunError> {
  engine.ensure_description_consumed()?;
  let root_target = engine.get(root)?.clone();

  let plan = if options.single_target {
    debug!(root = %root_target.name, "single-target mode: skipping transitive dependencies");
    ExecutionPlan::single_target(&root_target)
  } else {
    ExecutionPlan::analyze(engine, &root_target)?
  };

  interrupt::install(options.cancellation.clone());
  options
    .tracer
    .log(Severity::Debug, &format!("dependency graph:\n{}", plan.render()));
  report::print_running_order(&plan);

  let scheduled = plan.flattened().iter().map(|target| target.name.clone()).collect();
  let base = TargetContext::new(
    root_target.name.clone(),
    scheduled,
    options.arguments.clone(),
    options.cancellation.clone(),
  );

  let tracer = Arc::clone(&options.tracer);
  let started = Instant::now();

  let ctx = if options.parallelism > 1 && !options.single_target {
    parallel::run_parallel(&plan, base, options.parallelism, &tracer).await?
  } else {
    run_sequential(&plan, base, &tracer).await
  };

  let ctx = run_lifecycle_hooks(engine, ctx, &tracer).await;
  let total = started.elapsed();

  if ctx.has_error() {
    let failing = ctx.failing_targets().join(", ");
    let detail = (!failing.is_empty()).then_some(failing);
    tracer.build_state(BuildStatus::Failed, detail.as_deref());
  } else {
    tracer.build_state(BuildStatus::Success, None);
  }

  report::print_summary(&ctx, total);
  Ok(ctx)
}

/// Synchronous wrapper around [`run`] for build programs without their own
/// runtime.
pub fn run_blocking(engine: &Engine, root: &str, options: RunOptions) -> Result<TargetContext, RunError> {
  let runtime = tokio::runtime::Runtime::new().map_err(RunError::Runtime)?;
  runtime.block_on(run(engine, root, options))
}

async fn run_sequential(plan: &ExecutionPlan, mut ctx: TargetContext, tracer: &Arc<dyn Tracer>) -> TargetContext {
  info!(targets = plan.len(), "running targets sequentially");
  for target in plan.flattened() {
    ctx = driver::drive(&target, ctx, tracer).await;
  }
  ctx
}

/// After the main pass: activated build-failure targets when it failed
/// without cancellation, then activated final targets unconditionally.
async fn run_lifecycle_hooks(engine: &Engine, mut ctx: TargetContext, tracer: &Arc<dyn Tracer>) -> TargetContext {
  if ctx.has_error() && !ctx.cancellation.is_cancelled() {
    let build_failure = engine.activated_build_failure_targets();
    if !build_failure.is_empty() {
      tracer.log(Severity::Info, "running build-failure targets");
      ctx.phase = RunPhase::BuildFailure;
      for target in build_failure {
        ctx = driver::drive(&target, ctx, tracer).await;
      }
    }
  }

  let finals = engine.activated_final_targets();
  if !finals.is_empty() {
    tracer.log(Severity::Info, "running final targets");
    ctx.phase = RunPhase::Final;
    for target in finals {
      ctx = driver::drive(&target, ctx, tracer).await;
    }
  }

  ctx
}
