//! The per-target driver shared by both runners.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::target::Target;
use crate::trace::Tracer;

use super::types::{RunPhase, TargetContext, TargetError, TargetParameter, TargetResult};

/// Drive one target under the current context and return the updated
/// context.
///
/// Never returns an error: skips and body failures are recorded as results
/// and only inspected by the top-level run entry points.
pub(crate) async fn drive(target: &Target, mut ctx: TargetContext, tracer: &Arc<dyn Tracer>) -> TargetContext {
  // A failed main pass short-circuits everything behind it. Build-failure
  // and final targets run despite earlier errors.
  if ctx.phase == RunPhase::Main && ctx.has_error() {
    debug!(task = %target.name, "skipping target after earlier failure");
    ctx.push(TargetResult::skipped(target.clone(), None));
    return ctx;
  }

  // Final targets ignore cancellation; everything else checks the token at
  // this boundary only.
  if ctx.cancellation.is_cancelled() && ctx.phase != RunPhase::Final {
    warn!(task = %target.name, "skipping target: cancellation requested");
    ctx.push(TargetResult::skipped(target.clone(), Some(TargetError::Cancelled)));
    return ctx;
  }

  let dependency_list = target.dependencies.join(", ");
  let mut scope = tracer.task_start(&target.name, target.description.as_deref(), &dependency_list);

  let parameter = TargetParameter {
    target: target.clone(),
    context: ctx.clone(),
  };
  let body = Arc::clone(&target.body);

  let started = Instant::now();
  let outcome = tokio::task::spawn_blocking(move || body(&parameter)).await;
  let duration = started.elapsed();

  let error = match outcome {
    Ok(Ok(())) => {
      scope.mark_success();
      None
    }
    Ok(Err(err)) => {
      scope.mark_failed();
      Some(TargetError::from_anyhow(&err))
    }
    Err(join_err) => {
      scope.mark_failed();
      Some(TargetError::Failed {
        message: panic_message(join_err),
        chain: Vec::new(),
      })
    }
  };

  ctx.push(TargetResult::completed(target.clone(), duration, error));
  ctx
}

fn panic_message(err: JoinError) -> String {
  if !err.is_panic() {
    return "target task was aborted".to_string();
  }
  let payload = err.into_panic();
  if let Some(message) = payload.downcast_ref::<&str>() {
    format!("target panicked: {message}")
  } else if let Some(message) = payload.downcast_ref::<String>() {
    format!("target panicked: {message}")
  } else {
    "target panicked".to_string()
  }
}
