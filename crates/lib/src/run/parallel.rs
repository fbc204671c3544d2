//! Parallel runner: one coordinator actor plus N workers.
//!
//! Workers ask the coordinator for work, carrying their latest context; the
//! coordinator merges contexts, hands out runnable targets in layered order
//! (together with the merged context, so a dependency's result is always
//! visible before the dependent starts) and parks workers while nothing is
//! runnable. All scheduling state lives inside the coordinator task, so no
//! locks guard it and every assignment is linearizable.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::graph::ExecutionPlan;
use crate::target::Target;
use crate::trace::Tracer;

use super::driver;
use super::types::{RunError, TargetContext};

enum Assignment {
  /// Run this target under the attached (merged) context.
  Run(Box<Target>, TargetContext),
  /// No more work; the worker exits.
  Done,
}

struct NextRequest {
  ctx: TargetContext,
  reply: oneshot::Sender<Assignment>,
}

/// Execute the plan with `workers` parallel workers.
pub(crate) async fn run_parallel(
  plan: &ExecutionPlan,
  base: TargetContext,
  workers: usize,
  tracer: &Arc<dyn Tracer>,
) -> Result<TargetContext, RunError> {
  info!(workers, targets = plan.len(), "running targets in parallel");

  let (request_tx, request_rx) = mpsc::channel::<NextRequest>(workers.max(1));
  let coordinator = Coordinator::new(plan, base.clone());
  let coordinator_handle = tokio::spawn(coordinator.serve(request_rx));

  let mut worker_set = JoinSet::new();
  for worker_id in 0..workers {
    worker_set.spawn(worker_loop(worker_id, request_tx.clone(), base.clone(), Arc::clone(tracer)));
  }
  drop(request_tx);

  while let Some(joined) = worker_set.join_next().await {
    if let Err(err) = joined {
      error!(error = %err, "worker task panicked");
    }
  }

  match coordinator_handle.await {
    Ok(result) => result,
    Err(_) => Err(RunError::SchedulerGone),
  }
}

async fn worker_loop(
  worker_id: usize,
  requests: mpsc::Sender<NextRequest>,
  mut ctx: TargetContext,
  tracer: Arc<dyn Tracer>,
) {
  loop {
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = NextRequest {
      ctx: ctx.clone(),
      reply: reply_tx,
    };
    if requests.send(request).await.is_err() {
      debug!(worker_id, "coordinator gone, worker exiting");
      return;
    }
    match reply_rx.await {
      Ok(Assignment::Run(target, merged)) => {
        debug!(worker_id, task = %target.name, "worker picked up target");
        ctx = driver::drive(&target, merged, &tracer).await;
      }
      Ok(Assignment::Done) => {
        debug!(worker_id, "no more work, worker exiting");
        return;
      }
      Err(_) => {
        // Reply dropped: the coordinator faulted and the fault propagates.
        debug!(worker_id, "scheduler dropped reply, worker exiting");
        return;
      }
    }
  }
}

struct Coordinator {
  /// Authoritative context, merged from worker reports.
  ctx: TargetContext,
  /// Flattened layered order; runnable scans prefer earlier entries.
  scheduled: Vec<Target>,
  /// Canonical name -> canonical effective predecessors.
  predecessors: HashMap<String, HashSet<String>>,
  /// Canonical names of completed targets.
  completed: HashSet<String>,
  /// Canonical names of targets currently assigned to a worker.
  running: HashSet<String>,
  /// Workers parked because nothing was runnable when they asked.
  wait_list: VecDeque<oneshot::Sender<Assignment>>,
}

impl Coordinator {
  fn new(plan: &ExecutionPlan, ctx: TargetContext) -> Self {
    Self {
      ctx,
      scheduled: plan.flattened(),
      predecessors: plan.predecessor_map().clone(),
      completed: HashSet::new(),
      running: HashSet::new(),
      wait_list: VecDeque::new(),
    }
  }

  async fn serve(mut self, mut requests: mpsc::Receiver<NextRequest>) -> Result<TargetContext, RunError> {
    while let Some(request) = requests.recv().await {
      self.merge(request.ctx);

      let completed = &self.completed;
      self.running.retain(|name| !completed.contains(name));

      if self.completed.len() == self.scheduled.len() {
        while let Some(waiter) = self.wait_list.pop_front() {
          let _ = waiter.send(Assignment::Done);
        }
        let _ = request.reply.send(Assignment::Done);
        continue;
      }

      // Hand runnable targets to parked workers first, then the requester.
      let mut requester = Some(request.reply);
      loop {
        let Some(target) = self.next_runnable() else {
          break;
        };
        let Some(reply) = self.wait_list.pop_front().or_else(|| requester.take()) else {
          break;
        };
        let key = target.canonical();
        self.running.insert(key.clone());
        if reply
          .send(Assignment::Run(Box::new(target), self.ctx.clone()))
          .is_err()
        {
          // The worker died before receiving the assignment.
          self.running.remove(&key);
        }
      }

      if let Some(reply) = requester {
        if self.running.is_empty() {
          error!(
            resolution = self.scheduled.len(),
            known = self.completed.len(),
            "scheduler deadlock"
          );
          // Propagate the fault: drop this reply and every parked waiter.
          drop(reply);
          self.wait_list.clear();
          return Err(RunError::SchedulerDeadlock {
            resolution: self.scheduled.len(),
            known: self.completed.len(),
          });
        }
        self.wait_list.push_back(reply);
      }
    }

    Ok(self.ctx)
  }

  /// Append previously-unseen results, preserving completion order across
  /// workers. Deduplication is by canonical target name.
  fn merge(&mut self, incoming: TargetContext) {
    for result in incoming.previous_targets {
      let key = result.target.canonical();
      if self.completed.insert(key) {
        self.ctx.previous_targets.push(result);
      }
    }
  }

  /// First scheduled target that is not completed, not running, and whose
  /// effective predecessors are all completed.
  fn next_runnable(&self) -> Option<Target> {
    self
      .scheduled
      .iter()
      .find(|target| {
        let key = target.canonical();
        !self.completed.contains(&key)
          && !self.running.contains(&key)
          && self
            .predecessors
            .get(&key)
            .is_none_or(|preds| preds.iter().all(|pred| self.completed.contains(pred)))
      })
      .cloned()
  }
}
