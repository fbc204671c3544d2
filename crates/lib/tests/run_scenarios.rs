//! End-to-end scenarios against the engine library.
//!
//! These exercise complete runs: layered ordering, skip propagation,
//! lifecycle targets, soft-dependency liveness, parallel saturation and
//! cooperative cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use smelt_lib::{CancellationToken, Engine, RunError, RunOptions, TargetParameter};

fn record_order(order: &Arc<Mutex<Vec<String>>>) -> impl Fn(&TargetParameter) -> anyhow::Result<()> + use<> {
  let order = Arc::clone(order);
  move |parameter| {
    order.lock().unwrap().push(parameter.target.name.clone());
    Ok(())
  }
}

#[tokio::test]
async fn diamond_runs_dependencies_first() {
  let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
  let mut engine = Engine::new();
  for name in ["A", "B", "C", "D"] {
    engine.create(name, record_order(&order)).unwrap();
  }
  engine.add_dependency("B", "A").unwrap();
  engine.add_dependency("C", "A").unwrap();
  engine.add_dependency("D", "B").unwrap();
  engine.add_dependency("D", "C").unwrap();

  let ctx = smelt_lib::run::run(&engine, "D", RunOptions::default()).await.unwrap();

  // Three layers: [A], [B, C], [D].
  let plan = smelt_lib::ExecutionPlan::analyze(&engine, engine.get("D").unwrap()).unwrap();
  assert_eq!(plan.layers().len(), 3);
  assert_eq!(plan.layer_of("A"), Some(0));
  assert_eq!(plan.layer_of("B"), Some(1));
  assert_eq!(plan.layer_of("C"), Some(1));
  assert_eq!(plan.layer_of("D"), Some(2));

  assert!(ctx.previous_targets.iter().all(|result| result.error.is_none()));

  let order = order.lock().unwrap().clone();
  assert_eq!(order.first().map(String::as_str), Some("A"));
  assert_eq!(order.last().map(String::as_str), Some("D"));
  assert_eq!(order.len(), 4);
}

#[tokio::test]
async fn cycle_rejection_leaves_registry_usable() {
  let mut engine = Engine::new();
  engine.create("X", |_| Ok(())).unwrap();
  engine.create("Y", |_| Ok(())).unwrap();

  engine.add_dependency("X", "Y").unwrap();
  let err = engine.add_dependency("Y", "X").unwrap_err();
  assert!(err.to_string().contains("Cyclic dependency"));

  // The failed attempt changed nothing: X still runs.
  let ctx = smelt_lib::run::run(&engine, "X", RunOptions::default()).await.unwrap();
  assert_eq!(ctx.previous_targets.len(), 2);
  assert!(!ctx.has_error());
}

#[tokio::test]
async fn failure_skips_dependents_and_raises() {
  let mut engine = Engine::new();
  engine.create("A", |_| anyhow::bail!("boom")).unwrap();
  engine.create("B", |_| Ok(())).unwrap();
  engine.add_dependency("B", "A").unwrap();

  let err = smelt_lib::run::run(&engine, "B", RunOptions::default()).await.unwrap_err();
  assert_eq!(err.to_string(), "Target 'A' failed.");

  let ctx = smelt_lib::run::run_with_context(&engine, "B", RunOptions::default())
    .await
    .unwrap();
  assert!(ctx.has_error());

  let failed = ctx.result_for("A").unwrap();
  assert!(!failed.was_skipped);
  assert_eq!(failed.error.as_ref().unwrap().to_string(), "boom");

  let skipped = ctx.result_for("B").unwrap();
  assert!(skipped.was_skipped);
  assert!(skipped.error.is_none());
}

#[tokio::test]
async fn final_target_runs_after_main() {
  let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
  let mut engine = Engine::new();
  engine.create("Main", record_order(&order)).unwrap();
  engine.create_final("Cleanup", record_order(&order)).unwrap();
  engine.activate_final("Cleanup").unwrap();

  let ctx = smelt_lib::run::run(&engine, "Main", RunOptions::default()).await.unwrap();

  assert!(ctx.result_for("Main").is_some());
  assert!(ctx.result_for("Cleanup").is_some());
  assert_eq!(order.lock().unwrap().clone(), vec!["Main", "Cleanup"]);
}

#[tokio::test]
async fn unreachable_soft_dependency_not_executed() {
  let unused_ran = Arc::new(AtomicBool::new(false));
  let mut engine = Engine::new();
  engine.create("A", |_| Ok(())).unwrap();
  {
    let unused_ran = Arc::clone(&unused_ran);
    engine
      .create("Unused", move |_| {
        unused_ran.store(true, Ordering::SeqCst);
        Ok(())
      })
      .unwrap();
  }
  engine.add_soft_dependency("A", "Unused").unwrap();

  let ctx = smelt_lib::run::run(&engine, "A", RunOptions::default()).await.unwrap();

  assert!(!unused_ran.load(Ordering::SeqCst));
  assert!(ctx.result_for("Unused").is_none());
  assert_eq!(ctx.previous_targets.len(), 1);
}

#[tokio::test]
async fn reachable_soft_dependency_orders_execution() {
  let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
  let mut engine = Engine::new();
  for name in ["root", "pack", "clean"] {
    engine.create(name, record_order(&order)).unwrap();
  }
  engine.add_dependency("root", "pack").unwrap();
  engine.add_dependency("root", "clean").unwrap();
  engine.add_soft_dependency("pack", "clean").unwrap();

  smelt_lib::run::run(&engine, "root", RunOptions::default()).await.unwrap();

  let order = order.lock().unwrap().clone();
  let clean = order.iter().position(|name| name == "clean").unwrap();
  let pack = order.iter().position(|name| name == "pack").unwrap();
  assert!(clean < pack, "soft dependency must order scheduled targets: {order:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn parallel_saturation_bounded_by_worker_count() {
  let in_flight = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let mut engine = Engine::new();
  for index in 0..8 {
    let in_flight = Arc::clone(&in_flight);
    let peak = Arc::clone(&peak);
    engine
      .create(&format!("T{index}"), move |_| {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
      })
      .unwrap();
  }
  engine.create("Root", |_| Ok(())).unwrap();
  for index in 0..8 {
    engine.add_dependency("Root", &format!("T{index}")).unwrap();
  }

  let plan = smelt_lib::ExecutionPlan::analyze(&engine, engine.get("Root").unwrap()).unwrap();
  assert_eq!(plan.layers().len(), 2);
  assert_eq!(plan.layers()[0].len(), 8);

  let options = RunOptions {
    parallelism: 4,
    ..RunOptions::default()
  };
  let ctx = smelt_lib::run::run(&engine, "Root", options).await.unwrap();

  assert_eq!(ctx.previous_targets.len(), 9);
  assert!(peak.load(Ordering::SeqCst) <= 4, "peak was {}", peak.load(Ordering::SeqCst));
  assert_eq!(ctx.previous_targets.last().unwrap().target.name, "Root");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_lets_running_target_finish_and_skips_the_rest() {
  let token = CancellationToken::new();
  let final_ran = Arc::new(AtomicBool::new(false));
  let bf_ran = Arc::new(AtomicBool::new(false));

  let mut engine = Engine::new();
  engine
    .create("A", |_| {
      std::thread::sleep(Duration::from_millis(300));
      Ok(())
    })
    .unwrap();
  engine.create("B", |_| Ok(())).unwrap();
  engine.add_dependency("B", "A").unwrap();

  {
    let final_ran = Arc::clone(&final_ran);
    engine
      .create_final("cleanup", move |_| {
        final_ran.store(true, Ordering::SeqCst);
        Ok(())
      })
      .unwrap();
  }
  engine.activate_final("cleanup").unwrap();

  {
    let bf_ran = Arc::clone(&bf_ran);
    engine
      .create_build_failure("report", move |_| {
        bf_ran.store(true, Ordering::SeqCst);
        Ok(())
      })
      .unwrap();
  }
  engine.activate_build_failure("report").unwrap();

  // Interrupt arrives while A is still sleeping.
  let interrupter = token.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(100)).await;
    interrupter.cancel();
  });

  let options = RunOptions {
    cancellation: token,
    ..RunOptions::default()
  };
  let ctx = smelt_lib::run::run(&engine, "B", options).await.unwrap();

  // A ran to completion; B was skipped with the cancellation sentinel.
  let a = ctx.result_for("A").unwrap();
  assert!(!a.was_skipped);
  assert!(a.error.is_none());

  let b = ctx.result_for("B").unwrap();
  assert!(b.was_skipped);
  assert!(b.error.as_ref().unwrap().is_cancelled());

  assert!(final_ran.load(Ordering::SeqCst), "final targets still run when cancelled");
  assert!(!bf_ran.load(Ordering::SeqCst), "build-failure targets do not run when cancelled");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_matches_sequential_results() {
  let build_engine = || {
    let mut engine = Engine::new();
    for name in ["fmt", "lint", "build", "unit", "integration", "dist"] {
      engine.create(name, |_| Ok(())).unwrap();
    }
    engine.add_dependency("lint", "fmt").unwrap();
    engine.add_dependency("unit", "build").unwrap();
    engine.add_dependency("integration", "build").unwrap();
    engine.add_dependency("dist", "unit").unwrap();
    engine.add_dependency("dist", "integration").unwrap();
    engine.add_dependency("dist", "lint").unwrap();
    engine
  };

  let result_names = |ctx: &smelt_lib::TargetContext| {
    let mut names: Vec<String> = ctx
      .previous_targets
      .iter()
      .map(|result| result.target.name.clone())
      .collect();
    names.sort();
    names
  };

  let sequential = smelt_lib::run::run(&build_engine(), "dist", RunOptions::default())
    .await
    .unwrap();
  let parallel = smelt_lib::run::run(
    &build_engine(),
    "dist",
    RunOptions {
      parallelism: 3,
      ..RunOptions::default()
    },
  )
  .await
  .unwrap();

  assert_eq!(result_names(&sequential), result_names(&parallel));
  assert_eq!(sequential.previous_targets.len(), 6);
  assert!(!parallel.has_error());
}

#[tokio::test]
async fn at_most_once_execution() {
  let counter = Arc::new(AtomicUsize::new(0));
  let mut engine = Engine::new();
  {
    let counter = Arc::clone(&counter);
    engine
      .create("shared", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      })
      .unwrap();
  }
  engine.create("left", |_| Ok(())).unwrap();
  engine.create("right", |_| Ok(())).unwrap();
  engine.create("top", |_| Ok(())).unwrap();
  engine.add_dependency("left", "shared").unwrap();
  engine.add_dependency("right", "shared").unwrap();
  engine.add_dependency("top", "left").unwrap();
  engine.add_dependency("top", "right").unwrap();

  let ctx = smelt_lib::run::run(&engine, "top", RunOptions::default()).await.unwrap();

  assert_eq!(counter.load(Ordering::SeqCst), 1);
  let shared_results = ctx
    .previous_targets
    .iter()
    .filter(|result| result.target.name == "shared")
    .count();
  assert_eq!(shared_results, 1);
}

#[tokio::test]
async fn unknown_target_error_lists_known_names() {
  let mut engine = Engine::new();
  engine.create("build", |_| Ok(())).unwrap();
  engine.create("test", |_| Ok(())).unwrap();

  let err = smelt_lib::run::run(&engine, "dpeloy", RunOptions::default()).await.unwrap_err();
  let RunError::Declaration(inner) = err else {
    panic!("expected a declaration error");
  };
  let message = inner.to_string();
  assert!(message.contains("dpeloy"));
  assert!(message.contains("build"));
  assert!(message.contains("test"));
}
