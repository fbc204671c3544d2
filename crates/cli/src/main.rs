//! smelt: reference build program for the smelt engine.
//!
//! Declares a small pipeline and hands control to the engine's CLI front
//! end, so every engine mode (target selection, listing, single-target,
//! parallel workers, script arguments, failure propagation and lifecycle
//! targets) can be driven through a real process boundary.
//!
//! Knobs used by the integration tests:
//! - `SMELT_FAIL=<step>` makes that step fail.
//! - `SMELT_SLEEP_MS=<n>` makes every step sleep before finishing.
//! - `SMELT_VERBOSE=1` switches logging to DEBUG.

use std::time::Duration;

use anyhow::Result;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use smelt_lib::TargetParameter;
use smelt_lib::dsl;

fn main() -> Result<()> {
  let level = if std::env::var("SMELT_VERBOSE").is_ok() {
    Level::DEBUG
  } else {
    Level::INFO
  };
  FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .without_time()
    .init();

  declare_pipeline()?;

  dsl::run_or_default_with_args("all")?;
  Ok(())
}

fn declare_pipeline() -> Result<()> {
  dsl::describe("Remove previous build artifacts")?;
  dsl::create("clean", step("clean"))?;

  dsl::describe("Generate sources")?;
  dsl::create("codegen", step("codegen"))?;

  dsl::describe("Compile the project")?;
  dsl::create("build", step("build"))?;

  dsl::describe("Run unit tests")?;
  dsl::create("unit-test", step("unit-test"))?;

  dsl::describe("Run the linter")?;
  dsl::create("lint", step("lint"))?;

  dsl::describe("Assemble the distribution archive")?;
  dsl::create("package", step("package"))?;

  dsl::describe("Build, test and package everything")?;
  dsl::create("all", step("all"))?;

  dsl::create_final("summary", |parameter: &TargetParameter| {
    let attempted = parameter.context.previous_targets.len();
    let failed = parameter.context.failing_targets();
    info!(attempted, failed = ?failed, "pipeline finished");
    Ok(())
  })?;
  dsl::activate_final("summary")?;

  dsl::create_build_failure("report-failure", |parameter: &TargetParameter| {
    let failed = parameter.context.failing_targets();
    info!(failed = ?failed, "reporting pipeline failure");
    Ok(())
  })?;
  dsl::activate_build_failure("report-failure")?;

  dsl::add_dependency("codegen", "clean")?;
  dsl::add_dependency("build", "codegen")?;
  dsl::add_dependency("unit-test", "build")?;
  dsl::add_dependency("lint", "codegen")?;
  dsl::add_dependency("package", "unit-test")?;
  dsl::add_dependency("package", "lint")?;
  dsl::add_dependency("all", "package")?;

  Ok(())
}

fn step(name: &'static str) -> impl Fn(&TargetParameter) -> Result<()> + Send + Sync {
  move |parameter| {
    if let Some(ms) = std::env::var("SMELT_SLEEP_MS").ok().and_then(|value| value.parse().ok()) {
      std::thread::sleep(Duration::from_millis(ms));
    }
    if std::env::var("SMELT_FAIL").is_ok_and(|target| target.eq_ignore_ascii_case(name)) {
      anyhow::bail!("step '{name}' failed (forced by SMELT_FAIL)");
    }
    info!(step = name, args = ?parameter.context.arguments, "step complete");
    Ok(())
  }
}
