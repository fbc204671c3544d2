//! Declarative surface over a process-wide default engine.
//!
//! Build programs that do not need to manage an [`Engine`] value themselves
//! declare targets through these free functions and finish with one of the
//! run entry points:
//!
//! ```no_run
//! use smelt_lib::dsl;
//!
//! fn main() -> anyhow::Result<()> {
//!   dsl::describe("Compile the project")?;
//!   dsl::create("build", |_| Ok(()))?;
//!   dsl::create("test", |_| Ok(()))?;
//!   dsl::add_dependency("test", "build")?;
//!   dsl::run_or_default("test")?;
//!   Ok(())
//! }
//! ```
//!
//! The default engine is created lazily on first use. Declaration is
//! single-threaded by contract; the run entry points snapshot the engine
//! out of the lock before executing, so target bodies never observe it.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use crate::cli::{self, CliOutcome};
use crate::registry::{DeclarationError, Engine};
use crate::run::{RunError, TargetParameter};

static DEFAULT_ENGINE: OnceLock<Mutex<Engine>> = OnceLock::new();

fn default_engine() -> MutexGuard<'static, Engine> {
  DEFAULT_ENGINE
    .get_or_init(|| Mutex::new(Engine::new()))
    .lock()
    .unwrap_or_else(PoisonError::into_inner)
}

/// Arm a description for the next `create` call.
pub fn describe(text: impl Into<String>) -> Result<(), DeclarationError> {
  default_engine().describe(text)
}

/// Register a target.
pub fn create<F>(name: &str, body: F) -> Result<(), DeclarationError>
where
  F: Fn(&TargetParameter) -> anyhow::Result<()> + Send + Sync + 'static,
{
  default_engine().create(name, body)
}

/// Register an (inactive) final target.
pub fn create_final<F>(name: &str, body: F) -> Result<(), DeclarationError>
where
  F: Fn(&TargetParameter) -> anyhow::Result<()> + Send + Sync + 'static,
{
  default_engine().create_final(name, body)
}

/// Register an (inactive) build-failure target.
pub fn create_build_failure<F>(name: &str, body: F) -> Result<(), DeclarationError>
where
  F: Fn(&TargetParameter) -> anyhow::Result<()> + Send + Sync + 'static,
{
  default_engine().create_build_failure(name, body)
}

pub fn activate_final(name: &str) -> Result<(), DeclarationError> {
  default_engine().activate_final(name)
}

pub fn deactivate_final(name: &str) -> Result<(), DeclarationError> {
  default_engine().deactivate_final(name)
}

pub fn activate_build_failure(name: &str) -> Result<(), DeclarationError> {
  default_engine().activate_build_failure(name)
}

pub fn deactivate_build_failure(name: &str) -> Result<(), DeclarationError> {
  default_engine().deactivate_build_failure(name)
}

/// Record a hard dependency: `dependency` runs before `target`.
pub fn add_dependency(target: &str, dependency: &str) -> Result<(), DeclarationError> {
  default_engine().add_dependency(target, dependency)
}

/// Record a soft dependency: `dependency` runs before `target` only when it
/// is scheduled anyway.
pub fn add_soft_dependency(target: &str, dependency: &str) -> Result<(), DeclarationError> {
  default_engine().add_soft_dependency(target, dependency)
}

/// A read-only snapshot of the default engine.
pub fn snapshot() -> Engine {
  default_engine().clone()
}

/// Clear the default engine. Primarily for test harnesses.
pub fn reset() {
  default_engine().reset();
}

/// Parse the process arguments and run, falling back to `default_target`.
pub fn run_or_default(default_target: &str) -> Result<CliOutcome, RunError> {
  cli::run_or_default(&snapshot(), default_target)
}

/// Like [`run_or_default`], forwarding script arguments to target bodies.
pub fn run_or_default_with_args(default_target: &str) -> Result<CliOutcome, RunError> {
  cli::run_or_default_with_args(&snapshot(), default_target)
}

/// Parse the process arguments and run; with no target selected, list the
/// declared targets instead.
pub fn run_or_list() -> Result<CliOutcome, RunError> {
  cli::run_or_list(&snapshot())
}
