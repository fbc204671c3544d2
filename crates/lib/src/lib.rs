//! smelt-lib: a target-graph build-automation engine.
//!
//! A build program declares named targets bound to ordinary Rust closures
//! and records hard (must run before) and soft (must run before, if
//! scheduled anyway) dependencies between them. The engine keeps the graph
//! acyclic at declaration time, computes a layered running order, executes
//! the chosen target's transitive closure sequentially or with N workers,
//! runs build-failure and final lifecycle targets, and prints a timing
//! report. Cancellation is cooperative: the first interrupt lets running
//! targets finish and skips the rest, a second one force-quits.
//!
//! The [`dsl`] module is the usual entry point:
//!
//! ```no_run
//! use smelt_lib::dsl;
//!
//! fn main() -> anyhow::Result<()> {
//!   dsl::create("compile", |_| Ok(()))?;
//!   dsl::create("test", |_| Ok(()))?;
//!   dsl::add_dependency("test", "compile")?;
//!   dsl::run_or_default("test")?;
//!   Ok(())
//! }
//! ```

pub mod cancel;
pub mod cli;
pub mod dsl;
pub mod graph;
pub mod interrupt;
pub mod process;
pub mod registry;
pub mod report;
pub mod run;
pub mod target;
pub mod trace;

pub use cancel::CancellationToken;
pub use cli::{CliOutcome, Invocation};
pub use graph::{ExecutionPlan, GraphError};
pub use registry::{DeclarationError, Engine};
pub use run::{RunError, RunOptions, TargetContext, TargetError, TargetParameter, TargetResult};
pub use target::{DependencyKind, Target};
pub use trace::{BuildStatus, Severity, TraceScope, Tracer};
