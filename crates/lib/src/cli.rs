//! Command-line front end for build programs.
//!
//! A build program's own arguments select the target, parallelism and mode;
//! everything after `--` belongs to the script and is forwarded to target
//! bodies. Grammar:
//!
//! ```text
//! <program> run [opts] [target <name>] [--] [<script args>...]
//! ```
//!
//! Target selection precedence: positional `target <name>`, then
//! `--target`, then the `target` environment variable, then the default the
//! build program supplied, and finally list mode when nothing matched.

use std::ffi::OsString;

use clap::{CommandFactory, Parser, error::ErrorKind};
use tracing::warn;

use crate::registry::Engine;
use crate::report;
use crate::run::{self, RunError, RunOptions, TargetContext};

/// Environment variable consulted when no target is given on the command line.
pub const TARGET_ENV: &str = "target";
/// Environment variable holding the default worker count.
pub const PARALLEL_JOBS_ENV: &str = "parallel-jobs";
/// Presence of this variable enables single-target mode.
pub const SINGLE_TARGET_ENV: &str = "single-target";

#[derive(Debug, Parser)]
#[command(name = "run", version, about = "Run a build target and its transitive dependencies")]
struct EngineArgs {
  /// Print all declared targets with their descriptions, then exit.
  #[arg(long)]
  list: bool,

  /// Target to run.
  #[arg(short, long, value_name = "NAME")]
  target: Option<String>,

  /// Set an environment variable before the run. Repeatable.
  #[arg(short = 'e', long = "environment-variable", value_name = "KEY=VALUE")]
  environment_variables: Vec<String>,

  /// Execute only the chosen target, skipping its transitive dependencies.
  #[arg(short, long)]
  single_target: bool,

  /// Number of parallel workers.
  #[arg(short, long, value_name = "N")]
  parallel: Option<usize>,

  /// Positional selection: an optional leading `run` verb, then `target <name>`.
  #[arg(value_name = "COMMAND")]
  command: Vec<String>,

  /// Arguments after `--`, forwarded to target bodies.
  #[arg(last = true, value_name = "SCRIPT_ARGS")]
  script_args: Vec<String>,
}

/// A parsed engine command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub list: bool,
  pub target: Option<String>,
  pub environment_variables: Vec<(String, String)>,
  pub single_target: bool,
  pub parallel: Option<usize>,
  pub script_args: Vec<String>,
}

impl Invocation {
  /// Parse an explicit argument list; the first element is the program name.
  ///
  /// Usage errors carry both the parser message and the full usage banner.
  pub fn parse_from<I, T>(args: I) -> Result<Self, clap::Error>
  where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
  {
    Self::from_engine_args(EngineArgs::try_parse_from(args)?)
  }

  fn from_engine_args(args: EngineArgs) -> Result<Self, clap::Error> {
    let mut positionals: &[String] = &args.command;
    if positionals.first().is_some_and(|word| word == "run") {
      positionals = &positionals[1..];
    }

    let positional_target = match positionals {
      [] => None,
      [word, name] if word == "target" => Some(name.clone()),
      other => {
        return Err(EngineArgs::command().error(
          ErrorKind::UnknownArgument,
          format!("unexpected positional arguments {other:?}; expected `target <name>`"),
        ));
      }
    };

    let target = match (positional_target, args.target) {
      (Some(positional), Some(flag)) => {
        warn!(positional = %positional, flag = %flag, "both positional target and --target given; positional wins");
        Some(positional)
      }
      (Some(positional), None) => Some(positional),
      (None, flag) => flag,
    };

    let mut environment_variables = Vec::with_capacity(args.environment_variables.len());
    for pair in &args.environment_variables {
      let Some((key, value)) = pair.split_once('=') else {
        return Err(EngineArgs::command().error(
          ErrorKind::InvalidValue,
          format!("invalid environment variable '{pair}'; expected KEY=VALUE"),
        ));
      };
      environment_variables.push((key.to_string(), value.to_string()));
    }

    Ok(Self {
      list: args.list,
      target,
      environment_variables,
      single_target: args.single_target,
      parallel: args.parallel,
      script_args: args.script_args,
    })
  }

  /// Chosen target after environment and default fallbacks.
  pub fn resolved_target(&self, default_target: Option<&str>) -> Option<String> {
    self
      .target
      .clone()
      .or_else(|| std::env::var(TARGET_ENV).ok().filter(|name| !name.is_empty()))
      .or_else(|| default_target.map(str::to_string))
  }

  /// Worker count after the `parallel-jobs` fallback; at least 1.
  pub fn resolved_parallelism(&self) -> usize {
    self
      .parallel
      .or_else(|| std::env::var(PARALLEL_JOBS_ENV).ok().and_then(|value| value.parse().ok()))
      .unwrap_or(1)
      .max(1)
  }

  /// Single-target mode from the flag or the `single-target` variable.
  pub fn resolved_single_target(&self) -> bool {
    self.single_target || std::env::var(SINGLE_TARGET_ENV).is_ok()
  }

  /// Apply `-e KEY=VALUE` overrides to the process environment.
  pub fn apply_environment(&self) {
    for (key, value) in &self.environment_variables {
      // CLI handling happens single-threaded, before any worker starts.
      unsafe { std::env::set_var(key, value) };
    }
  }
}

/// Outcome of a CLI-driven entry point.
#[derive(Debug)]
pub enum CliOutcome {
  /// A run happened; the final context is attached.
  Ran(TargetContext),
  /// Targets were listed instead of run.
  Listed,
}

/// Parse the process arguments and run, falling back to `default_target`.
///
/// Script arguments after `--` are accepted but not forwarded; see
/// [`run_or_default_with_args`].
pub fn run_or_default(engine: &Engine, default_target: &str) -> Result<CliOutcome, RunError> {
  execute(engine, std::env::args_os(), Some(default_target), false)
}

/// Like [`run_or_default`], forwarding script arguments to target bodies.
pub fn run_or_default_with_args(engine: &Engine, default_target: &str) -> Result<CliOutcome, RunError> {
  execute(engine, std::env::args_os(), Some(default_target), true)
}

/// Parse the process arguments and run; with no target selected, list the
/// declared targets instead.
pub fn run_or_list(engine: &Engine) -> Result<CliOutcome, RunError> {
  execute(engine, std::env::args_os(), None, true)
}

fn execute<I, T>(
  engine: &Engine,
  args: I,
  default_target: Option<&str>,
  forward_arguments: bool,
) -> Result<CliOutcome, RunError>
where
  I: IntoIterator<Item = T>,
  T: Into<OsString> + Clone,
{
  let invocation = match Invocation::parse_from(args) {
    Ok(invocation) => invocation,
    // Prints help/version or the usage banner and exits with clap's code.
    Err(err) => err.exit(),
  };

  invocation.apply_environment();

  if invocation.list {
    report::print_target_list(engine);
    return Ok(CliOutcome::Listed);
  }

  let Some(target) = invocation.resolved_target(default_target) else {
    report::print_target_list(engine);
    return Ok(CliOutcome::Listed);
  };

  let options = RunOptions {
    parallelism: invocation.resolved_parallelism(),
    single_target: invocation.resolved_single_target(),
    arguments: if forward_arguments {
      invocation.script_args.clone()
    } else {
      Vec::new()
    },
    ..RunOptions::default()
  };

  let ctx = run::run_blocking(engine, &target, options)?;
  Ok(CliOutcome::Ran(ctx))
}
