//! Report writer: running order, target list and the timing summary.
//!
//! All output goes to stdout and is colored only when the stream supports
//! it.

use std::time::Duration;

use owo_colors::{OwoColorize, Stream};

use crate::graph::ExecutionPlan;
use crate::registry::Engine;
use crate::run::types::{TargetContext, TargetError, TargetResult};

const RULE: &str = "---------------------------------------------------------------------";

/// Print the layered running order before execution starts.
pub(crate) fn print_running_order(plan: &ExecutionPlan) {
  println!();
  println!(
    "{}",
    "Running order".if_supports_color(Stream::Stdout, |text| text.bold())
  );
  for (index, layer) in plan.layers().iter().enumerate() {
    let names: Vec<&str> = layer.iter().map(|target| target.name.as_str()).collect();
    println!("  Group {}: {}", index + 1, names.join(", "));
  }
  println!();
}

/// Print every declared target with its description (`--list`).
pub fn print_target_list(engine: &Engine) {
  println!("The following targets are available:");
  for target in engine.targets_sorted() {
    match &target.description {
      Some(description) => println!("  {:<24} {}", target.name, description),
      None => println!("  {}", target.name),
    }
  }
}

/// Print the per-target time/status table and the overall status line.
pub(crate) fn print_summary(ctx: &TargetContext, total: Duration) {
  println!();
  println!("{RULE}");
  println!("Build time report");
  println!("{RULE}");
  println!("{:<28} {:>10}   {}", "Target", "Duration", "Status");
  println!("{:<28} {:>10}   {}", "------", "--------", "------");

  for result in &ctx.previous_targets {
    print_result_row(result);
  }

  println!("{:<28} {:>10}", "Total:", format_duration(total));
  if ctx.has_error() {
    println!(
      "Status: {}",
      "Failure".if_supports_color(Stream::Stdout, |text| text.red())
    );
  } else {
    println!("Status: {}", "Ok".if_supports_color(Stream::Stdout, |text| text.green()));
  }
  println!("{RULE}");
}

fn print_result_row(result: &TargetResult) {
  let status = status_word(result);
  println!(
    "{:<28} {:>10}   {}",
    result.target.name,
    format_duration(result.duration),
    status
  );
  if let Some(TargetError::Failed { message, .. }) = &result.error {
    println!(
      "{:<28} {:>10}   {}",
      "",
      "",
      message.if_supports_color(Stream::Stdout, |text| text.red())
    );
  }
}

fn status_word(result: &TargetResult) -> &'static str {
  match (&result.error, result.was_skipped) {
    (Some(TargetError::Cancelled), _) => "cancelled",
    (Some(TargetError::Failed { .. }), _) => "failed",
    (None, true) => "skipped",
    (None, false) => "ok",
  }
}

/// Human-readable duration: `12ms`, `1.25s`, `2m 3s`.
pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}
