//! Abstract trace channel.
//!
//! The engine reports target lifecycle events and the overall build state
//! through a [`Tracer`], so trace backends stay out of the core. The
//! default [`LogTracer`] emits structured `tracing` events.

use tracing::{debug, error, info, warn};

/// Overall outcome reported once at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
  Success,
  Failed,
}

/// Severity for [`Tracer::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Debug,
  Info,
  Warn,
  Error,
}

/// Scope handle covering one target execution.
///
/// Returned by [`Tracer::task_start`]; exactly one of the marks is called
/// before the scope is dropped.
pub trait TraceScope: Send {
  fn mark_success(&mut self);
  fn mark_failed(&mut self);
}

/// Abstract tracing capability the engine calls into.
pub trait Tracer: Send + Sync {
  /// Open a scope for one target execution.
  fn task_start(&self, name: &str, description: Option<&str>, dependencies: &str) -> Box<dyn TraceScope>;

  /// Severity-tagged free-form message.
  fn log(&self, severity: Severity, message: &str);

  /// Report the overall build outcome.
  fn build_state(&self, status: BuildStatus, message: Option<&str>);
}

/// Default tracer emitting structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

struct LogScope {
  name: String,
}

impl TraceScope for LogScope {
  fn mark_success(&mut self) {
    info!(task = %self.name, "target succeeded");
  }

  fn mark_failed(&mut self) {
    error!(task = %self.name, "target failed");
  }
}

impl Tracer for LogTracer {
  fn task_start(&self, name: &str, description: Option<&str>, dependencies: &str) -> Box<dyn TraceScope> {
    info!(
      task = %name,
      description = description.unwrap_or_default(),
      dependencies = %dependencies,
      "starting target"
    );
    Box::new(LogScope { name: name.to_string() })
  }

  fn log(&self, severity: Severity, message: &str) {
    match severity {
      Severity::Debug => debug!("{message}"),
      Severity::Info => info!("{message}"),
      Severity::Warn => warn!("{message}"),
      Severity::Error => error!("{message}"),
    }
  }

  fn build_state(&self, status: BuildStatus, message: Option<&str>) {
    match status {
      BuildStatus::Success => info!(detail = message.unwrap_or_default(), "build succeeded"),
      BuildStatus::Failed => error!(detail = message.unwrap_or_default(), "build failed"),
    }
  }
}

/// Test-only tracer capturing events for assertions.
#[cfg(test)]
pub(crate) mod testing {
  use std::sync::{Arc, Mutex};

  use super::*;

  #[derive(Default, Clone)]
  pub(crate) struct RecordingTracer {
    pub events: Arc<Mutex<Vec<String>>>,
  }

  struct RecordingScope {
    name: String,
    events: Arc<Mutex<Vec<String>>>,
  }

  impl TraceScope for RecordingScope {
    fn mark_success(&mut self) {
      self.events.lock().unwrap().push(format!("success:{}", self.name));
    }

    fn mark_failed(&mut self) {
      self.events.lock().unwrap().push(format!("failed:{}", self.name));
    }
  }

  impl Tracer for RecordingTracer {
    fn task_start(&self, name: &str, _description: Option<&str>, _dependencies: &str) -> Box<dyn TraceScope> {
      self.events.lock().unwrap().push(format!("start:{name}"));
      Box::new(RecordingScope {
        name: name.to_string(),
        events: Arc::clone(&self.events),
      })
    }

    fn log(&self, _severity: Severity, message: &str) {
      self.events.lock().unwrap().push(format!("log:{message}"));
    }

    fn build_state(&self, status: BuildStatus, _message: Option<&str>) {
      self.events.lock().unwrap().push(format!("state:{status:?}"));
    }
  }
}
