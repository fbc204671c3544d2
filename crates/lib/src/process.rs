//! Tracked child processes.
//!
//! Target bodies launch commands through [`ProcessRegistry::run`] (or the
//! process-wide [`run_process`]) so that a graceful interrupt can terminate
//! everything the build has spawned. Each running child holds a kill
//! handle in the registry; [`ProcessRegistry::kill_all`] fires them all.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Errors from running a tracked child process.
#[derive(Debug, Error)]
pub enum ProcessError {
  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{program} exited with code {code:?}")]
  Failed { program: String, code: Option<i32> },

  #[error("io error while waiting for {program}: {source}")]
  Wait {
    program: String,
    #[source]
    source: std::io::Error,
  },
}

/// Registry of running children with a kill handle per entry.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
  next_id: Arc<AtomicU64>,
  kill_handles: Arc<Mutex<HashMap<u64, oneshot::Sender<()>>>>,
}

impl ProcessRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Spawn `program` with `args`, track it until it exits, and fail on a
  /// non-zero exit status.
  pub async fn run<I, S>(&self, program: &str, args: I) -> Result<(), ProcessError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    let mut child = Command::new(program)
      .args(args)
      .spawn()
      .map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
      })?;

    let (kill_tx, mut kill_rx) = oneshot::channel();
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self.lock_handles().insert(id, kill_tx);
    debug!(program, id, "child process started");

    let status = tokio::select! {
      status = child.wait() => status,
      _ = &mut kill_rx => {
        warn!(program, id, "terminating child process");
        // The child may already have exited on its own.
        let _ = child.start_kill();
        child.wait().await
      }
    };

    self.lock_handles().remove(&id);

    let status = status.map_err(|source| ProcessError::Wait {
      program: program.to_string(),
      source,
    })?;

    if !status.success() {
      return Err(ProcessError::Failed {
        program: program.to_string(),
        code: status.code(),
      });
    }
    Ok(())
  }

  /// Fire the kill handle of every tracked child.
  pub fn kill_all(&self) {
    let mut handles = self.lock_handles();
    if handles.is_empty() {
      return;
    }
    warn!(count = handles.len(), "killing tracked child processes");
    for (_, kill) in handles.drain() {
      let _ = kill.send(());
    }
  }

  /// Number of currently tracked children.
  pub fn tracked(&self) -> usize {
    self.lock_handles().len()
  }

  fn lock_handles(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<()>>> {
    self.kill_handles.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

static REGISTRY: OnceLock<ProcessRegistry> = OnceLock::new();

/// The process-wide registry used by the interrupt handler.
pub fn registry() -> &'static ProcessRegistry {
  REGISTRY.get_or_init(ProcessRegistry::new)
}

/// Run a command through the process-wide registry.
pub async fn run_process<I, S>(program: &str, args: I) -> Result<(), ProcessError>
where
  I: IntoIterator<Item = S>,
  S: AsRef<OsStr>,
{
  registry().run(program, args).await
}
