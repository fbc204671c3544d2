//! Interrupt handling.
//!
//! The first Ctrl-C cancels the active run gracefully and reaps tracked
//! child processes; a second Ctrl-C terminates the process with exit code
//! 1. Targets already running are never preempted; the runner checks the
//! cancellation token at target boundaries and final targets ignore it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::warn;

use crate::cancel::CancellationToken;
use crate::process;

static INSTALLED: AtomicBool = AtomicBool::new(false);
static ACTIVE_TOKEN: OnceLock<Mutex<CancellationToken>> = OnceLock::new();

fn active_token() -> &'static Mutex<CancellationToken> {
  ACTIVE_TOKEN.get_or_init(|| Mutex::new(CancellationToken::new()))
}

/// Install the interrupt hook for the given run token.
///
/// Must be called from within a tokio runtime. The signal task is spawned
/// once per process; later calls only swap in the current run's token.
pub fn install(token: CancellationToken) {
  *active_token().lock().unwrap_or_else(PoisonError::into_inner) = token;

  if INSTALLED.swap(true, Ordering::SeqCst) {
    return;
  }

  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_err() {
      return;
    }
    eprintln!("Gracefully shutting down...");
    eprintln!("Press Ctrl+C again to force quit");
    warn!("interrupt received, cancelling run");

    process::registry().kill_all();
    active_token()
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
      std::process::exit(1);
    }
  });
}
