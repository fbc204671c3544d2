//! Cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A clonable cancellation flag shared between the interrupt handler, the
/// runner and target bodies.
///
/// Cancellation is cooperative: the engine checks the token at target
/// boundaries and never preempts a running body. Bodies receive the token
/// through their `TargetParameter` and may short-circuit long operations on
/// it themselves.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
  inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
  cancelled: AtomicBool,
  notify: Notify,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// Request cancellation and wake every waiter. Idempotent.
  pub fn cancel(&self) {
    self.inner.cancelled.store(true, Ordering::SeqCst);
    self.inner.notify.notify_waiters();
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.cancelled.load(Ordering::SeqCst)
  }

  /// Resolves once [`cancel`](Self::cancel) has been called.
  pub async fn cancelled(&self) {
    loop {
      // Register interest before checking the flag to avoid a missed wakeup.
      let notified = self.inner.notify.notified();
      if self.is_cancelled() {
        return;
      }
      notified.await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn starts_uncancelled() {
    let token = CancellationToken::new();
    assert!(!token.is_cancelled());
  }

  #[test]
  fn cancel_is_visible_to_clones() {
    let token = CancellationToken::new();
    let clone = token.clone();
    token.cancel();
    assert!(clone.is_cancelled());
  }

  #[tokio::test]
  async fn cancelled_future_resolves() {
    let token = CancellationToken::new();
    let waiter = token.clone();
    let handle = tokio::spawn(async move { waiter.cancelled().await });

    token.cancel();
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn cancelled_resolves_when_already_cancelled() {
    let token = CancellationToken::new();
    token.cancel();
    token.cancelled().await;
  }
}
