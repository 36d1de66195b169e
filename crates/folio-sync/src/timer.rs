//! Cancellable one-shot scheduled tasks.

use std::future::Future;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A future that runs at `deadline` unless cancelled first.
///
/// Dropping the handle cancels the task. Once the deadline has passed and the
/// future has started, cancellation no longer interrupts it.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
}

impl ScheduledTask {
    /// Spawn `task` onto the current tokio runtime, to run at `deadline`.
    pub fn spawn<F>(deadline: Instant, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => task.await,
            }
        });
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
