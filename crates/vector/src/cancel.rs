//! Caller-supplied deadlines and cancellation.
//!
//! Every network call of an index operation is raced against a
//! [`Cancellation`]. Losing the race drops the in-flight future, which
//! aborts the underlying HTTP request or releases the blocking task.

use docindex_core::{AppError, AppResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and/or cancel signal for one logical operation.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    deadline: Option<Instant>,
    signal: Option<watch::Receiver<bool>>,
}

/// Trigger side of a [`Cancellation`].
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // No receivers left means nothing is waiting; that is fine.
        let _ = self.sender.send(true);
    }
}

impl Cancellation {
    /// Never cancels.
    pub fn none() -> Self {
        Self::default()
    }

    /// Cancel once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            signal: None,
        }
    }

    /// A token cancelled through the returned handle.
    pub fn new_pair() -> (CancelHandle, Self) {
        let (sender, receiver) = watch::channel(false);
        (
            CancelHandle { sender },
            Self {
                deadline: None,
                signal: Some(receiver),
            },
        )
    }

    /// Add a deadline, keeping the earlier one if already set.
    pub fn and_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Remaining time before the deadline, if any.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        let expired = self.deadline.map(|d| Instant::now() >= d).unwrap_or(false);
        let signalled = self
            .signal
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false);
        expired || signalled
    }

    /// Fail fast if already cancelled.
    pub fn check(&self, what: &str) -> AppResult<()> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled(what.to_string()));
        }
        Ok(())
    }

    /// Run `fut` unless cancellation fires first.
    pub async fn run<T, F>(&self, what: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        self.check(what)?;

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(AppError::Cancelled(what.to_string())),
            result = fut => result,
        }
    }

    /// Resolves when the deadline passes or the signal fires.
    pub async fn cancelled(&self) {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let signal = async {
            match self.signal.clone() {
                Some(mut rx) => loop {
                    if *rx.borrow_and_update() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        // Handle dropped without cancelling.
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = deadline => {}
            _ = signal => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_none_never_cancels() {
        let cancel = Cancellation::none();
        let value = cancel.run("op", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_cancels_slow_future() {
        let cancel = Cancellation::with_timeout(Duration::from_millis(20));
        let result: AppResult<()> = cancel
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AppError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_handle_cancels() {
        let (handle, cancel) = Cancellation::new_pair();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel
                    .run("wait", async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(())
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(AppError::Cancelled(_))));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_expired_deadline_fails_before_running() {
        let cancel = Cancellation::none().and_deadline(Instant::now());
        let result = cancel.run("late", async { Ok(1) }).await;
        assert!(matches!(result, Err(AppError::Cancelled(_))));
    }

    #[test]
    fn test_and_deadline_keeps_earliest() {
        let now = Instant::now();
        let cancel = Cancellation::none()
            .and_deadline(now + Duration::from_secs(10))
            .and_deadline(now + Duration::from_secs(1));
        assert_eq!(cancel.deadline(), Some(now + Duration::from_secs(1)));
    }
}
