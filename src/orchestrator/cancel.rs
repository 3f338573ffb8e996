use std::sync::{Arc, OnceLock};
use tokio_util::sync::{CancellationToken, DropGuard};

const DEFAULT_REASON: &str = "cancelled";

/// Cooperative cancellation shared between a job and whoever may abandon it.
/// The first reason given wins, and it is readable as soon as a waiter wakes.
#[derive(Clone, Default)]
pub struct CancelToken {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| DEFAULT_REASON.to_string())
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Cancels with `reason` when the returned guard drops, unless disarmed first.
    pub fn cancel_on_drop(&self, reason: &'static str) -> CancelOnDrop {
        CancelOnDrop {
            reason: self.reason.clone(),
            text: reason,
            guard: Some(self.token.clone().drop_guard()),
        }
    }
}

pub struct CancelOnDrop {
    reason: Arc<OnceLock<String>>,
    text: &'static str,
    guard: Option<DropGuard>,
}

impl CancelOnDrop {
    pub fn disarm(mut self) {
        if let Some(guard) = self.guard.take() {
            let _ = guard.disarm();
        }
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        // The reason must be in place before the guard field drops and fires the token.
        if self.guard.is_some() {
            let _ = self.reason.set(self.text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn waiters_wake_and_first_reason_sticks() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        token.cancel("client went away");
        token.cancel("second reason");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), "client went away");
        token.cancelled().await;
    }

    #[tokio::test]
    async fn woken_waiter_always_sees_the_callers_reason() {
        for _ in 0..200 {
            let token = CancelToken::new();
            let waiter = {
                let token = token.clone();
                tokio::spawn(async move {
                    token.cancelled().await;
                    token.reason()
                })
            };
            let canceller = {
                let token = token.clone();
                tokio::spawn(async move { token.cancel("client disconnected") })
            };

            canceller.await.unwrap();
            assert_eq!(waiter.await.unwrap(), "client disconnected");
        }
    }

    #[test]
    fn drop_guard_fires_unless_disarmed() {
        let token = CancelToken::new();
        token.cancel_on_drop("request dropped").disarm();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), "cancelled");

        drop(token.cancel_on_drop("request dropped"));
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), "request dropped");
    }

    #[test]
    fn drop_guard_keeps_an_earlier_reason() {
        let token = CancelToken::new();
        let guard = token.cancel_on_drop("request dropped");
        token.cancel("job deadline exceeded");
        drop(guard);
        assert_eq!(token.reason(), "job deadline exceeded");
    }
}
