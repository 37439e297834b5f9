use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cooperative cancellation shared by the caller and a running orchestration.
///
/// Cloning yields a handle to the same token. The orchestrator polls it at
/// the start of each wave and before each dispatch, and races retry delays
/// against it; in-flight agent calls are never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. The first reason given is kept.
    pub fn cancel(&self, reason: Option<String>) {
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                *slot = reason;
            }
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Resolves once cancellation has been signalled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_keeps_first_reason() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel(Some("user stop".into()));
        token.cancel(Some("second".into()));
        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("user stop"));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let handle = token.clone();
        handle.cancel(None);
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), None);
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancelToken::new();
        let handle = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            handle.cancel(Some("late".into()));
        });
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
        assert_eq!(token.reason().as_deref(), Some("late"));
    }
}
