use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{Result, RetrainError};

/// Cooperative cancellation shared between a job's execution task and its controllers
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Stage-boundary check
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RetrainError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.check()?;
        let mut rx = self.rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            changed = rx.wait_for(|cancelled| *cancelled) => match changed {
                Ok(_) => Err(RetrainError::Cancelled),
                // Sender is owned by this token, so it cannot drop while we wait
                Err(_) => Ok(()),
            },
        }
    }

    /// Resolves once cancellation is signalled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancel() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_secs(3600)).await.is_ok());
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let started = tokio::time::Instant::now();

        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(48 * 3600)).await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(RetrainError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn test_check_after_cancel() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        token.cancel();
        assert!(matches!(token.check(), Err(RetrainError::Cancelled)));
    }
}
