//! Cancellation and deadline handling for calls into external stores.

use crate::utils::errors::{EngineError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default per-call deadline when the caller does not supply one.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Caller-supplied cancellation token plus the deadline applied to every
/// individual store call made on the caller's behalf.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    timeout: Duration,
}

impl CallContext {
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self { cancel, timeout }
    }

    /// Context with a fresh token and the given per-call deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(CancellationToken::new(), timeout)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one store call, returning `Cancelled` or `Timeout` instead of
    /// waiting past the token or the deadline.
    pub async fn run<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled(what.to_string()));
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled(what.to_string())),
            res = tokio::time::timeout(self.timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::Timeout {
                    what: what.to_string(),
                    after: self.timeout,
                }),
            },
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_CALL_TIMEOUT)
    }
}
