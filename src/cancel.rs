//! Caller-supplied cancellation and deadlines.
//!
//! A [`Cancel`] governs one call (or a group of calls sharing a clone). It
//! fires either when [`Cancel::cancel`] is called or when its deadline
//! passes, whichever happens first.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`Cancel`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The deadline passed.
    DeadlineExceeded,
    /// [`Cancel::cancel`] was called.
    Cancelled,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
            CancelReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Cancellation signal with an optional deadline.
///
/// Clones share the same token, so cancelling one cancels all of them.
///
/// ## Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use wsconn::Cancel;
///
/// let cancel = Cancel::with_timeout(Duration::from_secs(5));
/// conn.ping(&cancel).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Cancel {
    /// A cancellation without deadline. Fires only when cancelled explicitly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Fires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derive a cancellation that also fires when `self` fires, bounded by
    /// `timeout` from now.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let bound = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < bound => parent,
            _ => bound,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Fire this cancellation and every clone and child of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The reason this cancellation has fired, or `None` if it has not.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            Some(CancelReason::Cancelled)
        } else if self.deadline.is_some_and(|d| d <= Instant::now()) {
            Some(CancelReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Wait until this cancellation fires.
    pub async fn fired(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.token.cancelled() => CancelReason::Cancelled,
                () = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                CancelReason::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let cancel = Cancel::with_timeout(Duration::from_millis(50));
        assert_eq!(cancel.reason(), None);
        assert_eq!(cancel.fired().await, CancelReason::DeadlineExceeded);
        assert_eq!(cancel.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_explicit_cancel_wins() {
        let cancel = Cancel::with_timeout(Duration::from_secs(60));
        let clone = cancel.clone();
        clone.cancel();
        assert_eq!(cancel.fired().await, CancelReason::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_parent_deadline() {
        let parent = Cancel::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(5));
        assert_eq!(child.deadline(), parent.deadline());

        let child = Cancel::new().child_with_timeout(Duration::from_secs(5));
        assert!(child.deadline().is_some());
    }

    #[tokio::test]
    async fn test_child_follows_parent_cancel() {
        let parent = Cancel::new();
        let child = parent.child_with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert_eq!(child.fired().await, CancelReason::Cancelled);
    }
}
