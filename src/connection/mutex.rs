//! Lock whose acquisition can be abandoned.
//!
//! Waiting for the read or write lock races three events: the lock becoming
//! free, the connection closing, and the caller's [`Cancel`] firing. A
//! cancelled wait on a connection-level lock is fatal to the connection, so
//! it closes the connection with the cancellation as cause.

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::cancel::Cancel;
use crate::error::{Error, Result};

/// What a [`Mu`] needs from the connection it belongs to.
pub(crate) trait Lifecycle {
    /// The fire-once closed signal.
    fn closed_signal(&self) -> &CancellationToken;

    /// Close the connection with `err` as cause (no-op if already closed).
    fn close_with(&self, err: Error);

    /// The error returned to operations attempted after close.
    fn closed_error(&self) -> Error;

    fn is_closed(&self) -> bool {
        self.closed_signal().is_cancelled()
    }
}

/// Cancellable mutex guarding `T`.
///
/// Releasing is dropping the guard, so a lock can never be released twice or
/// by someone who does not hold it.
#[derive(Debug)]
pub(crate) struct Mu<T> {
    slot: Mutex<T>,
}

impl<T> Mu<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            slot: Mutex::new(value),
        }
    }

    /// Take the lock if nobody holds it.
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.slot.try_lock().ok()
    }

    /// Wait for the lock regardless of cancellation or closure.
    ///
    /// Only for teardown, where the holder is known to be unwinding.
    pub(crate) async fn force_lock(&self) -> MutexGuard<'_, T> {
        self.slot.lock().await
    }

    /// Wait for the lock, giving up when `conn` closes or `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the connection closed first, including when the
    ///   lock was won at the same moment the connection closed
    /// - [`Error::Cancelled`] if `cancel` fired first; the connection is
    ///   closed with that error
    pub(crate) async fn lock<C>(&self, conn: &C, cancel: &Cancel) -> Result<MutexGuard<'_, T>>
    where
        C: Lifecycle + ?Sized,
    {
        tokio::select! {
            biased;
            () = conn.closed_signal().cancelled() => Err(conn.closed_error()),
            reason = cancel.fired() => {
                let err = Error::cancelled("acquire lock", reason);
                conn.close_with(err.clone());
                Err(err)
            }
            guard = self.slot.lock() => {
                // Winning the lock says nothing about whether the connection
                // is still alive.
                if conn.is_closed() {
                    drop(guard);
                    return Err(conn.closed_error());
                }
                Ok(guard)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeConn {
        closed: CancellationToken,
        cause: SyncMutex<Option<Error>>,
    }

    impl Lifecycle for FakeConn {
        fn closed_signal(&self) -> &CancellationToken {
            &self.closed
        }

        fn close_with(&self, err: Error) {
            let mut cause = self.cause.lock();
            if cause.is_none() {
                *cause = Some(err);
            }
            self.closed.cancel();
        }

        fn closed_error(&self) -> Error {
            let cause = self.cause.lock().clone().unwrap_or(Error::LocalClose);
            Error::Closed(Box::new(cause))
        }
    }

    /// Closed, but the closed signal has not been observed yet.
    #[derive(Default)]
    struct ClosingConn {
        closed: CancellationToken,
    }

    impl Lifecycle for ClosingConn {
        fn closed_signal(&self) -> &CancellationToken {
            &self.closed
        }

        fn close_with(&self, _err: Error) {}

        fn closed_error(&self) -> Error {
            Error::Closed(Box::new(Error::LocalClose))
        }

        fn is_closed(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_try_lock() {
        let mu = Mu::new(0u32);
        let guard = mu.try_lock().expect("lock is free");
        assert!(mu.try_lock().is_none());
        drop(guard);
        assert!(mu.try_lock().is_some());
    }

    #[tokio::test]
    async fn test_lock_when_open() {
        let conn = FakeConn::default();
        let mu = Mu::new(vec![1u8]);
        let mut guard = mu.lock(&conn, &Cancel::new()).await.unwrap();
        guard.push(2);
        drop(guard);
        assert_eq!(*mu.force_lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_lock_after_close_returns_closed_and_leaves_lock_free() {
        let conn = FakeConn::default();
        conn.close_with(Error::Dropped);

        let mu = Mu::new(());
        let err = mu.lock(&conn, &Cancel::new()).await.unwrap_err();
        assert_eq!(err, Error::Closed(Box::new(Error::Dropped)));
        assert!(mu.try_lock().is_some());
    }

    #[tokio::test]
    async fn test_lock_won_after_close_is_released() {
        let conn = ClosingConn::default();
        let mu = Mu::new(());

        let err = mu.lock(&conn, &Cancel::new()).await.unwrap_err();
        assert_eq!(err, Error::Closed(Box::new(Error::LocalClose)));
        assert!(!conn.closed.is_cancelled());
        assert!(mu.try_lock().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_closes_connection() {
        let conn = Arc::new(FakeConn::default());
        let mu = Arc::new(Mu::new(()));

        let held = mu.try_lock().unwrap();

        let cancel = Cancel::with_timeout(Duration::from_millis(20));
        let err = mu.lock(conn.as_ref(), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(conn.is_closed());

        // The holder's next acquisition observes the closure instead of
        // deadlocking behind itself.
        drop(held);
        let err = mu.lock(conn.as_ref(), &Cancel::new()).await.unwrap_err();
        assert!(err.is_closed());
        assert_eq!(
            err,
            Error::Closed(Box::new(Error::cancelled(
                "acquire lock",
                crate::cancel::CancelReason::DeadlineExceeded
            )))
        );
    }

    #[tokio::test]
    async fn test_waiter_released_when_connection_closes() {
        let conn = Arc::new(FakeConn::default());
        let mu = Arc::new(Mu::new(()));
        let held = mu.try_lock().unwrap();

        let waiter = {
            let (conn, mu) = (Arc::clone(&conn), Arc::clone(&mu));
            tokio::spawn(async move {
                let res = mu.lock(conn.as_ref(), &Cancel::new()).await.map(drop);
                res
            })
        };
        tokio::task::yield_now().await;

        conn.close_with(Error::LocalClose);
        drop(held);

        let res = waiter.await.unwrap();
        assert!(res.unwrap_err().is_closed());
        assert!(mu.try_lock().is_some());
    }
}
