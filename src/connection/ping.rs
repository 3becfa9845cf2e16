//! Correlates outgoing pings with the pongs that answer them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};

/// Outstanding pings keyed by payload.
#[derive(Debug, Default)]
pub(crate) struct PingTracker {
    counter: AtomicU64,
    active: Mutex<HashMap<Bytes, Arc<Notify>>>,
}

impl PingTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A payload no other ping from this tracker has used.
    pub(crate) fn next_payload(&self) -> Bytes {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Bytes::from(n.to_string())
    }

    /// Start waiting for a pong carrying `payload`.
    ///
    /// The entry lives until the returned registration is dropped.
    pub(crate) fn register(&self, payload: Bytes) -> Result<PingRegistration<'_>> {
        let pong = Arc::new(Notify::new());
        let mut active = self.active.lock();
        if active.contains_key(&payload) {
            return Err(Error::PingInFlight(payload));
        }
        active.insert(payload.clone(), Arc::clone(&pong));
        Ok(PingRegistration {
            tracker: self,
            payload,
            pong,
        })
    }

    /// Wake the ping waiting on `payload`. Returns whether one was waiting.
    pub(crate) fn resolve(&self, payload: &[u8]) -> bool {
        let pong = self.active.lock().get(payload).cloned();
        match pong {
            Some(pong) => {
                pong.notify_one();
                true
            }
            None => false,
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.active.lock().len()
    }
}

/// A registered ping. Removes itself from the tracker on drop.
#[derive(Debug)]
pub(crate) struct PingRegistration<'a> {
    tracker: &'a PingTracker,
    payload: Bytes,
    pong: Arc<Notify>,
}

impl PingRegistration<'_> {
    pub(crate) fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Resolves once the matching pong arrived, even if it arrived before
    /// this was first awaited.
    pub(crate) async fn pong(&self) {
        self.pong.notified().await;
    }
}

impl Drop for PingRegistration<'_> {
    fn drop(&mut self) {
        self.tracker.active.lock().remove(&self.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use proptest::prelude::*;

    #[test]
    fn test_payloads_strictly_increase() {
        let tracker = PingTracker::new();
        assert_eq!(tracker.next_payload(), Bytes::from_static(b"1"));
        assert_eq!(tracker.next_payload(), Bytes::from_static(b"2"));
    }

    #[test]
    fn test_pong_resolves_only_its_ping() {
        let tracker = PingTracker::new();
        let one = tracker.register(Bytes::from_static(b"1")).unwrap();
        let two = tracker.register(Bytes::from_static(b"2")).unwrap();

        assert!(tracker.resolve(b"1"));
        assert!(one.pong().now_or_never().is_some());
        assert!(two.pong().now_or_never().is_none());
    }

    #[test]
    fn test_unmatched_pong_is_ignored() {
        let tracker = PingTracker::new();
        assert!(!tracker.resolve(b"nobody"));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_registration_removed_on_drop() {
        let tracker = PingTracker::new();
        let reg = tracker.register(tracker.next_payload()).unwrap();
        assert_eq!(tracker.outstanding(), 1);
        drop(reg);
        assert_eq!(tracker.outstanding(), 0);
        assert!(!tracker.resolve(b"1"));
    }

    #[test]
    fn test_duplicate_payload_rejected() {
        let tracker = PingTracker::new();
        let _reg = tracker.register(Bytes::from_static(b"x")).unwrap();
        assert_eq!(
            tracker.register(Bytes::from_static(b"x")).unwrap_err(),
            Error::PingInFlight(Bytes::from_static(b"x"))
        );
    }

    proptest! {
        #[test]
        fn prop_resolve_wakes_exactly_one(count in 1usize..32, pick in any::<prop::sample::Index>()) {
            let tracker = PingTracker::new();
            let regs: Vec<_> = (0..count)
                .map(|_| tracker.register(tracker.next_payload()).unwrap())
                .collect();
            let target = pick.index(count);

            prop_assert!(tracker.resolve(regs[target].payload()));
            for (i, reg) in regs.iter().enumerate() {
                prop_assert_eq!(reg.pong().now_or_never().is_some(), i == target);
            }
        }
    }
}
