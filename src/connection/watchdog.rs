//! Background task enforcing read and write deadlines.
//!
//! Readers and writers publish their current [`Cancel`] on a watch channel
//! for as long as they are inside the transport. When a write deadline fires
//! the connection closes. When a read deadline fires the peer is sent a
//! policy violation close frame and the connection stays open, so the
//! pending read can still receive the peer's close frame. If the peer never
//! answers within [`Config::read_timeout_grace`] the connection is closed
//! anyway.
//!
//! [`Config::read_timeout_grace`]: crate::Config::read_timeout_grace

use std::future::pending;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use super::connection::Shared;
use crate::cancel::{Cancel, CancelReason};
use crate::error::Error;
use crate::message::CloseCode;

pub(super) type DeadlineRx = watch::Receiver<Option<Cancel>>;

pub(super) async fn run(shared: Arc<Shared>, mut read_rx: DeadlineRx, mut write_rx: DeadlineRx) {
    let mut read_deadline: Option<Cancel> = None;
    let mut write_deadline: Option<Cancel> = None;
    let mut grace: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            () = shared.closed.cancelled() => return,
            changed = write_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                write_deadline = (*write_rx.borrow_and_update()).clone();
            }
            changed = read_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                read_deadline = (*read_rx.borrow_and_update()).clone();
            }
            reason = expiry(write_deadline.as_ref()) => {
                warn!(role = %shared.config.role, %reason, "write timed out, closing connection");
                shared.close(Some(Error::WriteTimeout(reason)));
                return;
            }
            reason = expiry(read_deadline.as_ref()) => {
                read_deadline = None;
                warn!(role = %shared.config.role, %reason, "read timed out, sending close frame");
                read_timed_out(&shared, reason);
                // Armed once. Later timeouts must not push the forced close back.
                if grace.is_none() {
                    grace = shared.config.read_timeout_grace.map(|g| Instant::now() + g);
                }
            }
            () = until(grace) => {
                debug!("peer did not finish closing after read timeout");
                shared.close(Some(Error::ReadTimeout(CancelReason::DeadlineExceeded)));
                return;
            }
        }
    }
}

fn read_timed_out(shared: &Arc<Shared>, reason: CancelReason) {
    let err = Error::ReadTimeout(reason);
    shared.set_close_err(err.clone());

    let notifier = Arc::clone(shared);
    shared.spawn(async move {
        notifier.write_error(CloseCode::PolicyViolation, err).await;
    });
}

async fn expiry(cancel: Option<&Cancel>) -> CancelReason {
    match cancel {
        Some(cancel) => cancel.fired().await,
        None => pending().await,
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
