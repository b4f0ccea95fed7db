//! Background expiration sweeper
//!
//! One long-lived task per service. Each pass examines a bounded slice of
//! the keyspace inside a single storage transaction, deletes stale entries
//! and then sleeps for a delay proportional to the slice's share of the
//! keyspace, clamped to one second. Cancellation is observed only at the
//! sleep boundary, so a pass's transaction always resolves before exit.
//!
//! Any backend error stops the task; reclamation restarts only through the
//! service lifecycle. A backend that is failing should not be hammered by a
//! retry loop nobody is watching.

use crate::StorageError;
use crate::service::Service;
use crate::storage::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Handle to a running sweeper task.
pub struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweeper for a service.
    pub fn start(service: Arc<Service>) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(service, cancel.clone()));
        Self { cancel, handle }
    }

    /// Request cancellation without waiting for the task to exit.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// How a bounded pass ended.
#[derive(Debug, PartialEq, Eq)]
enum PassOutcome {
    /// Batch limit reached; the cursor still has entries
    Completed,
    /// Keyspace exhausted; the next pass needs a fresh cursor
    Exhausted,
}

async fn run(service: Arc<Service>, cancel: CancellationToken) {
    info!(service = %service.name(), "expiration sweeper started");

    let mut cursor: Option<Box<dyn Cursor + Send>> = None;
    loop {
        let cur = match &mut cursor {
            Some(c) => c,
            None => match service.backend().cursor() {
                Ok(c) => cursor.insert(c),
                Err(e) => {
                    error!(service = %service.name(), "failed to open keyspace cursor: {e}");
                    break;
                }
            },
        };

        match sweep_pass(&service, cur) {
            Ok(PassOutcome::Exhausted) => {
                // the keyspace may have changed shape; restart, don't resume
                cursor = None;
            }
            Ok(PassOutcome::Completed) => {}
            Err(e) => {
                error!(service = %service.name(), "sweep pass failed, stopping sweeper: {e}");
                break;
            }
        }

        let delay = match service.backend().entry_count() {
            Ok(n) => pace_delay(service.expire_count(), service.expire_time(), n),
            Err(e) => {
                error!(service = %service.name(), "keyspace size query failed: {e}");
                break;
            }
        };
        debug!(service = %service.name(), ?delay, "sweep pass done");

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    info!(service = %service.name(), "expiration sweeper stopped");
}

/// One bounded pass: up to `expire_count` entries examined, stale ones
/// deleted, all inside a single transaction. Any failure rolls the whole
/// batch back.
fn sweep_pass(
    service: &Service,
    cursor: &mut Box<dyn Cursor + Send>,
) -> Result<PassOutcome, StorageError> {
    let backend = service.backend();
    let mut txn = backend.begin()?;

    for _ in 0..service.expire_count() {
        match cursor.next_entry() {
            Err(e) => {
                let _ = txn.rollback();
                return Err(e);
            }
            Ok(None) => {
                txn.commit()?;
                return Ok(PassOutcome::Exhausted);
            }
            Ok(Some(entry)) => {
                if service.is_stale(&entry.value) {
                    if let Err(e) = txn.delete(&entry.key) {
                        let _ = txn.rollback();
                        return Err(e);
                    }
                    service.stats().evicted();
                }
            }
        }
    }

    txn.commit()?;
    Ok(PassOutcome::Completed)
}

/// Inter-pass delay: the fraction of the keyspace one batch represents,
/// scaled by the target full-sweep time and clamped to one second. Large
/// keyspaces pause less between passes, small ones avoid busy-looping.
fn pace_delay(expire_count: u32, expire_time: u32, keyspace_len: u64) -> Duration {
    let secs = (f64::from(expire_count) * f64::from(expire_time)) / (keyspace_len as f64 + 1.0);
    Duration::from_secs_f64(secs.min(1.0))
}
