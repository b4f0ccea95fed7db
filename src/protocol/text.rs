//! Text protocol handler
//!
//! Implements the [`ProtocolHandler`] capability set for the ASCII protocol:
//! parse outcomes are translated into the connection's request-length and
//! flag state, and staged commands execute against the owning service's
//! storage backend.

use crate::conn::Connection;
use crate::error::{ProtocolError, SlateError};
use crate::protocol::command::{Command, StoreOp};
use crate::protocol::parser::{ParseResult, parse};
use crate::protocol::{ParseStep, ProtocolHandler};
use crate::service::Service;
use crate::storage::StoredValue;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::debug;

const VERSION: &str = concat!("slatecache ", env!("CARGO_PKG_VERSION"));

/// ASCII protocol handler; one per connection.
#[derive(Default)]
pub struct TextProtocol {
    /// Command staged by `parse_request`, consumed by `process_request`
    staged: Option<Command>,
}

impl TextProtocol {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProtocolHandler for TextProtocol {
    fn parse_request(&mut self, conn: &mut Connection) -> crate::Result<ParseStep> {
        match parse(conn.input()) {
            ParseResult::Complete(cmd, consumed) => {
                conn.set_request_len(consumed);
                conn.set_noreply(cmd.is_noreply());
                self.staged = Some(cmd);
                Ok(ParseStep::Ready)
            }
            ParseResult::Partial(need) => Ok(ParseStep::More(need)),
            ParseResult::Error(err, drain) => {
                if err.is_fatal() {
                    // framing is gone, nothing to drain or answer
                    conn.set_request_len(0);
                    conn.request_close();
                } else {
                    conn.set_request_len(drain);
                    conn.set_noprocess(true);
                }
                Err(err.into())
            }
        }
    }

    fn process_request(&mut self, conn: &mut Connection) -> crate::Result<()> {
        let cmd = self
            .staged
            .take()
            .ok_or_else(|| SlateError::Config("process without a staged request".into()))?;
        let service = conn.service();

        let result = match cmd {
            Command::Get { keys, with_cas } => handle_get(&service, conn, &keys, with_cas),
            Command::Store {
                op,
                key,
                flags,
                exptime,
                cas,
                data,
                ..
            } => handle_store(&service, conn, op, &key, flags, exptime, cas, data),
            Command::Delete { key, .. } => handle_delete(&service, conn, &key),
            Command::Arith {
                key, delta, incr, ..
            } => handle_arith(&service, conn, &key, delta, incr),
            Command::Touch { key, exptime, .. } => handle_touch(&service, conn, &key, exptime),
            Command::FlushAll { delay, .. } => handle_flush_all(&service, conn, delay),
            Command::Stats => {
                handle_stats(&service, conn);
                Ok(())
            }
            Command::Version => {
                conn.output().version(VERSION);
                Ok(())
            }
            Command::Quit => {
                debug!("client requested quit");
                conn.request_close();
                Ok(())
            }
        };

        // noreply: the command ran, its response must not reach the wire
        if conn.noreply() {
            conn.output().rollback_to_mark();
        }
        result
    }

    fn process_error(&mut self, conn: &mut Connection, code: u16, message: &str) {
        // Unknown commands get the bare ERROR reply; everything else is the
        // client's fault and says so.
        if code == ProtocolError::InvalidCommand(String::new()).code() {
            conn.output().error();
        } else {
            conn.output().client_error(message);
        }
    }
}

/// Fetch a key, applying lazy expiration: a stale entry is deleted on sight
/// and reported as a miss.
fn lookup(service: &Service, key: &[u8]) -> crate::Result<Option<StoredValue>> {
    match service.backend().get(key)? {
        Some(value) if service.is_stale(&value) => {
            let _ = service.backend().delete(key);
            service.stats().reclaimed.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
        other => Ok(other),
    }
}

fn handle_get(
    service: &Arc<Service>,
    conn: &mut Connection,
    keys: &[Vec<u8>],
    with_cas: bool,
) -> crate::Result<()> {
    let stats = service.stats();
    stats.cmd_get.fetch_add(1, Ordering::Relaxed);

    for key in keys {
        match lookup(service, key)? {
            Some(value) => {
                stats.get_hits.fetch_add(1, Ordering::Relaxed);
                if with_cas {
                    conn.output()
                        .value_with_cas(key, value.flags, &value.data, value.cas);
                } else {
                    conn.output().value(key, value.flags, &value.data);
                }
            }
            None => {
                stats.get_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    conn.output().end();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_store(
    service: &Arc<Service>,
    conn: &mut Connection,
    op: StoreOp,
    key: &[u8],
    flags: u32,
    exptime: u64,
    cas: u64,
    data: Vec<u8>,
) -> crate::Result<()> {
    service.stats().cmd_set.fetch_add(1, Ordering::Relaxed);

    let existing = lookup(service, key)?;
    match op {
        StoreOp::Add if existing.is_some() => {
            conn.output().not_stored();
            return Ok(());
        }
        StoreOp::Replace if existing.is_none() => {
            conn.output().not_stored();
            return Ok(());
        }
        StoreOp::Cas => match existing {
            None => {
                conn.output().not_found();
                return Ok(());
            }
            Some(old) if old.cas != cas => {
                conn.output().exists();
                return Ok(());
            }
            Some(_) => {}
        },
        _ => {}
    }

    let value = StoredValue::new(flags, exptime, service.next_cas(), data);
    service.backend().set(key, &value)?;
    conn.output().stored();
    Ok(())
}

fn handle_delete(service: &Arc<Service>, conn: &mut Connection, key: &[u8]) -> crate::Result<()> {
    service.stats().cmd_delete.fetch_add(1, Ordering::Relaxed);

    if lookup(service, key)?.is_none() {
        conn.output().not_found();
        return Ok(());
    }
    service.backend().delete(key)?;
    conn.output().deleted();
    Ok(())
}

fn handle_arith(
    service: &Arc<Service>,
    conn: &mut Connection,
    key: &[u8],
    delta: u64,
    incr: bool,
) -> crate::Result<()> {
    let stats = service.stats();
    if incr {
        stats.cmd_incr.fetch_add(1, Ordering::Relaxed);
    } else {
        stats.cmd_decr.fetch_add(1, Ordering::Relaxed);
    }

    let Some(mut value) = lookup(service, key)? else {
        conn.output().not_found();
        return Ok(());
    };

    let current = match value.as_u64() {
        Ok(n) => n,
        Err(_) => {
            conn.output()
                .client_error("cannot increment or decrement non-numeric value");
            return Ok(());
        }
    };

    // incr wraps at u64::MAX, decr clamps at zero
    let next = if incr {
        current.wrapping_add(delta)
    } else {
        current.saturating_sub(delta)
    };

    value.set_numeric(next);
    value.cas = service.next_cas();
    service.backend().set(key, &value)?;
    conn.output().number(next);
    Ok(())
}

fn handle_touch(
    service: &Arc<Service>,
    conn: &mut Connection,
    key: &[u8],
    exptime: u64,
) -> crate::Result<()> {
    service.stats().cmd_touch.fetch_add(1, Ordering::Relaxed);

    let Some(mut value) = lookup(service, key)? else {
        conn.output().not_found();
        return Ok(());
    };

    value.touch(exptime);
    service.backend().set(key, &value)?;
    conn.output().touched();
    Ok(())
}

fn handle_flush_all(
    service: &Arc<Service>,
    conn: &mut Connection,
    delay: u64,
) -> crate::Result<()> {
    service.stats().cmd_flush.fetch_add(1, Ordering::Relaxed);

    if !service.flush_enabled() {
        conn.output().server_error("flush_all is disabled");
        return Ok(());
    }
    service.schedule_flush(delay);
    conn.output().ok();
    Ok(())
}

fn handle_stats(service: &Arc<Service>, conn: &mut Connection) {
    for (name, value) in service.stats().snapshot() {
        conn.output().stat(name, value);
    }
    conn.output().end();
}
