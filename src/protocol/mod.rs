//! Memcached ASCII protocol implementation
//!
//! The connection loop is protocol-agnostic: it drives whatever implements
//! [`ProtocolHandler`] against the connection's buffers. [`TextProtocol`] is
//! the ASCII-protocol implementation of that capability set.

pub mod command;
pub mod parser;
pub mod response;
pub mod text;

pub use command::{Command, MAX_KEY_LENGTH, MAX_VALUE_SIZE, StoreOp};
pub use parser::{MAX_LINE_LENGTH, ParseResult, parse};
pub use response::ResponseWriter;
pub use text::TextProtocol;

use crate::Result;
use crate::conn::Connection;

/// Outcome of a parse attempt that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStep {
    /// A complete request is buffered and staged for processing
    Ready,
    /// At least this many more bytes must be read before parsing can proceed
    More(usize),
}

/// Per-connection protocol capability set.
///
/// `parse_request` examines the connection's input buffer and, on success,
/// records the request length on the connection (the loop drains exactly
/// that many bytes afterwards). `process_request` executes the staged
/// request and writes its response. `process_error` renders a
/// protocol-space error code into the output buffer.
pub trait ProtocolHandler: Send {
    fn parse_request(&mut self, conn: &mut Connection) -> Result<ParseStep>;

    fn process_request(&mut self, conn: &mut Connection) -> Result<()>;

    fn process_error(&mut self, conn: &mut Connection, code: u16, message: &str);
}
