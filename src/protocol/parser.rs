//! Hand-written memcached ASCII protocol parser
//!
//! Incremental: the caller feeds whatever bytes it has buffered and the
//! parser answers with a complete command, the number of additional bytes it
//! needs, or an error. Errors carry the number of bytes attributable to the
//! bad request so the connection loop can drain them and keep its framing.

use crate::ProtocolError;
use crate::protocol::command::{Command, MAX_KEY_LENGTH, MAX_VALUE_SIZE, StoreOp, is_valid_key};
use memchr::memchr_iter;

/// A command line longer than this without a terminator means the stream
/// framing can no longer be trusted.
pub const MAX_LINE_LENGTH: usize = 8192;

/// Result of parsing
#[derive(Debug)]
pub enum ParseResult {
    /// Command fully parsed; the request occupies this many buffer bytes
    Complete(Command, usize),
    /// At least this many more bytes are required
    Partial(usize),
    /// Parse error, with the byte length of the request to drain
    Error(ProtocolError, usize),
}

/// Case-insensitive command comparison (avoids allocation from to_ascii_lowercase)
#[inline]
fn cmd_eq(cmd: &[u8], expected: &[u8]) -> bool {
    cmd.len() == expected.len()
        && cmd
            .iter()
            .zip(expected.iter())
            .all(|(a, b)| a.to_ascii_lowercase() == *b)
}

/// Find \r\n in buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    memchr_iter(b'\r', buf).find(|&i| buf.get(i + 1) == Some(&b'\n'))
}

/// Parse a memcached command from a buffer
pub fn parse(buf: &[u8]) -> ParseResult {
    let line_end = match find_crlf(buf) {
        Some(pos) => pos,
        None if buf.len() > MAX_LINE_LENGTH => {
            return ParseResult::Error(ProtocolError::LineTooLong, buf.len());
        }
        None => return ParseResult::Partial(1),
    };

    let line = &buf[..line_end];
    let line_len = line_end + 2;
    let args: Vec<&[u8]> = line.split(|&b| b == b' ').filter(|p| !p.is_empty()).collect();

    let Some((&name, args)) = args.split_first() else {
        return ParseResult::Error(
            ProtocolError::InvalidCommand("empty command".to_string()),
            line_len,
        );
    };

    if cmd_eq(name, b"get") {
        parse_get(args, line_len, false)
    } else if cmd_eq(name, b"gets") {
        parse_get(args, line_len, true)
    } else if cmd_eq(name, b"set") {
        parse_store(StoreOp::Set, args, buf, line_len)
    } else if cmd_eq(name, b"add") {
        parse_store(StoreOp::Add, args, buf, line_len)
    } else if cmd_eq(name, b"replace") {
        parse_store(StoreOp::Replace, args, buf, line_len)
    } else if cmd_eq(name, b"cas") {
        parse_store(StoreOp::Cas, args, buf, line_len)
    } else if cmd_eq(name, b"delete") {
        parse_delete(args, line_len)
    } else if cmd_eq(name, b"incr") {
        parse_arith(args, line_len, true)
    } else if cmd_eq(name, b"decr") {
        parse_arith(args, line_len, false)
    } else if cmd_eq(name, b"touch") {
        parse_touch(args, line_len)
    } else if cmd_eq(name, b"flush_all") {
        parse_flush_all(args, line_len)
    } else if cmd_eq(name, b"stats") {
        ParseResult::Complete(Command::Stats, line_len)
    } else if cmd_eq(name, b"version") {
        ParseResult::Complete(Command::Version, line_len)
    } else if cmd_eq(name, b"quit") {
        ParseResult::Complete(Command::Quit, line_len)
    } else {
        ParseResult::Error(
            ProtocolError::InvalidCommand(String::from_utf8_lossy(name).to_string()),
            line_len,
        )
    }
}

fn key_error(key: &[u8]) -> ProtocolError {
    if key.len() > MAX_KEY_LENGTH {
        ProtocolError::KeyTooLong
    } else {
        ProtocolError::InvalidKey(String::from_utf8_lossy(key).to_string())
    }
}

/// Parse get/gets
fn parse_get(args: &[&[u8]], line_len: usize, with_cas: bool) -> ParseResult {
    if args.is_empty() {
        return ParseResult::Error(
            ProtocolError::InvalidCommand("get requires at least one key".to_string()),
            line_len,
        );
    }

    let mut keys = Vec::with_capacity(args.len());
    for &key in args {
        if !is_valid_key(key) {
            return ParseResult::Error(key_error(key), line_len);
        }
        keys.push(key.to_vec());
    }

    ParseResult::Complete(Command::Get { keys, with_cas }, line_len)
}

/// Parse set/add/replace/cas
///
/// `<key> <flags> <exptime> <bytes> [cas] [noreply]` followed by `<bytes>`
/// of data and a CRLF. The bytes field is decoded before anything is
/// validated so a rejected request still reports its full declared length
/// and the loop can drain the body.
fn parse_store(op: StoreOp, args: &[&[u8]], buf: &[u8], line_len: usize) -> ParseResult {
    let extra = usize::from(op == StoreOp::Cas);
    let min_args = 4 + extra;
    if args.len() < min_args || args.len() > min_args + 1 {
        return ParseResult::Error(
            ProtocolError::InvalidCommand(format!("bad {} argument count", op.name())),
            line_len,
        );
    }

    let Some(bytes) = parse_num::<usize>(args[3]) else {
        return ParseResult::Error(ProtocolError::InvalidBytesLength, line_len);
    };

    // Declared length is known from here on: errors drain the whole request.
    let total = line_len + bytes + 2;

    if bytes > MAX_VALUE_SIZE {
        return ParseResult::Error(ProtocolError::ValueTooLarge, total);
    }

    let key = args[0];
    if !is_valid_key(key) {
        return ParseResult::Error(key_error(key), total);
    }

    let Some(flags) = parse_num::<u32>(args[1]) else {
        return ParseResult::Error(ProtocolError::InvalidFlags, total);
    };
    let Some(exptime) = parse_num::<u64>(args[2]) else {
        return ParseResult::Error(ProtocolError::InvalidExptime, total);
    };
    let cas = if op == StoreOp::Cas {
        match parse_num::<u64>(args[4]) {
            Some(c) => c,
            None => return ParseResult::Error(ProtocolError::InvalidNumericValue, total),
        }
    } else {
        0
    };
    let noreply = args.len() == min_args + 1 && args[min_args] == b"noreply";
    if args.len() == min_args + 1 && !noreply {
        return ParseResult::Error(
            ProtocolError::InvalidCommand(format!("bad {} argument", op.name())),
            total,
        );
    }

    if buf.len() < total {
        return ParseResult::Partial(total - buf.len());
    }

    let data_end = line_len + bytes;
    if &buf[data_end..data_end + 2] != b"\r\n" {
        return ParseResult::Error(ProtocolError::BadDataChunk, total);
    }

    ParseResult::Complete(
        Command::Store {
            op,
            key: key.to_vec(),
            flags,
            exptime,
            cas,
            data: buf[line_len..data_end].to_vec(),
            noreply,
        },
        total,
    )
}

/// Parse delete: `delete <key> [exptime] [noreply]`
/// (a numeric exptime is accepted and ignored, for old-client compatibility)
fn parse_delete(args: &[&[u8]], line_len: usize) -> ParseResult {
    let Some((&key, rest)) = args.split_first() else {
        return ParseResult::Error(
            ProtocolError::InvalidCommand("delete requires a key".to_string()),
            line_len,
        );
    };
    if !is_valid_key(key) {
        return ParseResult::Error(key_error(key), line_len);
    }

    let noreply = rest.iter().any(|&p| p == b"noreply");

    ParseResult::Complete(
        Command::Delete {
            key: key.to_vec(),
            noreply,
        },
        line_len,
    )
}

/// Parse incr/decr: `<key> <delta> [noreply]`
fn parse_arith(args: &[&[u8]], line_len: usize, incr: bool) -> ParseResult {
    if args.len() < 2 || args.len() > 3 {
        return ParseResult::Error(
            ProtocolError::InvalidCommand("bad incr/decr argument count".to_string()),
            line_len,
        );
    }
    let key = args[0];
    if !is_valid_key(key) {
        return ParseResult::Error(key_error(key), line_len);
    }
    let Some(delta) = parse_num::<u64>(args[1]) else {
        return ParseResult::Error(ProtocolError::InvalidNumericValue, line_len);
    };
    let noreply = args.len() == 3 && args[2] == b"noreply";

    ParseResult::Complete(
        Command::Arith {
            key: key.to_vec(),
            delta,
            incr,
            noreply,
        },
        line_len,
    )
}

/// Parse touch: `touch <key> <exptime> [noreply]`
fn parse_touch(args: &[&[u8]], line_len: usize) -> ParseResult {
    if args.len() < 2 || args.len() > 3 {
        return ParseResult::Error(
            ProtocolError::InvalidCommand("bad touch argument count".to_string()),
            line_len,
        );
    }
    let key = args[0];
    if !is_valid_key(key) {
        return ParseResult::Error(key_error(key), line_len);
    }
    let Some(exptime) = parse_num::<u64>(args[1]) else {
        return ParseResult::Error(ProtocolError::InvalidExptime, line_len);
    };
    let noreply = args.len() == 3 && args[2] == b"noreply";

    ParseResult::Complete(
        Command::Touch {
            key: key.to_vec(),
            exptime,
            noreply,
        },
        line_len,
    )
}

/// Parse flush_all: `flush_all [delay] [noreply]`
fn parse_flush_all(args: &[&[u8]], line_len: usize) -> ParseResult {
    let mut delay = 0;
    let mut noreply = false;
    match args {
        [] => {}
        [arg] if *arg == b"noreply" => noreply = true,
        [arg] => match parse_num::<u64>(arg) {
            Some(d) => delay = d,
            None => return ParseResult::Error(ProtocolError::InvalidNumericValue, line_len),
        },
        [d, nr] if *nr == b"noreply" => match parse_num::<u64>(d) {
            Some(d) => {
                delay = d;
                noreply = true;
            }
            None => return ParseResult::Error(ProtocolError::InvalidNumericValue, line_len),
        },
        _ => {
            return ParseResult::Error(
                ProtocolError::InvalidCommand("bad flush_all argument".to_string()),
                line_len,
            );
        }
    }

    ParseResult::Complete(Command::FlushAll { delay, noreply }, line_len)
}

fn parse_num<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get() {
        let buf = b"get foo bar baz\r\n";
        match parse(buf) {
            ParseResult::Complete(Command::Get { keys, with_cas }, consumed) => {
                assert_eq!(keys.len(), 3);
                assert_eq!(keys[0], b"foo");
                assert_eq!(keys[1], b"bar");
                assert_eq!(keys[2], b"baz");
                assert!(!with_cas);
                assert_eq!(consumed, buf.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_gets() {
        let buf = b"gets foo\r\n";
        match parse(buf) {
            ParseResult::Complete(Command::Get { with_cas, .. }, _) => assert!(with_cas),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_set() {
        let buf = b"set mykey 42 3600 5\r\nhello\r\n";
        match parse(buf) {
            ParseResult::Complete(
                Command::Store {
                    op,
                    key,
                    flags,
                    exptime,
                    data,
                    noreply,
                    ..
                },
                consumed,
            ) => {
                assert_eq!(op, StoreOp::Set);
                assert_eq!(key, b"mykey");
                assert_eq!(flags, 42);
                assert_eq!(exptime, 3600);
                assert_eq!(data, b"hello");
                assert!(!noreply);
                assert_eq!(consumed, buf.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_set_noreply() {
        let buf = b"set mykey 0 0 3 noreply\r\nfoo\r\n";
        match parse(buf) {
            ParseResult::Complete(Command::Store { noreply, .. }, _) => assert!(noreply),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_cas() {
        let buf = b"cas mykey 0 0 3 99\r\nfoo\r\n";
        match parse(buf) {
            ParseResult::Complete(Command::Store { op, cas, .. }, _) => {
                assert_eq!(op, StoreOp::Cas);
                assert_eq!(cas, 99);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_set_needs_body_bytes() {
        // command line complete, 5-byte body only partially buffered
        let buf = b"set mykey 0 0 5\r\nhel";
        match parse(buf) {
            // missing: 2 data bytes + trailing CRLF
            ParseResult::Partial(n) => assert_eq!(n, 4),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_set_bad_data_chunk() {
        let buf = b"set mykey 0 0 3\r\nfooXX";
        match parse(buf) {
            ParseResult::Error(ProtocolError::BadDataChunk, drain) => {
                assert_eq!(drain, buf.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_set_bad_key_drains_declared_body() {
        // key invalid but bytes field parseable: drain covers line + body
        let mut buf = b"set bad\x01key 0 0 10\r\n".to_vec();
        let line_len = buf.len();
        buf.extend_from_slice(b"0123456789\r\n");
        match parse(&buf) {
            ParseResult::Error(ProtocolError::InvalidKey(_), drain) => {
                assert_eq!(drain, line_len + 10 + 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_set_value_too_large() {
        let buf = b"set mykey 0 0 2097152\r\n";
        match parse(buf) {
            ParseResult::Error(ProtocolError::ValueTooLarge, drain) => {
                assert_eq!(drain, buf.len() + 2_097_152 + 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_delete() {
        let buf = b"delete mykey\r\n";
        match parse(buf) {
            ParseResult::Complete(Command::Delete { key, noreply }, _) => {
                assert_eq!(key, b"mykey");
                assert!(!noreply);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // old-client format with ignored exptime
        let buf = b"delete mykey 300 noreply\r\n";
        match parse(buf) {
            ParseResult::Complete(Command::Delete { noreply, .. }, _) => assert!(noreply),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_incr_decr() {
        let buf = b"incr counter 5\r\n";
        match parse(buf) {
            ParseResult::Complete(Command::Arith { delta, incr, .. }, _) => {
                assert_eq!(delta, 5);
                assert!(incr);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let buf = b"decr counter 2 noreply\r\n";
        match parse(buf) {
            ParseResult::Complete(
                Command::Arith {
                    incr, noreply: true, ..
                },
                _,
            ) => assert!(!incr),
            other => panic!("unexpected: {other:?}"),
        }

        let buf = b"incr counter five\r\n";
        match parse(buf) {
            ParseResult::Error(ProtocolError::InvalidNumericValue, _) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_touch() {
        let buf = b"touch mykey 300\r\n";
        match parse(buf) {
            ParseResult::Complete(Command::Touch { key, exptime, .. }, _) => {
                assert_eq!(key, b"mykey");
                assert_eq!(exptime, 300);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_flush_all() {
        match parse(b"flush_all\r\n") {
            ParseResult::Complete(Command::FlushAll { delay: 0, noreply: false }, _) => {}
            other => panic!("unexpected: {other:?}"),
        }
        match parse(b"flush_all 30 noreply\r\n") {
            ParseResult::Complete(Command::FlushAll { delay: 30, noreply: true }, _) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_simple_commands() {
        match parse(b"version\r\n") {
            ParseResult::Complete(Command::Version, 9) => {}
            other => panic!("unexpected: {other:?}"),
        }
        match parse(b"stats\r\n") {
            ParseResult::Complete(Command::Stats, _) => {}
            other => panic!("unexpected: {other:?}"),
        }
        match parse(b"quit\r\n") {
            ParseResult::Complete(Command::Quit, _) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_partial_line() {
        match parse(b"get foo") {
            ParseResult::Partial(1) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_line_too_long_is_framing_error() {
        let buf = vec![b'a'; MAX_LINE_LENGTH + 1];
        match parse(&buf) {
            ParseResult::Error(ProtocolError::LineTooLong, drain) => {
                assert_eq!(drain, buf.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_invalid_command() {
        match parse(b"bogus\r\n") {
            ParseResult::Error(ProtocolError::InvalidCommand(_), 7) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_key_too_long() {
        let mut buf = b"get ".to_vec();
        buf.extend_from_slice(&[b'a'; 251]);
        buf.extend_from_slice(b"\r\n");

        match parse(&buf) {
            ParseResult::Error(ProtocolError::KeyTooLong, _) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_case_insensitive_commands() {
        match parse(b"GET foo\r\n") {
            ParseResult::Complete(Command::Get { .. }, _) => {}
            other => panic!("unexpected: {other:?}"),
        }
        match parse(b"SET mykey 0 0 3\r\nbar\r\n") {
            ParseResult::Complete(Command::Store { .. }, _) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
