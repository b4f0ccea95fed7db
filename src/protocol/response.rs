//! Memcached ASCII protocol response builder
//!
//! Carries the connection's output staging buffer. `mark_response_end`
//! records the boundary of the last complete response; a flush only ever
//! writes bytes up to that boundary, so a half-built response can never
//! reach the socket.

use bytes::BytesMut;
use itoa::Buffer;

/// Response writer for memcached ASCII protocol
pub struct ResponseWriter {
    buf: BytesMut,
    /// End of the last complete response within `buf`
    response_end: usize,
}

impl ResponseWriter {
    /// Create a new response writer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            response_end: 0,
        }
    }

    /// Get the internal buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Record that everything written so far forms complete responses.
    pub fn mark_response_end(&mut self) {
        self.response_end = self.buf.len();
    }

    /// Bytes currently marked flushable
    pub fn flushable(&self) -> usize {
        self.response_end
    }

    /// Split off the complete-response prefix, leaving any unfinished tail.
    pub fn take_complete(&mut self) -> BytesMut {
        let out = self.buf.split_to(self.response_end);
        self.response_end = 0;
        out
    }

    /// Discard everything written since the last mark (noreply rollback).
    pub fn rollback_to_mark(&mut self) {
        self.buf.truncate(self.response_end);
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buf.clear();
        self.response_end = 0;
    }

    /// Returns true if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a VALUE line for get response
    /// Format: VALUE <key> <flags> <bytes>\r\n<data>\r\n
    pub fn value(&mut self, key: &[u8], flags: u32, data: &[u8]) {
        let mut itoa_buf = Buffer::new();
        self.buf.extend_from_slice(b"VALUE ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(itoa_buf.format(flags).as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(itoa_buf.format(data.len()).as_bytes());
        self.buf.extend_from_slice(b"\r\n");
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write a VALUE line including the CAS value (gets response)
    /// Format: VALUE <key> <flags> <bytes> <cas>\r\n<data>\r\n
    pub fn value_with_cas(&mut self, key: &[u8], flags: u32, data: &[u8], cas: u64) {
        let mut itoa_buf = Buffer::new();
        self.buf.extend_from_slice(b"VALUE ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(itoa_buf.format(flags).as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(itoa_buf.format(data.len()).as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf.extend_from_slice(itoa_buf.format(cas).as_bytes());
        self.buf.extend_from_slice(b"\r\n");
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write a bare number (incr/decr result)
    pub fn number(&mut self, n: u64) {
        let mut itoa_buf = Buffer::new();
        self.buf.extend_from_slice(itoa_buf.format(n).as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write END to terminate get response
    pub fn end(&mut self) {
        self.buf.extend_from_slice(b"END\r\n");
    }

    /// Write STORED response
    pub fn stored(&mut self) {
        self.buf.extend_from_slice(b"STORED\r\n");
    }

    /// Write NOT_STORED response (add/replace precondition failed)
    pub fn not_stored(&mut self) {
        self.buf.extend_from_slice(b"NOT_STORED\r\n");
    }

    /// Write EXISTS response (cas mismatch)
    pub fn exists(&mut self) {
        self.buf.extend_from_slice(b"EXISTS\r\n");
    }

    /// Write NOT_FOUND response
    pub fn not_found(&mut self) {
        self.buf.extend_from_slice(b"NOT_FOUND\r\n");
    }

    /// Write DELETED response
    pub fn deleted(&mut self) {
        self.buf.extend_from_slice(b"DELETED\r\n");
    }

    /// Write TOUCHED response
    pub fn touched(&mut self) {
        self.buf.extend_from_slice(b"TOUCHED\r\n");
    }

    /// Write OK response
    pub fn ok(&mut self) {
        self.buf.extend_from_slice(b"OK\r\n");
    }

    /// Write a STAT line
    /// Format: STAT <name> <value>\r\n
    pub fn stat(&mut self, name: &str, value: u64) {
        let mut itoa_buf = Buffer::new();
        self.buf.extend_from_slice(b"STAT ");
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.extend_from_slice(b" ");
        self.buf
            .extend_from_slice(itoa_buf.format(value).as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write VERSION response
    /// Format: VERSION <version_string>\r\n
    pub fn version(&mut self, version: &str) {
        self.buf.extend_from_slice(b"VERSION ");
        self.buf.extend_from_slice(version.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write ERROR response (unknown command)
    pub fn error(&mut self) {
        self.buf.extend_from_slice(b"ERROR\r\n");
    }

    /// Write CLIENT_ERROR response
    pub fn client_error(&mut self, message: &str) {
        self.buf.extend_from_slice(b"CLIENT_ERROR ");
        self.buf.extend_from_slice(message.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write SERVER_ERROR response
    pub fn server_error(&mut self, message: &str) {
        self.buf.extend_from_slice(b"SERVER_ERROR ");
        self.buf.extend_from_slice(message.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value() {
        let mut writer = ResponseWriter::new(256);
        writer.value(b"mykey", 42, b"hello");
        assert_eq!(writer.buffer(), b"VALUE mykey 42 5\r\nhello\r\n");
    }

    #[test]
    fn test_value_with_cas() {
        let mut writer = ResponseWriter::new(256);
        writer.value_with_cas(b"mykey", 0, b"hi", 17);
        assert_eq!(writer.buffer(), b"VALUE mykey 0 2 17\r\nhi\r\n");
    }

    #[test]
    fn test_get_response() {
        let mut writer = ResponseWriter::new(256);
        writer.value(b"key1", 0, b"value1");
        writer.value(b"key2", 1, b"value2");
        writer.end();

        let expected = b"VALUE key1 0 6\r\nvalue1\r\nVALUE key2 1 6\r\nvalue2\r\nEND\r\n";
        assert_eq!(writer.buffer(), &expected[..]);
    }

    #[test]
    fn test_simple_responses() {
        let mut writer = ResponseWriter::new(256);

        writer.stored();
        writer.mark_response_end();
        assert_eq!(writer.take_complete().as_ref(), b"STORED\r\n");

        writer.deleted();
        writer.mark_response_end();
        assert_eq!(writer.take_complete().as_ref(), b"DELETED\r\n");

        writer.not_found();
        writer.mark_response_end();
        assert_eq!(writer.take_complete().as_ref(), b"NOT_FOUND\r\n");
    }

    #[test]
    fn test_take_complete_leaves_unmarked_tail() {
        let mut writer = ResponseWriter::new(256);
        writer.stored();
        writer.mark_response_end();
        writer.end(); // staged but not marked complete

        assert_eq!(writer.take_complete().as_ref(), b"STORED\r\n");
        assert_eq!(writer.buffer(), b"END\r\n");
        assert_eq!(writer.flushable(), 0);
    }

    #[test]
    fn test_rollback_to_mark() {
        let mut writer = ResponseWriter::new(256);
        writer.end();
        writer.mark_response_end();
        writer.stored(); // suppressed response
        writer.rollback_to_mark();

        assert_eq!(writer.buffer(), b"END\r\n");
    }

    #[test]
    fn test_errors() {
        let mut writer = ResponseWriter::new(256);

        writer.client_error("bad command line format");
        writer.mark_response_end();
        assert_eq!(
            writer.take_complete().as_ref(),
            b"CLIENT_ERROR bad command line format\r\n"
        );

        writer.server_error("out of memory");
        writer.mark_response_end();
        assert_eq!(
            writer.take_complete().as_ref(),
            b"SERVER_ERROR out of memory\r\n"
        );
    }

    #[test]
    fn test_stat_and_number() {
        let mut writer = ResponseWriter::new(256);
        writer.stat("evictions", 3);
        writer.number(42);
        assert_eq!(writer.buffer(), b"STAT evictions 3\r\n42\r\n");
    }

    #[test]
    fn test_version() {
        let mut writer = ResponseWriter::new(256);
        writer.version("slatecache 0.1.0");
        assert_eq!(writer.buffer(), b"VERSION slatecache 0.1.0\r\n");
    }
}
