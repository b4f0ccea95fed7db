//! Connection I/O loop
//!
//! Owns one socket's input and output staging and drives the
//! read → parse → process → drain → flush cycle against a
//! [`ProtocolHandler`]. Requests already resident in the input buffer are
//! processed back-to-back up to the service's batch cap before a flush, so
//! pipelined clients pay for one write syscall per batch, not per request.
//!
//! Failure policy: a short or failed socket read is fatal to the connection
//! (a stream that stops mid-request cannot be resynchronized), while parse
//! and process errors are answered and the loop keeps going.

use crate::error::{PROTO_ERROR_BASE, SlateError};
use crate::protocol::{ParseStep, ProtocolHandler, ResponseWriter};
use crate::service::Service;
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Per-connection state: buffers, request flags and the owning service.
pub struct Connection {
    service: Arc<Service>,
    input: BytesMut,
    output: ResponseWriter,
    /// Suppress the response flush for the current request
    noreply: bool,
    /// Drain the current request without executing it
    noprocess: bool,
    /// Tear the connection down after the current cycle
    close_connection: bool,
    /// Total byte length of the current request, set by the handler at parse
    /// time; the loop drains exactly this many input bytes per request.
    len: usize,
}

impl Connection {
    pub fn new(service: Arc<Service>) -> Self {
        let readahead = service.readahead();
        Self {
            service,
            input: BytesMut::with_capacity(readahead),
            output: ResponseWriter::new(readahead),
            noreply: false,
            noprocess: false,
            close_connection: false,
            len: 0,
        }
    }

    /// Unconsumed request bytes.
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    /// Response staging buffer.
    pub fn output(&mut self) -> &mut ResponseWriter {
        &mut self.output
    }

    /// The owning service.
    pub fn service(&self) -> Arc<Service> {
        Arc::clone(&self.service)
    }

    pub fn noreply(&self) -> bool {
        self.noreply
    }

    pub fn set_noreply(&mut self, v: bool) {
        self.noreply = v;
    }

    pub fn set_noprocess(&mut self, v: bool) {
        self.noprocess = v;
    }

    pub fn set_request_len(&mut self, len: usize) {
        self.len = len;
    }

    /// Ask the loop to tear the connection down after the current cycle.
    pub fn request_close(&mut self) {
        self.close_connection = true;
    }

    /// Drive the request loop until the peer disconnects, the stream fails,
    /// or the handler requests teardown.
    pub async fn run<S>(&mut self, stream: &mut S, handler: &mut dyn ProtocolHandler)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        // Additional bytes the parser has demanded; zero means "whatever the
        // buffer holds, reading only if it is empty".
        let mut to_read: usize = 0;
        let mut batch_count: u32 = 0;

        'outer: loop {
            if (to_read > 0 || self.input.is_empty())
                && self.read_more(stream, to_read.max(1)).await.is_err()
            {
                // Short read on a stream socket: closing without a reply is
                // the only option that keeps framing trustworthy.
                break 'outer;
            }
            to_read = 0;

            loop {
                self.noreply = false;
                self.noprocess = false;

                match handler.parse_request(self) {
                    Err(err) => {
                        if self.close_connection {
                            // Framing itself is compromised: no reply for
                            // this request, close after the best-effort
                            // flush of earlier complete responses.
                            debug!("unrecoverable framing error: {err}");
                            break 'outer;
                        }
                        self.report_error(handler, &err);
                        self.output.mark_response_end();
                        if self.skip_request(stream).await.is_err() {
                            break 'outer;
                        }
                        batch_count = 0;
                        if self.flush(stream).await.is_err() {
                            break 'outer;
                        }
                        continue 'outer;
                    }
                    Ok(ParseStep::More(n)) => {
                        to_read = n;
                        continue 'outer;
                    }
                    Ok(ParseStep::Ready) => {}
                }

                let mut failed = false;
                if !self.noprocess
                    && let Err(err) = handler.process_request(self)
                {
                    failed = true;
                    self.report_error(handler, &err);
                }
                self.output.mark_response_end();

                // A well-behaved handler accounts for every request byte;
                // drain whatever remains so the next parse starts clean.
                if self.skip_request(stream).await.is_err() {
                    break 'outer;
                }

                if self.close_connection {
                    debug!("handler requested exit");
                    break 'outer;
                }

                if !failed
                    && !self.input.is_empty()
                    && batch_count < self.service.batch_count()
                {
                    // Pipelined batching: another request is already
                    // buffered, keep going without a flush.
                    batch_count += 1;
                    continue;
                }
                batch_count = 0;

                if !self.noreply && self.flush(stream).await.is_err() {
                    break 'outer;
                }
                continue 'outer;
            }
        }

        // Whatever complete responses are staged still go out.
        let _ = self.flush(stream).await;
    }

    /// Append at least `n` freshly read bytes to the input buffer.
    async fn read_more<S>(&mut self, stream: &mut S, n: usize) -> std::io::Result<()>
    where
        S: AsyncRead + Unpin,
    {
        self.input.reserve(n.max(self.service.readahead()));
        let mut remaining = n;
        while remaining > 0 {
            let read = stream.read_buf(&mut self.input).await?;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-request",
                ));
            }
            self.service.stats().add_bytes_read(read as u64);
            remaining = remaining.saturating_sub(read);
        }
        Ok(())
    }

    /// Consume exactly the current request's bytes from the input, reading
    /// and discarding from the socket while the declared length exceeds
    /// what is buffered. Keeps stream framing intact for requests that are
    /// skipped or only partially consumed.
    async fn skip_request<S>(&mut self, stream: &mut S) -> std::io::Result<()>
    where
        S: AsyncRead + Unpin,
    {
        while self.input.len() < self.len && self.noprocess {
            self.len -= self.input.len();
            self.input.clear();
            self.read_more(stream, 1).await?;
        }
        debug_assert!(self.input.len() >= self.len);
        self.input.advance(self.len);
        self.len = 0;
        Ok(())
    }

    /// Write out every complete staged response and re-reserve readahead
    /// capacity for the next cycle.
    async fn flush<S>(&mut self, stream: &mut S) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let out = self.output.take_complete();
        if !out.is_empty() {
            stream.write_all(&out).await?;
            stream.flush().await?;
            self.service.stats().add_bytes_written(out.len() as u64);
        }
        self.input.reserve(self.service.readahead());
        Ok(())
    }

    /// Route an error: protocol-space codes go back through the handler,
    /// anything else becomes a generic server error. Never closes the
    /// connection by itself.
    fn report_error(&mut self, handler: &mut dyn ProtocolHandler, err: &SlateError) {
        let code = err.code();
        let message = err.to_string();
        if code >= PROTO_ERROR_BASE {
            handler.process_error(self, code - PROTO_ERROR_BASE, &message);
        } else {
            self.output.server_error(&format!("{code}: {message}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::protocol::TextProtocol;
    use crate::storage::{Backend, MemBackend, StoredValue};
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Test stream: serves scripted read chunks, then EOF; records each
    /// write call as its own chunk so tests can observe flush boundaries.
    struct ScriptedStream {
        reads: VecDeque<Vec<u8>>,
        writes: Vec<Vec<u8>>,
    }

    impl ScriptedStream {
        fn new(reads: &[&[u8]]) -> Self {
            Self {
                reads: reads.iter().map(|c| c.to_vec()).collect(),
                writes: Vec::new(),
            }
        }

        fn written(&self) -> Vec<u8> {
            self.writes.concat()
        }
    }

    impl AsyncRead for ScriptedStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if let Some(chunk) = self.reads.front_mut() {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                chunk.drain(..n);
                if chunk.is_empty() {
                    self.reads.pop_front();
                }
            }
            // empty script = EOF (zero bytes filled)
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for ScriptedStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.writes.push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn service_with_batch(batch_count: u32) -> Arc<Service> {
        let cfg = CacheConfig {
            batch_count,
            expire_enabled: false,
            ..CacheConfig::default()
        };
        Service::with_config("test", "keyspace", Arc::new(MemBackend::new()), &cfg)
    }

    fn preload(service: &Service, key: &[u8], data: &[u8]) {
        let value = StoredValue::new(0, 0, 1, data.to_vec());
        service.backend().set(key, &value).unwrap();
    }

    async fn run_script(service: &Arc<Service>, reads: &[&[u8]]) -> ScriptedStream {
        let mut stream = ScriptedStream::new(reads);
        let mut conn = Connection::new(Arc::clone(service));
        let mut handler = TextProtocol::new();
        conn.run(&mut stream, &mut handler).await;
        stream
    }

    #[tokio::test]
    async fn pipelined_requests_reply_in_arrival_order() {
        let service = service_with_batch(20);
        preload(&service, b"k1", b"v1");
        preload(&service, b"k2", b"v2");
        preload(&service, b"k3", b"v3");

        let stream = run_script(&service, &[b"get k1\r\nget k2\r\nget k3\r\n"]).await;

        assert_eq!(
            stream.written(),
            b"VALUE k1 0 2\r\nv1\r\nEND\r\nVALUE k2 0 2\r\nv2\r\nEND\r\nVALUE k3 0 2\r\nv3\r\nEND\r\n"
        );
        // all three fit under the batch cap: one flush
        assert_eq!(stream.writes.len(), 1);
    }

    #[tokio::test]
    async fn batch_cap_forces_intermediate_flush() {
        let service = service_with_batch(1);

        let stream =
            run_script(&service, &[b"get a\r\nget b\r\nget c\r\nget d\r\n"]).await;

        // batch cap 1 = two requests per flush
        assert_eq!(stream.writes.len(), 2);
        for chunk in &stream.writes {
            let ends = chunk
                .windows(5)
                .filter(|w| *w == b"END\r\n".as_slice())
                .count();
            assert!(ends <= 2, "more than batch_count+1 replies between flushes");
        }
        assert_eq!(stream.written(), b"END\r\nEND\r\nEND\r\nEND\r\n");
    }

    #[tokio::test]
    async fn rejected_request_body_is_drained_before_next_parse() {
        let service = service_with_batch(20);
        preload(&service, b"ok", b"yes");

        // invalid key but a parseable 10-byte body declaration; the body
        // spills into a second read together with the next request
        let stream = run_script(
            &service,
            &[b"set bad\x01key 0 0 10\r\n0123", b"456789\r\nget ok\r\n"],
        )
        .await;

        let out = stream.written();
        let out = String::from_utf8_lossy(&out);
        assert!(out.starts_with("CLIENT_ERROR"), "got: {out}");
        assert!(out.contains("VALUE ok 0 3\r\nyes"), "got: {out}");
    }

    #[tokio::test]
    async fn unknown_command_answers_error_and_continues() {
        let service = service_with_batch(20);
        preload(&service, b"k", b"v");

        let stream = run_script(&service, &[b"bogus\r\nget k\r\n"]).await;

        let out = stream.written();
        assert!(out.starts_with(b"ERROR\r\n"));
        assert!(out.ends_with(b"END\r\n"));
        // the error is flushed on its own before the next request runs
        assert_eq!(stream.writes.len(), 2);
    }

    #[tokio::test]
    async fn eof_mid_body_emits_no_partial_reply() {
        let service = service_with_batch(20);

        let stream = run_script(&service, &[b"set k 0 0 10\r\nabc"]).await;

        assert!(stream.writes.is_empty());
        assert!(service.backend().get(b"k").unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_line_closes_without_reply() {
        let service = service_with_batch(20);

        let big = vec![b'x'; crate::protocol::MAX_LINE_LENGTH + 16];
        let stream = run_script(&service, &[&big]).await;

        assert!(stream.writes.is_empty());
    }

    #[tokio::test]
    async fn noreply_store_is_applied_but_not_answered() {
        let service = service_with_batch(20);

        let stream =
            run_script(&service, &[b"set k 0 0 2 noreply\r\nhi\r\nget k\r\n"]).await;

        let out = stream.written();
        assert_eq!(out, b"VALUE k 0 2\r\nhi\r\nEND\r\n");
        assert!(service.backend().get(b"k").unwrap().is_some());
    }

    #[tokio::test]
    async fn quit_tears_down_the_connection() {
        let service = service_with_batch(20);

        // anything after quit is never parsed
        let stream = run_script(&service, &[b"quit\r\nget k\r\n"]).await;

        assert!(stream.writes.is_empty());
    }

    #[tokio::test]
    async fn set_split_across_reads_is_reassembled() {
        let service = service_with_batch(20);

        let stream = run_script(
            &service,
            &[b"set k 0 0 5\r\nhe", b"llo\r\n", b"get k\r\n"],
        )
        .await;

        let out = stream.written();
        assert_eq!(out, b"STORED\r\nVALUE k 0 5\r\nhello\r\nEND\r\n");
    }

    #[tokio::test]
    async fn byte_counters_track_traffic() {
        let service = service_with_batch(20);
        preload(&service, b"k", b"v");

        let request = b"get k\r\n";
        let stream = run_script(&service, &[request]).await;

        use std::sync::atomic::Ordering;
        assert_eq!(
            service.stats().bytes_read.load(Ordering::Relaxed),
            request.len() as u64
        );
        assert_eq!(
            service.stats().bytes_written.load(Ordering::Relaxed),
            stream.written().len() as u64
        );
    }
}
