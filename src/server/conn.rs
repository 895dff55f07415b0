use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, error};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

use crate::error::Error;
use crate::mutex::Mutex;
use crate::queue::{PopAttempt, PopStream, PushStream};
use crate::registry::QueueMap;
use crate::request::{Request, RequestType};
use crate::stats::Stats;

/// Upper bound on a request line, terminator included.
pub(crate) const MAX_FRAME_SIZE: usize = 4096;

/// Serves one client: read a line, parse, dispatch, reply, repeat. Owns at
/// most one in-flight pop and one in-flight push; both get their safe
/// default (return / cancel) if the connection dies on them.
pub(crate) struct Connection {
    socket: TcpStream,
    in_buf: BytesMut,
    queues: Arc<Mutex<QueueMap>>,
    stats: Arc<Stats>,
    chunk_size: usize,
    pop_stream: Option<PopStream>,
    push_stream: Option<PushStream>,
}

enum Line {
    Frame(BytesMut),
    /// Peer closed before completing a line.
    Eof,
    /// Line blew the frame bound.
    Overflow,
}

impl Connection {
    pub(crate) fn new(
        socket: TcpStream,
        queues: Arc<Mutex<QueueMap>>,
        stats: Arc<Stats>,
        chunk_size: usize,
    ) -> Connection {
        Connection {
            socket,
            in_buf: BytesMut::with_capacity(MAX_FRAME_SIZE),
            queues,
            stats,
            chunk_size,
            pop_stream: None,
            push_stream: None,
        }
    }

    pub(crate) async fn run(mut self) {
        self.stats.inc_conns_opened();
        if let Err(e) = self.socket.set_nodelay(true) {
            debug!("set_nodelay: {e}");
        }
        if let Err(e) = self.serve().await {
            debug!("connection dropped: {e}");
        }
        // open streams fall back to their safe defaults as `self` drops:
        // the pop returns its item, the push cancels
        self.stats.inc_conns_closed();
    }

    async fn serve(&mut self) -> io::Result<()> {
        loop {
            let frame = match self.read_line().await? {
                Line::Frame(frame) => frame,
                Line::Eof => return Ok(()),
                Line::Overflow => {
                    self.socket.write_all(b"ERROR\r\n").await?;
                    return Ok(());
                }
            };
            let req = match std::str::from_utf8(&frame).map_err(|_| Error::ErrParse) {
                Ok(line) => Request::parse(line),
                Err(e) => Err(e),
            };
            let req = match req {
                Ok(req) => req,
                Err(_) => {
                    self.socket.write_all(b"ERROR\r\n").await?;
                    return Ok(());
                }
            };

            let keep_serving = match req.typ {
                RequestType::Stats => self.stats_cmd().await?,
                RequestType::Version => self.version().await?,
                RequestType::Flush => self.flush(&req).await?,
                RequestType::FlushAll => self.flush_all().await?,
                RequestType::Set => self.set(&req).await?,
                RequestType::Get => self.get(&req).await?,
            };
            if !keep_serving {
                return Ok(());
            }
        }
    }

    /// Reads one `\n`-terminated line, stripping the terminator (`\r\n` or
    /// a bare `\n`).
    async fn read_line(&mut self) -> io::Result<Line> {
        loop {
            if let Some(pos) = self.in_buf.iter().position(|&b| b == b'\n') {
                if pos + 1 > MAX_FRAME_SIZE {
                    return Ok(Line::Overflow);
                }
                let mut frame = self.in_buf.split_to(pos + 1);
                frame.truncate(pos);
                if frame.last() == Some(&b'\r') {
                    frame.truncate(frame.len() - 1);
                }
                return Ok(Line::Frame(frame));
            }
            if self.in_buf.len() >= MAX_FRAME_SIZE {
                return Ok(Line::Overflow);
            }
            if self.socket.read_buf(&mut self.in_buf).await? == 0 {
                return Ok(Line::Eof);
            }
        }
    }

    /// Buffers exactly `n` payload bytes, or `None` if the peer vanished.
    async fn read_bytes(&mut self, n: usize) -> io::Result<Option<BytesMut>> {
        while self.in_buf.len() < n {
            if self.socket.read_buf(&mut self.in_buf).await? == 0 {
                return Ok(None);
            }
        }
        Ok(Some(self.in_buf.split_to(n)))
    }

    async fn stats_cmd(&mut self) -> io::Result<bool> {
        let mut out = String::new();
        self.stats.write(&mut out);
        {
            let queues = self.queues.lock();
            for (name, queue) in queues.iter() {
                let mut queue = queue.lock();
                out.push_str(&format!("STAT queue_{}_items {}\r\n", name, queue.count()));
                out.push_str(&format!(
                    "STAT queue_{}_waiters {}\r\n",
                    name,
                    queue.waiter_count()
                ));
                out.push_str(&format!(
                    "STAT queue_{}_open_transactions {}\r\n",
                    name,
                    queue.open_transactions()
                ));
                out.push_str(&format!(
                    "STAT queue_{}_total_flushes {}\r\n",
                    name,
                    queue.total_flushes()
                ));
            }
        }
        out.push_str("END\r\n");
        self.socket.write_all(out.as_bytes()).await?;
        Ok(true)
    }

    async fn version(&mut self) -> io::Result<bool> {
        let reply = concat!("VERSION ", env!("CARGO_PKG_VERSION"), "\r\n");
        self.socket.write_all(reply.as_bytes()).await?;
        Ok(true)
    }

    async fn flush(&mut self, req: &Request) -> io::Result<bool> {
        let result = self.queues.lock().erase(&req.queue, true);
        match result {
            Ok(()) => {
                self.socket.write_all(b"END\r\n").await?;
                Ok(true)
            }
            Err(e) => self.server_error(&e).await,
        }
    }

    async fn flush_all(&mut self) -> io::Result<bool> {
        let result = {
            let queues = self.queues.lock();
            queues
                .iter()
                .try_for_each(|(_, queue)| queue.lock().flush())
        };
        match result {
            Ok(()) => {
                self.socket.write_all(b"Flushed all queues.\r\n").await?;
                Ok(true)
            }
            Err(e) => self.server_error(&e).await,
        }
    }

    async fn set(&mut self, req: &Request) -> io::Result<bool> {
        self.stats.inc_cmd_sets();
        if self.push_stream.is_some() {
            return self.server_error(&Error::ErrAlreadyOpen).await;
        }
        let queue = self.queues.lock().get(&req.queue);
        let queue = match queue {
            Ok(queue) => queue,
            Err(e) => return self.server_error(&e).await,
        };

        let num_bytes = req.num_bytes as usize;
        let chunk_count = ((num_bytes + self.chunk_size - 1) / self.chunk_size).max(1);
        self.push_stream = Some(PushStream::open(&queue, chunk_count as u64));

        let mut written = 0;
        loop {
            let remaining = num_bytes - written;
            if remaining <= self.chunk_size {
                // last chunk: take its trailer too, and vet it before the
                // write that would commit the item
                let payload = match self.read_bytes(remaining + 2).await? {
                    Some(payload) => payload,
                    None => return Ok(false),
                };
                if &payload[remaining..] != b"\r\n" {
                    self.push_stream = None; // dropping the stream cancels the push
                    return self.client_error("bad data chunk").await;
                }
                if let Err(e) = self.push_chunk(&payload[..remaining]) {
                    return self.server_error(&e).await;
                }
                break;
            }
            let payload = match self.read_bytes(self.chunk_size).await? {
                Some(payload) => payload,
                None => return Ok(false),
            };
            if let Err(e) = self.push_chunk(&payload) {
                return self.server_error(&e).await;
            }
            written += self.chunk_size;
        }

        self.push_stream = None; // committed by the final write
        self.stats.inc_items_enqueued();
        self.socket.write_all(b"STORED\r\n").await?;
        Ok(true)
    }

    fn push_chunk(&mut self, chunk: &[u8]) -> crate::error::Result<()> {
        let result = match self.push_stream.as_mut() {
            Some(stream) => stream.write(chunk),
            None => Err(Error::ErrEof),
        };
        if result.is_err() {
            self.push_stream = None; // drop cancels whatever was reserved
        }
        result
    }

    async fn get(&mut self, req: &Request) -> io::Result<bool> {
        self.stats.inc_cmd_gets();

        if req.get_abort && (req.get_open || req.get_close || req.get_peek) {
            return self.client_error("abort must be by itself").await;
        }
        if req.get_open && req.get_peek {
            return self.client_error("cannot open and peek").await;
        }
        if self.pop_stream.is_some() && !(req.get_close || req.get_abort) {
            return self.client_error("close current item first").await;
        }

        if req.get_abort {
            if let Some(mut stream) = self.pop_stream.take() {
                if let Err(e) = stream.close(false) {
                    return self.server_error(&e).await;
                }
            }
            self.socket.write_all(b"END\r\n").await?;
            return Ok(true);
        }

        if req.get_close {
            if let Some(mut stream) = self.pop_stream.take() {
                if let Err(e) = stream.close(true) {
                    return self.server_error(&e).await;
                }
            }
            if !req.get_open {
                self.socket.write_all(b"END\r\n").await?;
                return Ok(true);
            }
        }

        let queue = self.queues.lock().get(&req.queue);
        let queue = match queue {
            Ok(queue) => queue,
            Err(e) => return self.server_error(&e).await,
        };

        let deadline =
            (req.wait_ms > 0).then(|| Instant::now() + Duration::from_millis(req.wait_ms));
        let mut stream = loop {
            if let Some(deadline) = deadline {
                match PopStream::open_or_wait(&queue) {
                    Err(e) => return self.server_error(&e).await,
                    Ok(PopAttempt::Opened(stream)) => break stream,
                    Ok(PopAttempt::MustWait(waiter)) => {
                        if matches!(timeout_at(deadline, waiter).await, Ok(Ok(()))) {
                            continue; // woken; retry under the lock
                        }
                        // deadline passed, but a wake may have landed right
                        // on it; hand out the item if one is still there
                        match PopStream::open(&queue) {
                            Err(e) => return self.server_error(&e).await,
                            Ok(Some(stream)) => break stream,
                            Ok(None) => {
                                self.socket.write_all(b"END\r\n").await?;
                                return Ok(true);
                            }
                        }
                    }
                }
            } else {
                match PopStream::open(&queue) {
                    Err(e) => return self.server_error(&e).await,
                    Ok(Some(stream)) => break stream,
                    Ok(None) => {
                        self.socket.write_all(b"END\r\n").await?;
                        return Ok(true);
                    }
                }
            }
        };

        // stream the item out: header line, then the payload chunk by chunk
        let first = match stream.read() {
            Ok(chunk) => chunk,
            Err(e) => return self.server_error(&e).await,
        };
        let value_line = format!("VALUE {} 0 {}\r\n", req.queue, stream.size());
        self.socket.write_all(value_line.as_bytes()).await?;
        self.socket.write_all(&first).await?;
        while stream.tell() < stream.size() {
            match stream.read() {
                Ok(chunk) => self.socket.write_all(&chunk).await?,
                Err(e) => return self.server_error(&e).await,
            }
        }

        if req.get_open {
            // leave the item reserved; the next GET must /close or /abort
            self.pop_stream = Some(stream);
        } else {
            let erase = !req.get_peek;
            if let Err(e) = stream.close(erase) {
                return self.server_error(&e).await;
            }
        }
        self.stats.inc_items_dequeued();
        self.socket.write_all(b"\r\nEND\r\n").await?;
        Ok(true)
    }

    async fn client_error(&mut self, msg: &str) -> io::Result<bool> {
        let reply = format!("CLIENT_ERROR {msg}\r\n");
        self.socket.write_all(reply.as_bytes()).await?;
        Ok(false)
    }

    async fn server_error(&mut self, e: &Error) -> io::Result<bool> {
        error!("request failed: {e}");
        let reply = format!("SERVER_ERROR {e}\r\n");
        self.socket.write_all(reply.as_bytes()).await?;
        Ok(false)
    }
}
