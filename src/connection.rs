//! A per-server TCP endpoint: send/recv buffers, health state, and a
//! parser cursor. Owned exclusively by one `Client`; never shared
//! across threads. The engine is its only caller.

use mio::net::TcpStream;
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::{Error, ErrorCode};
use crate::health::Health;
use crate::parser::{Parser, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Init,
    Connecting,
    Open,
    Closed,
}

/// The outcome of one non-blocking send/recv attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoProgress {
    Progressed,
    Blocked,
}

pub struct Connection {
    server_index: usize,
    addr: SocketAddr,
    stream: Option<TcpStream>,
    state: ConnState,
    out: Vec<u8>,
    out_cursor: usize,
    parser: Parser,
    pub health: Health,
    seq: u64,
    connecting_since: Option<Instant>,
}

impl Connection {
    pub fn new(server_index: usize, addr: SocketAddr) -> Self {
        Self {
            server_index,
            addr,
            stream: None,
            state: ConnState::Init,
            out: Vec::new(),
            out_cursor: 0,
            parser: Parser::new(),
            health: Health::default(),
            seq: 0,
            connecting_since: None,
        }
    }

    pub fn server_index(&self) -> usize {
        self.server_index
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Start a non-blocking connect if not already connected. Moves to
    /// `CONNECTING`; the caller must poll for writable to confirm `OPEN`.
    pub fn ensure_connecting(&mut self) -> Result<(), Error> {
        if self.stream.is_some() {
            return Ok(());
        }
        log::debug!("connecting to {}", self.addr);
        let stream = TcpStream::connect(self.addr)?;
        self.stream = Some(stream);
        self.state = ConnState::Connecting;
        self.connecting_since = Some(Instant::now());
        Ok(())
    }

    /// How long this connection has been sitting in `CONNECTING`, if it
    /// is. The engine compares this against `connect_timeout` to enforce
    /// a per-connection connect deadline independent of the batch's
    /// overall `poll_timeout`.
    pub fn connecting_elapsed(&self) -> Option<Duration> {
        self.connecting_since.map(|t| t.elapsed())
    }

    /// Called once the socket reports writable after a `CONNECTING`
    /// attempt: checks `SO_ERROR` and moves to `OPEN` or fails hard.
    pub fn confirm_connected(&mut self) -> Result<(), Error> {
        if self.state != ConnState::Connecting {
            return Ok(());
        }
        let stream = self.stream.as_ref().expect("connecting implies a stream");
        match stream.take_error()? {
            Some(err) => {
                self.state = ConnState::Closed;
                self.stream = None;
                self.connecting_since = None;
                Err(err.into())
            }
            None => {
                self.state = ConnState::Open;
                self.connecting_since = None;
                self.seq += 1;
                log::debug!("connected to {}", self.addr);
                Ok(())
            }
        }
    }

    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    /// Append bytes to the outbound buffer.
    pub fn prepare(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    /// Whether there are unsent bytes queued.
    pub fn has_pending_write(&self) -> bool {
        self.out_cursor < self.out.len()
    }

    /// One non-blocking `send`. Advances the cursor; compacts the
    /// buffer once fully drained.
    pub fn drain_send(&mut self) -> Result<IoProgress, Error> {
        let stream = match &mut self.stream {
            Some(s) => s,
            None => return Ok(IoProgress::Blocked),
        };
        match stream.write(&self.out[self.out_cursor..]) {
            Ok(0) => Err(std::io::Error::new(ErrorKind::WriteZero, "send returned 0").into()),
            Ok(n) => {
                self.out_cursor += n;
                if self.out_cursor == self.out.len() {
                    self.out.clear();
                    self.out_cursor = 0;
                }
                Ok(IoProgress::Progressed)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(IoProgress::Blocked),
            Err(e) => Err(e.into()),
        }
    }

    /// One non-blocking `recv` into the parser's growable in-buffer.
    pub fn drain_recv(&mut self) -> Result<IoProgress, Error> {
        let stream = match &mut self.stream {
            Some(s) => s,
            None => return Ok(IoProgress::Blocked),
        };
        let mut buf = [0_u8; 64 * 1024];
        match stream.read(&mut buf) {
            Ok(0) => Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )
            .into()),
            Ok(n) => {
                self.parser.feed(&buf[..n]);
                Ok(IoProgress::Progressed)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(IoProgress::Blocked),
            Err(e) => Err(e.into()),
        }
    }

    /// Ask the parser to advance over available bytes.
    pub fn parse_step(&mut self) -> Result<Vec<Record>, Error> {
        self.parser.parse_step()
    }

    pub fn mark_soft_fail(&mut self, code: ErrorCode, retry_timeout: Duration) {
        self.health.mark_soft_fail(code, retry_timeout, Instant::now());
    }

    /// Hard-fail and close the socket; a `HARD_FAILED` connection holds
    /// no open socket.
    pub fn mark_hard_fail(&mut self, code: ErrorCode, retry_timeout: Duration) {
        self.health.mark_hard_fail(code, retry_timeout, Instant::now());
        self.close();
    }

    pub fn close(&mut self) {
        self.stream = None;
        self.state = ConnState::Closed;
        self.out.clear();
        self.out_cursor = 0;
        self.connecting_since = None;
    }

    /// Send `quit\r\n`, then close regardless of whether it was flushed.
    pub fn quit(&mut self) {
        if self.state == ConnState::Open {
            self.prepare(b"quit\r\n");
            let _ = self.drain_send();
        }
        self.close();
    }
}
