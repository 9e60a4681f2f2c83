//! The request engine: drives non-blocking I/O across every active
//! connection with a single readiness multiplexer, parses interleaved
//! ASCII responses, and gathers per-connection response records while
//! tolerating per-server error/timeout. This is the core of the crate.

use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::connection::{Connection, IoProgress};
use crate::error::{Error, ErrorCode};
use crate::parser::Record;

/// How many response records a connection's queued requests expect
/// before it is considered done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Retrieval: done when an `END` record is observed.
    UntilEnd,
    /// Storage/delete/incr/touch/version: done after N status replies.
    Count(usize),
    /// `noreply` was requested: done as soon as the send buffer drains.
    NoReply,
}

/// One connection's outstanding work for this batch. The caller has
/// already queued bytes onto `connections[index]` via `prepare()`.
pub struct Job {
    pub index: usize,
    pub expect: Expect,
}

/// What the engine collected for one connection by the time the batch
/// finished (fully, by timeout, or by fatal error).
#[derive(Debug, Default)]
pub struct ConnOutcome {
    pub records: Vec<Record>,
    pub timed_out: bool,
    pub failed: Option<ErrorCode>,
}

pub struct EngineResult {
    pub outcomes: HashMap<usize, ConnOutcome>,
}

struct JobState {
    expect: Expect,
    seen_end: bool,
    status_count: usize,
    done: bool,
}

impl JobState {
    fn new(expect: Expect) -> Self {
        Self {
            expect,
            seen_end: false,
            status_count: 0,
            done: false,
        }
    }

    fn note_records(&mut self, records: &[Record]) {
        match self.expect {
            Expect::UntilEnd => {
                if records.iter().any(|r| matches!(r, Record::End)) {
                    self.seen_end = true;
                    self.done = true;
                }
            }
            Expect::Count(n) => {
                self.status_count += records.len();
                if self.status_count >= n {
                    self.done = true;
                }
            }
            Expect::NoReply => {}
        }
    }

    fn note_send_flushed(&mut self) {
        if matches!(self.expect, Expect::NoReply) {
            self.done = true;
        }
    }
}

/// Drive every job's connection to completion: register with the
/// multiplexer, send/recv/parse in a loop, and stop once every job is
/// done or `poll_timeout` has elapsed.
///
/// A connection still in `CONNECTING` is additionally bounded by
/// `connect_timeout`, checked independently of the overall
/// `poll_timeout` deadline: a slow-to-accept host is hard-failed with
/// `CONN_POLL_ERR` as soon as its own connect deadline elapses, even if
/// the batch's `poll_timeout` has plenty of time left.
///
/// On a per-connection timeout the connection is marked `SOFT_FAILED`
/// with `POLL_TIMEOUT_ERR` and buffered state is dropped; on a fatal
/// per-connection error it is marked `HARD_FAILED` and closed. Both
/// leave the other connections' results intact (partial results).
pub fn run(
    connections: &mut [Connection],
    jobs: &[Job],
    connect_timeout: Duration,
    poll_timeout: Duration,
    retry_timeout: Duration,
) -> Result<EngineResult, Error> {
    let deadline = Instant::now() + poll_timeout;
    let mut poll = Poll::new().map_err(Error::Poll)?;
    let mut events = Events::with_capacity(jobs.len().max(1) * 2);

    let mut states: HashMap<usize, JobState> =
        jobs.iter().map(|j| (j.index, JobState::new(j.expect))).collect();
    let mut outcomes: HashMap<usize, ConnOutcome> =
        jobs.iter().map(|j| (j.index, ConnOutcome::default())).collect();

    // Establish connections (lazily connect) and register everyone.
    for job in jobs {
        let conn = &mut connections[job.index];
        if !conn.is_open() {
            if let Err(err) = conn.ensure_connecting() {
                conn.mark_hard_fail(ErrorCode::ConnPollErr, retry_timeout);
                outcomes.get_mut(&job.index).unwrap().failed = Some(ErrorCode::ConnPollErr);
                states.get_mut(&job.index).unwrap().done = true;
                let _ = err;
                continue;
            }
        }
        register(&mut poll, conn, Token(job.index))?;
    }

    loop {
        if states.values().all(|s| s.done) {
            break;
        }

        // A connection stuck in CONNECTING past its own connect deadline
        // is hard-failed here, independent of `poll_timeout`.
        for job in jobs {
            if states.get(&job.index).map(|s| s.done).unwrap_or(true) {
                continue;
            }
            let conn = &mut connections[job.index];
            if conn.state() == crate::connection::ConnState::Connecting {
                if conn.connecting_elapsed().map(|e| e >= connect_timeout).unwrap_or(false) {
                    fail_connect_timeout(conn, &mut outcomes, &mut states, job.index, retry_timeout);
                }
            }
        }
        if states.values().all(|s| s.done) {
            break;
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let mut wait = deadline - now;
        for job in jobs {
            if states.get(&job.index).map(|s| s.done).unwrap_or(true) {
                continue;
            }
            let conn = &connections[job.index];
            if conn.state() == crate::connection::ConnState::Connecting {
                if let Some(elapsed) = conn.connecting_elapsed() {
                    let remaining = connect_timeout.saturating_sub(elapsed);
                    if remaining < wait {
                        wait = remaining;
                    }
                }
            }
        }
        if let Err(err) = poll.poll(&mut events, Some(wait)) {
            return Err(Error::Poll(err));
        }

        for event in events.iter() {
            let index = event.token().0;
            if states.get(&index).map(|s| s.done).unwrap_or(true) {
                continue;
            }
            let conn = &mut connections[index];

            if conn.state() == crate::connection::ConnState::Connecting {
                if let Err(err) = conn.confirm_connected() {
                    fail_connection(conn, &mut outcomes, &mut states, index, err, retry_timeout);
                    continue;
                }
                reregister(&mut poll, conn, Token(index))?;
            }

            if event.is_writable() && conn.has_pending_write() {
                loop {
                    match conn.drain_send() {
                        Ok(IoProgress::Progressed) => {
                            if !conn.has_pending_write() {
                                states.get_mut(&index).unwrap().note_send_flushed();
                                break;
                            }
                        }
                        Ok(IoProgress::Blocked) => break,
                        Err(err) => {
                            fail_connection(conn, &mut outcomes, &mut states, index, err, retry_timeout);
                            break;
                        }
                    }
                }
                if !states.contains_key(&index) || states[&index].done {
                    continue;
                }
                reregister(&mut poll, conn, Token(index))?;
            }

            if event.is_readable() {
                let mut progressed = true;
                while progressed {
                    match conn.drain_recv() {
                        Ok(IoProgress::Progressed) => progressed = true,
                        Ok(IoProgress::Blocked) => progressed = false,
                        Err(err) => {
                            fail_connection(conn, &mut outcomes, &mut states, index, err, retry_timeout);
                            progressed = false;
                        }
                    }
                }
                if states.get(&index).map(|s| s.done).unwrap_or(true)
                    && outcomes.get(&index).map(|o| o.failed.is_some()).unwrap_or(false)
                {
                    continue;
                }
                match conn.parse_step() {
                    Ok(records) => {
                        if let Some(state) = states.get_mut(&index) {
                            state.note_records(&records);
                        }
                        outcomes.get_mut(&index).unwrap().records.extend(records);
                    }
                    Err(err) => {
                        fail_connection(conn, &mut outcomes, &mut states, index, err, retry_timeout);
                    }
                }
            }
        }
    }

    // Anything not done at this point timed out.
    for job in jobs {
        let state = states.get(&job.index).unwrap();
        if !state.done {
            let conn = &mut connections[job.index];
            conn.mark_soft_fail(ErrorCode::PollTimeoutErr, retry_timeout);
            let outcome = outcomes.get_mut(&job.index).unwrap();
            outcome.timed_out = true;
        }
    }

    Ok(EngineResult { outcomes })
}

fn fail_connection(
    conn: &mut Connection,
    outcomes: &mut HashMap<usize, ConnOutcome>,
    states: &mut HashMap<usize, JobState>,
    index: usize,
    err: Error,
    retry_timeout: Duration,
) {
    let code = err.code();
    log::warn!("connection {} failed: {}", index, err);
    conn.mark_hard_fail(code, retry_timeout);
    if let Some(outcome) = outcomes.get_mut(&index) {
        outcome.failed = Some(code);
    }
    if let Some(state) = states.get_mut(&index) {
        state.done = true;
    }
}

fn fail_connect_timeout(
    conn: &mut Connection,
    outcomes: &mut HashMap<usize, ConnOutcome>,
    states: &mut HashMap<usize, JobState>,
    index: usize,
    retry_timeout: Duration,
) {
    log::warn!("connection {} failed: connect_timeout elapsed", index);
    conn.mark_hard_fail(ErrorCode::ConnPollErr, retry_timeout);
    if let Some(outcome) = outcomes.get_mut(&index) {
        outcome.failed = Some(ErrorCode::ConnPollErr);
    }
    if let Some(state) = states.get_mut(&index) {
        state.done = true;
    }
}

fn register(poll: &mut Poll, conn: &mut Connection, token: Token) -> Result<(), Error> {
    let interest = interests_for(conn);
    if let Some(stream) = conn.stream_mut() {
        poll.registry()
            .register(stream, token, interest)
            .map_err(Error::Poll)?;
    }
    Ok(())
}

fn reregister(poll: &mut Poll, conn: &mut Connection, token: Token) -> Result<(), Error> {
    let interest = interests_for(conn);
    if let Some(stream) = conn.stream_mut() {
        poll.registry()
            .reregister(stream, token, interest)
            .map_err(Error::Poll)?;
    }
    Ok(())
}

fn interests_for(conn: &Connection) -> Interest {
    if conn.has_pending_write() || conn.state() == crate::connection::ConnState::Connecting {
        Interest::READABLE | Interest::WRITABLE
    } else {
        Interest::READABLE
    }
}
