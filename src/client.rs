//! The high-level client: routes keys onto a continuum of connections,
//! assembles/parses ASCII commands, and owns the per-server connection
//! table. A `Client` is bound to the thread that created it; using it
//! from another thread is a programming error (`Error::ThreadUnsafe`).

use std::collections::HashMap;
use std::net::ToSocketAddrs;
use std::thread::{self, ThreadId};
use std::time::Instant;

use crate::codec::{self, Compressor, FromMemcacheValue, ToMemcacheValue};
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::continuum::Continuum;
use crate::engine::{self, Expect, Job};
use crate::error::{Error, ErrorCode, ProtocolError};
use crate::health::Health;
use crate::key;
use crate::parser::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreVerb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
}

impl StoreVerb {
    fn word(self) -> &'static str {
        match self {
            StoreVerb::Set => "set",
            StoreVerb::Add => "add",
            StoreVerb::Replace => "replace",
            StoreVerb::Append => "append",
            StoreVerb::Prepend => "prepend",
            StoreVerb::Cas => "cas",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreStatus {
    Stored,
    NotStored,
    Exists,
    NotFound,
}

/// The result of a `cas()` call: distinguishes a CAS mismatch from a
/// plain miss, which a boolean cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Stored,
    Exists,
    NotFound,
}

/// A client managing connections to every node in a memcached cluster,
/// routing keys via consistent hashing.
pub struct Client<P: Compressor> {
    config: ClientConfig<P>,
    continuum: Continuum,
    connections: Vec<Connection>,
    owner: ThreadId,
    last_error_code: ErrorCode,
    last_error_message: String,
    /// Set when `fetch_raw` drops a key because it routed to a dead
    /// server with failover off; consumed by the next `record_outcome`
    /// so a call that otherwise succeeds still surfaces `MC_SERVER_ERR`.
    dead_server_drop: bool,
}

impl<P: Compressor> Client<P> {
    /// Build a client from `config`. Connections are established lazily
    /// on first use, not here.
    pub fn new(config: ClientConfig<P>) -> Result<Self, Error> {
        let continuum = Continuum::build(&config.servers);
        let mut connections = Vec::with_capacity(config.servers.len());
        for (i, server) in config.servers.iter().enumerate() {
            let mut addrs = server.address().to_socket_addrs().map_err(Error::Io)?;
            let addr = addrs
                .next()
                .ok_or_else(|| Error::ServerError(format!("could not resolve {}", server.address())))?;
            connections.push(Connection::new(i, addr));
        }
        Ok(Self {
            config,
            continuum,
            connections,
            owner: thread::current().id(),
            last_error_code: ErrorCode::Ok,
            last_error_message: String::new(),
            dead_server_drop: false,
        })
    }

    /// The `ErrorCode` of the most severe error observed during the
    /// most recent call, or `ErrorCode::Ok` if it succeeded.
    pub fn get_last_error(&self) -> ErrorCode {
        self.last_error_code
    }

    /// A human-readable rendering of the most recent error, empty if
    /// the most recent call succeeded.
    pub fn get_last_strerror(&self) -> String {
        self.last_error_message.clone()
    }

    fn record_outcome<T>(&mut self, result: &Result<T, Error>) {
        match result {
            Ok(_) if self.dead_server_drop => {
                self.last_error_code = ErrorCode::McServerErr;
                self.last_error_message = "key dropped: no live server and failover is off".to_string();
            }
            Ok(_) => {
                self.last_error_code = ErrorCode::Ok;
                self.last_error_message.clear();
            }
            Err(e) => {
                self.last_error_code = e.code();
                self.last_error_message = e.to_string();
            }
        }
        self.dead_server_drop = false;
    }

    /// Rebind thread ownership to the calling thread. Used by
    /// [`crate::pool::ClientPool`] when handing a pooled client to a
    /// new lessee.
    pub(crate) fn rebind_owner(&mut self) {
        self.owner = thread::current().id();
    }

    fn check_thread(&self) -> Result<(), Error> {
        if thread::current().id() != self.owner {
            Err(Error::ThreadUnsafe)
        } else {
            Ok(())
        }
    }

    fn health_snapshot(&self) -> Vec<Health> {
        self.connections.iter().map(|c| c.health.clone()).collect()
    }

    fn route_ex(&self, wire_key: &[u8], failover: bool) -> Result<usize, Error> {
        let health = self.health_snapshot();
        self.continuum
            .route_with_failover(wire_key, self.config.hash_fn, &health, Instant::now(), failover)
            .map(|i| i as usize)
            .ok_or(Error::NoLiveServer)
    }

    /// Route for retrieval, governed by `config.failover`.
    fn route(&self, wire_key: &[u8]) -> Result<usize, Error> {
        self.route_ex(wire_key, self.config.failover)
    }

    /// Route for a write operation, governed by `config.set_failover`
    /// rather than `config.failover` — writes don't follow reads onto a
    /// failed-over server unless explicitly opted in.
    fn route_for_write(&self, wire_key: &[u8]) -> Result<usize, Error> {
        self.route_ex(wire_key, self.config.set_failover)
    }

    fn wire_key(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        key::validate(key)?;
        Ok(key::with_prefix(&self.config.prefix, key))
    }

    /// Best-effort server address for `key` ignoring health (the
    /// continuum's first choice).
    pub fn get_host_by_key(&self, key: &[u8]) -> Result<String, Error> {
        let wire_key = self.wire_key(key)?;
        let idx = self.continuum.route(&wire_key, self.config.hash_fn) as usize;
        Ok(self.config.servers[idx].address())
    }

    /// The server address actually used right now, accounting for
    /// failover and current connection health.
    pub fn get_realtime_host_by_key(&self, key: &[u8]) -> Result<String, Error> {
        let wire_key = self.wire_key(key)?;
        let idx = self.route(&wire_key)?;
        Ok(self.config.servers[idx].address())
    }

    // -- retrieval --------------------------------------------------

    /// Fetch `gets`-style records for `wire_keys`, keyed by the
    /// (still-prefixed) wire key. Keys with no live server are silently
    /// absent, not an error.
    fn fetch_raw(&mut self, wire_keys: &[Vec<u8>]) -> Result<HashMap<Vec<u8>, (Vec<u8>, u16, Option<u64>)>, Error> {
        if wire_keys.is_empty() {
            return Ok(HashMap::new());
        }
        let health = self.health_snapshot();
        let now = Instant::now();
        let mut per_conn: HashMap<usize, Vec<&Vec<u8>>> = HashMap::new();
        for wk in wire_keys {
            match self.continuum.route_with_failover(wk, self.config.hash_fn, &health, now, self.config.failover) {
                Some(idx) => {
                    per_conn.entry(idx as usize).or_default().push(wk);
                }
                None => {
                    // Dead server, failover off: the key is silently
                    // absent from the result, but the call still
                    // surfaces MC_SERVER_ERR via `record_outcome`.
                    self.dead_server_drop = true;
                }
            }
        }

        let mut jobs = Vec::with_capacity(per_conn.len());
        for (idx, keys) in &per_conn {
            let mut cmd = b"gets".to_vec();
            for k in keys {
                cmd.push(b' ');
                cmd.extend_from_slice(k.as_slice());
            }
            cmd.extend_from_slice(b"\r\n");
            self.connections[*idx].prepare(&cmd);
            jobs.push(Job { index: *idx, expect: Expect::UntilEnd });
        }

        let result = engine::run(&mut self.connections, &jobs, self.config.connect_timeout, self.config.poll_timeout, self.config.retry_timeout)?;
        let mut out = HashMap::new();
        for outcome in result.outcomes.into_values() {
            for record in outcome.records {
                if let Record::Value { key, flags, cas, data } = record {
                    out.insert(key, (data, flags, cas));
                }
            }
        }
        Ok(out)
    }

    /// Resolve `user_keys` end to end: fetch, reassemble chunked values
    /// (issuing a second, inner `gets` for the derived child keys when
    /// needed), and decompress. Returns raw bytes keyed by the
    /// *user-supplied* key (prefix stripped).
    fn get_multi_raw(
        &mut self,
        user_keys: &[Vec<u8>],
    ) -> Result<HashMap<Vec<u8>, (Vec<u8>, u16, Option<u64>)>, Error> {
        let prefix = self.config.prefix.clone();
        let mut wire_keys = Vec::with_capacity(user_keys.len());
        for k in user_keys {
            wire_keys.push(self.wire_key(k)?);
        }

        let primary = self.fetch_raw(&wire_keys)?;

        let mut child_wire_keys = Vec::new();
        for (wire_key, (bytes, flags, _)) in &primary {
            if flags & codec::FLAG_CHUNKED != 0 {
                if let Some(count) = codec::chunk_count(bytes) {
                    for i in 0..count {
                        child_wire_keys.push(codec::chunk_key(wire_key, i));
                    }
                }
            }
        }
        let children = if child_wire_keys.is_empty() {
            HashMap::new()
        } else {
            self.fetch_raw(&child_wire_keys)?
        };

        let mut out = HashMap::new();
        for (wire_key, (bytes, flags, cas)) in primary {
            let mut get_child =
                |i: usize| children.get(&codec::chunk_key(&wire_key, i)).map(|(b, _, _)| b.clone());
            if let Some((data, inner_flags)) =
                codec::assemble(&bytes, flags, self.config.compressor, &mut get_child)?
            {
                let user_key = key::strip_prefix(&prefix, &wire_key).to_vec();
                out.insert(user_key, (data, inner_flags, cas));
            }
        }
        Ok(out)
    }

    /// Get a single value. `None` on miss.
    pub fn get<V: FromMemcacheValue>(&mut self, key: &[u8]) -> Result<Option<V>, Error> {
        let result = (|| {
            self.check_thread()?;
            let mut map = self.get_multi_raw(std::slice::from_ref(&key.to_vec()))?;
            match map.remove(key) {
                Some((bytes, flags, _)) => Ok(Some(V::from_memcache(&bytes, flags)?)),
                None => Ok(None),
            }
        })();
        self.record_outcome(&result);
        result
    }

    /// Get a single value along with its CAS token.
    pub fn gets<V: FromMemcacheValue>(&mut self, key: &[u8]) -> Result<Option<(V, u64)>, Error> {
        let result = (|| {
            self.check_thread()?;
            let mut map = self.get_multi_raw(std::slice::from_ref(&key.to_vec()))?;
            match map.remove(key) {
                Some((bytes, flags, Some(cas))) => Ok(Some((V::from_memcache(&bytes, flags)?, cas))),
                Some((_, _, None)) => Err(Error::Protocol(ProtocolError::Malformed("gets missing cas".into()))),
                None => Ok(None),
            }
        })();
        self.record_outcome(&result);
        result
    }

    /// Get every found key among `keys`; missing keys are simply absent.
    pub fn get_multi<V: FromMemcacheValue>(&mut self, keys: &[Vec<u8>]) -> Result<HashMap<Vec<u8>, V>, Error> {
        let result = (|| {
            self.check_thread()?;
            let raw = self.get_multi_raw(keys)?;
            let mut out = HashMap::with_capacity(raw.len());
            for (key, (bytes, flags, _)) in raw {
                out.insert(key, V::from_memcache(&bytes, flags)?);
            }
            Ok(out)
        })();
        self.record_outcome(&result);
        result
    }

    // -- storage ------------------------------------------------------

    fn store<V: ToMemcacheValue + ?Sized>(
        &mut self,
        verb: StoreVerb,
        key: &[u8],
        value: &V,
        exptime: u32,
        cas: Option<u64>,
    ) -> Result<StoreStatus, Error> {
        self.check_thread()?;
        let wire_key = self.wire_key(key)?;
        let encoded = codec::encode(
            value,
            self.config.comp_threshold,
            self.config.compress,
            self.config.chunk_size,
            self.config.compressor,
        )?;

        if let Some(chunks) = &encoded.chunks {
            for (i, chunk) in chunks.iter().enumerate() {
                let child_key = codec::chunk_key(&wire_key, i);
                let status = self.store_single(&child_key, 0, exptime, chunk, StoreVerb::Set, None)?;
                if status != StoreStatus::Stored {
                    return Ok(status);
                }
            }
        }
        self.store_single(&wire_key, encoded.flags, exptime, &encoded.bytes, verb, cas)
    }

    fn store_single(
        &mut self,
        wire_key: &[u8],
        flags: u16,
        exptime: u32,
        bytes: &[u8],
        verb: StoreVerb,
        cas: Option<u64>,
    ) -> Result<StoreStatus, Error> {
        let idx = self.route_for_write(wire_key)?;
        let mut cmd = Vec::with_capacity(wire_key.len() + bytes.len() + 32);
        cmd.extend_from_slice(verb.word().as_bytes());
        cmd.push(b' ');
        cmd.extend_from_slice(wire_key);
        cmd.extend_from_slice(format!(" {} {} {}", flags, exptime, bytes.len()).as_bytes());
        if let Some(c) = cas {
            cmd.extend_from_slice(format!(" {}", c).as_bytes());
        }
        if self.config.noreply {
            cmd.extend_from_slice(b" noreply");
        }
        cmd.extend_from_slice(b"\r\n");
        cmd.extend_from_slice(bytes);
        cmd.extend_from_slice(b"\r\n");

        self.connections[idx].prepare(&cmd);
        let expect = if self.config.noreply { Expect::NoReply } else { Expect::Count(1) };
        let result =
            engine::run(&mut self.connections, &[Job { index: idx, expect }], self.config.connect_timeout, self.config.poll_timeout, self.config.retry_timeout)?;

        if self.config.noreply {
            return Ok(StoreStatus::Stored);
        }
        let outcome = &result.outcomes[&idx];
        if let Some(code) = outcome.failed {
            return Err(Error::ServerError(format!("{} failed: {}", verb.word(), code)));
        }
        if outcome.timed_out {
            return Err(Error::Timeout);
        }
        match outcome.records.first() {
            Some(Record::Stored) => Ok(StoreStatus::Stored),
            Some(Record::NotStored) => Ok(StoreStatus::NotStored),
            Some(Record::Exists) => Ok(StoreStatus::Exists),
            Some(Record::NotFound) => Ok(StoreStatus::NotFound),
            Some(Record::ServerError(msg)) => Err(Error::ServerError(msg.clone())),
            other => Err(Error::Protocol(ProtocolError::Malformed(format!(
                "unexpected {} reply: {:?}",
                verb.word(),
                other
            )))),
        }
    }

    /// Unconditionally store `value` under `key`.
    pub fn set<V: ToMemcacheValue + ?Sized>(&mut self, key: &[u8], value: &V, exptime: u32) -> Result<(), Error> {
        let result = self.store(StoreVerb::Set, key, value, exptime, None).and_then(|s| match s {
            StoreStatus::Stored => Ok(()),
            other => Err(Error::ServerError(format!("unexpected set status: {:?}", other))),
        });
        self.record_outcome(&result);
        result
    }

    /// Store only if `key` does not already exist.
    pub fn add<V: ToMemcacheValue + ?Sized>(&mut self, key: &[u8], value: &V, exptime: u32) -> Result<bool, Error> {
        let result = self.store(StoreVerb::Add, key, value, exptime, None).and_then(|s| match s {
            StoreStatus::Stored => Ok(true),
            StoreStatus::NotStored => Ok(false),
            other => Err(Error::ServerError(format!("unexpected add status: {:?}", other))),
        });
        self.record_outcome(&result);
        result
    }

    /// Store only if `key` already exists.
    pub fn replace<V: ToMemcacheValue + ?Sized>(&mut self, key: &[u8], value: &V, exptime: u32) -> Result<bool, Error> {
        let result = self.store(StoreVerb::Replace, key, value, exptime, None).and_then(|s| match s {
            StoreStatus::Stored => Ok(true),
            StoreStatus::NotStored => Ok(false),
            other => Err(Error::ServerError(format!("unexpected replace status: {:?}", other))),
        });
        self.record_outcome(&result);
        result
    }

    /// Append `value` to the bytes already stored under `key`.
    pub fn append<V: ToMemcacheValue + ?Sized>(&mut self, key: &[u8], value: &V) -> Result<bool, Error> {
        let result = self.store(StoreVerb::Append, key, value, 0, None).and_then(|s| match s {
            StoreStatus::Stored => Ok(true),
            StoreStatus::NotStored => Ok(false),
            other => Err(Error::ServerError(format!("unexpected append status: {:?}", other))),
        });
        self.record_outcome(&result);
        result
    }

    /// Prepend `value` to the bytes already stored under `key`.
    pub fn prepend<V: ToMemcacheValue + ?Sized>(&mut self, key: &[u8], value: &V) -> Result<bool, Error> {
        let result = self.store(StoreVerb::Prepend, key, value, 0, None).and_then(|s| match s {
            StoreStatus::Stored => Ok(true),
            StoreStatus::NotStored => Ok(false),
            other => Err(Error::ServerError(format!("unexpected prepend status: {:?}", other))),
        });
        self.record_outcome(&result);
        result
    }

    /// Store only if the stored value's CAS token still matches `cas`.
    pub fn cas<V: ToMemcacheValue + ?Sized>(
        &mut self,
        key: &[u8],
        value: &V,
        exptime: u32,
        cas: u64,
    ) -> Result<CasOutcome, Error> {
        let result = self.store(StoreVerb::Cas, key, value, exptime, Some(cas)).and_then(|s| match s {
            StoreStatus::Stored => Ok(CasOutcome::Stored),
            StoreStatus::Exists => Ok(CasOutcome::Exists),
            StoreStatus::NotFound => Ok(CasOutcome::NotFound),
            other => Err(Error::ServerError(format!("unexpected cas status: {:?}", other))),
        });
        self.record_outcome(&result);
        result
    }

    // -- counters, delete, touch ---------------------------------------

    fn incr_decr(&mut self, key: &[u8], delta: u64, decr: bool) -> Result<Option<u64>, Error> {
        self.check_thread()?;
        let wire_key = self.wire_key(key)?;
        let idx = self.route_for_write(&wire_key)?;
        let verb = if decr { "decr" } else { "incr" };

        let mut cmd = Vec::new();
        cmd.extend_from_slice(verb.as_bytes());
        cmd.push(b' ');
        cmd.extend_from_slice(&wire_key);
        cmd.extend_from_slice(format!(" {}", delta).as_bytes());
        if self.config.noreply {
            cmd.extend_from_slice(b" noreply");
        }
        cmd.extend_from_slice(b"\r\n");

        self.connections[idx].prepare(&cmd);
        let expect = if self.config.noreply { Expect::NoReply } else { Expect::Count(1) };
        let result =
            engine::run(&mut self.connections, &[Job { index: idx, expect }], self.config.connect_timeout, self.config.poll_timeout, self.config.retry_timeout)?;

        if self.config.noreply {
            return Ok(None);
        }
        let outcome = &result.outcomes[&idx];
        if let Some(code) = outcome.failed {
            return Err(Error::ServerError(format!("{} failed: {}", verb, code)));
        }
        if outcome.timed_out {
            return Err(Error::Timeout);
        }
        match outcome.records.first() {
            Some(Record::IncrDecr(v)) => Ok(Some(*v)),
            Some(Record::NotFound) => Ok(None),
            Some(Record::ClientError(msg)) => Err(Error::ServerError(msg.clone())),
            other => Err(Error::Protocol(ProtocolError::Malformed(format!("unexpected {} reply: {:?}", verb, other)))),
        }
    }

    /// Increment the number stored at `key`. `None` if `key` is absent.
    pub fn incr(&mut self, key: &[u8], delta: u64) -> Result<Option<u64>, Error> {
        let result = self.incr_decr(key, delta, false);
        self.record_outcome(&result);
        result
    }

    /// Decrement the number stored at `key`, floored at zero. `None` if
    /// `key` is absent.
    pub fn decr(&mut self, key: &[u8], delta: u64) -> Result<Option<u64>, Error> {
        let result = self.incr_decr(key, delta, true);
        self.record_outcome(&result);
        result
    }

    /// Delete `key`. Returns `false` if it was not present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool, Error> {
        let result = (|| {
            self.check_thread()?;
            let wire_key = self.wire_key(key)?;
            let idx = self.route_for_write(&wire_key)?;

            let mut cmd = b"delete ".to_vec();
            cmd.extend_from_slice(&wire_key);
            if self.config.noreply {
                cmd.extend_from_slice(b" noreply");
            }
            cmd.extend_from_slice(b"\r\n");

            self.connections[idx].prepare(&cmd);
            let expect = if self.config.noreply { Expect::NoReply } else { Expect::Count(1) };
            let engine_result = engine::run(
                &mut self.connections,
                &[Job { index: idx, expect }],
                self.config.connect_timeout,
                self.config.poll_timeout,
                self.config.retry_timeout,
            )?;

            if self.config.noreply {
                return Ok(true);
            }
            let outcome = &engine_result.outcomes[&idx];
            if let Some(code) = outcome.failed {
                return Err(Error::ServerError(format!("delete failed: {}", code)));
            }
            if outcome.timed_out {
                return Err(Error::Timeout);
            }
            match outcome.records.first() {
                Some(Record::Deleted) => Ok(true),
                Some(Record::NotFound) => Ok(false),
                other => {
                    Err(Error::Protocol(ProtocolError::Malformed(format!("unexpected delete reply: {:?}", other))))
                }
            }
        })();
        self.record_outcome(&result);
        result
    }

    /// Reset `key`'s expiration without altering its value. Returns
    /// `false` if it was not present.
    pub fn touch(&mut self, key: &[u8], exptime: u32) -> Result<bool, Error> {
        let result = (|| {
            self.check_thread()?;
            let wire_key = self.wire_key(key)?;
            let idx = self.route_for_write(&wire_key)?;

            let mut cmd = b"touch ".to_vec();
            cmd.extend_from_slice(&wire_key);
            cmd.extend_from_slice(format!(" {}", exptime).as_bytes());
            if self.config.noreply {
                cmd.extend_from_slice(b" noreply");
            }
            cmd.extend_from_slice(b"\r\n");

            self.connections[idx].prepare(&cmd);
            let expect = if self.config.noreply { Expect::NoReply } else { Expect::Count(1) };
            let engine_result = engine::run(
                &mut self.connections,
                &[Job { index: idx, expect }],
                self.config.connect_timeout,
                self.config.poll_timeout,
                self.config.retry_timeout,
            )?;

            if self.config.noreply {
                return Ok(true);
            }
            let outcome = &engine_result.outcomes[&idx];
            if let Some(code) = outcome.failed {
                return Err(Error::ServerError(format!("touch failed: {}", code)));
            }
            if outcome.timed_out {
                return Err(Error::Timeout);
            }
            match outcome.records.first() {
                Some(Record::Touched) => Ok(true),
                Some(Record::NotFound) => Ok(false),
                other => {
                    Err(Error::Protocol(ProtocolError::Malformed(format!("unexpected touch reply: {:?}", other))))
                }
            }
        })();
        self.record_outcome(&result);
        result
    }

    // -- cluster-wide ops -----------------------------------------------

    /// `version` against every configured server, keyed by server label.
    pub fn version(&mut self) -> Result<HashMap<String, String>, Error> {
        let result = (|| {
            self.check_thread()?;
            let jobs: Vec<Job> = (0..self.connections.len())
                .map(|idx| {
                    self.connections[idx].prepare(b"version\r\n");
                    Job { index: idx, expect: Expect::Count(1) }
                })
                .collect();
            let engine_result =
                engine::run(&mut self.connections, &jobs, self.config.connect_timeout, self.config.poll_timeout, self.config.retry_timeout)?;

            let mut out = HashMap::new();
            for (idx, outcome) in engine_result.outcomes {
                if let Some(Record::Version(v)) = outcome.records.into_iter().next() {
                    out.insert(self.config.servers[idx].label(), v);
                }
            }
            Ok(out)
        })();
        self.record_outcome(&result);
        result
    }

    /// `stats` against every configured server, keyed by server label
    /// then stat name.
    pub fn stats(&mut self) -> Result<HashMap<String, HashMap<String, String>>, Error> {
        let result = (|| {
            self.check_thread()?;
            let jobs: Vec<Job> = (0..self.connections.len())
                .map(|idx| {
                    self.connections[idx].prepare(b"stats\r\n");
                    Job { index: idx, expect: Expect::UntilEnd }
                })
                .collect();
            let engine_result =
                engine::run(&mut self.connections, &jobs, self.config.connect_timeout, self.config.poll_timeout, self.config.retry_timeout)?;

            let mut out = HashMap::new();
            for (idx, outcome) in engine_result.outcomes {
                let mut server_stats = HashMap::new();
                for record in outcome.records {
                    if let Record::Stat(k, v) = record {
                        server_stats.insert(k, v);
                    }
                }
                out.insert(self.config.servers[idx].label(), server_stats);
            }
            Ok(out)
        })();
        self.record_outcome(&result);
        result
    }

    /// Wipe every server's cache. Requires `flush_enabled` in config.
    pub fn flush_all(&mut self) -> Result<(), Error> {
        let result = (|| {
            self.check_thread()?;
            if !self.config.flush_enabled {
                return Err(Error::FlushDisabled);
            }
            let jobs: Vec<Job> = (0..self.connections.len())
                .map(|idx| {
                    self.connections[idx].prepare(b"flush_all\r\n");
                    Job { index: idx, expect: Expect::Count(1) }
                })
                .collect();
            let engine_result =
                engine::run(&mut self.connections, &jobs, self.config.connect_timeout, self.config.poll_timeout, self.config.retry_timeout)?;
            for outcome in engine_result.outcomes.values() {
                if let Some(code) = outcome.failed {
                    return Err(Error::ServerError(format!("flush_all failed: {}", code)));
                }
            }
            Ok(())
        })();
        self.record_outcome(&result);
        result
    }

    /// Gracefully close every connection, sending `quit` where open.
    pub fn quit(&mut self) -> Result<(), Error> {
        let result = self.check_thread().map(|()| {
            for conn in &mut self.connections {
                conn.quit();
            }
        });
        self.record_outcome(&result);
        result
    }
}
