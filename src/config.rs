//! Client configuration: server list, codec knobs, hashing/failover
//! policy, and the timeouts that bound one engine batch.

use std::time::Duration;

use crate::codec::{Compressor, NoCompressor};
use crate::continuum::ServerSpec;
use crate::hash::HashFn;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 300;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 300;
pub const DEFAULT_RETRY_TIMEOUT_S: u64 = 5;
pub const DEFAULT_COMP_THRESHOLD: usize = 0;

/// Set configuration values for a memcached client. Construct with
/// [`ClientConfig::new`] and chain the `with_*` builder methods.
#[derive(Debug, Clone)]
pub struct ClientConfig<P: Compressor> {
    pub(crate) servers: Vec<ServerSpec>,
    pub(crate) compressor: P,
    pub(crate) compress: bool,
    pub(crate) comp_threshold: usize,
    pub(crate) chunk_size: usize,
    pub(crate) prefix: Vec<u8>,
    pub(crate) hash_fn: HashFn,
    pub(crate) failover: bool,
    pub(crate) set_failover: bool,
    pub(crate) noreply: bool,
    pub(crate) connect_timeout: Duration,
    pub(crate) poll_timeout: Duration,
    pub(crate) retry_timeout: Duration,
    pub(crate) flush_enabled: bool,
    pub(crate) initial_clients: usize,
    pub(crate) max_clients: usize,
    pub(crate) max_growth: usize,
}

impl<P: Compressor> ClientConfig<P> {
    /// Create a new client config from the given memcached servers and
    /// compressor. If no compression is desired, use
    /// [`ClientConfig::new_uncompressed`].
    pub fn new(servers: Vec<ServerSpec>, compressor: P) -> Self {
        Self {
            servers,
            compressor,
            compress: true,
            comp_threshold: DEFAULT_COMP_THRESHOLD,
            chunk_size: crate::codec::DEFAULT_CHUNK_SIZE,
            prefix: Vec::new(),
            hash_fn: HashFn::default(),
            failover: true,
            set_failover: false,
            noreply: false,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            retry_timeout: Duration::from_secs(DEFAULT_RETRY_TIMEOUT_S),
            flush_enabled: false,
            initial_clients: 1,
            max_clients: 8,
            max_growth: 2,
        }
    }

    pub fn with_compress(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    pub fn with_comp_threshold(mut self, bytes: usize) -> Self {
        self.comp_threshold = bytes;
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_hash_fn(mut self, hash_fn: HashFn) -> Self {
        self.hash_fn = hash_fn;
        self
    }

    pub fn with_failover(mut self, enabled: bool) -> Self {
        self.failover = enabled;
        self
    }

    /// Whether write operations (set/add/replace/append/prepend/cas/
    /// incr/decr/delete/touch) retry the continuum's next point when
    /// their primary server is dead. Off by default: writes to a
    /// recently-failed-over server are easy to silently scatter across
    /// the cluster, so this is opt-in independent of `failover` (which
    /// only governs retrieval).
    pub fn with_set_failover(mut self, enabled: bool) -> Self {
        self.set_failover = enabled;
        self
    }

    pub fn with_noreply(mut self, enabled: bool) -> Self {
        self.noreply = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    /// `flush_all` is rejected with `Error::FlushDisabled` unless this
    /// is explicitly set.
    pub fn with_flush_enabled(mut self, enabled: bool) -> Self {
        self.flush_enabled = enabled;
        self
    }

    pub fn with_pool_sizing(mut self, initial: usize, max: usize, max_growth: usize) -> Self {
        self.initial_clients = initial;
        self.max_clients = max;
        self.max_growth = max_growth;
        self
    }
}

impl ClientConfig<NoCompressor> {
    /// Create a new client config with no compression.
    pub fn new_uncompressed(servers: Vec<ServerSpec>) -> Self {
        Self::new(servers, NoCompressor)
    }
}
