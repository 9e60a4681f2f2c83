//! Ketama-style consistent hashing: a sorted ring of virtual points
//! mapping keys to server indices, with alias labels and failover.

use crate::hash::{md5_digest, HashFn};
use crate::health::{Health, HealthState};
use std::time::Instant;

const BUCKETS_PER_SERVER: usize = 40;
const POINTS_PER_BUCKET: usize = 4;

/// A memcached server endpoint. Hashing uses `alias` if present,
/// otherwise `host[:port]` (port omitted when it is the default 11211).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub host: String,
    pub port: u16,
    pub alias: Option<String>,
}

pub const DEFAULT_PORT: u16 = 11211;

impl ServerSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Parse a `host[:port][ alias]` string, e.g. `"myhost:11213"` or
    /// `"localhost"` (defaults to port 11211).
    pub fn parse(spec: &str) -> Self {
        let mut parts = spec.splitn(2, ' ');
        let addr = parts.next().unwrap_or("");
        let alias = parts.next().map(|s| s.to_string());

        let (host, port) = match addr.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse().unwrap_or(DEFAULT_PORT)),
            None => (addr.to_string(), DEFAULT_PORT),
        };

        Self { host, port, alias }
    }

    /// The string used for hashing: `alias` if set, else `host[:port]`
    /// with the default port elided.
    pub fn label(&self) -> String {
        if let Some(alias) = &self.alias {
            alias.clone()
        } else if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The address actually dialed: always `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A single virtual point on the ring.
#[derive(Debug, Clone, Copy)]
struct Point {
    point: u32,
    server_index: u16,
}

/// A sorted array of ring points, immutable once built. Reshuffled only
/// when the server list changes.
#[derive(Debug, Clone)]
pub struct Continuum {
    points: Vec<Point>,
    server_count: usize,
}

impl Continuum {
    /// Build the continuum for `servers`: 40 buckets x 4 points per
    /// server, each point derived from the MD5 digest of
    /// `"<label>-<bucket>"`, grouped little-endian into 4 u32s per
    /// digest. Ties are broken by insertion order (stable sort).
    pub fn build(servers: &[ServerSpec]) -> Self {
        let mut points = Vec::with_capacity(servers.len() * BUCKETS_PER_SERVER * POINTS_PER_BUCKET);

        for (server_index, server) in servers.iter().enumerate() {
            let label = server.label();
            for bucket in 0..BUCKETS_PER_SERVER {
                let digest = md5_digest(format!("{}-{}", label, bucket).as_bytes());
                for p in 0..POINTS_PER_BUCKET {
                    let base = p * 4;
                    let point = u32::from_le_bytes([
                        digest[base],
                        digest[base + 1],
                        digest[base + 2],
                        digest[base + 3],
                    ]);
                    points.push(Point {
                        point,
                        server_index: server_index as u16,
                    });
                }
            }
        }

        points.sort_by_key(|p| p.point);

        Self {
            points,
            server_count: servers.len(),
        }
    }

    fn server_count(&self) -> usize {
        self.server_count
    }

    /// Smallest point >= hash, wrapping to index 0 on overflow.
    fn index_for_hash(&self, hash: u32) -> usize {
        match self.points.binary_search_by_key(&hash, |p| p.point) {
            Ok(i) => i,
            Err(i) => {
                if i == self.points.len() {
                    0
                } else {
                    i
                }
            }
        }
    }

    /// The router's first choice for `key`, regardless of server health.
    pub fn route(&self, key: &[u8], hash_fn: HashFn) -> u16 {
        let hash = hash_fn.hash(key);
        let idx = self.index_for_hash(hash);
        self.points[idx].server_index
    }

    /// The actually-chosen server under failover: advance clockwise
    /// skipping entries whose health is dead (`now < dead_until`),
    /// giving up after `server_count` probes.
    pub fn route_with_failover(
        &self,
        key: &[u8],
        hash_fn: HashFn,
        health: &[Health],
        now: Instant,
        failover: bool,
    ) -> Option<u16> {
        let hash = hash_fn.hash(key);
        let start = self.index_for_hash(hash);
        let first = self.points[start].server_index;

        if !failover {
            return if is_live(&health[first as usize], now) {
                Some(first)
            } else {
                None
            };
        }

        let len = self.points.len();
        for probe in 0..self.server_count().max(1) {
            let idx = (start + probe) % len.max(1);
            let candidate = self.points[idx].server_index;
            if is_live(&health[candidate as usize], now) {
                return Some(candidate);
            }
        }
        None
    }
}

fn is_live(health: &Health, now: Instant) -> bool {
    match health.state {
        HealthState::Ok => true,
        HealthState::SoftFailed | HealthState::HardFailed => {
            health.dead_until.map(|d| now >= d).unwrap_or(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers() -> Vec<ServerSpec> {
        vec![
            ServerSpec::parse("localhost"),
            ServerSpec::parse("myhost:11211"),
            ServerSpec::parse("127.0.0.1:11212"),
            ServerSpec::parse("myhost:11213"),
        ]
    }

    #[test]
    fn test_parse() {
        let s = ServerSpec::parse("myhost:11213");
        assert_eq!("myhost", s.host);
        assert_eq!(11213, s.port);
        assert_eq!(None, s.alias);
        assert_eq!("myhost:11213", s.label());

        let s = ServerSpec::parse("localhost");
        assert_eq!(DEFAULT_PORT, s.port);
        assert_eq!("localhost", s.label());
    }

    #[test]
    fn test_stable_across_runs() {
        let servers = servers();
        let c1 = Continuum::build(&servers);
        let c2 = Continuum::build(&servers);
        for key in ["a", "b", "test:20000", "test:60000"] {
            assert_eq!(
                c1.route(key.as_bytes(), HashFn::Md5),
                c2.route(key.as_bytes(), HashFn::Md5)
            );
        }
    }

    #[test]
    fn test_ketama_scenario() {
        // spec.md 8.6
        let servers = servers();
        let continuum = Continuum::build(&servers);
        let i = continuum.route(b"test:60000", HashFn::Md5) as usize;
        assert_eq!(servers[i].address(), "myhost:11213");
        let i = continuum.route(b"test:20000", HashFn::Md5) as usize;
        assert_eq!(servers[i].address(), "127.0.0.1:11212");
    }

    #[test]
    fn test_failover_skips_dead() {
        let servers = vec![ServerSpec::parse("a:1"), ServerSpec::parse("b:2")];
        let continuum = Continuum::build(&servers);
        let now = Instant::now();
        let mut health = vec![Health::default(), Health::default()];
        let first = continuum.route(b"some-key", HashFn::Md5);
        health[first as usize].state = HealthState::HardFailed;
        health[first as usize].dead_until = Some(now + std::time::Duration::from_secs(60));

        let chosen =
            continuum.route_with_failover(b"some-key", HashFn::Md5, &health, now, true);
        assert_ne!(Some(first), chosen);
        assert!(chosen.is_some());

        let no_failover =
            continuum.route_with_failover(b"some-key", HashFn::Md5, &health, now, false);
        assert_eq!(None, no_failover);
    }
}
