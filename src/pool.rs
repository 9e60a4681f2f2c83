//! A bounded, growable pool of single-threaded [`Client`]s, built over
//! `std::sync::{Mutex, Condvar}` rather than an async pooling crate:
//! every `Client` in this crate blocks on non-blocking sockets via its
//! own `mio::Poll`, so there is no async runtime for a pool manager to
//! hook into. Leasing blocks the calling thread until a client is free
//! or room exists to grow.

use std::sync::{Arc, Condvar, Mutex};

use crate::client::Client;
use crate::codec::Compressor;
use crate::config::ClientConfig;
use crate::continuum::ServerSpec;
use crate::error::Error;

struct PoolState<P: Compressor> {
    idle: Vec<Client<P>>,
    total: usize,
    config: ClientConfig<P>,
    generation: u64,
}

struct PoolInner<P: Compressor> {
    state: Mutex<PoolState<P>>,
    cond: Condvar,
}

/// A pool of `Client`s sized by `config`'s `initial_clients` /
/// `max_clients` / `max_growth`.
pub struct ClientPool<P: Compressor> {
    inner: Arc<PoolInner<P>>,
}

impl<P: Compressor> ClientPool<P> {
    pub fn new(config: ClientConfig<P>) -> Result<Self, Error> {
        let mut idle = Vec::with_capacity(config.initial_clients);
        for _ in 0..config.initial_clients {
            idle.push(Client::new(config.clone())?);
        }
        let total = idle.len();
        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState { idle, total, config, generation: 0 }),
                cond: Condvar::new(),
            }),
        })
    }

    /// Block until a client is available, growing the pool by one (up
    /// to `max_clients`) if none are idle.
    pub fn acquire(&self) -> Result<Lease<P>, Error> {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        loop {
            if let Some(mut client) = state.idle.pop() {
                client.rebind_owner();
                let generation = state.generation;
                return Ok(Lease { client: Some(client), generation, inner: Arc::clone(&self.inner) });
            }
            if state.total < state.config.max_clients {
                state.total += 1;
                let generation = state.generation;
                let config = state.config.clone();
                drop(state);
                return match Client::new(config) {
                    Ok(mut client) => {
                        client.rebind_owner();
                        Ok(Lease { client: Some(client), generation, inner: Arc::clone(&self.inner) })
                    }
                    Err(err) => {
                        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
                        state.total = state.total.saturating_sub(1);
                        drop(state);
                        self.inner.cond.notify_one();
                        Err(err)
                    }
                };
            }
            state = self.inner.cond.wait(state).expect("pool mutex poisoned");
        }
    }

    /// Replace the server list. Idle clients are closed immediately;
    /// clients already leased out keep using the old list until they
    /// are returned to the pool, at which point they are closed rather
    /// than recycled (the next `acquire()` builds against the new list).
    pub fn update_servers(&self, servers: Vec<ServerSpec>) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.config.servers = servers;
        state.generation += 1;
        for mut client in state.idle.drain(..) {
            let _ = client.quit();
        }
        state.total = 0;
        drop(state);
        self.inner.cond.notify_all();
    }
}

/// A scoped lease on a pooled `Client`: returns it to the pool on drop.
pub struct Lease<P: Compressor> {
    client: Option<Client<P>>,
    generation: u64,
    inner: Arc<PoolInner<P>>,
}

impl<P: Compressor> std::ops::Deref for Lease<P> {
    type Target = Client<P>;

    fn deref(&self) -> &Client<P> {
        self.client.as_ref().expect("lease client taken before drop")
    }
}

impl<P: Compressor> std::ops::DerefMut for Lease<P> {
    fn deref_mut(&mut self) -> &mut Client<P> {
        self.client.as_mut().expect("lease client taken before drop")
    }
}

impl<P: Compressor> Drop for Lease<P> {
    fn drop(&mut self) {
        let client = match self.client.take() {
            Some(c) => c,
            None => return,
        };
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        if self.generation == state.generation {
            state.idle.push(client);
            drop(state);
            self.inner.cond.notify_one();
        } else {
            state.total = state.total.saturating_sub(1);
            drop(state);
            let mut client = client;
            client.rebind_owner();
            let _ = client.quit();
            self.inner.cond.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NoCompressor;

    fn config() -> ClientConfig<NoCompressor> {
        ClientConfig::new_uncompressed(vec![ServerSpec::parse("127.0.0.1:11299")])
            .with_pool_sizing(1, 2, 1)
    }

    #[test]
    fn test_pool_grows_and_returns() {
        let pool = ClientPool::new(config()).unwrap();
        let lease1 = pool.acquire().unwrap();
        let lease2 = pool.acquire().unwrap();
        drop(lease1);
        drop(lease2);
        let _lease3 = pool.acquire().unwrap();
    }

    #[test]
    fn test_update_servers_bumps_generation() {
        let pool = ClientPool::new(config()).unwrap();
        {
            let _lease = pool.acquire().unwrap();
        }
        pool.update_servers(vec![ServerSpec::parse("127.0.0.1:11300")]);
        let state = pool.inner.state.lock().unwrap();
        assert_eq!(1, state.generation);
        assert_eq!(0, state.total);
    }
}
