//! A multi-server, consistent-hashing, non-blocking client for the
//! memcached ASCII protocol.
//!
//! Keys are routed onto a Ketama continuum ([`continuum`]) across a set
//! of [`continuum::ServerSpec`] endpoints. All socket I/O is
//! non-blocking and driven by a single [`mio::Poll`] per batch
//! ([`engine`]); a [`Client`] is therefore bound to the thread that
//! created it. Use [`pool::ClientPool`] to share a cluster connection
//! across threads instead.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod continuum;
pub mod engine;
pub mod error;
pub mod hash;
pub mod health;
pub mod key;
pub mod parser;
pub mod pool;

#[cfg(feature = "zlib")]
pub mod zlib;

pub use client::{CasOutcome, Client};
pub use codec::{Compressor, FromMemcacheValue, NoCompressor, Structured, ToMemcacheValue};
pub use config::ClientConfig;
pub use continuum::ServerSpec;
pub use error::{Error, ErrorCode, ProtocolError};
pub use hash::HashFn;
pub use pool::ClientPool;

#[cfg(feature = "zlib")]
pub use zlib::ZlibCompressor;
