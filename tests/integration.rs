mod common;

use common::MockServer;
use rmc::{ClientConfig, HashFn, NoCompressor, ServerSpec};
use std::time::Duration;

fn client(server: &MockServer) -> rmc::Client<NoCompressor> {
    let servers = vec![ServerSpec::new(server.addr.ip().to_string(), server.addr.port())];
    let config = ClientConfig::new_uncompressed(servers)
        .with_poll_timeout(Duration::from_millis(500))
        .with_flush_enabled(true);
    rmc::Client::new(config).unwrap()
}

#[test]
fn test_set_get_roundtrip() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    client.set(b"greeting", &b"hello"[..], 0).unwrap();
    let value: Option<Vec<u8>> = client.get(b"greeting").unwrap();
    assert_eq!(Some(b"hello".to_vec()), value);
}

#[test]
fn test_get_miss_is_none() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    let value: Option<Vec<u8>> = client.get(b"missing").unwrap();
    assert_eq!(None, value);
}

#[test]
fn test_add_respects_existing_key() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    assert!(client.add(b"once", &b"a"[..], 0).unwrap());
    assert!(!client.add(b"once", &b"b"[..], 0).unwrap());
    let value: Option<Vec<u8>> = client.get(b"once").unwrap();
    assert_eq!(Some(b"a".to_vec()), value);
}

#[test]
fn test_replace_requires_existing_key() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    assert!(!client.replace(b"ghost", &b"x"[..], 0).unwrap());
    client.set(b"ghost", &b"x"[..], 0).unwrap();
    assert!(client.replace(b"ghost", &b"y"[..], 0).unwrap());
}

#[test]
fn test_append_prepend() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    client.set(b"sentence", &b"world"[..], 0).unwrap();
    client.prepend(b"sentence", &b"hello "[..]).unwrap();
    client.append(b"sentence", &b"!"[..]).unwrap();
    let value: Option<Vec<u8>> = client.get(b"sentence").unwrap();
    assert_eq!(Some(b"hello world!".to_vec()), value);
}

#[test]
fn test_cas_mismatch_and_success() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    client.set(b"counter", &b"1"[..], 0).unwrap();
    let (value, cas): (Vec<u8>, u64) = client.gets(b"counter").unwrap().unwrap();
    assert_eq!(b"1".to_vec(), value);

    let stale_outcome = client.cas(b"counter", &b"2"[..], 0, cas + 999).unwrap();
    assert_eq!(rmc::CasOutcome::Exists, stale_outcome);

    let outcome = client.cas(b"counter", &b"2"[..], 0, cas).unwrap();
    assert_eq!(rmc::CasOutcome::Stored, outcome);
}

#[test]
fn test_cas_against_missing_key_is_not_found() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    let outcome = client.cas(b"never-set", &b"x"[..], 0, 1).unwrap();
    assert_eq!(rmc::CasOutcome::NotFound, outcome);
}

#[test]
fn test_get_multi() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    client.set(b"a", &b"1"[..], 0).unwrap();
    client.set(b"b", &b"2"[..], 0).unwrap();

    let keys = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
    let values: std::collections::HashMap<Vec<u8>, Vec<u8>> = client.get_multi(&keys).unwrap();
    assert_eq!(2, values.len());
    assert_eq!(Some(&b"1".to_vec()), values.get(b"a".as_slice()));
    assert_eq!(Some(&b"2".to_vec()), values.get(b"b".as_slice()));
    assert!(!values.contains_key(b"c".as_slice()));
}

#[test]
fn test_incr_decr_roundtrip() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    client.set(b"hits", &b"10"[..], 0).unwrap();
    assert_eq!(Some(15), client.incr(b"hits", 5).unwrap());
    assert_eq!(Some(12), client.decr(b"hits", 3).unwrap());
    assert_eq!(None, client.incr(b"no-such-counter", 1).unwrap());
}

#[test]
fn test_delete_and_touch() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    client.set(b"temp", &b"x"[..], 0).unwrap();
    assert!(client.touch(b"temp", 30).unwrap());
    assert!(client.delete(b"temp").unwrap());
    assert!(!client.delete(b"temp").unwrap());
    assert!(!client.touch(b"temp", 30).unwrap());
}

#[test]
fn test_prefix_isolates_namespaces() {
    let server = MockServer::spawn();
    let servers = vec![ServerSpec::new(server.addr.ip().to_string(), server.addr.port())];

    let mut client_a = rmc::Client::new(
        ClientConfig::new_uncompressed(servers.clone()).with_prefix(b"appA:".to_vec()),
    )
    .unwrap();
    let mut client_b =
        rmc::Client::new(ClientConfig::new_uncompressed(servers).with_prefix(b"appB:".to_vec())).unwrap();

    client_a.set(b"shared", &b"from-a"[..], 0).unwrap();
    let seen_by_b: Option<Vec<u8>> = client_b.get(b"shared").unwrap();
    assert_eq!(None, seen_by_b);

    client_b.set(b"shared", &b"from-b"[..], 0).unwrap();
    let seen_by_a: Option<Vec<u8>> = client_a.get(b"shared").unwrap();
    assert_eq!(Some(b"from-a".to_vec()), seen_by_a);
}

#[test]
fn test_chunked_large_value_roundtrip() {
    let server = MockServer::spawn();
    let servers = vec![ServerSpec::new(server.addr.ip().to_string(), server.addr.port())];
    let mut client = rmc::Client::new(
        ClientConfig::new_uncompressed(servers)
            .with_chunk_size(64)
            .with_compress(false),
    )
    .unwrap();

    let big = vec![b'q'; 200];
    client.set(b"bigvalue", &big[..], 0).unwrap();
    let value: Option<Vec<u8>> = client.get(b"bigvalue").unwrap();
    assert_eq!(Some(big), value);
}

#[test]
fn test_key_with_forbidden_bytes_is_rejected_locally() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    let err = client.set(b"has space", &b"x"[..], 0).unwrap_err();
    assert_eq!(rmc::ErrorCode::InvalidKeyErr, err.code());
}

#[test]
fn test_flush_all_requires_opt_in() {
    let server = MockServer::spawn();
    let servers = vec![ServerSpec::new(server.addr.ip().to_string(), server.addr.port())];
    let mut client = rmc::Client::new(ClientConfig::new_uncompressed(servers)).unwrap();
    let err = client.flush_all().unwrap_err();
    assert_eq!(rmc::ErrorCode::ProgrammingErr, err.code());
}

#[test]
fn test_version_and_stats() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    let versions = client.version().unwrap();
    assert_eq!(1, versions.len());

    let stats = client.stats().unwrap();
    assert_eq!(1, stats.len());
}

#[test]
fn test_thread_affinity_is_enforced() {
    let server = MockServer::spawn();
    let mut client = client(&server);
    client.set(b"owned", &b"x"[..], 0).unwrap();

    let result = std::thread::spawn(move || {
        let value: Result<Option<Vec<u8>>, rmc::Error> = client.get(b"owned");
        value
    })
    .join()
    .unwrap();

    assert_eq!(rmc::ErrorCode::ProgrammingErr, result.unwrap_err().code());
}

#[test]
fn test_default_hash_fn_is_md5() {
    assert_eq!(HashFn::default(), HashFn::Md5);
}

#[test]
fn test_last_error_tracks_most_recent_call() {
    let server = MockServer::spawn();
    let mut client = client(&server);

    client.set(b"ok-key", &b"x"[..], 0).unwrap();
    assert_eq!(rmc::ErrorCode::Ok, client.get_last_error());
    assert_eq!("", client.get_last_strerror());

    let _ = client.set(b"bad key", &b"x"[..], 0);
    assert_eq!(rmc::ErrorCode::InvalidKeyErr, client.get_last_error());
    assert!(!client.get_last_strerror().is_empty());

    client.set(b"ok-key", &b"y"[..], 0).unwrap();
    assert_eq!(rmc::ErrorCode::Ok, client.get_last_error());
}

#[test]
fn test_set_failover_opts_in_independently_of_failover() {
    // set_failover defaults off even when failover (read-path) is on;
    // this only exercises that a client still builds and writes
    // normally with the combination configured, since the single-live-
    // server fixture can't distinguish routing choices. Dead-server
    // skip-on-health routing itself is covered by continuum.rs's tests.
    let server = MockServer::spawn();
    let servers = vec![ServerSpec::new(server.addr.ip().to_string(), server.addr.port())];
    let config = ClientConfig::new_uncompressed(servers).with_failover(true).with_set_failover(true);
    let mut client = rmc::Client::new(config).unwrap();
    client.set(b"k", &b"v"[..], 0).unwrap();
    let value: Option<Vec<u8>> = client.get(b"k").unwrap();
    assert_eq!(Some(b"v".to_vec()), value);
}
