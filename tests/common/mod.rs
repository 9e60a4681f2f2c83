//! A minimal in-process ASCII-protocol memcached stand-in, used so the
//! integration tests below do not depend on a real memcached binary or
//! docker.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Clone)]
struct Entry {
    flags: u16,
    data: Vec<u8>,
    cas: u64,
}

pub struct MockServer {
    pub addr: std::net::SocketAddr,
}

static NEXT_CAS: AtomicU64 = AtomicU64::new(1);

impl MockServer {
    /// Spawn a background thread serving the ASCII protocol over a
    /// freshly bound loopback port. The server runs until the process
    /// exits; tests are short-lived so nothing explicitly shuts it down.
    pub fn spawn() -> Self {
        let _ = env_logger::try_init();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let store: Arc<Mutex<HashMap<Vec<u8>, Entry>>> = Arc::new(Mutex::new(HashMap::new()));

        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let store = Arc::clone(&store);
                thread::spawn(move || serve_connection(stream, store));
            }
        });

        MockServer { addr }
    }
}

fn serve_connection(stream: TcpStream, store: Arc<Mutex<HashMap<Vec<u8>, Entry>>>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;

    loop {
        let mut line = String::new();
        let n = match reader.read_line(&mut line) {
            Ok(n) => n,
            Err(_) => return,
        };
        if n == 0 {
            return;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        let tokens: Vec<&str> = line.split(' ').collect();
        if tokens.is_empty() {
            continue;
        }

        match tokens[0] {
            "get" | "gets" => {
                let with_cas = tokens[0] == "gets";
                let store = store.lock().unwrap();
                for key in &tokens[1..] {
                    if let Some(entry) = store.get(key.as_bytes()) {
                        if with_cas {
                            let _ = write!(
                                writer,
                                "VALUE {} {} {} {}\r\n",
                                key,
                                entry.flags,
                                entry.data.len(),
                                entry.cas
                            );
                        } else {
                            let _ = write!(writer, "VALUE {} {} {}\r\n", key, entry.flags, entry.data.len());
                        }
                        let _ = writer.write_all(&entry.data);
                        let _ = writer.write_all(b"\r\n");
                    }
                }
                let _ = writer.write_all(b"END\r\n");
            }
            "set" | "add" | "replace" | "append" | "prepend" | "cas" => {
                let key = tokens[1].to_string();
                let flags: u16 = tokens[2].parse().unwrap_or(0);
                let _exptime: i64 = tokens[3].parse().unwrap_or(0);
                let bytes: usize = tokens[4].parse().unwrap_or(0);
                let (cas_token, noreply) = if tokens[0] == "cas" {
                    let cas: u64 = tokens[5].parse().unwrap_or(0);
                    (Some(cas), tokens.get(6) == Some(&"noreply"))
                } else {
                    (None, tokens.get(5) == Some(&"noreply"))
                };

                let mut data = vec![0_u8; bytes];
                let _ = std::io::Read::read_exact(&mut reader, &mut data);
                let mut crlf = [0_u8; 2];
                let _ = std::io::Read::read_exact(&mut reader, &mut crlf);

                let mut store = store.lock().unwrap();
                let verb = tokens[0];
                let result = match verb {
                    "set" => {
                        store.insert(
                            key.clone().into_bytes(),
                            Entry { flags, data, cas: NEXT_CAS.fetch_add(1, Ordering::SeqCst) },
                        );
                        "STORED"
                    }
                    "add" => {
                        if store.contains_key(key.as_bytes()) {
                            "NOT_STORED"
                        } else {
                            store.insert(
                                key.clone().into_bytes(),
                                Entry { flags, data, cas: NEXT_CAS.fetch_add(1, Ordering::SeqCst) },
                            );
                            "STORED"
                        }
                    }
                    "replace" => {
                        if store.contains_key(key.as_bytes()) {
                            store.insert(
                                key.clone().into_bytes(),
                                Entry { flags, data, cas: NEXT_CAS.fetch_add(1, Ordering::SeqCst) },
                            );
                            "STORED"
                        } else {
                            "NOT_STORED"
                        }
                    }
                    "append" | "prepend" => {
                        if let Some(existing) = store.get_mut(key.as_bytes()) {
                            if verb == "append" {
                                existing.data.extend_from_slice(&data);
                            } else {
                                let mut merged = data;
                                merged.extend_from_slice(&existing.data);
                                existing.data = merged;
                            }
                            existing.cas = NEXT_CAS.fetch_add(1, Ordering::SeqCst);
                            "STORED"
                        } else {
                            "NOT_STORED"
                        }
                    }
                    "cas" => match store.get(key.as_bytes()) {
                        None => "NOT_FOUND",
                        Some(existing) if Some(existing.cas) != cas_token => "EXISTS",
                        Some(_) => {
                            store.insert(
                                key.clone().into_bytes(),
                                Entry { flags, data, cas: NEXT_CAS.fetch_add(1, Ordering::SeqCst) },
                            );
                            "STORED"
                        }
                    },
                    _ => unreachable!(),
                };
                if !noreply {
                    let _ = write!(writer, "{}\r\n", result);
                }
            }
            "delete" => {
                let key = tokens[1];
                let noreply = tokens.get(2) == Some(&"noreply");
                let mut store = store.lock().unwrap();
                let result = if store.remove(key.as_bytes()).is_some() { "DELETED" } else { "NOT_FOUND" };
                if !noreply {
                    let _ = write!(writer, "{}\r\n", result);
                }
            }
            "touch" => {
                let key = tokens[1];
                let noreply = tokens.get(3) == Some(&"noreply");
                let store = store.lock().unwrap();
                let result = if store.contains_key(key.as_bytes()) { "TOUCHED" } else { "NOT_FOUND" };
                if !noreply {
                    let _ = write!(writer, "{}\r\n", result);
                }
            }
            "incr" | "decr" => {
                let key = tokens[1];
                let delta: i64 = tokens[2].parse().unwrap_or(0);
                let noreply = tokens.get(3) == Some(&"noreply");
                let mut store = store.lock().unwrap();
                let result = match store.get_mut(key.as_bytes()) {
                    None => "NOT_FOUND".to_string(),
                    Some(entry) => {
                        let current: i64 = std::str::from_utf8(&entry.data).unwrap().parse().unwrap_or(0);
                        let next = if tokens[0] == "incr" {
                            current + delta
                        } else {
                            (current - delta).max(0)
                        };
                        entry.data = next.to_string().into_bytes();
                        next.to_string()
                    }
                };
                if !noreply {
                    let _ = write!(writer, "{}\r\n", result);
                }
            }
            "flush_all" => {
                store.lock().unwrap().clear();
                let _ = writer.write_all(b"OK\r\n");
            }
            "version" => {
                let _ = writer.write_all(b"VERSION mock-1.0\r\n");
            }
            "stats" => {
                let _ = writer.write_all(b"STAT pid 1\r\nEND\r\n");
            }
            "quit" => return,
            _ => {
                let _ = writer.write_all(b"ERROR\r\n");
            }
        }
    }
}
