//! An in-process fake memcached speaking just enough of the binary
//! protocol to drive the integration suite. Stands in for the
//! teacher's Docker-spawned real `memcached` binary (`rsmc-tokio`'s
//! `MemcachedTester`) so these tests run without Docker or a real
//! server (documented in DESIGN.md).
//!
//! Not every test binary that includes this module exercises every
//! helper here.
#![allow(dead_code)]

use cachewire_core::byte_codec::{pack_u32_be, pack_u64_be, unpack_u32_be, unpack_u64_be};
use cachewire_core::protocol::{
    Header, Packet, ADD_OPCODE, DECREMENT_OPCODE, DELETE_OPCODE, GETKQ_OPCODE, GETK_OPCODE,
    GET_OPCODE, HEADER_LENGTH, INCREMENT_OPCODE, MAGIC_RESPONSE, NOOP_OPCODE, SET_OPCODE,
    TOUCH_OPCODE,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
struct Entry {
    flags: u32,
    value: Vec<u8>,
}

/// Shared state behind a fake server, so a test can seed or inspect it.
#[derive(Clone, Default)]
pub struct Store(Arc<Mutex<HashMap<Vec<u8>, Entry>>>);

impl Store {
    pub fn contains(&self, key: &[u8]) -> bool {
        self.0.lock().unwrap().contains_key(key)
    }
}

/// Initializes `env_logger` once per test binary so a failing test's
/// `log::warn!`/`log::error!` output (e.g. a rejected multi_get shard,
/// a listener panic) shows up under `--nocapture`.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Starts a fake memcached bound to an ephemeral loopback port and
/// returns its address plus the store backing it.
pub async fn spawn_fake_memcached() -> (String, Store) {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let store = Store::default();
    let accept_store = store.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve_connection(socket, accept_store.clone()));
        }
    });
    (addr, store)
}

/// Like [`spawn_fake_memcached`], but the listener stops accepting new
/// connections and every live one is dropped once `fail_after` requests
/// have been served in total, simulating a shard going dark mid-run for
/// cluster failover tests.
pub async fn spawn_flaky_memcached(fail_after: usize) -> (String, Store) {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let store = Store::default();
    let accept_store = store.clone();
    let served = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let served = served.clone();
            tokio::spawn(serve_connection_with_limit(
                socket,
                accept_store.clone(),
                served,
                fail_after,
            ));
        }
    });
    (addr, store)
}

async fn serve_connection(socket: TcpStream, store: Store) {
    let served = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    serve_connection_with_limit(socket, store, served, usize::MAX).await;
}

async fn serve_connection_with_limit(
    mut socket: TcpStream,
    store: Store,
    served: Arc<std::sync::atomic::AtomicUsize>,
    fail_after: usize,
) {
    loop {
        if served.load(std::sync::atomic::Ordering::SeqCst) >= fail_after {
            return;
        }
        let mut header_buf = [0_u8; HEADER_LENGTH];
        if socket.read_exact(&mut header_buf).await.is_err() {
            return;
        }
        let header = match Header::read_request(&header_buf) {
            Ok(h) => h,
            Err(_) => return,
        };
        let mut body = vec![0_u8; header.body_len as usize];
        if !body.is_empty() && socket.read_exact(&mut body).await.is_err() {
            return;
        }
        let request = match Packet::from_response(header, &body) {
            Ok(p) => p,
            Err(_) => return,
        };
        served.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(response) = handle_request(&store, request) {
            if socket.write_all(&response.into_bytes()).await.is_err() {
                return;
            }
        }
    }
}

fn handle_request(store: &Store, request: Packet) -> Option<Packet> {
    let opcode = request.header.opcode;
    match opcode {
        GET_OPCODE | GETK_OPCODE => Some(get_response(store, opcode, &request.key)),
        GETKQ_OPCODE => {
            if store.contains(&request.key) {
                Some(get_response(store, opcode, &request.key))
            } else {
                None
            }
        }
        SET_OPCODE | ADD_OPCODE => Some(store_response(store, opcode, &request)),
        DELETE_OPCODE => {
            let removed = store.0.lock().unwrap().remove(&request.key).is_some();
            Some(response(opcode, Vec::new(), request.key.clone(), Vec::new(), status(removed)))
        }
        TOUCH_OPCODE => {
            let exists = store.contains(&request.key);
            Some(response(opcode, Vec::new(), request.key.clone(), Vec::new(), status(exists)))
        }
        INCREMENT_OPCODE | DECREMENT_OPCODE => Some(incr_decr_response(store, opcode, &request)),
        NOOP_OPCODE => Some(response(opcode, Vec::new(), Vec::new(), Vec::new(), 0)),
        _ => Some(response(opcode, Vec::new(), request.key.clone(), Vec::new(), 0x81)),
    }
}

fn status(found: bool) -> u16 {
    if found {
        0
    } else {
        0x01
    }
}

fn get_response(store: &Store, opcode: u8, key: &[u8]) -> Packet {
    let guard = store.0.lock().unwrap();
    match guard.get(key) {
        Some(entry) => {
            let mut extras = vec![0_u8; 4];
            pack_u32_be(&mut extras, 0, entry.flags);
            response(opcode, extras, key.to_vec(), entry.value.clone(), 0)
        }
        None => response(opcode, Vec::new(), key.to_vec(), Vec::new(), 0x01),
    }
}

fn store_response(store: &Store, opcode: u8, request: &Packet) -> Packet {
    let flags = unpack_u32_be(&request.extras, 0);
    let mut guard = store.0.lock().unwrap();
    if opcode == ADD_OPCODE && guard.contains_key(&request.key) {
        return response(opcode, Vec::new(), request.key.clone(), Vec::new(), 0x02);
    }
    guard.insert(
        request.key.clone(),
        Entry {
            flags,
            value: request.value.clone(),
        },
    );
    response(opcode, Vec::new(), Vec::new(), Vec::new(), 0)
}

fn incr_decr_response(store: &Store, opcode: u8, request: &Packet) -> Packet {
    let delta = unpack_u64_be(&request.extras, 0);
    let initial = unpack_u64_be(&request.extras, 8);
    let mut guard = store.0.lock().unwrap();
    let current = match guard.get(&request.key) {
        Some(entry) if entry.value.len() >= 8 => unpack_u64_be(&entry.value, 0),
        Some(_) => return response(opcode, Vec::new(), request.key.clone(), Vec::new(), 0x06),
        None => initial,
    };
    let next = if opcode == INCREMENT_OPCODE {
        current.saturating_add(delta)
    } else {
        current.saturating_sub(delta)
    };
    let mut value = vec![0_u8; 8];
    pack_u64_be(&mut value, 0, next);
    guard.insert(
        request.key.clone(),
        Entry {
            flags: 0,
            value: value.clone(),
        },
    );
    response(opcode, Vec::new(), Vec::new(), value, 0)
}

fn response(opcode: u8, extras: Vec<u8>, key: Vec<u8>, value: Vec<u8>, status: u16) -> Packet {
    let header = Header {
        magic: MAGIC_RESPONSE,
        opcode,
        key_length: key.len() as u16,
        extras_length: extras.len() as u8,
        data_type: 0,
        vbucket_or_status: status,
        body_len: (extras.len() + key.len() + value.len()) as u32,
        opaque: 0,
        cas: 0,
    };
    Packet {
        header,
        extras,
        key,
        value,
    }
}
