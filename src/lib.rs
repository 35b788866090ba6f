//! EmberKV - an event-driven in-memory key-value server.
//!
//! The server speaks a length-prefixed binary protocol over long-lived TCP
//! connections. A single thread runs the poll loop, all connection I/O and
//! all command execution; a small worker pool only runs destructors for
//! large containers.
//!
//! Components, leaves first:
//!
//! - [`buffer`]: byte buffer with O(1) front consumption, used for
//!   per-connection I/O and reply serialization.
//! - [`avl`]: arena-backed AVL tree with subtree counts and rank-offset
//!   traversal.
//! - [`list`]: circular doubly-linked list backing the idle-connection LRU.
//! - [`heap`]: min-heap with back-references, backing per-key TTLs.
//! - [`hashtable`]: progressively rehashed chaining hash map.
//! - [`zset`]: sorted set built from the tree and the hash map.
//! - [`pool`]: worker threads for offloaded destructors.
//! - [`protocol`]: wire framing and tagged reply serialization.
//! - [`db`]: the keyspace and the command dispatcher.
//! - [`conn`] and [`server`]: connection state and the event loop.
//! - [`client`]: the interactive command-line client.

use std::sync::OnceLock;
use std::time::Instant;

pub mod avl;
pub mod buffer;
pub mod client;
pub mod conn;
pub mod db;
pub mod hashtable;
pub mod heap;
pub mod list;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod zset;

/// Milliseconds on a monotonic clock, measured from the first call.
pub(crate) fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u64
}
