//! The keyspace and the command dispatcher.
//!
//! One [`Entry`] per live key, indexed by the progressive hash map. TTLs
//! live in a min-heap of expiry times; each entry shares a back-reference
//! cell with its heap item, so clearing or rescheduling a TTL is O(log n).
//! Destroying a large sorted set is offloaded to the worker pool.

use tracing::debug;

use crate::buffer::Buffer;
use crate::hashtable::{str_hash, HMap};
use crate::heap::{BackRef, MinHeap};
use crate::pool::ThreadPool;
use crate::protocol::{
    out_arr, out_begin_arr, out_dbl, out_end_arr, out_err, out_int, out_nil, out_str, ErrCode,
};
use crate::zset::ZSet;

/// Sorted sets larger than this are dropped on the worker pool.
pub const K_LARGE_CONTAINER_SIZE: usize = 1000;
/// TTL expirations processed per event-loop iteration.
pub const K_MAX_WORKS: usize = 2000;

const K_NUM_WORKERS: usize = 4;

#[derive(Debug)]
pub enum Value {
    Str(Vec<u8>),
    ZSet(ZSet),
}

#[derive(Debug)]
struct Entry {
    key: Vec<u8>,
    value: Value,
    // heap position of this key's TTL; None while no TTL is set
    ttl: BackRef,
}

impl Entry {
    fn new(key: Vec<u8>, value: Value) -> Self {
        Self {
            key,
            value,
            ttl: BackRef::default(),
        }
    }
}

#[derive(Debug)]
pub struct Db {
    map: HMap<Entry>,
    ttl: MinHeap<Vec<u8>>,
    pool: ThreadPool,
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

impl Db {
    pub fn new() -> Self {
        Self {
            map: HMap::new(),
            ttl: MinHeap::new(),
            pool: ThreadPool::new(K_NUM_WORKERS),
        }
    }

    /// Execute one parsed request, appending the reply value to `out`.
    /// Unknown names and wrong arities share one error.
    pub fn dispatch(&mut self, cmd: &[Vec<u8>], out: &mut Buffer, now: u64) {
        if cmd.is_empty() {
            return out_err(out, ErrCode::Unknown, "unknown command.");
        }
        match (cmd[0].as_slice(), cmd.len()) {
            (b"get", 2) => self.do_get(&cmd[1], out),
            (b"set", 3) => self.do_set(&cmd[1], &cmd[2], out),
            (b"del", 2) => self.do_del(&cmd[1], out),
            (b"pexpire", 3) => self.do_expire(&cmd[1], &cmd[2], out, now),
            (b"pttl", 2) => self.do_ttl(&cmd[1], out, now),
            (b"keys", 1) => self.do_keys(out),
            (b"zadd", 4) => self.do_zadd(&cmd[1], &cmd[2], &cmd[3], out),
            (b"zrem", 3) => self.do_zrem(&cmd[1], &cmd[2], out),
            (b"zscore", 3) => self.do_zscore(&cmd[1], &cmd[2], out),
            (b"zquery", 6) => self.do_zquery(cmd, out),
            _ => out_err(out, ErrCode::Unknown, "unknown command."),
        }
    }

    /// The nearest TTL deadline, if any key carries one.
    pub fn next_expiry(&self) -> Option<u64> {
        self.ttl.front().map(|(when, _)| when)
    }

    /// Delete keys whose expiry is due, at most `max_works` of them so a
    /// mass expiration cannot stall the event loop.
    pub fn process_expired(&mut self, now: u64, max_works: usize) {
        let mut nwork = 0;
        while nwork < max_works {
            let key = match self.ttl.front() {
                Some((when, key)) if when <= now => key.clone(),
                _ => break,
            };
            match self.map.remove(str_hash(&key), |e| e.key == key) {
                Some(entry) => {
                    debug!(key = %String::from_utf8_lossy(&key), "ttl expired");
                    self.drop_entry(entry);
                }
                // A due item with no entry would spin the loop; drop it.
                None => {
                    debug_assert!(false, "ttl heap out of step with the keyspace");
                    self.ttl.remove(0);
                }
            }
            nwork += 1;
        }
    }

    fn do_get(&mut self, key: &[u8], out: &mut Buffer) {
        match self.map.get(str_hash(key), |e| e.key.as_slice() == key) {
            None => out_nil(out),
            Some(entry) => match &entry.value {
                Value::Str(s) => out_str(out, s),
                Value::ZSet(_) => out_err(out, ErrCode::BadTyp, "not a string value"),
            },
        }
    }

    fn do_set(&mut self, key: &[u8], val: &[u8], out: &mut Buffer) {
        let hcode = str_hash(key);
        if let Some(entry) = self.map.get_mut(hcode, |e| e.key.as_slice() == key) {
            // overwriting a string keeps its TTL
            return match &mut entry.value {
                Value::Str(s) => {
                    *s = val.to_vec();
                    out_nil(out);
                }
                Value::ZSet(_) => out_err(out, ErrCode::BadTyp, "a non-string value exists"),
            };
        }
        self.map
            .insert(hcode, Entry::new(key.to_vec(), Value::Str(val.to_vec())));
        out_nil(out);
    }

    fn do_del(&mut self, key: &[u8], out: &mut Buffer) {
        let removed = self.map.remove(str_hash(key), |e| e.key.as_slice() == key);
        let found = removed.is_some();
        if let Some(entry) = removed {
            self.drop_entry(entry);
        }
        out_int(out, found as i64);
    }

    // The entry is already unlinked from the keyspace. Unlink its TTL, then
    // free it; a large sorted set is moved onto the worker pool so the loop
    // thread does not pay for the teardown.
    fn drop_entry(&mut self, entry: Entry) {
        if let Some(pos) = entry.ttl.get() {
            self.ttl.remove(pos);
        }
        match entry.value {
            Value::ZSet(zset) if zset.len() > K_LARGE_CONTAINER_SIZE => {
                debug!(members = zset.len(), "dropping large zset off-thread");
                self.pool.submit(move || drop(zset));
            }
            _ => {}
        }
    }

    fn do_expire(&mut self, key: &[u8], ttl_arg: &[u8], out: &mut Buffer, now: u64) {
        let Some(ttl_ms) = parse_int(ttl_arg) else {
            return out_err(out, ErrCode::BadArg, "expect int64");
        };
        let Db { map, ttl, .. } = self;
        let found = match map.get_mut(str_hash(key), |e| e.key.as_slice() == key) {
            Some(entry) => {
                set_ttl(ttl, entry, ttl_ms, now);
                true
            }
            None => false,
        };
        out_int(out, found as i64);
    }

    fn do_ttl(&mut self, key: &[u8], out: &mut Buffer, now: u64) {
        match self.map.get(str_hash(key), |e| e.key.as_slice() == key) {
            None => out_int(out, -2),
            Some(entry) => match entry.ttl.get() {
                None => out_int(out, -1),
                Some(pos) => {
                    let when = self.ttl.when_at(pos);
                    out_int(out, when.saturating_sub(now) as i64);
                }
            },
        }
    }

    fn do_keys(&mut self, out: &mut Buffer) {
        out_arr(out, self.map.len() as u32);
        self.map.for_each(|entry| {
            out_str(out, &entry.key);
            true
        });
    }

    fn do_zadd(&mut self, key: &[u8], score_arg: &[u8], member: &[u8], out: &mut Buffer) {
        let Some(score) = parse_float(score_arg) else {
            return out_err(out, ErrCode::BadArg, "expect fp number");
        };
        let hcode = str_hash(key);
        if let Some(entry) = self.map.get_mut(hcode, |e| e.key.as_slice() == key) {
            let Value::ZSet(zset) = &mut entry.value else {
                return out_err(out, ErrCode::BadTyp, "expect zset");
            };
            let added = zset.insert(member, score);
            return out_int(out, added as i64);
        }
        let mut zset = ZSet::new();
        zset.insert(member, score);
        self.map
            .insert(hcode, Entry::new(key.to_vec(), Value::ZSet(zset)));
        out_int(out, 1);
    }

    fn do_zrem(&mut self, key: &[u8], member: &[u8], out: &mut Buffer) {
        // a missing key reads as an empty set
        let Some(entry) = self.map.get_mut(str_hash(key), |e| e.key.as_slice() == key) else {
            return out_int(out, 0);
        };
        let Value::ZSet(zset) = &mut entry.value else {
            return out_err(out, ErrCode::BadTyp, "expect zset");
        };
        match zset.lookup(member) {
            Some(id) => {
                zset.remove(id);
                out_int(out, 1);
            }
            None => out_int(out, 0),
        }
    }

    fn do_zscore(&mut self, key: &[u8], member: &[u8], out: &mut Buffer) {
        let Some(entry) = self.map.get_mut(str_hash(key), |e| e.key.as_slice() == key) else {
            return out_nil(out);
        };
        let Value::ZSet(zset) = &mut entry.value else {
            return out_err(out, ErrCode::BadTyp, "expect zset");
        };
        match zset.lookup(member) {
            Some(id) => out_dbl(out, zset.member(id).1),
            None => out_nil(out),
        }
    }

    // zquery key score member offset limit
    fn do_zquery(&mut self, cmd: &[Vec<u8>], out: &mut Buffer) {
        let Some(score) = parse_float(&cmd[2]) else {
            return out_err(out, ErrCode::BadArg, "expect fp number");
        };
        let Some(offset) = parse_int(&cmd[4]) else {
            return out_err(out, ErrCode::BadArg, "expect int");
        };
        let Some(limit) = parse_int(&cmd[5]) else {
            return out_err(out, ErrCode::BadArg, "expect int");
        };
        let (key, name) = (&cmd[1], &cmd[3]);
        let Some(entry) = self
            .map
            .get_mut(str_hash(key), |e| e.key.as_slice() == key.as_slice())
        else {
            return out_arr(out, 0);
        };
        let Value::ZSet(zset) = &mut entry.value else {
            return out_err(out, ErrCode::BadTyp, "expect zset");
        };
        if limit <= 0 {
            return out_arr(out, 0);
        }

        let mut node = zset.seek_ge(score, name);
        if let Some(id) = node {
            node = zset.offset(id, offset);
        }

        let ctx = out_begin_arr(out);
        let mut n: i64 = 0;
        while let Some(id) = node {
            if n >= limit {
                break;
            }
            let (mname, mscore) = zset.member(id);
            out_str(out, mname);
            out_dbl(out, mscore);
            n += 2;
            node = zset.offset(id, 1);
        }
        out_end_arr(out, ctx, n as u32);
    }
}

// Set or clear one entry's TTL. Negative means clear-if-present.
fn set_ttl(ttl: &mut MinHeap<Vec<u8>>, entry: &mut Entry, ttl_ms: i64, now: u64) {
    if ttl_ms < 0 {
        if let Some(pos) = entry.ttl.get() {
            ttl.remove(pos);
        }
    } else {
        let when = now + ttl_ms as u64;
        ttl.upsert(&entry.ttl, when, entry.key.clone());
    }
}

// Strict parses: the whole argument must be consumed.
fn parse_int(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn parse_float(data: &[u8]) -> Option<f64> {
    let v: f64 = std::str::from_utf8(data).ok()?.parse().ok()?;
    (!v.is_nan()).then_some(v)
}
