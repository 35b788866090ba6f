//! Per-connection state and the read/parse/dispatch/write path.
//!
//! A connection owns its socket, its intent flags for the poll loop, and
//! its two buffers. Reads append to `incoming`; complete frames are
//! dispatched and their replies appended to `outgoing`; writes drain
//! `outgoing`. Short reads and writes simply yield back to the loop.

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;

use socket2::Socket;
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::db::Db;
use crate::protocol::{parse_request, response_begin, response_end, K_MAX_MSG};

#[derive(Debug)]
pub struct Conn {
    pub socket: Socket,

    // what the event loop should wait for
    pub want_read: bool,
    pub want_write: bool,
    pub want_close: bool,

    pub incoming: Buffer,
    pub outgoing: Buffer,

    pub last_active_ms: u64,
    pub idle_slot: usize,
}

impl Conn {
    pub fn new(socket: Socket, now: u64, idle_slot: usize) -> Self {
        Self {
            socket,
            want_read: true,
            want_write: false,
            want_close: false,
            incoming: Buffer::new(),
            outgoing: Buffer::new(),
            last_active_ms: now,
            idle_slot,
        }
    }

    fn fd(&self) -> RawFd {
        use std::os::unix::io::AsRawFd;
        self.socket.as_raw_fd()
    }
}

/// The socket reported readable: pull bytes, drain complete frames, and
/// start writing if any replies were produced.
pub fn handle_read(conn: &mut Conn, db: &mut Db, now: u64) {
    let mut buf = [0u8; 64 * 1024];
    let n = match conn.socket.read(&mut buf) {
        Ok(0) => {
            if conn.incoming.is_empty() {
                debug!(fd = conn.fd(), "client closed the connection");
            } else {
                warn!(fd = conn.fd(), "client closed mid-frame");
            }
            conn.want_close = true;
            return;
        }
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
        Err(e) => {
            warn!(fd = conn.fd(), "read error: {e}");
            conn.want_close = true;
            return;
        }
    };
    conn.incoming.append(&buf[..n]);

    while try_one_request(conn, db, now) {}

    if !conn.outgoing.is_empty() {
        conn.want_read = false;
        conn.want_write = true;
        // the socket is likely writable right now; save one loop iteration
        handle_write(conn);
    }
}

/// The socket reported writable: drain what we can of `outgoing`.
pub fn handle_write(conn: &mut Conn) {
    debug_assert!(!conn.outgoing.is_empty());
    match conn.socket.write(conn.outgoing.data()) {
        Ok(0) => conn.want_close = true,
        Ok(n) => {
            conn.outgoing.consume(n);
            if conn.outgoing.is_empty() {
                conn.want_write = false;
                conn.want_read = true;
            }
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => {
            warn!(fd = conn.fd(), "write error: {e}");
            conn.want_close = true;
        }
    }
}

// Parse and execute one buffered frame. Returns false when no complete
// frame is available or the connection is condemned.
fn try_one_request(conn: &mut Conn, db: &mut Db, now: u64) -> bool {
    if conn.incoming.len() < 4 {
        return false;
    }
    let header: [u8; 4] = conn.incoming.data()[..4].try_into().expect("four bytes");
    let len = u32::from_le_bytes(header) as usize;
    if len > K_MAX_MSG {
        warn!(fd = conn.fd(), len, "oversized request frame");
        conn.want_close = true;
        return false;
    }
    if 4 + len > conn.incoming.len() {
        return false;
    }

    let cmd = match parse_request(&conn.incoming.data()[4..4 + len]) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!(fd = conn.fd(), "bad request: {e}");
            conn.want_close = true;
            return false;
        }
    };

    let header_pos = response_begin(&mut conn.outgoing);
    db.dispatch(&cmd, &mut conn.outgoing, now);
    response_end(&mut conn.outgoing, header_pos);

    conn.incoming.consume(4 + len);
    true
}
