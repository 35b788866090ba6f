//! The listening socket and the event loop.
//!
//! One thread polls the listener plus every live connection, level
//! triggered. Each iteration wakes for readiness or for the nearest timer:
//! the oldest idle connection or the nearest TTL deadline. Idle
//! connections are evicted from the head of the LRU list; due TTLs are
//! processed in bounded batches.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};

use nix::errno::Errno;
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::conn::{handle_read, handle_write, Conn};
use crate::db::{Db, K_MAX_WORKS};
use crate::list::IdleList;
use crate::monotonic_ms;

pub const K_SERVER_PORT: u16 = 1234;
/// A connection silent for this long is forcibly closed.
pub const K_IDLE_TIMEOUT_MS: u64 = 180_000;

pub struct Server {
    listener: Socket,
    conns: HashMap<RawFd, Conn>,
    idle: IdleList,
    db: Db,
}

impl Server {
    /// Create, bind and start listening on the wildcard address.
    pub fn bind() -> io::Result<Self> {
        let listener = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        listener.set_reuse_address(true)?;
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, K_SERVER_PORT));
        listener.bind(&SockAddr::from(addr))?;
        listener.set_nonblocking(true)?;
        listener.listen(libc::SOMAXCONN)?;
        info!("listening on {addr}");

        Ok(Self {
            listener,
            conns: HashMap::new(),
            idle: IdleList::new(),
            db: Db::new(),
        })
    }

    pub fn run(&mut self) -> io::Result<()> {
        let mut fds: Vec<RawFd> = Vec::new();
        let mut poll_fds: Vec<PollFd> = Vec::new();
        loop {
            // readiness request: the listener, then every live connection
            fds.clear();
            poll_fds.clear();
            fds.push(self.listener.as_raw_fd());
            poll_fds.push(PollFd::new(self.listener.as_raw_fd(), PollFlags::POLLIN));
            for (&fd, conn) in &self.conns {
                let mut events = PollFlags::POLLERR;
                if conn.want_read {
                    events |= PollFlags::POLLIN;
                }
                if conn.want_write {
                    events |= PollFlags::POLLOUT;
                }
                fds.push(fd);
                poll_fds.push(PollFd::new(fd, events));
            }

            let timeout = self.next_timer_ms(monotonic_ms());
            match poll(&mut poll_fds, timeout) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
            let now = monotonic_ms();

            if let Some(revents) = poll_fds[0].revents() {
                if revents.contains(PollFlags::POLLIN) {
                    self.handle_accept(now);
                }
            }

            for (i, poll_fd) in poll_fds.iter().enumerate().skip(1) {
                let ready = poll_fd.revents().unwrap_or(PollFlags::empty());
                if ready.is_empty() {
                    continue;
                }
                let fd = fds[i];
                let Some(conn) = self.conns.get_mut(&fd) else {
                    continue;
                };

                // any activity makes this the newest idle candidate
                conn.last_active_ms = now;
                self.idle.touch(conn.idle_slot);

                if ready.contains(PollFlags::POLLIN) && conn.want_read {
                    handle_read(conn, &mut self.db, now);
                }
                if ready.contains(PollFlags::POLLOUT) && conn.want_write && !conn.outgoing.is_empty()
                {
                    handle_write(conn);
                }

                if ready.contains(PollFlags::POLLERR) || conn.want_close {
                    let slot = conn.idle_slot;
                    self.idle.remove(slot);
                    self.conns.remove(&fd);
                    debug!(fd, "connection destroyed");
                }
            }

            self.process_timers(now);
        }
    }

    fn handle_accept(&mut self, now: u64) {
        loop {
            match self.listener.accept() {
                Ok((socket, peer)) => {
                    if let Err(e) = socket.set_nonblocking(true) {
                        error!("cannot set a client socket nonblocking: {e}");
                        continue;
                    }
                    let fd = socket.as_raw_fd();
                    let slot = self.idle.push_back(fd);
                    info!(fd, "new client from {:?}", peer.as_socket());
                    self.conns.insert(fd, Conn::new(socket, now, slot));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept error: {e}");
                    break;
                }
            }
        }
    }

    // The poll timeout: the nearest of the oldest idle deadline and the
    // nearest TTL, capped below by zero; -1 blocks indefinitely.
    fn next_timer_ms(&self, now: u64) -> i32 {
        let mut next: Option<u64> = None;
        if let Some((_, fd)) = self.idle.front() {
            if let Some(conn) = self.conns.get(&fd) {
                next = Some(conn.last_active_ms + K_IDLE_TIMEOUT_MS);
            }
        }
        if let Some(when) = self.db.next_expiry() {
            next = Some(next.map_or(when, |n| n.min(when)));
        }
        match next {
            None => -1,
            Some(when) if when <= now => 0,
            Some(when) => (when - now).min(i32::MAX as u64) as i32,
        }
    }

    fn process_timers(&mut self, now: u64) {
        // idle connections, oldest first
        while let Some((slot, fd)) = self.idle.front() {
            let Some(conn) = self.conns.get(&fd) else {
                self.idle.remove(slot);
                continue;
            };
            if conn.last_active_ms + K_IDLE_TIMEOUT_MS > now {
                break;
            }
            info!(fd, "closing idle connection");
            self.idle.remove(slot);
            self.conns.remove(&fd);
        }

        self.db.process_expired(now, K_MAX_WORKS);
    }
}
