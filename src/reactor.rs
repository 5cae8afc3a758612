//! The single-threaded event loop: owns the listening socket and `mio::Poll`, accepts new
//! connections into slab slots, dispatches readiness events to the worker pool, and re-arms or
//! tears down slots once a worker reports completion. This thread is the only writer of the
//! slab and the only caller of `register`/`reregister`/`deregister` — workers never touch
//! `mio::Poll` directly, which is what makes one-shot re-arming a safe mutual-exclusion
//! mechanism between this thread and the pool.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::net::tcp_listener::TcpListener;
use crate::net::tcp_stream::TcpStream;
use crate::slot::Slot;
use crate::worker::{Disposition, Job, WorkerPool};

/// Upper bound on live connections, mirroring the source's `MAX_FD`.
pub const MAX_FD: usize = 65535;

const LISTEN_TOKEN: Token = Token(usize::MAX - 1);
const WAKE_TOKEN: Token = Token(usize::MAX - 2);
const LISTEN_BACKLOG: i32 = 5;

/// The reactor's owned state: the listening socket, the registry, the slab of live
/// connections, and the channels connecting it to the worker pool.
pub struct Reactor<L, S> {
    poll: Poll,
    listener: L,
    document_root: Arc<Path>,
    slots: Slab<Arc<Mutex<Slot<S>>>>,
    pool: WorkerPool<S>,
    done_rx: Receiver<(Token, Disposition)>,
    done_tx: Sender<(Token, Disposition)>,
    waker: Arc<Waker>,
}

impl<L, S> Reactor<L, S>
where
    L: TcpListener<S> + Source,
    S: TcpStream + io::Read + io::Write + Source + Send + 'static,
{
    /// Binds the listening socket with `SO_REUSEADDR` set (ahead of `bind`, since `std`'s own
    /// `TcpListener::bind` does not set it), registers it with a fresh `Poll`, and spawns the
    /// worker pool.
    pub fn new(
        addr: SocketAddr,
        document_root: impl AsRef<Path>,
        workers: usize,
        max_queued: usize,
    ) -> Result<Self, ServerError>
    where
        L: From<mio::net::TcpListener>,
    {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let bind = || -> io::Result<Socket> {
            let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
            socket.set_reuse_address(true)?;
            socket.bind(&addr.into())?;
            socket.listen(LISTEN_BACKLOG)?;
            socket.set_nonblocking(true)?;
            Ok(socket)
        };
        let socket = bind().map_err(ServerError::Bind)?;

        let mut listener = L::from(mio::net::TcpListener::from_std(socket.into()));

        let poll = Poll::new().map_err(ServerError::Registry)?;
        poll.registry()
            .register(&mut listener, LISTEN_TOKEN, Interest::READABLE)
            .map_err(ServerError::Registry)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).map_err(ServerError::Registry)?);
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        let pool = WorkerPool::new(workers, max_queued, done_tx.clone(), Arc::clone(&waker))
            .map_err(ServerError::WorkerSpawn)?;

        Ok(Self {
            poll,
            listener,
            document_root: Arc::from(document_root.as_ref()),
            slots: Slab::with_capacity(MAX_FD.min(1024)),
            pool,
            done_rx,
            done_tx,
            waker,
        })
    }

    /// Runs the accept/dispatch loop forever. Only returns on an unrecoverable `Poll::poll`
    /// error; per-connection errors are handled internally by closing the offending slot.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);
        info!(workers = self.pool.worker_count(), "reactor started");

        loop {
            self.poll.poll(&mut events, None)?;

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => self.accept_all(),
                    WAKE_TOKEN => self.drain_completions(),
                    token => self.dispatch(token, event),
                }
            }
        }
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.accept_one(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(%e, "accept failed");
                    break;
                }
            }
        }
    }

    fn accept_one(&mut self, stream: S, addr: SocketAddr) {
        if self.slots.len() >= MAX_FD {
            debug!(%addr, "connection limit reached, dropping accepted socket");
            return;
        }

        let entry = self.slots.vacant_entry();
        let token = Token(entry.key());
        let mut slot = Slot::new(stream, token, Arc::clone(&self.document_root));

        if let Err(e) = slot.register(self.poll.registry(), Interest::READABLE) {
            warn!(%e, %addr, "failed to register accepted socket");
            return;
        }

        debug!(%addr, token = token.0, "accepted connection");
        entry.insert(Arc::new(Mutex::new(slot)));
    }

    /// Hangup/error takes priority over readable/writable, mirroring the source's
    /// `EPOLLRDHUP | EPOLLHUP | EPOLLERR` check ahead of its `EPOLLIN`/`EPOLLOUT` branches:
    /// a connection reporting either is closed directly rather than handed to a worker.
    fn dispatch(&mut self, token: Token, event: &mio::event::Event) {
        if event.is_error() || event.is_read_closed() || event.is_write_closed() {
            self.close_slot(token);
            return;
        }

        let Some(slot) = self.slots.get(token.0) else {
            return;
        };
        let job = Job {
            token,
            slot: Arc::clone(slot),
            readable: event.is_readable(),
            writable: event.is_writable(),
        };

        if self.pool.try_submit(job).is_err() {
            warn!(token = token.0, "ready queue full, closing connection");
            self.close_slot(token);
        }
    }

    fn drain_completions(&mut self) {
        while let Ok((token, disposition)) = self.done_rx.try_recv() {
            match disposition {
                Disposition::AwaitRead => self.rearm(token, Interest::READABLE),
                Disposition::AwaitReadWrite => self.rearm(token, Interest::READABLE.add(Interest::WRITABLE)),
                Disposition::Close => self.close_slot(token),
            }
        }
    }

    fn rearm(&mut self, token: Token, interests: Interest) {
        let Some(slot) = self.slots.get(token.0) else {
            return;
        };
        let mut slot = slot.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = slot.reregister(self.poll.registry(), interests) {
            error!(%e, token = token.0, "failed to reregister slot");
            drop(slot);
            self.close_slot(token);
        }
    }

    fn close_slot(&mut self, token: Token) {
        if let Some(slot) = self.slots.get(token.0) {
            let mut slot = slot.lock().unwrap_or_else(|p| p.into_inner());
            slot.close(self.poll.registry());
        }
        self.slots.remove(token.0);
        debug!(token = token.0, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_reserved_for_listener_and_waker_do_not_collide() {
        assert_ne!(LISTEN_TOKEN, WAKE_TOKEN);
    }
}
