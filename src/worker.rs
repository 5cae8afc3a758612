//! The bounded worker pool that performs all per-connection I/O and parsing off the reactor
//! thread. Workers never touch `mio::Poll` directly; they report completion back to the
//! reactor over a channel and a shared `Waker`, which is the only thread allowed to
//! register/reregister/deregister descriptors.

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use mio::event::Source;
use mio::{Token, Waker};
use tracing::{debug, warn};

use crate::net::tcp_stream::TcpStream;
use crate::parser::ParseOutcome;
use crate::slot::{ReadOutcome, Slot};

/// One unit of work handed from the reactor to a worker: a slot that reported readable and/or
/// writable readiness.
pub struct Job<S> {
    pub token: Token,
    pub slot: Arc<Mutex<Slot<S>>>,
    pub readable: bool,
    pub writable: bool,
}

/// What the reactor should do with a slot once a worker is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Re-arm for read readiness only (still awaiting more request bytes).
    AwaitRead,
    /// Re-arm for both read and write readiness (a response is queued to send).
    AwaitReadWrite,
    /// Deregister and drop the slot; the connection is finished.
    Close,
}

/// A bounded pool of detached worker threads draining a shared ready queue.
pub struct WorkerPool<S> {
    job_tx: Sender<Job<S>>,
    handles: Vec<JoinHandle<()>>,
}

impl<S> WorkerPool<S>
where
    S: TcpStream + Read + std::io::Write + Source + Send + 'static,
{
    /// Spawns `worker_count` detached threads, each pulling from a shared bounded channel of
    /// capacity `max_queued`. `done_tx`/`waker` let a worker hand a finished slot's token back
    /// to the reactor and wake it out of `Poll::poll`. Thread-creation failure is fatal to pool
    /// construction, matching the source's "thread-creation failure is fatal" rule; any threads
    /// already spawned are left detached and die with the process on the caller's error exit.
    pub fn new(
        worker_count: usize,
        max_queued: usize,
        done_tx: Sender<(Token, Disposition)>,
        waker: Arc<Waker>,
    ) -> std::io::Result<Self> {
        let (job_tx, job_rx): (Sender<Job<S>>, Receiver<Job<S>>) = crossbeam_channel::bounded(max_queued);

        let handles = (0..worker_count)
            .map(|id| {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                let waker = Arc::clone(&waker);
                std::thread::Builder::new()
                    .name(format!("webserve-worker-{id}"))
                    .spawn(move || worker_loop(id, job_rx, done_tx, waker))
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self { job_tx, handles })
    }

    /// Submits a job for a worker to pick up. Returns `Err(job)` if the queue is full
    /// (`max_queued` slots are already awaiting a worker); the caller (the reactor) then
    /// closes the slot itself, since no worker will ever claim it.
    pub fn try_submit(&self, job: Job<S>) -> Result<(), Job<S>> {
        self.job_tx.try_send(job).map_err(|e| e.into_inner())
    }

    /// Number of live worker threads, for diagnostics.
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}

fn worker_loop<S>(id: usize, job_rx: Receiver<Job<S>>, done_tx: Sender<(Token, Disposition)>, waker: Arc<Waker>)
where
    S: TcpStream + Read + std::io::Write + Source,
{
    while let Ok(job) = job_rx.recv() {
        let token = job.token;
        let disposition = {
            let mut slot = job.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            process(&mut slot, job.readable, job.writable)
        };

        debug!(worker = id, token = token.0, ?disposition, "slot processed");

        if done_tx.send((token, disposition)).is_err() {
            warn!(worker = id, "reactor's completion channel closed; shutting down");
            return;
        }
        if let Err(err) = waker.wake() {
            warn!(worker = id, %err, "failed to wake reactor");
        }
    }
}

/// Drives one readiness-triggered turn of a slot's lifecycle: reads and parses while the
/// connection is awaiting a request, writes a pending response, and decides what the reactor
/// should do with the descriptor next.
fn process<S>(slot: &mut Slot<S>, readable: bool, writable: bool) -> Disposition
where
    S: TcpStream + Read + std::io::Write + Source,
{
    if readable && slot.response_complete() {
        loop {
            match slot.read() {
                ReadOutcome::WouldBlock => break,
                ReadOutcome::PeerClosed => return Disposition::Close,
                ReadOutcome::BufferFull => {
                    slot.prepare_response(ParseOutcome::BadRequest);
                    break;
                }
                ReadOutcome::Progressed => {
                    let outcome = slot.parse();
                    if matches!(outcome, ParseOutcome::NoRequest) {
                        continue;
                    }
                    slot.prepare_response(outcome);
                    break;
                }
            }
        }
    }

    if writable || !slot.response_complete() {
        match slot.write() {
            Ok(true) => {
                if slot.is_keep_alive() {
                    slot.reset();
                    return Disposition::AwaitRead;
                }
                return Disposition::Close;
            }
            Ok(false) => return Disposition::AwaitReadWrite,
            Err(_) => return Disposition::Close,
        }
    }

    Disposition::AwaitRead
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_variants_are_distinct() {
        assert_ne!(Disposition::AwaitRead, Disposition::Close);
        assert_ne!(Disposition::AwaitReadWrite, Disposition::Close);
    }
}
