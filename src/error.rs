//! Startup-time failures. Per-connection errors never reach `main`: they are handled entirely
//! inside the reactor/worker loop by closing the offending slot.

use std::io;

/// Everything that can keep the server from ever reaching its accept loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listening socket: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to create mio registry: {0}")]
    Registry(#[source] io::Error),

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] io::Error),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] io::Error),

    #[error("reactor event loop failed: {0}")]
    Poll(#[source] io::Error),
}
