//! Transport abstractions, implemented for both `mio::net` (the reactor's real sockets) and
//! `std::net` (useful for tests and tools that don't need non-blocking I/O).

pub mod tcp_listener;
pub mod tcp_stream;
