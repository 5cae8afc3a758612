//! A minimal HTTP/1.1 static-file server built directly on readiness-based I/O multiplexing:
//! a single reactor thread driving `mio::Poll`, and a bounded pool of worker threads performing
//! the actual reads, parsing, target resolution, and writes.

pub mod cli;
pub mod error;
pub mod net;
pub mod parser;
pub mod reactor;
pub mod response;
pub mod slot;
pub mod worker;
