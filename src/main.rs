use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;
use tracing::error;
use webserve::cli::Cli;
use webserve::error::ServerError;
use webserve::reactor::Reactor;

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!(%e, "server exited with an error");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), ServerError> {
    ignore_sigpipe().map_err(ServerError::Signal)?;

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cli.port);

    let mut reactor: Reactor<mio::net::TcpListener, mio::net::TcpStream> =
        Reactor::new(addr, &cli.document_root, cli.workers, cli.max_queued)?;

    reactor.run().map_err(ServerError::Poll)
}

/// The original source relies on blocking reads failing loudly rather than killing the process
/// when a peer resets a connection mid-write; Rust's default SIGPIPE disposition would
/// otherwise terminate the process the first time that happens.
fn ignore_sigpipe() -> std::io::Result<()> {
    // Safety: `SIG_IGN` is a valid disposition for `SIGPIPE` and this is called once, before
    // any other thread is spawned.
    let prev = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
    if prev == libc::SIG_ERR {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
