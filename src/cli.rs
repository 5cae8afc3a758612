//! Command-line surface, replacing the historical `argv[1]`-only invocation with a `clap`
//! derive parser that keeps every historical default literal.

use std::path::PathBuf;

use clap::Parser;

/// The historical document root, compiled into the original source and now the CLI default.
pub const DEFAULT_DOCUMENT_ROOT: &str = "/home/wensong/webserver/resources";
/// Default worker thread count.
pub const DEFAULT_WORKERS: usize = 8;
/// Default bound on the number of slots awaiting worker pickup.
pub const DEFAULT_MAX_QUEUED: usize = 10000;

/// A minimal HTTP/1.1 static-file server.
#[derive(Debug, Parser)]
#[command(name = "webserve", version, about)]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(long)]
    pub port: u16,

    /// Directory files are served from.
    #[arg(long, default_value = DEFAULT_DOCUMENT_ROOT)]
    pub document_root: PathBuf,

    /// Number of worker threads driving accepted connections.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Maximum number of slots the ready queue will hold before new work is dropped.
    #[arg(long, default_value_t = DEFAULT_MAX_QUEUED)]
    pub max_queued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_historical_values() {
        let cli = Cli::parse_from(["webserve", "--port", "9999"]);
        assert_eq!(9999, cli.port);
        assert_eq!(PathBuf::from(DEFAULT_DOCUMENT_ROOT), cli.document_root);
        assert_eq!(DEFAULT_WORKERS, cli.workers);
        assert_eq!(DEFAULT_MAX_QUEUED, cli.max_queued);
    }

    #[test]
    fn port_is_required() {
        let result = Cli::try_parse_from(["webserve"]);
        assert!(result.is_err());
    }
}
