//! A single connection's state: its stream, read/write buffers, parser progress, and (once
//! resolved) the mmap'd file it is serving. One `Slot` lives at each occupied index of the
//! reactor's `Slab`, shared with worker threads as `Arc<Mutex<Slot<S>>>`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use mio::event::Source;
use mio::{Interest, Registry, Token};

use crate::net::tcp_stream::TcpStream;
use crate::parser::request::{self, Headers};
use crate::parser::status::Status;
use crate::parser::{parse_line, LineStatus, ParseOutcome, ParserState, Span};
use crate::response;

/// Matches `READ_BUFFER_SIZE` in the original source.
pub const READ_BUFFER_SIZE: usize = 2048;
/// Matches `FILENAME_LEN`: the longest resolved filesystem path this server will build.
pub const FILENAME_LEN: usize = 200;

/// Outcome of a single readiness-driven read attempt.
pub enum ReadOutcome {
    /// Bytes were read; the caller should now drive `parse()`.
    Progressed,
    /// The read buffer filled without a complete request ever parsing; treated as a bad
    /// request so the slot doesn't spin forever on an oversized line.
    BufferFull,
    /// The peer closed its write half, or the socket reported an error.
    PeerClosed,
    /// No more data is available right now; wait for the next readiness event.
    WouldBlock,
}

/// One outbound segment: either the fixed header buffer or the mapped file region, each with
/// its own independently tracked sent-offset so a partial `write_vectored` can resume correctly.
struct Segment<'a> {
    bytes: &'a [u8],
    sent: usize,
}

impl<'a> Segment<'a> {
    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.sent..]
    }

    fn is_done(&self) -> bool {
        self.sent >= self.bytes.len()
    }
}

/// The state of one HTTP connection, generic over the concrete stream type so tests can
/// exercise it against an in-memory mock rather than a real socket.
pub struct Slot<S> {
    stream: S,
    token: Token,
    document_root: Arc<Path>,

    read_buf: [u8; READ_BUFFER_SIZE],
    read_idx: usize,
    checked_idx: usize,
    start_line: usize,
    state: ParserState,

    target: Span,
    headers: Headers,

    file_path: [u8; FILENAME_LEN],
    file_path_len: usize,
    mmap: Option<Mmap>,

    write_buf: [u8; response::WRITE_BUFFER_SIZE],
    write_len: usize,
    header_sent: usize,
    file_sent: usize,

    keep_alive: bool,
    closing: bool,
}

impl<S> Slot<S>
where
    S: TcpStream + Read + Write + Source,
{
    /// Builds a freshly accepted connection's slot. `token` is the `Slab` index this slot
    /// occupies and doubles as its `mio::Token`.
    pub fn new(stream: S, token: Token, document_root: Arc<Path>) -> Self {
        Self {
            stream,
            token,
            document_root,
            read_buf: [0u8; READ_BUFFER_SIZE],
            read_idx: 0,
            checked_idx: 0,
            start_line: 0,
            state: ParserState::default(),
            target: Span::EMPTY,
            headers: Headers::default(),
            file_path: [0u8; FILENAME_LEN],
            file_path_len: 0,
            mmap: None,
            write_buf: [0u8; response::WRITE_BUFFER_SIZE],
            write_len: 0,
            header_sent: 0,
            file_sent: 0,
            keep_alive: false,
            closing: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn register(&mut self, registry: &Registry, interests: Interest) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, interests)
    }

    pub fn reregister(&mut self, registry: &Registry, interests: Interest) -> io::Result<()> {
        registry.reregister(&mut self.stream, self.token, interests)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }

    /// Reads as much as is currently available into the fixed read buffer, stopping on
    /// `WouldBlock`, peer close, or a full buffer.
    pub fn read(&mut self) -> ReadOutcome {
        loop {
            if self.read_idx == READ_BUFFER_SIZE {
                return ReadOutcome::BufferFull;
            }

            match self.stream.read(&mut self.read_buf[self.read_idx..]) {
                Ok(0) => return ReadOutcome::PeerClosed,
                Ok(n) => {
                    self.read_idx += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::WouldBlock,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return ReadOutcome::PeerClosed,
            }
        }
    }

    /// Drives the request state machine as far as the bytes read so far allow, returning as
    /// soon as more input is needed or a terminal outcome is reached.
    pub fn parse(&mut self) -> ParseOutcome {
        loop {
            match self.state {
                ParserState::AwaitRequestLine => {
                    let (status, idx) = parse_line(&mut self.read_buf, self.checked_idx, self.read_idx);
                    match status {
                        LineStatus::Open => {
                            self.checked_idx = idx;
                            return ParseOutcome::NoRequest;
                        }
                        LineStatus::Bad => return ParseOutcome::BadRequest,
                        LineStatus::Ok => {
                            let line_end = idx - 2;
                            let parsed = request::parse_request_line(&self.read_buf, self.start_line, line_end);
                            let Some(parsed) = parsed else {
                                return ParseOutcome::BadRequest;
                            };
                            self.target = parsed.target;
                            self.start_line = idx;
                            self.checked_idx = idx;
                            self.state = ParserState::AwaitHeaders;
                        }
                    }
                }
                ParserState::AwaitHeaders => {
                    let (status, idx) = parse_line(&mut self.read_buf, self.checked_idx, self.read_idx);
                    match status {
                        LineStatus::Open => {
                            self.checked_idx = idx;
                            return ParseOutcome::NoRequest;
                        }
                        LineStatus::Bad => return ParseOutcome::BadRequest,
                        LineStatus::Ok => {
                            let line_end = idx - 2;
                            if line_end == self.start_line {
                                self.start_line = idx;
                                self.checked_idx = idx;
                                if self.headers.content_length > 0 {
                                    self.state = ParserState::AwaitContent;
                                } else {
                                    return self.resolve_target();
                                }
                            } else {
                                if request::apply_header_line(&self.read_buf, self.start_line, line_end, &mut self.headers).is_err() {
                                    return ParseOutcome::BadRequest;
                                }
                                self.start_line = idx;
                                self.checked_idx = idx;
                            }
                        }
                    }
                }
                ParserState::AwaitContent => {
                    let available = (self.read_idx - self.start_line) as u64;
                    if available >= self.headers.content_length {
                        return self.resolve_target();
                    }
                    return ParseOutcome::NoRequest;
                }
            }
        }
    }

    /// Resolves the parsed target against the document root and decides the terminal outcome:
    /// missing file, unreadable file, or a mappable file ready to serve.
    fn resolve_target(&mut self) -> ParseOutcome {
        let target = self.target.get(&self.read_buf);

        let root_bytes = self.document_root.as_os_str().as_encoded_bytes();
        let mut len = 0usize;
        for &b in root_bytes.iter().chain(target.iter()) {
            if len >= FILENAME_LEN - 1 {
                break;
            }
            self.file_path[len] = b;
            len += 1;
        }
        self.file_path_len = len;

        let path_str = match std::str::from_utf8(&self.file_path[..len]) {
            Ok(s) => s,
            Err(_) => return ParseOutcome::BadRequest,
        };
        let path = Path::new(path_str);

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => return ParseOutcome::NoResource,
        };

        // Others-readable bit, mirroring the source's `S_IROTH` check, which runs before the
        // directory check: a non-world-readable directory is 403, not 400.
        if metadata.mode() & 0o004 == 0 {
            return ParseOutcome::ForbiddenRequest;
        }

        if metadata.is_dir() {
            return ParseOutcome::DirectoryRequest;
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return ParseOutcome::NoResource,
        };

        if metadata.len() == 0 {
            self.mmap = None;
            return ParseOutcome::FileRequest;
        }

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(m) => m,
            Err(_) => return ParseOutcome::InternalError,
        };

        self.mmap = Some(mmap);
        ParseOutcome::FileRequest
    }

    /// Builds the response for a terminal `ParseOutcome` into the write buffer, setting up the
    /// one or two `writev` segments and the connection's post-response keep-alive decision.
    pub fn prepare_response(&mut self, outcome: ParseOutcome) {
        // Keep-alive is honored for every outcome except a protocol-level bad request: the
        // source's `m_linger` is set purely from the `Connection` header as headers are parsed,
        // independent of whether the target later resolves to a file, a 404, or a 403.
        self.keep_alive = self.headers.keep_alive && !matches!(outcome, ParseOutcome::BadRequest);

        self.write_len = match outcome {
            ParseOutcome::FileRequest => {
                let content_length = self.mmap.as_ref().map_or(0, |m| m.len());
                response::build_file_headers(&mut self.write_buf, self.keep_alive, content_length)
            }
            ParseOutcome::NoResource => response::build_error_response(&mut self.write_buf, Status::NotFound, self.keep_alive),
            ParseOutcome::ForbiddenRequest => response::build_error_response(&mut self.write_buf, Status::Forbidden, self.keep_alive),
            ParseOutcome::DirectoryRequest => response::build_error_response(&mut self.write_buf, Status::BadRequest, self.keep_alive),
            ParseOutcome::InternalError => response::build_error_response(&mut self.write_buf, Status::InternalServerError, self.keep_alive),
            ParseOutcome::BadRequest | ParseOutcome::NoRequest | ParseOutcome::GetRequest => {
                response::build_error_response(&mut self.write_buf, Status::BadRequest, self.keep_alive)
            }
        };
        self.header_sent = 0;
        self.file_sent = 0;
    }

    /// Attempts to flush both write segments via a gathered write, tracking each segment's
    /// sent-offset independently so a partial send resumes correctly on the next readiness
    /// event (the original source's single `bytes_have_send` counter never advanced its
    /// `iovec` base between partial sends; this splits the bookkeeping per segment instead).
    pub fn write(&mut self) -> io::Result<bool> {
        loop {
            let header = Segment {
                bytes: &self.write_buf[..self.write_len],
                sent: self.header_sent,
            };
            let file_bytes: &[u8] = self.mmap.as_deref().unwrap_or(&[]);
            let file = Segment {
                bytes: file_bytes,
                sent: self.file_sent,
            };

            if header.is_done() && file.is_done() {
                return Ok(true);
            }

            let bufs = [io::IoSlice::new(header.remaining()), io::IoSlice::new(file.remaining())];
            let slices: &[io::IoSlice] = if header.is_done() { &bufs[1..] } else { &bufs[..] };

            match self.stream.write_vectored(slices) {
                Ok(0) => return Ok(false),
                Ok(mut n) => {
                    let header_remaining = header.bytes.len() - self.header_sent;
                    if !header.is_done() {
                        let take = n.min(header_remaining);
                        self.header_sent += take;
                        n -= take;
                    }
                    self.file_sent += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Returns `true` once the in-flight response has been fully written.
    pub fn response_complete(&self) -> bool {
        self.header_sent >= self.write_len && self.file_sent >= self.mmap.as_ref().map_or(0, |m| m.len())
    }

    /// Resets all per-request state for the next request on a kept-alive connection, sliding
    /// any bytes already read for a pipelined next request down to the front of the buffer.
    pub fn reset(&mut self) {
        let leftover = self.read_idx - self.checked_idx;
        if leftover > 0 {
            self.read_buf.copy_within(self.checked_idx..self.read_idx, 0);
        }
        self.read_idx = leftover;
        self.checked_idx = 0;
        self.start_line = 0;
        self.state = ParserState::default();
        self.target = Span::EMPTY;
        self.headers = Headers::default();
        self.file_path_len = 0;
        self.mmap = None;
        self.write_len = 0;
        self.header_sent = 0;
        self.file_sent = 0;
    }

    /// Idempotent close: safe to call more than once (e.g. once from the worker that detected
    /// the error, once from the reactor cleaning up a dropped slab entry).
    pub fn close(&mut self, registry: &Registry) {
        if self.closing {
            return;
        }
        self.closing = true;
        let _ = self.deregister(registry);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.mmap = None;
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }
}
