//! Builds the fixed-size header buffer for a response, given a resolved [`Status`] and the
//! connection's keep-alive decision. The four canonical error bodies are emitted in full here;
//! a `FileRequest`'s body is the mmap'd file itself, sent alongside this buffer as a second
//! `writev` segment.

use std::io::Write;

use crate::parser::status::Status;

/// Size of a connection's fixed outbound header buffer. Matches `WRITE_BUFFER_SIZE` in the
/// original source.
pub const WRITE_BUFFER_SIZE: usize = 1024;

const BAD_REQUEST_BODY: &str = "Your request has bad syntax or is inherently impossible to satisfy.\n";
const FORBIDDEN_BODY: &str = "You do not have permission to get file from this server.\n";
const NOT_FOUND_BODY: &str = "The requested file was not found on this server.\n";
const INTERNAL_ERROR_BODY: &str = "There was an unusual problem serving the requested file.\n";

/// Canned body text for every non-`FileRequest` status this server can emit. `Status::Ok` has
/// no canned body of its own: it is only ever used for `FileRequest`, whose body is the mapped
/// file, built via [`build_file_headers`] instead.
fn body_for(status: Status) -> &'static str {
    match status {
        Status::Ok => "",
        Status::BadRequest => BAD_REQUEST_BODY,
        Status::Forbidden => FORBIDDEN_BODY,
        Status::NotFound => NOT_FOUND_BODY,
        Status::InternalServerError => INTERNAL_ERROR_BODY,
    }
}

/// Writes a complete response (status line, headers, blank line, body) for non-file statuses
/// into `buf`, returning the number of bytes written.
///
/// Panics if the rendered response would not fit in `buf` (callers size `buf` to
/// `WRITE_BUFFER_SIZE`, comfortably larger than any of the canned bodies).
pub fn build_error_response(buf: &mut [u8], status: Status, keep_alive: bool) -> usize {
    let body = body_for(status);
    write_headers(buf, status, keep_alive, body.len(), Some(body))
}

/// Writes the status line and headers for a `FileRequest` response into `buf`. The file's
/// bytes are not included: the caller sends them as a second `writev` segment straight out of
/// the connection's `memmap2::Mmap`.
pub fn build_file_headers(buf: &mut [u8], keep_alive: bool, content_length: usize) -> usize {
    write_headers(buf, Status::Ok, keep_alive, content_length, None)
}

fn write_headers(buf: &mut [u8], status: Status, keep_alive: bool, content_length: usize, body: Option<&str>) -> usize {
    let mut cursor = &mut buf[..];
    let start_len = cursor.len();

    write!(cursor, "HTTP/1.1 {} {}\r\n", status as u16, status.reason()).expect("header buffer too small");
    write!(cursor, "Content-Length: {}\r\n", content_length).expect("header buffer too small");
    write!(cursor, "Content-Type:text/html\r\n").expect("header buffer too small");
    write!(
        cursor,
        "Connection: {}\r\n",
        if keep_alive { "keep-alive" } else { "close" }
    )
    .expect("header buffer too small");
    write!(cursor, "\r\n").expect("header buffer too small");

    if let Some(body) = body {
        cursor.write_all(body.as_bytes()).expect("header buffer too small");
    }

    start_len - cursor.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_response_has_expected_header_order_and_body() {
        let mut buf = [0u8; WRITE_BUFFER_SIZE];
        let n = build_error_response(&mut buf, Status::NotFound, true);
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: "));
        assert!(text.contains("Content-Type:text/html\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with(NOT_FOUND_BODY));
    }

    #[test]
    fn closed_connection_sets_connection_close() {
        let mut buf = [0u8; WRITE_BUFFER_SIZE];
        let n = build_error_response(&mut buf, Status::BadRequest, false);
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("Connection: close\r\n"));
    }

    #[test]
    fn file_headers_omit_body() {
        let mut buf = [0u8; WRITE_BUFFER_SIZE];
        let n = build_file_headers(&mut buf, true, 12345);
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("Content-Length: 12345\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
