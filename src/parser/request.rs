//! Field-level parsing of a single NUL-terminated request line or header line, once
//! [`super::parse_line`] has located its bounds in the owning slot's read buffer.

use super::Span;

/// Case-insensitive ASCII equality, since HTTP tokens here are always ASCII.
fn eq_ignore_case(a: &[u8], b: &[u8]) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn split_on_whitespace(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let idx = line.iter().position(|&b| b == b' ' || b == b'\t')?;
    let rest_start = idx + line[idx..].iter().take_while(|&&b| b == b' ' || b == b'\t').count();
    Some((&line[..idx], &line[rest_start..]))
}

/// The method, target, and version of a request line, as byte ranges into the owning buffer.
#[derive(Debug, Clone, Copy)]
pub struct RequestLine {
    /// Byte range of the target (after scheme/authority stripping, if any).
    pub target: Span,
}

/// Parses `METHOD SP TARGET SP VERSION` out of a single line.
///
/// `line_start`/`line_end` bound the line's content within `buf` (the trailing `\r\n` has
/// already been NULed out by the line scanner and is excluded from this range). Returns
/// `None` for any structural failure, which the caller maps to `ParseOutcome::BadRequest`.
pub fn parse_request_line(buf: &[u8], line_start: usize, line_end: usize) -> Option<RequestLine> {
    let line = &buf[line_start..line_end];

    let (method, rest) = split_on_whitespace(line)?;
    if !eq_ignore_case(method, b"GET") {
        return None;
    }

    let (target, rest) = split_on_whitespace(rest)?;
    if !eq_ignore_case(rest, b"HTTP/1.1") {
        return None;
    }

    // A target may carry a scheme and authority (`http://host[:port]/path`); strip up to the
    // first `/` after the authority, matching the source's `strncasecmp(..., "http://", 7)`.
    let (target_start_rel, target_len) = if target.len() >= 7 && eq_ignore_case(&target[..7], b"http://") {
        match target[7..].iter().position(|&b| b == b'/') {
            Some(slash) => (7 + slash, target.len() - (7 + slash)),
            None => return None,
        }
    } else {
        (0, target.len())
    };

    if target_len == 0 || buf[line_start + (target.as_ptr() as usize - line.as_ptr() as usize) + target_start_rel] != b'/' {
        return None;
    }

    let target_offset = target.as_ptr() as usize - buf.as_ptr() as usize;

    Some(RequestLine {
        target: Span {
            start: target_offset + target_start_rel,
            len: target_len,
        },
    })
}

/// Accumulated state from header lines recognized across possibly many calls to
/// [`apply_header_line`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Headers {
    /// `Content-Length` value, or 0 if the header was absent.
    pub content_length: u64,
    /// Whether a `Connection: keep-alive` header was seen.
    pub keep_alive: bool,
    /// Byte range of the `Host` header's value, if present.
    pub host: Option<Span>,
}

/// Applies one non-empty header line to `headers`. Returns `Err(())` on a malformed
/// `Content-Length` value (the only way a recognized header can make the request bad).
/// Unrecognized headers are silently ignored, per the wire contract.
pub fn apply_header_line(
    buf: &[u8],
    line_start: usize,
    line_end: usize,
    headers: &mut Headers,
) -> Result<(), ()> {
    let line = &buf[line_start..line_end];

    if let Some(value) = strip_header_prefix(line, b"Connection:") {
        headers.keep_alive = eq_ignore_case(trim_ascii(value), b"keep-alive");
    } else if let Some(value) = strip_header_prefix(line, b"Content-Length:") {
        let value = trim_ascii(value);
        let text = std::str::from_utf8(value).map_err(|_| ())?;
        headers.content_length = text.parse::<u64>().map_err(|_| ())?;
    } else if let Some(value) = strip_header_prefix(line, b"Host:") {
        let value = trim_ascii(value);
        let offset = value.as_ptr() as usize - buf.as_ptr() as usize;
        headers.host = Some(Span {
            start: offset,
            len: value.len(),
        });
    }

    Ok(())
}

fn strip_header_prefix<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    if line.len() < name.len() {
        return None;
    }
    if eq_ignore_case(&line[..name.len()], name) {
        Some(&line[name.len()..])
    } else {
        None
    }
}

fn trim_ascii(buf: &[u8]) -> &[u8] {
    let start = buf.iter().position(|&b| b != b' ' && b != b'\t').unwrap_or(buf.len());
    let end = buf.iter().rposition(|&b| b != b' ' && b != b'\t').map_or(start, |i| i + 1);
    &buf[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_request_line() {
        let line = b"GET /index.html HTTP/1.1";
        let req = parse_request_line(line, 0, line.len()).unwrap();
        assert_eq!(b"/index.html", req.target.get(line));
    }

    #[test]
    fn rejects_non_get_method() {
        let line = b"POST / HTTP/1.1";
        assert!(parse_request_line(line, 0, line.len()).is_none());
    }

    #[test]
    fn rejects_http_1_0() {
        let line = b"GET / HTTP/1.0";
        assert!(parse_request_line(line, 0, line.len()).is_none());
    }

    #[test]
    fn strips_scheme_and_authority() {
        let line = b"GET http://example/index.html HTTP/1.1";
        let req = parse_request_line(line, 0, line.len()).unwrap();
        assert_eq!(b"/index.html", req.target.get(line));
    }

    #[test]
    fn method_is_case_insensitive() {
        let line = b"get / HTTP/1.1";
        assert!(parse_request_line(line, 0, line.len()).is_some());
    }

    #[test]
    fn rejects_target_without_leading_slash() {
        let line = b"GET index.html HTTP/1.1";
        assert!(parse_request_line(line, 0, line.len()).is_none());
    }

    #[test]
    fn header_sets_keep_alive() {
        let line = b"Connection: keep-alive";
        let mut headers = Headers::default();
        apply_header_line(line, 0, line.len(), &mut headers).unwrap();
        assert!(headers.keep_alive);
    }

    #[test]
    fn header_parses_content_length() {
        let line = b"Content-Length: 42";
        let mut headers = Headers::default();
        apply_header_line(line, 0, line.len(), &mut headers).unwrap();
        assert_eq!(42, headers.content_length);
    }

    #[test]
    fn header_rejects_non_numeric_content_length() {
        let line = b"Content-Length: banana";
        let mut headers = Headers::default();
        assert!(apply_header_line(line, 0, line.len(), &mut headers).is_err());
    }

    #[test]
    fn unknown_header_is_ignored() {
        let line = b"X-Custom: whatever";
        let mut headers = Headers::default();
        apply_header_line(line, 0, line.len(), &mut headers).unwrap();
        assert_eq!(0, headers.content_length);
        assert!(!headers.keep_alive);
    }

    #[test]
    fn header_name_match_is_case_insensitive() {
        let line = b"connection: Keep-Alive";
        let mut headers = Headers::default();
        apply_header_line(line, 0, line.len(), &mut headers).unwrap();
        assert!(headers.keep_alive);
    }
}
