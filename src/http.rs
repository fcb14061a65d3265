//! HTTP/1.1 request/response parsing and reply writing.
//!
//! The parser borrows directly from the connection's receive buffer, so
//! [`HttpView`] carries the buffer's lifetime: once the borrow ends (the
//! handler call returns), the view cannot outlive it — the message-view
//! lifetime discipline is enforced by the borrow checker rather than by
//! manually zeroing fields.

use std::fmt;

use base64::Engine;

/// Header slot cap per message; the 31st header and beyond are dropped
/// rather than causing unbounded growth from a hostile peer.
pub const MAX_HEADERS: usize = 30;

/// A single header line above this length aborts the parse.
pub const MAX_HEADER_LEN: usize = 100 * 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeaderSlice<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// A read-only cursor into one HTTP request or response, borrowed from a
/// connection's receive buffer.
#[derive(Clone, Debug)]
pub struct HttpView<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub query: &'a str,
    pub proto: &'a str,
    pub status: u16,
    pub headers: Vec<HeaderSlice<'a>>,
    pub body: &'a [u8],
}

impl<'a> HttpView<'a> {
    /// Case-insensitive header lookup; returns the first match.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Malformed,
    HeaderTooLarge,
    TooManyHeaders,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::Malformed => write!(f, "malformed HTTP message"),
            ParseError::HeaderTooLarge => write!(f, "single header exceeds 100 KiB"),
            ParseError::TooManyHeaders => write!(f, "too many headers"),
        }
    }
}

pub enum ParseOutcome<'a> {
    /// Not enough bytes yet; try again once more data has arrived.
    Incomplete,
    Complete { view: HttpView<'a>, consumed: usize },
}

/// Parses one HTTP request from the front of `buf`.
///
/// Duplicate `Content-Length` headers are tolerated: the first occurrence
/// wins and later ones are ignored, matching the runtime's "never crash on
/// malformed input" contract.
pub fn parse_request(buf: &[u8]) -> Result<ParseOutcome<'_>, ParseError> {
    parse_message(buf, true)
}

/// Whether the header block (everything up to and including the blank
/// line) is present yet, independent of whether the declared body has
/// fully arrived. Used to fire `MG_EV_HTTP_HDRS` before the message as a
/// whole is `Complete`.
pub fn headers_complete(buf: &[u8]) -> bool {
    matches!(find_header_end(buf), Ok(Some(_)))
}

pub fn parse_response(buf: &[u8]) -> Result<ParseOutcome<'_>, ParseError> {
    parse_message(buf, false)
}

fn parse_message(buf: &[u8], is_request: bool) -> Result<ParseOutcome<'_>, ParseError> {
    let header_end = match find_header_end(buf)? {
        Some(idx) => idx,
        None => return Ok(ParseOutcome::Incomplete),
    };

    let head = &buf[..header_end];
    let mut lines = head.split(|&b| b == b'\n').map(strip_cr);

    let start_line = lines.next().ok_or(ParseError::Malformed)?;
    let start_line = std::str::from_utf8(start_line).map_err(|_| ParseError::Malformed)?;

    let (method, uri, query, proto, status) = if is_request {
        let mut parts = start_line.splitn(3, ' ');
        let method = parts.next().ok_or(ParseError::Malformed)?;
        let target = parts.next().ok_or(ParseError::Malformed)?;
        let proto = parts.next().ok_or(ParseError::Malformed)?;

        if method.is_empty() || target.is_empty() {
            return Err(ParseError::Malformed);
        }

        let (uri, query) = match target.find('?') {
            Some(idx) => (&target[..idx], &target[idx + 1..]),
            None => (target, ""),
        };

        (method, uri, query, proto, 0u16)
    } else {
        let mut parts = start_line.splitn(3, ' ');
        let proto = parts.next().ok_or(ParseError::Malformed)?;
        let status_str = parts.next().ok_or(ParseError::Malformed)?;
        let status: u16 = status_str.parse().map_err(|_| ParseError::Malformed)?;

        ("", "", "", proto, status)
    };

    let mut headers = Vec::new();
    let mut content_length: Option<usize> = None;
    let mut seen_content_length = false;

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let line = std::str::from_utf8(line).map_err(|_| ParseError::Malformed)?;
        let idx = line.find(':').ok_or(ParseError::Malformed)?;
        let name = line[..idx].trim();
        let value = line[idx + 1..].trim();

        if name.eq_ignore_ascii_case("content-length") {
            if !seen_content_length {
                content_length = value.parse().ok();
                seen_content_length = true;
            }
            // later duplicates are tolerated and discarded.
        }

        if headers.len() < MAX_HEADERS {
            headers.push(HeaderSlice { name, value });
        }
    }

    let body_start = header_end;
    let declared_len = content_length.unwrap_or(0);

    if buf.len() < body_start + declared_len {
        return Ok(ParseOutcome::Incomplete);
    }

    let body = &buf[body_start..body_start + declared_len];
    let consumed = body_start + declared_len;

    Ok(ParseOutcome::Complete {
        view: HttpView {
            method,
            uri,
            query,
            proto,
            status,
            headers,
            body,
        },
        consumed,
    })
}

fn strip_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') {
        &line[..line.len() - 1]
    } else {
        line
    }
}

/// Locates the end of the header block (`\r\n\r\n` or bare `\n\n`),
/// rejecting the parse outright if a single header line would exceed
/// `MAX_HEADER_LEN` before a terminator is ever seen.
fn find_header_end(buf: &[u8]) -> Result<Option<usize>, ParseError> {
    if buf.len() > MAX_HEADER_LEN && !contains_terminator(buf) {
        return Err(ParseError::HeaderTooLarge);
    }

    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' {
            if i + 1 < buf.len() && buf[i + 1] == b'\n' {
                return Ok(Some(i + 2));
            }
        }
        if buf[i] == b'\r' && i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Ok(Some(i + 4));
        }
        i += 1;
    }

    Ok(None)
}

fn contains_terminator(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.windows(2).any(|w| w == b"\n\n")
}

/// Builds a full `200`-style response with `Content-Length` set from `body`.
pub fn reply(status: u16, body: &[u8], extra_headers: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 128);
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status)).as_bytes());
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());

    for (name, value) in extra_headers {
        out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }

    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Serializes `value` as JSON and merges `Content-Type: application/json`
/// into `extra_headers` -- if the caller already supplied their own
/// `Content-Type`, it wins and the default is dropped rather than
/// duplicated. `status` defaults to `200`.
pub fn reply_json(value: &serde_json::Value, status: Option<u16>, extra_headers: &[(&str, &str)]) -> Vec<u8> {
    let body = serde_json::to_vec(value).unwrap_or_default();

    let has_content_type = extra_headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("content-type"));

    let mut headers: Vec<(&str, &str)> = Vec::with_capacity(extra_headers.len() + 1);
    if !has_content_type {
        headers.push(("Content-Type", "application/json"));
    }
    headers.extend_from_slice(extra_headers);

    reply(status.unwrap_or(200), &body, &headers)
}

/// Wraps `data` as one chunk of a chunked-transfer body (`<len>\r\n<data>\r\n`).
/// An empty slice produces the terminal zero-length chunk.
pub fn http_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// Value for an `Authorization: Basic ...` header.
pub fn http_basic_auth(user: &str, pass: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
    format!("Basic {}", encoded)
}

/// Query values decode into a 2048-byte scratch; anything longer is
/// rejected rather than silently truncated.
pub const MAX_QUERY_VAR_LEN: usize = 2048;

#[derive(Debug, PartialEq, Eq)]
pub enum QueryError {
    ValueTooLong,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryError::ValueTooLong => write!(f, "query value exceeds 2047 bytes"),
        }
    }
}

/// Looks up `name` in a (possibly percent-encoded) query string, decoding
/// the value. Returns `Ok(None)` if the key is absent, and rejects a value
/// longer than 2047 bytes rather than truncating it.
pub fn query_var(query: &str, name: &str) -> Result<Option<String>, QueryError> {
    for pair in query.split('&') {
        let mut it = pair.splitn(2, '=');
        let key = it.next().unwrap_or("");
        let val = it.next().unwrap_or("");

        if key == name {
            if val.len() >= MAX_QUERY_VAR_LEN {
                return Err(QueryError::ValueTooLong);
            }
            return Ok(Some(percent_decode(val)));
        }
    }

    Ok(None)
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let req = b"GET /test?x=1 HTTP/1.1\r\nHost: a\r\n\r\n";
        match parse_request(req).unwrap() {
            ParseOutcome::Complete { view, consumed } => {
                assert_eq!(view.method, "GET");
                assert_eq!(view.uri, "/test");
                assert_eq!(view.query, "x=1");
                assert_eq!(consumed, req.len());
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn incomplete_without_terminator() {
        let req = b"GET / HTTP/1.1\r\nHost: a\r\n";
        assert!(matches!(parse_request(req).unwrap(), ParseOutcome::Incomplete));
    }

    #[test]
    fn waits_for_full_body() {
        let req = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel";
        assert!(matches!(parse_request(req).unwrap(), ParseOutcome::Incomplete));
    }

    #[test]
    fn reads_body_once_complete() {
        let req = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        match parse_request(req).unwrap() {
            ParseOutcome::Complete { view, .. } => assert_eq!(view.body, b"hello"),
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn duplicate_content_length_tolerated() {
        let req = b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 999\r\n\r\nhello";
        match parse_request(req).unwrap() {
            ParseOutcome::Complete { view, .. } => assert_eq!(view.body, b"hello"),
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn rejects_malformed_request_line() {
        let req = b"\r\n\r\n";
        assert!(parse_request(req).is_err());
    }

    #[test]
    fn header_cap_drops_overflow() {
        let mut req = String::from("GET / HTTP/1.1\r\n");
        for i in 0..40 {
            req.push_str(&format!("X-H{}: v\r\n", i));
        }
        req.push_str("\r\n");

        match parse_request(req.as_bytes()).unwrap() {
            ParseOutcome::Complete { view, .. } => assert_eq!(view.headers.len(), MAX_HEADERS),
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn rejects_oversized_single_header() {
        let mut req = String::from("GET / HTTP/1.1\r\nX: ");
        req.push_str(&"a".repeat(MAX_HEADER_LEN + 1));
        assert_eq!(parse_request(req.as_bytes()).unwrap_err(), ParseError::HeaderTooLarge);
    }

    #[test]
    fn reply_sets_content_length() {
        let out = reply(200, b"OK", &[]);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("OK"));
    }

    #[test]
    fn basic_auth_header_value() {
        assert_eq!(http_basic_auth("user", "pass"), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn query_var_percent_decodes() {
        assert_eq!(query_var("name=a%20b&x=1", "name"), Ok(Some("a b".to_string())));
        assert_eq!(query_var("name=a%20b", "missing"), Ok(None));
    }

    #[test]
    fn query_var_rejects_oversized_value() {
        let long_value = "a".repeat(MAX_QUERY_VAR_LEN);
        let query = format!("name={}", long_value);
        assert_eq!(query_var(&query, "name"), Err(QueryError::ValueTooLong));
    }

    #[test]
    fn reply_json_merges_content_type_default() {
        let value = serde_json::json!({"ok": true});
        let body = reply_json(&value, None, &[]);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("Content-Type: application/json"));
        assert!(text.starts_with("HTTP/1.1 200"));
    }

    #[test]
    fn reply_json_user_content_type_wins() {
        let value = serde_json::json!({"ok": true});
        let body = reply_json(&value, Some(201), &[("Content-Type", "application/vnd.custom+json")]);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("Content-Type: application/vnd.custom+json"));
        assert!(!text.contains("Content-Type: application/json\r\n"));
        assert!(text.starts_with("HTTP/1.1 201"));
    }

    #[test]
    fn chunk_wraps_hex_length() {
        let chunk = http_chunk(b"abc");
        assert_eq!(chunk, b"3\r\nabc\r\n");
        assert_eq!(http_chunk(b""), b"0\r\n\r\n");
    }
}
