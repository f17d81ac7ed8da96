//! Line-oriented HTTP/1.1 request parser state machine.
//!
//! A state machine walks CRLF-terminated lines out of the connection's
//! read buffer, `REQUEST_LINE -> HEADERS -> BODY -> FINISH`. Only
//! complete lines are consumed; if the next CRLF isn't yet in the
//! readable region, parsing stops and the caller resumes on the next
//! readable event, leaving whatever was read so far untouched in the
//! buffer.

use std::collections::HashMap;

use crate::buffer::Buffer;

/// Request parse state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body,
    Finish,
}

/// Outcome of feeding more buffered bytes to the parser.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The buffer didn't contain a full next line; try again once more
    /// data arrives.
    Incomplete,
    /// The request line, headers, and body all parsed successfully.
    Complete,
    /// The request line or a header line was malformed. Carries the
    /// response code the caller should emit (always 400 today, but kept
    /// as a field in case finer-grained parse failures are added later).
    Failed(u16),
}

/// Landing paths that are rewritten to carry an explicit `.html` suffix.
const DEFAULT_HTML: &[&str] = &[
    "/index",
    "/register",
    "/login",
    "/welcome",
    "/video",
    "/picture",
];

/// A parsed (or partially parsed) HTTP/1.1 request.
#[derive(Debug, Default)]
pub struct Request {
    pub state: RequestState,
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub form: HashMap<String, String>,
}

/// Wraps `ParseState` so `Request` can derive `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestState(pub ParseState);

impl Default for RequestState {
    fn default() -> Self {
        RequestState(ParseState::RequestLine)
    }
}

impl Request {
    /// Resets every field for reuse across keep-alive requests, matching
    /// `HttpRequest::init`.
    pub fn init(&mut self) {
        self.state = RequestState(ParseState::RequestLine);
        self.method.clear();
        self.path.clear();
        self.version.clear();
        self.headers.clear();
        self.body.clear();
        self.form.clear();
    }

    /// Whether the client asked to keep the connection alive: HTTP/1.1
    /// defaults to keep-alive unless `Connection: close` is present;
    /// earlier versions require an explicit `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        let conn = self
            .headers
            .get("Connection")
            .map(|v| v.eq_ignore_ascii_case("keep-alive"))
            .unwrap_or(false);

        if self.version == "1.1" {
            !self
                .headers
                .get("Connection")
                .map(|v| v.eq_ignore_ascii_case("close"))
                .unwrap_or(false)
        } else {
            conn
        }
    }

    /// Drives the state machine as far as the buffer currently allows.
    /// Consumes complete CRLF-terminated lines only; leaves a trailing
    /// partial line untouched for the next call.
    pub fn parse(&mut self, buf: &mut Buffer) -> ParseOutcome {
        loop {
            match self.state.0 {
                ParseState::RequestLine => match take_line(buf) {
                    None => return ParseOutcome::Incomplete,
                    Some(line) => match self.parse_request_line(&line) {
                        Ok(()) => self.state.0 = ParseState::Headers,
                        Err(()) => return ParseOutcome::Failed(400),
                    },
                },
                ParseState::Headers => {
                    // Header parsing exits with success once only the
                    // trailing blank-line CRLF remains.
                    if buf.readable() <= 2 {
                        if buf.readable() == 2 {
                            // consume the terminating CRLF itself.
                            let _ = take_line(buf);
                        }
                        self.state.0 = ParseState::Body;
                        continue;
                    }
                    match take_line(buf) {
                        None => return ParseOutcome::Incomplete,
                        Some(line) => {
                            if line.is_empty() {
                                self.state.0 = ParseState::Body;
                            } else if self.parse_header(&line).is_err() {
                                self.state.0 = ParseState::Body;
                            }
                        }
                    }
                }
                ParseState::Body => {
                    if self.method != "POST" {
                        self.state.0 = ParseState::Finish;
                        continue;
                    }
                    match take_line(buf) {
                        None => return ParseOutcome::Incomplete,
                        Some(line) => {
                            self.parse_body(&line);
                            self.state.0 = ParseState::Finish;
                        }
                    }
                }
                ParseState::Finish => return ParseOutcome::Complete,
            }
        }
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), ()> {
        let mut parts = line.splitn(4, ' ');
        let method = parts.next().ok_or(())?;
        let path = parts.next().ok_or(())?;
        let version_field = parts.next().ok_or(())?;
        if parts.next().is_some() {
            // anything past the version token (including a trailing
            // space) makes the line not match `METHOD SP PATH SP
            // HTTP/VERSION` exactly.
            return Err(());
        }

        if method.is_empty() || path.is_empty() {
            return Err(());
        }
        let version = version_field.strip_prefix("HTTP/").ok_or(())?;
        if version.is_empty() {
            return Err(());
        }

        self.method = method.to_string();
        self.version = version.to_string();
        self.path = normalize_path(path);
        Ok(())
    }

    fn parse_header(&mut self, line: &str) -> Result<(), ()> {
        let (name, value) = line.split_once(':').ok_or(())?;
        let value = value.strip_prefix(' ').unwrap_or(value);
        self.headers.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn parse_body(&mut self, line: &str) {
        self.body = line.to_string();
        let is_form = self
            .headers
            .get("Content-Type")
            .map(|v| v == "application/x-www-form-urlencoded")
            .unwrap_or(false);
        if self.method == "POST" && is_form {
            self.form = parse_form_urlencoded(&self.body);
        }
    }
}

/// Bare `/` becomes `/index.html`; a path in the built-in landing set
/// gains a `.html` suffix. Anything else passes through unchanged.
fn normalize_path(path: &str) -> String {
    if path == "/" {
        return "/index.html".to_string();
    }
    if DEFAULT_HTML.contains(&path) {
        return format!("{path}.html");
    }
    path.to_string()
}

/// Pulls the next complete CRLF-terminated line out of `buf`'s readable
/// region as an owned `String`, advancing `read_pos` past the CRLF. If no
/// CRLF is present yet, leaves the buffer untouched and returns `None`.
fn take_line(buf: &mut Buffer) -> Option<String> {
    let readable = buf.peek();
    let crlf = readable.windows(2).position(|w| w == b"\r\n")?;
    let line = String::from_utf8_lossy(&readable[..crlf]).into_owned();
    buf.retrieve(crlf + 2);
    Some(line)
}

/// Decodes an `application/x-www-form-urlencoded` body: tokens separated
/// by `&`, each split at the first `=`, `+` decoded to space, `%HH`
/// decoded as hex.
fn parse_form_urlencoded(body: &str) -> HashMap<String, String> {
    let mut form = HashMap::new();
    if body.is_empty() {
        return form;
    }
    for token in body.split('&') {
        if token.is_empty() {
            continue;
        }
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k, v),
            None => (token, ""),
        };
        form.insert(url_decode(key), url_decode(value));
    }
    form
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hi = hex_val(bytes[i + 1]);
                let lo = hex_val(bytes[i + 2]);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// URL-encodes a form map the way a browser submitting
/// `application/x-www-form-urlencoded` would, for round-trip testing
/// against [`parse_form_urlencoded`].
#[cfg(test)]
fn url_encode_form(form: &HashMap<String, String>) -> String {
    fn encode(s: &str) -> String {
        let mut out = String::new();
        for b in s.bytes() {
            match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(b as char)
                }
                b' ' => out.push('+'),
                _ => out.push_str(&format!("%{b:02X}")),
            }
        }
        out
    }

    form.iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(req: &mut Request, bytes: &[u8]) -> ParseOutcome {
        let mut buf = Buffer::with_capacity(bytes.len().max(16));
        buf.append(bytes);
        req.parse(&mut buf)
    }

    #[test]
    fn parses_get_root_request() {
        let mut req = Request::default();
        let outcome = feed(&mut req, b"GET / HTTP/1.1\r\nHost: h\r\n\r\n");
        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.version, "1.1");
        assert_eq!(req.headers.get("Host"), Some(&"h".to_string()));
    }

    #[test]
    fn malformed_request_line_fails_with_400() {
        let mut req = Request::default();
        let outcome = feed(&mut req, b"BOGUS\r\n\r\n");
        assert_eq!(outcome, ParseOutcome::Failed(400));
    }

    #[test]
    fn trailing_garbage_after_version_fails_with_400() {
        let mut req = Request::default();
        let outcome = feed(&mut req, b"GET / HTTP/1.1 trailing-garbage\r\n\r\n");
        assert_eq!(outcome, ParseOutcome::Failed(400));
    }

    #[test]
    fn partial_request_leaves_buffer_intact_for_continuation() {
        let mut req = Request::default();
        let mut buf = Buffer::with_capacity(32);
        buf.append(b"GET / HTTP/1.1\r\n");
        assert_eq!(req.parse(&mut buf), ParseOutcome::Incomplete);
        buf.append(b"Host: h\r\n\r\n");
        assert_eq!(req.parse(&mut buf), ParseOutcome::Complete);
        assert_eq!(req.path, "/index.html");
    }

    #[test]
    fn post_form_decodes_into_map() {
        let mut req = Request::default();
        let body = "username=john+doe&password=p%40ss";
        let request = format!(
            "POST /login HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\n{body}"
        );
        let outcome = feed(&mut req, request.as_bytes());
        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(req.form.get("username"), Some(&"john doe".to_string()));
        assert_eq!(req.form.get("password"), Some(&"p@ss".to_string()));
    }

    #[test]
    fn init_resets_for_keep_alive_reuse() {
        let mut req = Request::default();
        feed(&mut req, b"GET /login HTTP/1.1\r\n\r\n");
        assert_eq!(req.path, "/login.html");
        req.init();
        assert_eq!(req.state.0, ParseState::RequestLine);
        assert!(req.path.is_empty());
        feed(&mut req, b"GET /welcome HTTP/1.1\r\n\r\n");
        assert_eq!(req.path, "/welcome.html");
    }

    #[test]
    fn url_decode_round_trips_over_printable_ascii() {
        let mut form = HashMap::new();
        form.insert("a b".to_string(), "c&d=e".to_string());
        form.insert("k".to_string(), "v".to_string());
        let encoded = url_encode_form(&form);
        let decoded = parse_form_urlencoded(&encoded);
        assert_eq!(decoded, form);
    }

    #[test]
    fn parsing_same_request_twice_is_idempotent() {
        let raw = b"GET /index.html HTTP/1.1\r\nHost: h\r\n\r\n";
        let mut a = Request::default();
        feed(&mut a, raw);
        let mut b = Request::default();
        feed(&mut b, raw);
        assert_eq!(a.method, b.method);
        assert_eq!(a.path, b.path);
        assert_eq!(a.headers, b.headers);
    }
}
