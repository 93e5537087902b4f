//! Hand-rolled HTTP/1.1 request parsing.
//!
//! DAAP clients speak a narrow HTTP subset: `GET` requests, CRLF headers,
//! no bodies. The parser reads exactly that, with hard bounds on line and
//! header sizes so a hostile peer cannot hold a connection open while
//! feeding us an endless header section.
//!
//! Malformed values in recognized headers are tolerated by degrading: a
//! bad `Authorization` means no credentials were supplied, a bad `Range`
//! means no range.

use std::collections::HashMap;
use std::io;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest accepted request line.
const MAX_REQUEST_LINE: u64 = 8 * 1024;
/// Cap on the total size of the header section.
const MAX_HEADER_BYTES: u64 = 64 * 1024;
/// Maximum number of header lines.
const MAX_HEADER_LINES: usize = 100;

/// Why a request could not be read.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The bytes on the wire were not a request we serve; answered with
    /// 400 before closing.
    #[error("{0}")]
    Malformed(String),

    /// The connection died underneath us.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One parsed request.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    /// Decoded path without the query string.
    pub path: String,
    pub query: HashMap<String, String>,
    /// Username from `Authorization: Basic`, if one was supplied.
    pub username: Option<String>,
    /// Password from `Authorization: Basic`.
    pub password: Option<String>,
    /// Start offset of an open-ended `Range: bytes=<off>-` header.
    pub range_start: Option<u64>,
    pub user_agent: Option<String>,
    /// The client sent `Connection: close`.
    pub close: bool,
}

impl Request {
    /// A query parameter's raw value.
    #[must_use]
    pub fn query_str(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// A query parameter as an integer; missing or unparsable values
    /// default to 0.
    #[must_use]
    pub fn query_u32(&self, name: &str) -> u32 {
        self.query_str(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// Reads one CRLF-terminated line, bounded by `limit` bytes.
///
/// Returns `None` on EOF before any byte. A line cut off by EOF is also
/// reported as `None`: the peer hung up mid-request and there is nobody
/// left to answer.
async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    limit: u64,
) -> Result<Option<String>, RequestError> {
    let mut line = String::new();
    let n = (&mut *reader).take(limit).read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        if n as u64 >= limit {
            return Err(RequestError::Malformed("header line too long".into()));
        }
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// Reads and parses the next request off the connection.
///
/// `Ok(None)` means the peer closed the connection cleanly between
/// requests.
pub async fn read_request<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Request>, RequestError> {
    let Some(request_line) = read_line(reader, MAX_REQUEST_LINE).await? else {
        return Ok(None);
    };

    let mut parts = request_line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) if !m.is_empty() && !t.is_empty() => (m, t, v),
        _ => return Err(RequestError::Malformed("bad request line".into())),
    };
    if !version.starts_with("HTTP/") {
        return Err(RequestError::Malformed("bad protocol version".into()));
    }

    let mut request = Request {
        method: method.to_string(),
        path: String::new(),
        query: HashMap::new(),
        username: None,
        password: None,
        range_start: None,
        user_agent: None,
        close: false,
    };

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };
    request.path = path.to_string();
    if let Some(query) = query {
        request.query = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
    }

    let mut header_bytes_left = MAX_HEADER_BYTES;
    for _ in 0..MAX_HEADER_LINES {
        let Some(line) = read_line(reader, header_bytes_left).await? else {
            return Ok(None);
        };
        header_bytes_left = header_bytes_left.saturating_sub(line.len() as u64 + 2);
        if line.is_empty() {
            return Ok(Some(request));
        }
        // lines without a colon are tolerated and skipped
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.to_ascii_lowercase().as_str() {
            "authorization" => {
                if let Some((username, password)) = parse_basic_auth(value) {
                    request.username = username;
                    request.password = Some(password);
                }
            }
            "range" => request.range_start = parse_range(value),
            "user-agent" => request.user_agent = Some(value.to_string()),
            "connection" => request.close = value.eq_ignore_ascii_case("close"),
            _ => {}
        }
    }
    Err(RequestError::Malformed("too many header lines".into()))
}

/// Decodes `Basic <b64(user:pass)>`. An empty username maps to `None`.
fn parse_basic_auth(value: &str) -> Option<(Option<String>, String)> {
    let encoded = value.strip_prefix("Basic ").or_else(|| value.strip_prefix("basic "))?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    let username = if username.is_empty() {
        None
    } else {
        Some(username.to_string())
    };
    Some((username, password.to_string()))
}

/// Parses an open-ended single range, `bytes=<off>-`. Anything else reads
/// as "no range".
fn parse_range(value: &str) -> Option<u64> {
    let ranges = value.strip_prefix("bytes=")?;
    let (start, _rest) = ranges.split_once('-')?;
    start.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &str) -> Result<Option<Request>, RequestError> {
        let mut input = raw.as_bytes();
        read_request(&mut input).await
    }

    #[tokio::test]
    async fn parses_request_line_and_query() {
        let req = parse("GET /update?session-id=38&revision-number=2 HTTP/1.1\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/update");
        assert_eq!(req.query_u32("session-id"), 38);
        assert_eq!(req.query_u32("revision-number"), 2);
        assert_eq!(req.query_u32("delta"), 0);
    }

    #[tokio::test]
    async fn eof_before_request_is_clean_close() {
        assert!(parse("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_request_line_is_malformed() {
        assert!(matches!(
            parse("GET\r\n\r\n").await,
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            parse("GET /x SPDY/3\r\n\r\n").await,
            Err(RequestError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn parses_basic_auth_header() {
        // ":hunter2"
        let req = parse("GET /login HTTP/1.1\r\nAuthorization: Basic Omh1bnRlcjI=\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.username, None);
        assert_eq!(req.password.as_deref(), Some("hunter2"));
    }

    #[tokio::test]
    async fn auth_with_username() {
        // "anna:secret"
        let req = parse("GET /login HTTP/1.1\r\nAuthorization: Basic YW5uYTpzZWNyZXQ=\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.username.as_deref(), Some("anna"));
        assert_eq!(req.password.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn malformed_auth_degrades_to_no_credentials() {
        let req = parse("GET /login HTTP/1.1\r\nAuthorization: Basic %%%%\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert!(req.username.is_none());
        assert!(req.password.is_none());
    }

    #[tokio::test]
    async fn open_ended_range() {
        let req = parse("GET /databases/1/items/7.mp3 HTTP/1.1\r\nRange: bytes=200-\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.range_start, Some(200));
    }

    #[tokio::test]
    async fn zero_range_is_preserved() {
        let req = parse("GET /x HTTP/1.1\r\nRange: bytes=0-\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.range_start, Some(0));
    }

    #[tokio::test]
    async fn malformed_range_reads_as_no_range() {
        for bad in ["bytes=abc-", "items=0-", "bytes=", "200-"] {
            let raw = format!("GET /x HTTP/1.1\r\nRange: {bad}\r\n\r\n");
            let req = parse(&raw).await.unwrap().unwrap();
            assert_eq!(req.range_start, None, "range {bad:?} should be ignored");
        }
    }

    #[tokio::test]
    async fn connection_close_is_flagged() {
        let req = parse("GET /x HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert!(req.close);
        let req = parse("GET /x HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert!(!req.close);
    }

    #[tokio::test]
    async fn unknown_and_broken_headers_are_skipped() {
        let req = parse(
            "GET /x HTTP/1.1\r\nX-Whatever: 1\r\nthis line has no colon\r\nUser-Agent: iTunes/4.7 (Macintosh; N; PPC)\r\n\r\n",
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(req.user_agent.as_deref(), Some("iTunes/4.7 (Macintosh; N; PPC)"));
    }

    #[tokio::test]
    async fn header_flood_is_rejected() {
        let mut raw = String::from("GET /x HTTP/1.1\r\n");
        for i in 0..200 {
            raw.push_str(&format!("X-Filler-{i}: x\r\n"));
        }
        raw.push_str("\r\n");
        assert!(matches!(
            parse(&raw).await,
            Err(RequestError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn oversized_header_line_is_rejected() {
        let raw = format!("GET /x HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(70 * 1024));
        assert!(matches!(
            parse(&raw).await,
            Err(RequestError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn two_requests_parse_back_to_back() {
        let mut input: &[u8] =
            b"GET /server-info HTTP/1.1\r\n\r\nGET /content-codes HTTP/1.1\r\n\r\n";
        let first = read_request(&mut input).await.unwrap().unwrap();
        let second = read_request(&mut input).await.unwrap().unwrap();
        assert_eq!(first.path, "/server-info");
        assert_eq!(second.path, "/content-codes");
        assert!(read_request(&mut input).await.unwrap().is_none());
    }
}
