// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal HTTP/1.1 framing for the loopback channel.
//
// Both ends of the bridge live on the same device, so a full HTTP stack is
// unnecessary.  We frame requests and responses just enough to interoperate
// with ordinary HTTP tooling: a start line, `Name: value` headers, a blank
// line, and a body whose length is given by `Content-Length`.  Connections
// are one-shot (`Connection: close`).

use tokio::io::{AsyncRead, AsyncReadExt};

use shellbridge_core::error::{BridgeError, Result};
use shellbridge_core::loopback::LoopbackUrl;

/// Ordered header list; names compare case-insensitively.
pub type Headers = Vec<(String, String)>;

/// Upper bound on the header block, independent of the body limit.
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Read chunk size.
const READ_CHUNK: usize = 8192;

/// A parsed start line + headers + body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Request: `[method, target, version]`; response: `[version, code, reason]`.
    pub start_line: Vec<String>,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Message {
    /// First header value with the given name.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// Look up a header by case-insensitive name.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Serialize a request for `url`.
///
/// `Host`, `Content-Length` and `Connection` are always written by us;
/// caller-supplied copies of those headers are skipped.
///
/// # Errors
///
/// `Transport` if a method, header name or value contains CR or LF.
pub fn encode_request(
    method: &str,
    url: &LoopbackUrl,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<Vec<u8>> {
    if has_line_break(method) {
        return Err(BridgeError::Transport(format!("method {method:?} contains a line break")));
    }
    let mut head = format!("{method} {} HTTP/1.1\r\nHost: {}\r\n", url.path(), url.host_header());
    for (name, value) in headers.iter().filter(|(n, _)| !is_managed_header(n)) {
        if has_line_break(name) || has_line_break(value) {
            return Err(BridgeError::Transport(format!("header {name:?} contains a line break")));
        }
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()));

    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    Ok(out)
}

fn has_line_break(text: &str) -> bool {
    text.contains(['\r', '\n'])
}

/// Serialize a response.
pub fn encode_response(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    let head = format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        reason_phrase(status),
        body.len()
    );
    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

fn is_managed_header(name: &str) -> bool {
    ["host", "content-length", "connection"]
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}

/// Canonical reason phrase for the status codes the bridge emits.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Read one message from `stream`.
///
/// Stops at `Content-Length` when present, otherwise at EOF.  Bodies larger
/// than `max_body` are rejected.
pub async fn read_message<R>(stream: &mut R, max_body: usize) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    // Headers first.
    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(BridgeError::Transport("header block too large".into()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(BridgeError::Transport(if buf.is_empty() {
                "connection closed before any data".into()
            } else {
                "connection closed inside header block".into()
            }));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let (start_line, headers) = parse_head(&buf[..header_end])?;
    let body_offset = header_end + 4;

    let content_length = match header_value(&headers, "content-length") {
        Some(raw) => Some(
            raw.trim()
                .parse::<usize>()
                .map_err(|e| BridgeError::Transport(format!("bad Content-Length '{raw}': {e}")))?,
        ),
        None => None,
    };

    if let Some(len) = content_length {
        if len > max_body {
            return Err(BridgeError::Transport(format!(
                "body of {len} bytes exceeds limit of {max_body}"
            )));
        }
        while buf.len() < body_offset + len {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(BridgeError::Transport(format!(
                    "connection closed after {} of {len} body bytes",
                    buf.len() - body_offset
                )));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        buf.truncate(body_offset + len);
    } else {
        let mut limited = (&mut *stream).take((max_body + 1) as u64);
        limited.read_to_end(&mut buf).await?;
        if buf.len() - body_offset > max_body {
            return Err(BridgeError::Transport(format!(
                "body exceeds limit of {max_body} bytes"
            )));
        }
    }

    let body = buf.split_off(body_offset);
    Ok(Message {
        start_line,
        headers,
        body,
    })
}

fn parse_head(head: &[u8]) -> Result<(Vec<String>, Headers)> {
    let text = std::str::from_utf8(head)
        .map_err(|e| BridgeError::Transport(format!("header block is not UTF-8: {e}")))?;
    let mut lines = text.split("\r\n");

    let start = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| BridgeError::Transport("missing start line".into()))?;
    let start_line: Vec<String> = start.splitn(3, ' ').map(str::to_owned).collect();
    if start_line.len() < 2 {
        return Err(BridgeError::Transport(format!("malformed start line '{start}'")));
    }

    let mut headers = Headers::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| BridgeError::Transport(format!("malformed header '{line}'")))?;
        headers.push((name.trim().to_owned(), value.trim().to_owned()));
    }
    Ok((start_line, headers))
}

/// Find the first occurrence of `needle` in `haystack`.
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> LoopbackUrl {
        LoopbackUrl::parse("native://127.0.0.1:4580/_native/api/call").unwrap()
    }

    #[test]
    fn request_carries_managed_headers_once() {
        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("content-length".to_string(), "999".to_string()),
        ];
        let bytes = encode_request("POST", &url(), &headers, b"{}").unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("POST /_native/api/call HTTP/1.1\r\n"));
        assert!(text.contains("Host: 127.0.0.1:4580\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert_eq!(text.matches("Content-Length").count(), 1);
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(!text.contains("999"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }

    #[test]
    fn header_with_line_break_is_refused() {
        let injected = vec![(
            "X-Trace".to_string(),
            "1\r\nContent-Length: 0\r\n\r\nGET /other".to_string(),
        )];
        let err = encode_request("POST", &url(), &injected, b"{}").unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));

        let bad_name = vec![("X-A\nX-B".to_string(), "v".to_string())];
        assert!(encode_request("POST", &url(), &bad_name, b"").is_err());
        assert!(encode_request("GET\r\nX", &url(), &[], b"").is_err());
    }

    #[tokio::test]
    async fn reads_response_by_content_length() {
        let mut raw = encode_response(200, "application/json", br#"{"ok":true}"#);
        raw.extend_from_slice(b"trailing garbage");
        let mut reader = &raw[..];

        let msg = read_message(&mut reader, 1024).await.unwrap();
        assert_eq!(msg.start_line, vec!["HTTP/1.1", "200", "OK"]);
        assert_eq!(msg.header("content-type"), Some("application/json"));
        assert_eq!(msg.body, br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn reads_body_to_eof_without_length() {
        let raw = b"HTTP/1.1 200 OK\r\nX-Test: 1\r\n\r\nhello".to_vec();
        let mut reader = &raw[..];
        let msg = read_message(&mut reader, 1024).await.unwrap();
        assert_eq!(msg.body, b"hello");
        assert_eq!(msg.header("x-test"), Some("1"));
    }

    #[tokio::test]
    async fn rejects_oversized_body() {
        let raw = encode_response(200, "text/plain", &[b'x'; 64]);
        let mut reader = &raw[..];
        assert!(matches!(
            read_message(&mut reader, 16).await,
            Err(BridgeError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn rejects_truncated_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc".to_vec();
        let mut reader = &raw[..];
        assert!(read_message(&mut reader, 1024).await.is_err());
    }

    #[tokio::test]
    async fn empty_stream_is_transport_error() {
        let mut reader: &[u8] = &[];
        assert!(matches!(
            read_message(&mut reader, 1024).await,
            Err(BridgeError::Transport(_))
        ));
    }

    #[test]
    fn find_subsequence_crlf() {
        assert_eq!(find_subsequence(b"ab\r\n\r\ncd", b"\r\n\r\n"), Some(2));
        assert_eq!(find_subsequence(b"abcd", b"\r\n\r\n"), None);
    }
}
