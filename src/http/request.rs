use bytes::{Buf, BytesMut};
use std::str;
use thiserror::Error;

use super::{Headers, Method, MAX_HEADERS};

/// Maximum size of the head section (request line + headers)
const MAX_HEAD_SIZE: usize = 2048;

/// Maximum body size; secured requests are far below this already
const MAX_BODY_SIZE: usize = 4096;

/// HTTP parse errors — all of them are fatal to the session
#[derive(Debug, Error)]
pub enum ParseError {
    /// Request line was not `METHOD path HTTP/1.1`
    #[error("invalid request line: {0}")]
    InvalidRequestLine(String),

    /// Unsupported request method
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// A header line was malformed
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// More than [`MAX_HEADERS`] headers
    #[error("too many headers")]
    TooManyHeaders,

    /// Head section exceeded its bound before terminating
    #[error("head section too large")]
    HeadTooLarge,

    /// `Content-Length` was present but not numeric
    #[error("invalid Content-Length")]
    InvalidContentLength,

    /// Body larger than the accessory accepts
    #[error("body too large: {0} bytes")]
    BodyTooLarge(usize),

    /// Head section was not valid UTF-8
    #[error("invalid UTF-8 in head section")]
    InvalidUtf8,
}

/// A parsed request
#[derive(Debug)]
pub struct HttpRequest {
    /// Request method
    pub method: Method,
    /// Path component, without the query string
    pub path: String,
    /// Raw query string after `?`, if any
    pub query: Option<String>,
    /// Request headers
    pub headers: Headers,
    /// Request body (empty when no `Content-Length`)
    pub body: Vec<u8>,
}

/// Incremental request parser
///
/// Sans-IO: `feed` buffers bytes, `decode` yields a request once the head
/// and the `Content-Length` body have fully arrived.
#[derive(Default)]
pub struct HttpParser {
    buffer: BytesMut,
}

impl HttpParser {
    /// Create an empty parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer incoming bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Discard any buffered bytes
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Try to parse a complete request
    ///
    /// Returns `Ok(None)` while more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] on any malformed input; the caller closes
    /// the session.
    pub fn decode(&mut self) -> Result<Option<HttpRequest>, ParseError> {
        let Some(head_end) = find_head_end(&self.buffer) else {
            if self.buffer.len() > MAX_HEAD_SIZE {
                return Err(ParseError::HeadTooLarge);
            }
            return Ok(None);
        };
        if head_end > MAX_HEAD_SIZE {
            return Err(ParseError::HeadTooLarge);
        }

        let head = str::from_utf8(&self.buffer[..head_end]).map_err(|_| ParseError::InvalidUtf8)?;
        let (method, path, query, headers) = parse_head(head)?;

        let content_length = match headers.get(super::names::CONTENT_LENGTH) {
            Some(v) => v.trim().parse().map_err(|_| ParseError::InvalidContentLength)?,
            None => 0,
        };
        if content_length > MAX_BODY_SIZE {
            return Err(ParseError::BodyTooLarge(content_length));
        }

        let total = head_end + 4 + content_length;
        if self.buffer.len() < total {
            return Ok(None);
        }

        self.buffer.advance(head_end + 4);
        let body = self.buffer.split_to(content_length).to_vec();

        Ok(Some(HttpRequest {
            method,
            path,
            query,
            headers,
            body,
        }))
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(head: &str) -> Result<(Method, String, Option<String>, Headers), ParseError> {
    let mut lines = head.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| ParseError::InvalidRequestLine(String::new()))?;
    let mut parts = request_line.split_whitespace();
    let (Some(method_token), Some(target), Some(version)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::InvalidRequestLine(request_line.to_string()));
    };
    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequestLine(request_line.to_string()));
    }

    let method = Method::from_token(method_token)
        .ok_or_else(|| ParseError::UnsupportedMethod(method_token.to_string()))?;

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if headers.len() == MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(ParseError::InvalidHeader(line.to_string()));
        };
        headers.push(name.trim(), value.trim());
    }

    Ok((method, path, query, headers))
}
