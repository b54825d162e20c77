//! Minimal HTTP/1.1 layer for the HAP surface
//!
//! Only what the accessory needs: an incremental request parser with
//! bounded headers and body, and a response builder that also produces the
//! unsolicited `EVENT/1.0` status line used for characteristic
//! notifications.

mod request;
mod response;

pub use self::request::{HttpParser, HttpRequest, ParseError};
pub use self::response::ResponseBuilder;

/// Maximum number of request headers
pub const MAX_HEADERS: usize = 20;

/// Well-known header names
pub mod names {
    /// `Content-Type`
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// `Content-Length`
    pub const CONTENT_LENGTH: &str = "Content-Length";
}

/// HAP content types
pub mod content_types {
    /// Pairing TLV bodies
    pub const PAIRING_TLV8: &str = "application/pairing+tlv8";
    /// Attribute-database JSON bodies
    pub const HAP_JSON: &str = "application/hap+json";
}

/// Request methods accepted by the accessory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
}

impl Method {
    /// Parse from the request-line token
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    /// Wire representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

/// HTTP status code with its reason phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    /// 200 OK
    pub const OK: StatusCode = StatusCode(200);
    /// 204 No Content
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    /// 207 Multi-Status
    pub const MULTI_STATUS: StatusCode = StatusCode(207);
    /// 400 Bad Request
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    /// 470 Connection Authorization Required
    pub const AUTH_REQUIRED: StatusCode = StatusCode(470);

    /// Reason phrase for the status line
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            204 => "No Content",
            207 => "Multi-Status",
            400 => "Bad Request",
            470 => "Connection Authorization Required",
            _ => "Unknown",
        }
    }
}

/// Request header collection, bounded and case-insensitive
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Empty header set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, preserving arrival order
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Case-insensitive lookup of the first matching header
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Number of headers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `Content-Length`, when present and numeric
    #[must_use]
    pub fn content_length(&self) -> Option<usize> {
        self.get(names::CONTENT_LENGTH)?.trim().parse().ok()
    }

    /// Whether `Content-Type` matches (case-insensitive, parameters ignored)
    #[must_use]
    pub fn content_type_is(&self, expected: &str) -> bool {
        self.get(names::CONTENT_TYPE)
            .map(|v| {
                v.split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .eq_ignore_ascii_case(expected)
            })
            .unwrap_or(false)
    }
}
