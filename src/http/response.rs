use super::{names, StatusCode};

/// Builder for accessory responses
///
/// Produces `HTTP/1.1` status lines, or `EVENT/1.0` for unsolicited
/// characteristic notifications. `Content-Length` is patched in when a
/// body is attached, after the body has been generated.
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    event: bool,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl ResponseBuilder {
    /// Response with the given status
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            event: false,
            headers: Vec::new(),
            body: None,
        }
    }

    /// `200 OK`
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// `204 No Content`
    #[must_use]
    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    /// `400 Bad Request`
    #[must_use]
    pub fn bad_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST)
    }

    /// `470 Connection Authorization Required`
    #[must_use]
    pub fn auth_required() -> Self {
        Self::new(StatusCode::AUTH_REQUIRED)
    }

    /// Unsolicited event response: `EVENT/1.0 200 OK`
    #[must_use]
    pub fn event() -> Self {
        let mut builder = Self::new(StatusCode::OK);
        builder.event = true;
        builder
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Attach a body with its content type; sets `Content-Length`
    #[must_use]
    pub fn body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers
            .push((names::CONTENT_TYPE.to_string(), content_type.to_string()));
        self.body = Some(body);
        self
    }

    /// Encode to wire bytes
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        let body_len = self.body.as_ref().map_or(0, Vec::len);
        let mut out = Vec::with_capacity(64 + body_len);

        let protocol = if self.event { "EVENT/1.0" } else { "HTTP/1.1" };
        out.extend_from_slice(
            format!("{protocol} {} {}\r\n", self.status.0, self.status.reason()).as_bytes(),
        );
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if let Some(body) = &self.body {
            out.extend_from_slice(
                format!("{}: {}\r\n", names::CONTENT_LENGTH, body.len()).as_bytes(),
            );
        }
        out.extend_from_slice(b"\r\n");
        if let Some(body) = self.body {
            out.extend_from_slice(&body);
        }
        out
    }
}
