use crate::error::NetError;
use crate::http::headers;
use crate::http::parser::parse_content_length;

/// A parsed response status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// `(major, minor)` protocol version
    pub version: (u8, u8),
    /// Numeric status code, e.g. `200`
    pub code: u16,
    /// Reason phrase, possibly empty
    pub reason: String,
}

impl StatusLine {
    /// 1xx responses are interim; the real response follows.
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.code)
    }
}

/// Returns whether a response with this status never carries a body.
pub fn is_bodyless(code: u16) -> bool {
    matches!(code, 100..=199 | 204 | 304)
}

/// Returns the standard reason phrase for common status codes.
///
/// # Example
///
/// ```
/// # use evnet::http::response::reason_phrase;
/// assert_eq!(reason_phrase(200), "OK");
/// assert_eq!(reason_phrase(302), "Found");
/// ```
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

/// What has been learned about the current response from its header block.
#[derive(Debug, Clone, Default)]
pub struct ResponseHead {
    /// Status code of the final (non-interim) response
    pub code: Option<u16>,
    /// Header lines in arrival order, duplicates kept
    pub headers: Vec<(String, String)>,
    /// `Content-Length`, when the server sent one
    pub content_length: Option<usize>,
    /// `Transfer-Encoding` lists `chunked`
    pub chunked: bool,
    /// `Location` value, unresolved
    pub location: Option<String>,
    /// The server will close the connection after this response
    pub connection_close: bool,
}

impl ResponseHead {
    /// Record one header line, picking out the fields that drive the body framing.
    pub fn record(&mut self, name: String, value: String) -> Result<(), NetError> {
        if name.eq_ignore_ascii_case("Content-Length") {
            self.content_length = Some(parse_content_length(&value)?);
        } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
            self.chunked |= headers::has_token(&value, "chunked");
        } else if name.eq_ignore_ascii_case("Location") {
            self.location = Some(value.clone());
        } else if headers::is_connection_field(&name) {
            self.connection_close |= headers::has_token(&value, "close");
        }

        self.headers.push((name, value));
        Ok(())
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the response body is read until the server closes.
    pub fn is_close_delimited(&self) -> bool {
        !self.chunked && self.content_length.is_none()
    }
}
