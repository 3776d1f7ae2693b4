use thiserror::Error;

use crate::http::response::StatusLine;

/// Errors produced while parsing an HTTP/1.1 response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The status line is not of the form `HTTP/x.y NNN reason`.
    #[error("invalid status line: {0:?}")]
    InvalidStatusLine(String),
    /// A chunk size line is not a hexadecimal number.
    #[error("invalid chunk size: {0:?}")]
    InvalidChunkSize(String),
    /// The `Content-Length` value is not a decimal number.
    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),
    /// The line is not valid UTF-8 where text was required.
    #[error("response line is not valid UTF-8")]
    InvalidEncoding,
}

/// Strip the line terminator (`\r\n` or a bare `\n`).
pub fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parse `HTTP/x.y NNN reason`. The reason phrase may be empty or missing.
pub fn parse_status_line(line: &[u8]) -> Result<StatusLine, ParseError> {
    let text = std::str::from_utf8(trim_line(line)).map_err(|_| ParseError::InvalidEncoding)?;
    let invalid = || ParseError::InvalidStatusLine(text.to_string());

    let mut parts = text.splitn(3, ' ');
    let version = parts.next().ok_or_else(invalid)?;
    let code = parts.next().ok_or_else(invalid)?;
    let reason = parts.next().unwrap_or("").trim();

    let (major, minor) = version
        .strip_prefix("HTTP/")
        .and_then(|v| v.split_once('.'))
        .ok_or_else(invalid)?;
    let major: u8 = major.parse().map_err(|_| invalid())?;
    let minor: u8 = minor.parse().map_err(|_| invalid())?;

    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let code: u16 = code.parse().map_err(|_| invalid())?;

    Ok(StatusLine {
        version: (major, minor),
        code,
        reason: reason.to_string(),
    })
}

/// Split `field: value`. Lines without a colon or with an empty field are skipped.
pub fn parse_header_line(line: &[u8]) -> Option<(String, String)> {
    let text = String::from_utf8_lossy(trim_line(line));
    let (key, value) = text.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

/// Parse a chunk size line. Chunk extensions after `;` are ignored.
pub fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let text = std::str::from_utf8(trim_line(line)).map_err(|_| ParseError::InvalidEncoding)?;
    let size = text.split(';').next().unwrap_or("").trim();
    if size.is_empty() {
        return Err(ParseError::InvalidChunkSize(text.to_string()));
    }
    usize::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunkSize(text.to_string()))
}

pub fn parse_content_length(value: &str) -> Result<usize, ParseError> {
    value
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidContentLength(value.to_string()))
}
