use crate::error::NetError;

/// Request, general and entity header fields a request may carry.
const KNOWN_FIELDS: &[&str] = &[
    // general
    "Cache-Control",
    "Connection",
    "Date",
    "Pragma",
    "Trailer",
    "Transfer-Encoding",
    "Upgrade",
    "Via",
    "Warning",
    // request
    "Accept",
    "Accept-Charset",
    "Accept-Encoding",
    "Accept-Language",
    "Authorization",
    "Cookie",
    "Expect",
    "From",
    "If-Match",
    "If-Modified-Since",
    "If-None-Match",
    "If-Range",
    "If-Unmodified-Since",
    "Max-Forwards",
    "Proxy-Authorization",
    "Range",
    "Referer",
    "TE",
    "User-Agent",
    // entity
    "Allow",
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-Location",
    "Content-MD5",
    "Content-Range",
    "Content-Type",
    "Expires",
    "Last-Modified",
];

/// Whether `field` is a standard request header.
pub fn is_known_field(field: &str) -> bool {
    KNOWN_FIELDS.iter().any(|known| known.eq_ignore_ascii_case(field))
}

/// `Connection`, plus the two mangled spellings some proxies emit to
/// neutralise the header without changing the byte count.
pub fn is_connection_field(field: &str) -> bool {
    ["Connection", "Cneonction", "nnCoection"]
        .iter()
        .any(|name| name.eq_ignore_ascii_case(field))
}

/// Whether the comma-separated `value` lists `token`.
pub fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

/// Check that `field: value` may be set on a request.
///
/// `Host` is always rejected since it is derived from the URI. Fields outside
/// the standard set are rejected unless `allow_nonstandard` is set.
pub fn validate_request_header(
    field: &str,
    value: &str,
    allow_nonstandard: bool,
) -> Result<(), NetError> {
    let malformed_name = field.is_empty()
        || field
            .bytes()
            .any(|b| b == b':' || b.is_ascii_whitespace() || b.is_ascii_control());
    if malformed_name {
        return Err(NetError::InvalidHeader(format!("malformed field name {field:?}")));
    }
    if value.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(NetError::InvalidHeader(format!("line break in value of {field}")));
    }
    if field.eq_ignore_ascii_case("Host") {
        return Err(NetError::InvalidHeader(
            "Host is derived from the request URI".to_string(),
        ));
    }
    if !allow_nonstandard && !is_known_field(field) {
        return Err(NetError::InvalidHeader(format!("non-standard field {field}")));
    }
    Ok(())
}

/// Ordered header list with case-insensitive keys.
///
/// Setting a field that is already present overwrites its value in place,
/// so the first spelling and position win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&field))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(field))
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, field: &str) -> Option<String> {
        let pos = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(field))?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
