use url::Url;

use crate::http::headers::HeaderList;

/// HTTP request methods the client can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Submit a body, announced with `Expect: 100-continue`
    POST,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Example
    ///
    /// ```
    /// # use evnet::http::request::Method;
    /// assert_eq!(Method::from_str("POST"), Some(Method::POST));
    /// assert_eq!(Method::from_str("post"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
        }
    }
}

/// The `Host` value for `url`: hostname plus the port when one was given.
pub fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// The request target: path plus query, never empty.
pub fn request_target(url: &Url) -> String {
    let path = if url.path().is_empty() { "/" } else { url.path() };
    match url.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    }
}

/// Serialize the request line and header block.
///
/// `Host` comes from the URI. A POST carries `Content-Length: body_len` and
/// `Expect: 100-continue`; the body itself is written separately once the
/// server agrees to take it.
pub fn encode_head(method: Method, url: &Url, headers: &HeaderList, body_len: usize) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(256);

    buffer.extend_from_slice(
        format!("{} {} HTTP/1.1\r\n", method.as_str(), request_target(url)).as_bytes(),
    );
    buffer.extend_from_slice(format!("Host: {}\r\n", host_header(url)).as_bytes());

    for (key, value) in headers.iter() {
        let managed = key.eq_ignore_ascii_case("Host")
            || key.eq_ignore_ascii_case("Content-Length")
            || key.eq_ignore_ascii_case("Expect");
        if managed {
            continue;
        }
        buffer.extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
    }

    if method == Method::POST {
        buffer.extend_from_slice(format!("Content-Length: {body_len}\r\n").as_bytes());
        buffer.extend_from_slice(b"Expect: 100-continue\r\n");
    }

    buffer.extend_from_slice(b"\r\n");
    buffer
}
