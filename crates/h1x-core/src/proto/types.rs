//! HTTP primitives: methods, versions, headers, message heads.

// =============================================================================
// Method and Version
// =============================================================================

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    /// Extension method.
    Other(String),
}

impl Method {
    /// The method name as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Other(name) => name,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP protocol version carried by a connection or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
    /// Anything else; rejected by response validation.
    Other,
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpVersion::Http10 => write!(f, "HTTP/1.0"),
            HttpVersion::Http11 => write!(f, "HTTP/1.1"),
            HttpVersion::Other => write!(f, "HTTP/?"),
        }
    }
}

// =============================================================================
// Headers
// =============================================================================

/// Ordered multimap of HTTP headers with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether any value exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether `name` carries exactly `value` (name compared
    /// case-insensitively, value compared exactly).
    pub fn contains_value(&self, name: &str, value: &str) -> bool {
        self.entries
            .iter()
            .any(|(n, v)| n.eq_ignore_ascii_case(name) && v == value)
    }

    /// Replace all values for `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Append a value without touching existing ones.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Remove every value for `name`, returning whether any was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

// =============================================================================
// Message Heads
// =============================================================================

/// The request line and headers captured when a stream writes its head.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request method.
    pub method: Method,
    /// Request target as sent on the wire.
    pub uri: String,
    /// Authority used for the default `Host` header.
    pub authority: String,
    /// Caller-supplied headers.
    pub headers: Headers,
}

impl RequestHead {
    /// Create a request head with no extra headers.
    pub fn new(method: Method, uri: impl Into<String>, authority: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            authority: authority.into(),
            headers: Headers::new(),
        }
    }

    /// Attach headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// The status line and headers of a decoded response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// Protocol version announced by the server.
    pub version: HttpVersion,
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Response headers.
    pub headers: Headers,
}

impl ResponseHead {
    /// Create a response head with no headers.
    pub fn new(version: HttpVersion, status: u16, reason: impl Into<String>) -> Self {
        Self {
            version,
            status,
            reason: reason.into(),
            headers: Headers::new(),
        }
    }

    /// Attach headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

// =============================================================================
// Keep-Alive Parsing
// =============================================================================

/// Extract the `timeout` parameter from a `Keep-Alive` response header.
///
/// `"timeout=5, max=1000"` yields `Some(5)`. Unknown parameters are
/// ignored; a missing or malformed timeout yields `None`.
pub fn parse_keep_alive_timeout(header: &str) -> Option<u64> {
    header.split(',').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("timeout") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn keep_alive_parser_never_panics(s in ".{0,64}") {
            let _ = parse_keep_alive_timeout(&s);
        }

        #[test]
        fn keep_alive_roundtrip(n in 0u64..100_000) {
            let header = format!("timeout={}, max=42", n);
            prop_assert_eq!(parse_keep_alive_timeout(&header), Some(n));
        }

        #[test]
        fn headers_get_ignores_name_case(name in "[a-zA-Z-]{1,16}", value in "[ -~]{0,32}") {
            let mut headers = Headers::new();
            headers.add(name.clone(), value.clone());
            prop_assert_eq!(headers.get(&name.to_ascii_uppercase()), Some(value.as_str()));
            prop_assert_eq!(headers.get(&name.to_ascii_lowercase()), Some(value.as_str()));
        }
    }
}
