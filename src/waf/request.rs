use bytes::Bytes;

/// Request data handed over by the host at the access phase.
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    pub remote_addr: String,
    pub http_version: String,
    pub method: String,
    /// Path without the query string.
    pub uri: String,
    /// Raw query string, without the leading `?`.
    pub query_string: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl RequestParts {
    pub fn new(method: &str, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, query),
            None => (uri, ""),
        };

        Self {
            remote_addr: "127.0.0.1".to_string(),
            http_version: "1.1".to_string(),
            method: method.to_string(),
            uri: path.to_string(),
            query_string: query.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn remote_addr(mut self, addr: &str) -> Self {
        self.remote_addr = addr.to_string();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// First value of a header, compared case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response head available at the header_filter phase.
#[derive(Debug, Clone, Default)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_split() {
        let req = RequestParts::new("GET", "/search?q=1&lang=en");
        assert_eq!(req.uri, "/search");
        assert_eq!(req.query_string, "q=1&lang=en");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = RequestParts::new("GET", "/").header("User-Agent", "curl/8.0");
        assert_eq!(req.header_value("user-agent"), Some("curl/8.0"));
        assert_eq!(req.header_value("cookie"), None);
    }
}
