//! HTTP request formatting for HAP endpoints.

use hap_core::InstanceId;

/// Body type for JSON characteristic requests.
pub const CONTENT_TYPE_HAP_JSON: &str = "application/hap+json";
/// Body type for pairing TLV8 requests.
pub const CONTENT_TYPE_PAIRING_TLV8: &str = "application/pairing+tlv8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
}

/// HTTP/1.1 request builder.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self.header("Content-Type", content_type)
    }

    /// Serialize to wire format.
    ///
    /// ```text
    /// METHOD URI HTTP/1.1\r\n
    /// Host: HOST\r\n
    /// Content-Length: M\r\n  (if body present)
    /// Header: Value\r\n
    /// \r\n
    /// [body]
    /// ```
    pub fn serialize(&self, host: &str) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", self.method.as_str(), self.uri, host);

        if let Some(ref body) = self.body {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        for (key, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", key, value));
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        if let Some(ref body) = self.body {
            out.extend_from_slice(body);
        }
        out
    }

    // Factory methods for HAP endpoints

    pub fn get_accessories() -> Self {
        Self::new(HttpMethod::Get, "/accessories")
    }

    /// `GET /characteristics?id=1.10,1.11`
    pub fn get_characteristics(ids: &[InstanceId]) -> Self {
        let list = ids
            .iter()
            .map(InstanceId::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Self::new(HttpMethod::Get, format!("/characteristics?id={}", list))
    }

    pub fn put_characteristics(body: Vec<u8>) -> Self {
        Self::new(HttpMethod::Put, "/characteristics").body(CONTENT_TYPE_HAP_JSON, body)
    }

    pub fn identify() -> Self {
        Self::new(HttpMethod::Post, "/identify")
    }

    pub fn pair_setup(body: Vec<u8>) -> Self {
        Self::new(HttpMethod::Post, "/pair-setup").body(CONTENT_TYPE_PAIRING_TLV8, body)
    }

    pub fn pair_verify(body: Vec<u8>) -> Self {
        Self::new(HttpMethod::Post, "/pair-verify").body(CONTENT_TYPE_PAIRING_TLV8, body)
    }

    pub fn pairings(body: Vec<u8>) -> Self {
        Self::new(HttpMethod::Post, "/pairings").body(CONTENT_TYPE_PAIRING_TLV8, body)
    }
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
        }
    }
}
