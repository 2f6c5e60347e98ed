//! HTTP response parsing, including `EVENT/1.0` push messages.

use std::collections::HashMap;

use hap_core::error::{HttpError, Result};
use hap_core::{CharacteristicValue, Characteristics};
use serde::de::DeserializeOwned;

/// Whether a message answers a request or was pushed by the accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Response,
    Event,
}

/// Parsed HTTP response or event.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub kind: MessageKind,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Parse one complete message from `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        match Self::try_parse(data)? {
            Some((response, _)) => Ok(response),
            None => Err(HttpError::InvalidResponse("incomplete message".to_string()).into()),
        }
    }

    /// Parse the first message in `data` if it is complete.
    ///
    /// Returns the message and the number of bytes it occupied, or `None`
    /// when more data is needed. Bodies use `Content-Length` or chunked
    /// transfer encoding.
    pub fn try_parse(data: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(header_end) = find(data, b"\r\n\r\n") else {
            return Ok(None);
        };
        let body_start = header_end + 4;

        let header_str = std::str::from_utf8(&data[..header_end])
            .map_err(|_| HttpError::InvalidResponse("invalid UTF-8 in headers".to_string()))?;
        let mut lines = header_str.split("\r\n");

        let status_line = lines
            .next()
            .ok_or_else(|| HttpError::InvalidResponse("missing status line".to_string()))?;
        let (kind, status_code, status_text) = parse_status_line(status_line)?;

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let mut response = Self {
            kind,
            status_code,
            status_text,
            headers,
            body: Vec::new(),
        };

        let chunked = response
            .header("Transfer-Encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));

        let consumed = if chunked {
            match decode_chunked(&data[body_start..])? {
                Some((body, used)) => {
                    response.body = body;
                    body_start + used
                }
                None => return Ok(None),
            }
        } else {
            let length = match response.header("Content-Length") {
                Some(v) => v.parse::<usize>().map_err(|_| {
                    HttpError::InvalidResponse(format!("invalid Content-Length: {}", v))
                })?,
                None => 0,
            };
            if data.len() < body_start + length {
                return Ok(None);
            }
            response.body = data[body_start..body_start + length].to_vec();
            body_start + length
        };

        Ok(Some((response, consumed)))
    }

    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }

    /// Check if response indicates success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Get header value (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn ensure_success(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(HttpError::UnexpectedStatus(self.status_code).into())
        }
    }

    /// Decode the JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::Json(e.to_string()).into())
    }

    /// Characteristic values of a `200`, `207` or event body.
    ///
    /// The first entry carrying a non-zero HAP status becomes an error.
    pub fn characteristic_values(&self) -> Result<Vec<CharacteristicValue>> {
        let values: Characteristics<CharacteristicValue> = self.json()?;
        check_statuses(&values.characteristics)?;
        Ok(values.characteristics)
    }
}

/// Reject the first characteristic carrying a non-zero HAP status.
pub(crate) fn check_statuses(values: &[CharacteristicValue]) -> Result<()> {
    match values.iter().find(|v| v.status.is_some_and(|s| s != 0)) {
        Some(failed) => Err(HttpError::CharacteristicStatus {
            aid: failed.aid,
            iid: failed.iid,
            status: failed.status.unwrap_or_default(),
        }
        .into()),
        None => Ok(()),
    }
}

/// Parse status line: "HTTP/1.1 200 OK" or "EVENT/1.0 200 OK"
fn parse_status_line(line: &str) -> Result<(MessageKind, u16, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();
    if parts.len() < 2 {
        return Err(HttpError::InvalidResponse(format!("malformed status line: {}", line)).into());
    }

    let kind = if parts[0].starts_with("HTTP/") {
        MessageKind::Response
    } else if parts[0].starts_with("EVENT/") {
        MessageKind::Event
    } else {
        return Err(
            HttpError::InvalidResponse(format!("not an HTTP response: {}", parts[0])).into(),
        );
    };

    let code = parts[1]
        .parse()
        .map_err(|_| HttpError::InvalidResponse(format!("invalid status code: {}", parts[1])))?;
    let text = parts.get(2).unwrap_or(&"").to_string();

    Ok((kind, code, text))
}

/// Decode a chunked body; `None` until the terminating chunk has arrived.
fn decode_chunked(data: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let Some(line_end) = find(&data[pos..], b"\r\n") else {
            return Ok(None);
        };
        let size_line = std::str::from_utf8(&data[pos..pos + line_end])
            .map_err(|_| HttpError::InvalidResponse("invalid chunk size".to_string()))?;
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| HttpError::InvalidResponse(format!("invalid chunk size: {}", size_line)))?;
        pos += line_end + 2;

        if size == 0 {
            // Skip optional trailers up to the empty line
            loop {
                let Some(end) = find(&data[pos..], b"\r\n") else {
                    return Ok(None);
                };
                pos += end + 2;
                if end == 0 {
                    return Ok(Some((body, pos)));
                }
            }
        }

        if data.len() < pos + size + 2 {
            return Ok(None);
        }
        body.extend_from_slice(&data[pos..pos + size]);
        if &data[pos + size..pos + size + 2] != b"\r\n" {
            return Err(HttpError::InvalidResponse("chunk not terminated by CRLF".to_string()).into());
        }
        pos += size + 2;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
