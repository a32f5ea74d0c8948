//! Raw HTTP request analysis and message building.
//!
//! Requests arrive as raw bytes exactly as the host proxy would send them.
//! [`ParsedRequest`] splits them into the start line, verbatim header lines,
//! the body, and the addressable parameters (query, form body, cookies and
//! JSON leaves). [`build_message`] performs the reverse and keeps
//! `Content-Length` consistent with the body.

use crate::model::ParameterLocation;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Body encoding detected from the `Content-Type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    None,
    UrlEncoded,
    Multipart,
    Xml,
    Json,
    Unknown,
}

/// A parameter located in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParameter {
    pub name: String,
    pub value: String,
    pub location: ParameterLocation,
}

/// An analyzed HTTP request.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    /// Method as written on the start line
    pub method: String,
    /// Request target (origin-form or absolute-form)
    pub target: String,
    /// Protocol version, e.g. `HTTP/1.1`
    pub version: String,
    /// Header lines without line terminators, in order
    pub headers: Vec<String>,
    /// Offset of the first body byte in the raw buffer
    pub body_offset: usize,
    /// Body bytes
    pub body: Vec<u8>,
    /// Detected body encoding
    pub content_type: ContentType,
    /// Query, cookie, body and JSON parameters, in that order
    pub parameters: Vec<RequestParameter>,
}

impl ParsedRequest {
    /// Analyze a raw request.
    pub fn parse(raw: &[u8]) -> Result<Self, MessageError> {
        if raw.is_empty() {
            return Err(MessageError::Empty);
        }

        let (head_end, body_offset) = find_head_end(raw);
        let head =
            std::str::from_utf8(&raw[..head_end]).map_err(|_| MessageError::InvalidEncoding)?;

        let mut lines = head
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line));

        let start_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or(MessageError::MissingStartLine)?;
        let parts: Vec<&str> = start_line.split_whitespace().collect();
        let [method, target, version] = parts.as_slice() else {
            return Err(MessageError::MalformedStartLine(start_line.to_string()));
        };

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            if split_header(line).is_none() {
                return Err(MessageError::MalformedHeader(line.to_string()));
            }
            headers.push(line.to_string());
        }

        let body = raw[body_offset..].to_vec();
        let content_type = detect_content_type(&headers, &body);

        let mut request = Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
            body_offset,
            body,
            content_type,
            parameters: Vec::new(),
        };
        request.parameters = request.collect_parameters();

        Ok(request)
    }

    /// Start line as it will be written back.
    pub fn start_line(&self) -> String {
        format!("{} {} {}", self.method, self.target, self.version)
    }

    /// Path component of the target (without the query string).
    pub fn path(&self) -> &str {
        split_target(&self.target).0
    }

    /// Raw query string, if the target has one.
    pub fn query(&self) -> Option<&str> {
        split_target(&self.target).1
    }

    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .filter_map(|line| split_header(line))
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Whether a header with the given name is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Body decoded as UTF-8 (lossy).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the body is addressable as `name=value` pairs.
    pub fn has_form_body(&self) -> bool {
        match self.content_type {
            ContentType::UrlEncoded => true,
            ContentType::None | ContentType::Unknown => !self.has_header("content-type"),
            _ => false,
        }
    }

    /// First parameter with the given name and location.
    pub fn find_parameter(
        &self,
        name: &str,
        location: ParameterLocation,
    ) -> Option<&RequestParameter> {
        self.parameters
            .iter()
            .find(|p| p.location == location && p.name == name)
    }

    /// Rebuild the message from the current parts.
    pub fn to_bytes(&self) -> Vec<u8> {
        build_message(&self.start_line(), &self.headers, &self.body)
    }

    fn collect_parameters(&self) -> Vec<RequestParameter> {
        let mut parameters = Vec::new();

        if let Some(query) = self.query() {
            parameters.extend(
                split_pairs(query, '&')
                    .into_iter()
                    .map(|(name, value)| RequestParameter {
                        name,
                        value,
                        location: ParameterLocation::Url,
                    }),
            );
        }

        for line in &self.headers {
            if let Some((name, value)) = split_header(line) {
                if name.eq_ignore_ascii_case("cookie") {
                    parameters.extend(split_pairs(value, ';').into_iter().map(|(name, value)| {
                        RequestParameter {
                            name,
                            value,
                            location: ParameterLocation::Cookie,
                        }
                    }));
                }
            }
        }

        if self.body.is_empty() {
            return parameters;
        }

        if self.has_form_body() {
            let body = self.body_text();
            parameters.extend(split_pairs(body.trim_end_matches(['\r', '\n']), '&').into_iter().map(
                |(name, value)| RequestParameter {
                    name,
                    value,
                    location: ParameterLocation::Body,
                },
            ));
        } else if self.content_type == ContentType::Json {
            if let Ok(json) = serde_json::from_slice::<JsonValue>(&self.body) {
                collect_json_leaves(&json, None, &mut parameters);
            }
        }

        parameters
    }
}

/// Split a header line at the first colon into a trimmed name and value.
pub fn split_header(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

/// Split a request target into path and optional query.
pub fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// Split `a=1&b=2` style data into raw (undecoded) pairs.
pub fn split_pairs(data: &str, separator: char) -> Vec<(String, String)> {
    data.split(separator)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (part.to_string(), String::new()),
        })
        .collect()
}

/// Build a complete HTTP message.
///
/// Lines are joined with CRLF. An existing `Content-Length` is rewritten to
/// the body length; a missing one is added for a non-empty, non-chunked body.
pub fn build_message(start_line: &str, headers: &[String], body: &[u8]) -> Vec<u8> {
    let mut has_length = false;
    let mut chunked = false;
    let mut lines = Vec::with_capacity(headers.len() + 2);
    lines.push(start_line.to_string());

    for line in headers {
        match split_header(line) {
            Some((name, _)) if name.eq_ignore_ascii_case("content-length") => {
                has_length = true;
                lines.push(format!("{}: {}", name, body.len()));
            }
            Some((name, value)) if name.eq_ignore_ascii_case("transfer-encoding") => {
                chunked = value.to_ascii_lowercase().contains("chunked");
                lines.push(line.clone());
            }
            _ => lines.push(line.clone()),
        }
    }

    if !has_length && !chunked && !body.is_empty() {
        lines.push(format!("Content-Length: {}", body.len()));
    }

    let mut message = lines.join("\r\n").into_bytes();
    message.extend_from_slice(b"\r\n\r\n");
    message.extend_from_slice(body);
    message
}

/// Locate the blank line ending the head.
///
/// Returns the end of the head and the offset of the body. Without a blank
/// line the whole buffer is the head.
fn find_head_end(raw: &[u8]) -> (usize, usize) {
    let mut line_start = 0;
    while line_start < raw.len() {
        let line_end = raw[line_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| line_start + p);

        let Some(line_end) = line_end else {
            break;
        };

        let line = &raw[line_start..line_end];
        if line_start > 0 && (line.is_empty() || line == b"\r") {
            return (line_start, line_end + 1);
        }
        line_start = line_end + 1;
    }
    (raw.len(), raw.len())
}

fn detect_content_type(headers: &[String], body: &[u8]) -> ContentType {
    let declared = headers
        .iter()
        .filter_map(|line| split_header(line))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.to_ascii_lowercase());

    match declared {
        Some(ct) if ct.contains("application/x-www-form-urlencoded") => ContentType::UrlEncoded,
        Some(ct) if ct.contains("multipart/") => ContentType::Multipart,
        Some(ct) if ct.contains("json") => ContentType::Json,
        Some(ct) if ct.contains("xml") => ContentType::Xml,
        Some(_) => ContentType::Unknown,
        None if body.is_empty() => ContentType::None,
        None => ContentType::Unknown,
    }
}

fn collect_json_leaves(value: &JsonValue, key: Option<&str>, out: &mut Vec<RequestParameter>) {
    match value {
        JsonValue::Object(map) => {
            for (k, v) in map {
                collect_json_leaves(v, Some(k), out);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                collect_json_leaves(item, key, out);
            }
        }
        scalar => {
            let Some(name) = key else {
                return;
            };
            let value = match scalar {
                JsonValue::String(s) => s.clone(),
                JsonValue::Null => String::new(),
                other => other.to_string(),
            };
            out.push(RequestParameter {
                name: name.to_string(),
                value,
                location: ParameterLocation::Json,
            });
        }
    }
}

/// Errors raised while analyzing a raw request.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Empty request")]
    Empty,

    #[error("Request head is not valid UTF-8")]
    InvalidEncoding,

    #[error("Missing request line")]
    MissingStartLine,

    #[error("Malformed request line: {0}")]
    MalformedStartLine(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),
}
