//! Request binding: the structured view of a request handed to rules.
//!
//! A binding is built once per request, handed to the evaluator and then
//! discarded. Scripts see it as the `request::` namespace, declarative rules
//! reach it through `${...}` templates.

use crate::config::Settings;
use crate::message::{split_header, ContentType, MessageError, ParsedRequest};
use crate::model::ParameterLocation;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Regex for matching template expressions like ${...}
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Host used when a request carries no `Host` header.
pub const DUMMY_HOST: &str = "DUMMY_HOST";

/// Target service of an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpService {
    pub host: String,
    pub port: u16,
    pub protocol: String,
}

impl HttpService {
    pub fn new(host: impl Into<String>, port: u16, protocol: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: protocol.into(),
        }
    }
}

/// A `(name, value, location)` triple as seen by rules.
///
/// The location is carried as its integer code so scripts can compare it
/// against the `ParameterLocation::` constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingParameter {
    pub name: String,
    pub value: String,
    pub location: i64,
}

impl BindingParameter {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        location: ParameterLocation,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            location: location.code(),
        }
    }

    pub fn location(&self) -> Option<ParameterLocation> {
        ParameterLocation::from_code(self.location)
    }
}

/// Structured projection of one raw request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestBinding {
    /// Upper-cased method
    pub method: String,
    /// Method exactly as written on the start line
    pub http_method: String,
    /// Request target
    pub uri: String,
    /// Protocol version
    pub http_version: String,
    /// Absolute URL
    pub url: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    /// Every query, cookie, body, JSON and header parameter, in request order
    pub parameters: Vec<BindingParameter>,
    /// Header name to value (last occurrence wins)
    pub headers: HashMap<String, String>,
    /// Cookie name to value
    pub cookies: HashMap<String, String>,
    /// Body decoded as UTF-8
    pub body: String,
    /// Entire request decoded as UTF-8
    pub raw_request: String,
    /// Detected body encoding
    pub content_type: ContentType,
}

impl RequestBinding {
    /// Build a binding from raw request bytes.
    ///
    /// Without a service the host comes from the `Host` header and port and
    /// protocol from the configured defaults.
    pub fn build(
        raw: &[u8],
        service: Option<&HttpService>,
        settings: &Settings,
    ) -> Result<Self, MessageError> {
        let parsed = ParsedRequest::parse(raw)?;
        Ok(Self::from_parsed(&parsed, raw, service, settings))
    }

    /// Build a binding from an already analyzed request.
    pub fn from_parsed(
        parsed: &ParsedRequest,
        raw: &[u8],
        service: Option<&HttpService>,
        settings: &Settings,
    ) -> Self {
        let (host, port, protocol) = match service {
            Some(service) => (service.host.clone(), service.port, service.protocol.clone()),
            None => (
                parsed.header("host").unwrap_or(DUMMY_HOST).to_string(),
                settings.default_port,
                settings.default_protocol.clone(),
            ),
        };

        let url = absolute_url(&parsed.target, &host, port, &protocol, service.is_some());

        let mut parameters: Vec<BindingParameter> = parsed
            .parameters
            .iter()
            .map(|p| BindingParameter::new(p.name.clone(), p.value.clone(), p.location))
            .collect();

        let mut headers = HashMap::new();
        for line in &parsed.headers {
            if let Some((name, value)) = split_header(line) {
                headers.insert(name.to_string(), value.to_string());
                parameters.push(BindingParameter::new(name, value, ParameterLocation::Header));
            }
        }

        let cookies = parsed
            .parameters
            .iter()
            .filter(|p| p.location == ParameterLocation::Cookie)
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect();

        Self {
            method: parsed.method.to_uppercase(),
            http_method: parsed.method.clone(),
            uri: parsed.target.clone(),
            http_version: parsed.version.clone(),
            url,
            host,
            port,
            protocol,
            parameters,
            headers,
            cookies,
            body: parsed.body_text(),
            raw_request: String::from_utf8_lossy(raw).into_owned(),
            content_type: parsed.content_type,
        }
    }

    /// Get a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Resolve a template expression.
    ///
    /// Supports:
    /// - `${request.method}`, `${request.uri}`, `${request.path}`, `${request.query}`
    /// - `${request.url}`, `${request.host}`, `${request.port}`, `${request.protocol}`
    /// - `${request.version}`, `${request.body}`
    /// - `${request.header.X-Custom}` - Header value (case-insensitive)
    /// - `${request.cookie.name}` - Cookie value
    /// - `${request.param.name}` - First non-header parameter value
    /// - `${timestamp}` - Epoch seconds
    /// - `${timestamp_ms}` - Epoch milliseconds
    pub fn resolve(&self, expr: &str) -> Option<String> {
        let parts: Vec<&str> = expr.trim().splitn(2, '.').collect();

        match parts[0] {
            "request" => self.resolve_request(parts.get(1).unwrap_or(&"")),
            "timestamp" => Some(chrono::Utc::now().timestamp().to_string()),
            "timestamp_ms" => Some(chrono::Utc::now().timestamp_millis().to_string()),
            _ => None,
        }
    }

    /// Interpolate all ${...} expressions in a string.
    pub fn interpolate(&self, template: &str) -> String {
        VAR_REGEX
            .replace_all(template, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name).unwrap_or_default()
            })
            .to_string()
    }

    fn resolve_request(&self, path: &str) -> Option<String> {
        let parts: Vec<&str> = path.splitn(2, '.').collect();

        match parts[0] {
            "method" => Some(self.method.clone()),
            "uri" => Some(self.uri.clone()),
            "path" => Some(crate::message::split_target(&self.uri).0.to_string()),
            "query" => crate::message::split_target(&self.uri).1.map(str::to_string),
            "url" => Some(self.url.clone()),
            "host" => Some(self.host.clone()),
            "port" => Some(self.port.to_string()),
            "protocol" => Some(self.protocol.clone()),
            "version" => Some(self.http_version.clone()),
            "body" => Some(self.body.clone()),
            "header" => self.header(parts.get(1)?).map(str::to_string),
            "cookie" => self.cookies.get(*parts.get(1)?).cloned(),
            "param" => {
                let name = parts.get(1)?;
                self.parameters
                    .iter()
                    .find(|p| p.name == *name && p.location != ParameterLocation::Header.code())
                    .map(|p| p.value.clone())
            }
            _ => None,
        }
    }
}

/// Compose the absolute URL of a request.
///
/// Absolute-form targets are used unchanged. An explicit service port is
/// written out unless it is the protocol's default.
fn absolute_url(target: &str, host: &str, port: u16, protocol: &str, explicit: bool) -> String {
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return target.to_string();
    }

    let default_port = match protocol {
        "http" => 80,
        "https" => 443,
        _ => 0,
    };

    if explicit && port != default_port {
        format!("{}://{}:{}{}", protocol, host, port, target)
    } else {
        format!("{}://{}{}", protocol, host, target)
    }
}
