//! `http::` outbound client available to rule scripts.
//!
//! Scripts may need to fetch a token or a server nonce before signing. Calls
//! block the evaluating thread up to the configured timeout.

use super::ScriptError;
use rhai::{Dynamic, EvalAltResult, ImmutableString, Map, Module};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Options accepted by `http::get`, `http::post` and `http::request`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Query parameters appended to the URL
    pub params: HashMap<String, JsonValue>,
    /// Form-urlencoded body
    pub body: HashMap<String, JsonValue>,
    /// JSON body
    pub json: Option<JsonValue>,
    /// Multipart form body
    pub form: HashMap<String, JsonValue>,
    /// Extra request headers
    pub headers: HashMap<String, JsonValue>,
    /// Follow redirects (default: true)
    pub follow_redirect: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            params: HashMap::new(),
            body: HashMap::new(),
            json: None,
            form: HashMap::new(),
            headers: HashMap::new(),
            follow_redirect: true,
        }
    }
}

/// Response handed back to the script as `#{ status, headers, body }`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpResponse {
    pub status: i64,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Shared, connection-pooled blocking clients.
pub struct HttpClient {
    client: reqwest::blocking::Client,
    no_redirect: reqwest::blocking::Client,
}

impl HttpClient {
    /// Build the client pair with the given connect and read timeout.
    pub fn new(timeout: Duration) -> Result<Self, ScriptError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        let no_redirect = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client, no_redirect })
    }

    /// Perform a request.
    pub fn request(
        &self,
        method: &str,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, ScriptError> {
        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ScriptError::Http(format!("invalid method: {}", method)))?;

        let client = if options.follow_redirect {
            &self.client
        } else {
            &self.no_redirect
        };

        let mut builder = client.request(method.clone(), url);

        if !options.params.is_empty() {
            builder = builder.query(&stringify(&options.params));
        }

        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), scalar_to_string(value));
        }

        if !options.body.is_empty() {
            builder = builder.form(&stringify(&options.body));
        } else if let Some(json) = &options.json {
            builder = builder.json(json);
        } else if !options.form.is_empty() {
            let mut form = reqwest::blocking::multipart::Form::new();
            for (name, value) in stringify(&options.form) {
                form = form.text(name, value);
            }
            builder = builder.multipart(form);
        }

        debug!(method = %method, url = url, "Script HTTP request");

        let response = builder.send()?;
        let status = i64::from(response.status().as_u16());
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text()?;

        Ok(HttpResponse { status, headers, body })
    }
}

type FnResult = Result<Dynamic, Box<EvalAltResult>>;

/// Build the `http::` module around a shared client.
pub fn module(client: Arc<HttpClient>) -> Module {
    let mut module = Module::new();

    let c = client.clone();
    module.set_native_fn("get", move |url: ImmutableString| -> FnResult {
        call(&c, "GET", &url, RequestOptions::default())
    });

    let c = client.clone();
    module.set_native_fn("get", move |url: ImmutableString, options: Map| -> FnResult {
        call(&c, "GET", &url, parse_options(options)?)
    });

    let c = client.clone();
    module.set_native_fn("post", move |url: ImmutableString, options: Map| -> FnResult {
        call(&c, "POST", &url, parse_options(options)?)
    });

    let c = client;
    module.set_native_fn(
        "request",
        move |method: ImmutableString, url: ImmutableString, options: Map| -> FnResult {
            call(&c, &method, &url, parse_options(options)?)
        },
    );

    module
}

fn call(client: &HttpClient, method: &str, url: &str, options: RequestOptions) -> FnResult {
    let response = client
        .request(method, url, &options)
        .map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })?;
    rhai::serde::to_dynamic(response)
}

fn parse_options(options: Map) -> Result<RequestOptions, Box<EvalAltResult>> {
    rhai::serde::from_dynamic(&Dynamic::from_map(options))
}

fn stringify(values: &HashMap<String, JsonValue>) -> Vec<(String, String)> {
    values
        .iter()
        .map(|(k, v)| (k.clone(), scalar_to_string(v)))
        .collect()
}

fn scalar_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
