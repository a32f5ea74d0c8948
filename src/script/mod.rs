//! Sandboxed script execution for rule content.
//!
//! Rules are Rhai scripts defining `main()`. The constant namespaces,
//! `utils::` and `http::` are built once and shared; every evaluation gets
//! its own engine carrying those shared modules plus its `request::`
//! namespace and log hooks, so concurrent requests never wait on each other.

pub mod http;
pub mod prelude;
pub mod utils;

use crate::binding::RequestBinding;
use crate::config::ScriptSettings;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, ImmutableString, Module, Scope};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Executes rule scripts.
///
/// Returns the raw `{success, error, data}` envelope; interpreting it is the
/// evaluator's job.
pub trait ScriptEngine: Send + Sync {
    fn evaluate(
        &self,
        script: &str,
        binding: &RequestBinding,
        rule_name: &str,
    ) -> Result<JsonValue, ScriptError>;
}

/// [`ScriptEngine`] backed by Rhai.
pub struct RhaiEngine {
    settings: ScriptSettings,
    /// Namespaces shared by every evaluation
    modules: Vec<(&'static str, Arc<Module>)>,
}

impl RhaiEngine {
    /// Create an engine with the given sandbox limits.
    pub fn new(settings: &ScriptSettings) -> Result<Self, ScriptError> {
        let timeout = Duration::from_secs(settings.http_timeout_secs);
        let client = http::HttpClient::new(timeout)?;

        Ok(Self {
            settings: settings.clone(),
            modules: prelude::static_modules(Arc::new(client)),
        })
    }

    /// A sandboxed engine for one evaluation.
    fn build_engine(
        &self,
        binding: &RequestBinding,
        rule_name: &str,
    ) -> Result<Engine, ScriptError> {
        let mut engine = Engine::new();
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.set_max_operations(self.settings.max_operations);
        engine.set_max_call_levels(self.settings.max_call_levels);
        engine.set_max_expr_depths(self.settings.max_expr_depth, self.settings.max_expr_depth);
        engine.set_max_string_size(self.settings.max_string_size);

        for (name, module) in &self.modules {
            engine.register_static_module(*name, module.clone());
        }
        engine.register_static_module("request", prelude::request_module(binding)?.into());

        let rule = rule_name.to_string();
        engine.on_print(move |s| info!(rule = %rule, "{}", s));

        let rule = rule_name.to_string();
        engine.on_debug(move |s, _source, _pos| debug!(rule = %rule, "{}", s));

        let rule = rule_name.to_string();
        engine.register_fn("log", move |msg: ImmutableString| {
            info!(rule = %rule, "{}", msg);
        });

        Ok(engine)
    }
}

impl ScriptEngine for RhaiEngine {
    fn evaluate(
        &self,
        script: &str,
        binding: &RequestBinding,
        rule_name: &str,
    ) -> Result<JsonValue, ScriptError> {
        let engine = self.build_engine(binding, rule_name)?;

        let ast = engine
            .compile(prelude::wrap(script))
            .map_err(|e| ScriptError::Compile(e.to_string()))?;

        let mut scope = Scope::new();
        let result = engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;

        rhai::serde::from_dynamic::<JsonValue>(&result)
            .map_err(|e| ScriptError::Conversion(e.to_string()))
    }
}

/// Errors raised by the script sandbox itself.
///
/// An exception thrown by the script is not one of these: it is reported
/// through the envelope's `success` flag.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Script compilation failed: {0}")]
    Compile(String),

    #[error("Script execution failed: {0}")]
    Runtime(String),

    #[error("Script value conversion failed: {0}")]
    Conversion(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("HTTP request error: {0}")]
    Http(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use serde_json::json;

    fn engine() -> RhaiEngine {
        RhaiEngine::new(&ScriptSettings::default()).unwrap()
    }

    fn binding() -> RequestBinding {
        let raw = b"GET /api?b=2&a=1 HTTP/1.1\r\n\
                    Host: api.example.com\r\n\
                    Cookie: sid=xyz\r\n\r\n";
        RequestBinding::build(raw, None, &Settings::default()).unwrap()
    }

    #[test]
    fn test_successful_envelope() {
        let script = r#"
            fn main() {
                [ #{ name: "sign", value: "abc",
                     location: ParameterLocation::PARAM_URL, action: EditAction::OVERRIDE } ]
            }
        "#;
        let envelope = engine().evaluate(script, &binding(), "test").unwrap();

        assert_eq!(envelope["success"], json!(true));
        assert_eq!(
            envelope["data"],
            json!([{ "name": "sign", "value": "abc", "location": 0, "action": 3 }])
        );
    }

    #[test]
    fn test_request_namespace() {
        let script = r#"
            fn main() {
                let p = utils::get_parameter_by_name_in_location(
                    request::parameters, "a", ParameterLocation::PARAM_URL);
                [ #{ name: "seen", value: request::url + "|" + p.value + "|" + request::cookies.sid,
                     location: ParameterLocation::HEADER, action: EditAction::ADD } ]
            }
        "#;
        let envelope = engine().evaluate(script, &binding(), "test").unwrap();

        assert_eq!(
            envelope["data"][0]["value"],
            json!("https://api.example.com/api?b=2&a=1|1|xyz")
        );
    }

    #[test]
    fn test_utils_namespace() {
        let script = r#"
            fn main() {
                let sorted = utils::sort_parameters(
                    utils::get_parameters_by_location(
                        request::parameters, ParameterLocation::PARAM_URL),
                    SortOrder::ASC);
                let joined = "";
                for p in sorted { joined += p.name + "=" + p.value + "&"; }
                [ #{ name: "sign", value: utils::md5(joined), location: 0, action: 3 } ]
            }
        "#;
        let envelope = engine().evaluate(script, &binding(), "test").unwrap();

        assert_eq!(
            envelope["data"][0]["value"],
            json!(utils::digest_hex("md5", "a=1&b=2&").unwrap())
        );
    }

    #[test]
    fn test_throw_reports_failure() {
        let script = r#"fn main() { throw "no key"; }"#;
        let envelope = engine().evaluate(script, &binding(), "test").unwrap();

        assert_eq!(envelope["success"], json!(false));
        assert!(envelope["error"].as_str().unwrap().contains("no key"));
        assert!(envelope["data"].is_null());
    }

    #[test]
    fn test_compile_error() {
        let result = engine().evaluate("fn main( {", &binding(), "test");
        assert!(matches!(result, Err(ScriptError::Compile(_))));
    }

    #[test]
    fn test_operation_limit() {
        let settings = ScriptSettings {
            max_operations: 1_000,
            ..ScriptSettings::default()
        };
        let engine = RhaiEngine::new(&settings).unwrap();
        let script = "fn main() { let x = 0; loop { x += 1; } }";

        assert!(matches!(
            engine.evaluate(script, &binding(), "test"),
            Err(ScriptError::Runtime(_))
        ));
    }

    #[test]
    fn test_log_and_print_available() {
        let script = r#"fn main() { log("computing"); print("debug"); [] }"#;
        let envelope = engine().evaluate(script, &binding(), "test").unwrap();
        assert_eq!(envelope["success"], json!(true));
        assert_eq!(envelope["data"], json!([]));
    }

    #[test]
    fn test_slow_http_call_does_not_block_other_evaluations() {
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::sync::mpsc;
        use std::thread;
        use std::time::{Duration, Instant};

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/slow", listener.local_addr().unwrap());
        let (accepted_tx, accepted_rx) = mpsc::channel();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            accepted_tx.send(()).unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            thread::sleep(Duration::from_secs(2));
            let _ = stream.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
            );
        });

        let engine = std::sync::Arc::new(engine());
        let slow = {
            let engine = engine.clone();
            let script = format!(
                r#"fn main() {{
                    let r = http::get("{}");
                    [ #{{ name: "s", value: r.body, location: 10, action: 1 }} ]
                }}"#,
                url
            );
            thread::spawn(move || engine.evaluate(&script, &binding(), "slow").unwrap())
        };

        accepted_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let started = Instant::now();
        let envelope = engine.evaluate("fn main() { [] }", &binding(), "fast").unwrap();
        let elapsed = started.elapsed();

        assert_eq!(envelope["success"], json!(true));
        assert!(elapsed < Duration::from_secs(1), "fast evaluation took {:?}", elapsed);

        let slow_envelope = slow.join().unwrap();
        assert_eq!(slow_envelope["data"][0]["value"], json!("ok"));
        server.join().unwrap();
    }
}
