//! Namespaces registered into every script engine, and the envelope wrapper.

use super::{http, utils, ScriptError};
use crate::binding::RequestBinding;
use crate::model::{EditAction, ParameterLocation};
use rhai::{exported_module, Dynamic, Module};
use serde::Serialize;
use std::sync::Arc;

/// Appended after the rule source. Always yields `#{ success, error, data }`.
const ENVELOPE: &str = r#"
let sign_result = #{ success: false, error: "", data: () };
try {
    sign_result = #{ success: true, error: "", data: main() };
} catch (err) {
    sign_result = #{ success: false, error: `${err}`, data: () };
}
sign_result
"#;

/// Wrap a rule script so that evaluating it returns the envelope.
pub fn wrap(script: &str) -> String {
    format!("{}\n{}", script, ENVELOPE)
}

/// Build the static namespaces shared by every evaluation.
pub fn static_modules(client: Arc<http::HttpClient>) -> Vec<(&'static str, Arc<Module>)> {
    let mut locations = Module::new();
    for location in ParameterLocation::ALL {
        locations.set_var(location.name(), location.code());
    }

    let mut actions = Module::new();
    for action in EditAction::ALL {
        actions.set_var(action.name(), action.code());
    }

    let mut sort_order = Module::new();
    sort_order.set_var("ASC", utils::SORT_ASC);
    sort_order.set_var("DESC", utils::SORT_DESC);

    let mut timestamp_unit = Module::new();
    timestamp_unit.set_var("SECONDS", utils::UNIT_SECONDS);
    timestamp_unit.set_var("MILLISECONDS", utils::UNIT_MILLISECONDS);

    vec![
        ("ParameterLocation", Arc::new(locations)),
        ("EditAction", Arc::new(actions)),
        ("SortOrder", Arc::new(sort_order)),
        ("TimestampUnit", Arc::new(timestamp_unit)),
        ("utils", Arc::new(exported_module!(utils::utils_api))),
        ("http", Arc::new(http::module(client))),
    ]
}

/// Build the `request::` namespace for one evaluation.
pub fn request_module(binding: &RequestBinding) -> Result<Module, ScriptError> {
    let mut module = Module::new();
    module.set_var("method", binding.method.clone());
    module.set_var("http_method", binding.http_method.clone());
    module.set_var("uri", binding.uri.clone());
    module.set_var("http_version", binding.http_version.clone());
    module.set_var("url", binding.url.clone());
    module.set_var("host", binding.host.clone());
    module.set_var("port", i64::from(binding.port));
    module.set_var("protocol", binding.protocol.clone());
    module.set_var("body", binding.body.clone());
    module.set_var("raw_request", binding.raw_request.clone());
    module.set_var("parameters", convert(&binding.parameters)?);
    module.set_var("headers", convert(&binding.headers)?);
    module.set_var("cookies", convert(&binding.cookies)?);
    module.set_var("content_type", convert(&binding.content_type)?);
    Ok(module)
}

fn convert<T: Serialize>(value: &T) -> Result<Dynamic, ScriptError> {
    rhai::serde::to_dynamic(value).map_err(|e| ScriptError::Conversion(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_wrap_appends_envelope() {
        let wrapped = wrap("fn main() { [] }");
        assert!(wrapped.starts_with("fn main() { [] }"));
        assert!(wrapped.contains("catch (err)"));
    }

    #[test]
    fn test_request_module_vars() {
        let raw = b"GET /x?a=1 HTTP/1.1\r\nHost: h\r\nCookie: c=2\r\n\r\n";
        let binding = RequestBinding::build(raw, None, &Settings::default()).unwrap();
        let module = request_module(&binding).unwrap();

        assert!(module.contains_var("url"));
        assert_eq!(module.get_var_value::<i64>("port"), Some(443));
        let parameters = module.get_var_value::<rhai::Array>("parameters").unwrap();
        // a=1, c=2, plus two header entries
        assert_eq!(parameters.len(), 4);
        let cookies = module.get_var_value::<rhai::Map>("cookies").unwrap();
        assert!(cookies.contains_key("c"));
    }
}
