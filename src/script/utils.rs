//! `utils::` helpers available to rule scripts.
//!
//! Parameter helpers take the list or map explicitly (usually
//! `request::parameters`, `request::headers` or `request::cookies`) and
//! return new values; nothing here touches the request itself.

use crate::binding::BindingParameter;
use base64::Engine as _;
use rhai::plugin::*;
use rhai::{Array, Map};
use sha2::Digest;

/// `SortOrder::ASC`
pub const SORT_ASC: i64 = 1;
/// `SortOrder::DESC`
pub const SORT_DESC: i64 = 0;
/// `TimestampUnit::SECONDS`
pub const UNIT_SECONDS: i64 = 1;
/// `TimestampUnit::MILLISECONDS`
pub const UNIT_MILLISECONDS: i64 = 0;

/// Hex digest of `input` with the named algorithm.
///
/// Names are case-insensitive and may carry a dash (`SHA-256`).
pub fn digest_hex(algo: &str, input: &str) -> Option<String> {
    let algo = algo.to_ascii_lowercase().replace('-', "");
    let bytes = input.as_bytes();

    let digest = match algo.as_str() {
        "md5" => hex::encode(md5::Md5::digest(bytes)),
        "sha1" => hex::encode(sha1::Sha1::digest(bytes)),
        "sha224" => hex::encode(sha2::Sha224::digest(bytes)),
        "sha256" => hex::encode(sha2::Sha256::digest(bytes)),
        "sha384" => hex::encode(sha2::Sha384::digest(bytes)),
        "sha512" => hex::encode(sha2::Sha512::digest(bytes)),
        _ => return None,
    };
    Some(digest)
}

fn to_parameters(list: Array) -> Result<Vec<BindingParameter>, Box<EvalAltResult>> {
    rhai::serde::from_dynamic(&Dynamic::from_array(list))
}

fn to_array(parameters: &[BindingParameter]) -> Result<Array, Box<EvalAltResult>> {
    let value = rhai::serde::to_dynamic(parameters)?;
    value
        .into_array()
        .map_err(|t| format!("expected array, got {}", t).into())
}

fn filter_parameters<F>(list: Array, keep: F) -> Result<Array, Box<EvalAltResult>>
where
    F: Fn(&BindingParameter) -> bool,
{
    let parameters: Vec<BindingParameter> =
        to_parameters(list)?.into_iter().filter(|p| keep(p)).collect();
    to_array(&parameters)
}

fn filter_map_by_key(map: Map, name: &str) -> Map {
    map.into_iter()
        .filter(|(key, _)| key.as_str().eq_ignore_ascii_case(name))
        .collect()
}

#[export_module]
pub mod utils_api {
    use super::*;

    pub fn md5(s: &str) -> String {
        digest_hex("md5", s).unwrap_or_default()
    }

    pub fn sha1(s: &str) -> String {
        digest_hex("sha1", s).unwrap_or_default()
    }

    #[rhai_fn(return_raw)]
    pub fn hash(algo: &str, s: &str) -> Result<String, Box<EvalAltResult>> {
        digest_hex(algo, s).ok_or_else(|| format!("unsupported digest algorithm: {}", algo).into())
    }

    pub fn base64_encode(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s.as_bytes())
    }

    #[rhai_fn(return_raw)]
    pub fn base64_decode(s: &str) -> Result<String, Box<EvalAltResult>> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| format!("invalid base64: {}", e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn url_encode(s: &str) -> String {
        urlencoding::encode(s).into_owned()
    }

    #[rhai_fn(return_raw)]
    pub fn url_decode(s: &str) -> Result<String, Box<EvalAltResult>> {
        urlencoding::decode(s)
            .map(|v| v.into_owned())
            .map_err(|e| format!("invalid percent-encoding: {}", e).into())
    }

    /// Current time in epoch milliseconds.
    #[rhai_fn(name = "timestamp")]
    pub fn timestamp_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    #[rhai_fn(name = "timestamp")]
    pub fn timestamp_in(unit: i64) -> i64 {
        let now = chrono::Utc::now();
        if unit == UNIT_SECONDS {
            now.timestamp()
        } else {
            now.timestamp_millis()
        }
    }

    #[rhai_fn(return_raw)]
    pub fn get_parameters_by_location(
        list: Array,
        location: i64,
    ) -> Result<Array, Box<EvalAltResult>> {
        filter_parameters(list, |p| p.location == location)
    }

    #[rhai_fn(return_raw)]
    pub fn get_parameters_by_name(list: Array, name: &str) -> Result<Array, Box<EvalAltResult>> {
        filter_parameters(list, |p| p.name == name)
    }

    #[rhai_fn(return_raw)]
    pub fn get_parameters_by_name_in_location(
        list: Array,
        name: &str,
        location: i64,
    ) -> Result<Array, Box<EvalAltResult>> {
        filter_parameters(list, |p| p.name == name && p.location == location)
    }

    /// First parameter with the given name and location, or `()`.
    #[rhai_fn(return_raw)]
    pub fn get_parameter_by_name_in_location(
        list: Array,
        name: &str,
        location: i64,
    ) -> Result<Dynamic, Box<EvalAltResult>> {
        let found = to_parameters(list)?
            .into_iter()
            .find(|p| p.name == name && p.location == location);
        match found {
            Some(parameter) => rhai::serde::to_dynamic(parameter),
            None => Ok(Dynamic::UNIT),
        }
    }

    /// Sort by name, ascending for `SortOrder::ASC`, descending otherwise.
    #[rhai_fn(return_raw)]
    pub fn sort_parameters(list: Array, order: i64) -> Result<Array, Box<EvalAltResult>> {
        let mut parameters = to_parameters(list)?;
        if order == SORT_ASC {
            parameters.sort_by(|a, b| a.name.cmp(&b.name));
        } else {
            parameters.sort_by(|a, b| b.name.cmp(&a.name));
        }
        to_array(&parameters)
    }

    #[rhai_fn(return_raw)]
    pub fn parameters_to_map(list: Array) -> Result<Map, Box<EvalAltResult>> {
        Ok(to_parameters(list)?
            .into_iter()
            .map(|p| (p.name.into(), Dynamic::from(p.value)))
            .collect())
    }

    pub fn get_header_by_name(headers: Map, name: &str) -> Map {
        filter_map_by_key(headers, name)
    }

    pub fn get_cookie_by_name(cookies: Map, name: &str) -> Map {
        filter_map_by_key(cookies, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParameterLocation;

    fn sample() -> Array {
        let parameters = vec![
            BindingParameter::new("b", "2", ParameterLocation::Url),
            BindingParameter::new("a", "1", ParameterLocation::Url),
            BindingParameter::new("a", "body", ParameterLocation::Body),
            BindingParameter::new("Host", "h", ParameterLocation::Header),
        ];
        to_array(&parameters).unwrap()
    }

    #[test]
    fn test_digests() {
        assert_eq!(digest_hex("md5", "abc").unwrap(), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            digest_hex("SHA-1", "abc").unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            digest_hex("sha256", "abc").unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(digest_hex("whirlpool", "abc").is_none());
    }

    #[test]
    fn test_hash_unknown_algorithm() {
        assert!(utils_api::hash("crc32", "abc").is_err());
    }

    #[test]
    fn test_base64() {
        assert_eq!(utils_api::base64_encode("hello"), "aGVsbG8=");
        assert_eq!(utils_api::base64_decode("aGVsbG8=").unwrap(), "hello");
        assert!(utils_api::base64_decode("***").is_err());
    }

    #[test]
    fn test_url_encoding() {
        assert_eq!(utils_api::url_encode("a b&c"), "a%20b%26c");
        assert_eq!(utils_api::url_decode("a%20b").unwrap(), "a b");
    }

    #[test]
    fn test_filters() {
        let url_code = ParameterLocation::Url.code();
        let url = utils_api::get_parameters_by_location(sample(), url_code).unwrap();
        assert_eq!(url.len(), 2);

        let named = utils_api::get_parameters_by_name(sample(), "a").unwrap();
        assert_eq!(named.len(), 2);

        let body_code = ParameterLocation::Body.code();
        let both =
            utils_api::get_parameters_by_name_in_location(sample(), "a", body_code).unwrap();
        assert_eq!(both.len(), 1);

        let first =
            utils_api::get_parameter_by_name_in_location(sample(), "a", url_code).unwrap();
        let first: BindingParameter = rhai::serde::from_dynamic(&first).unwrap();
        assert_eq!(first.value, "1");

        let missing =
            utils_api::get_parameter_by_name_in_location(sample(), "zz", url_code).unwrap();
        assert!(missing.is_unit());
    }

    #[test]
    fn test_sort_parameters() {
        let sorted = utils_api::sort_parameters(sample(), SORT_ASC).unwrap();
        let sorted = to_parameters(sorted).unwrap();
        let names: Vec<_> = sorted.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Host", "a", "a", "b"]);

        let sorted = utils_api::sort_parameters(sample(), SORT_DESC).unwrap();
        let sorted = to_parameters(sorted).unwrap();
        assert_eq!(sorted[0].name, "b");
    }

    #[test]
    fn test_parameters_to_map() {
        let map = utils_api::parameters_to_map(sample()).unwrap();
        assert_eq!(map.get("b").unwrap().clone().into_string().unwrap(), "2");
        assert_eq!(map.get("a").unwrap().clone().into_string().unwrap(), "body");
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let mut headers = Map::new();
        headers.insert("Content-Type".into(), Dynamic::from("text/plain".to_string()));
        headers.insert("Host".into(), Dynamic::from("h".to_string()));

        let found = utils_api::get_header_by_name(headers, "content-type");
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("Content-Type"));
    }
}
