//! Query, form body, cookie and whole-body edits.
//!
//! Parameters are located by raw segment so that everything an edit does not
//! touch is written back byte for byte.

use super::{TransformResult, Transformer};
use crate::message::{split_header, split_target, ParsedRequest};
use crate::model::{EditAction, EditParameter, ParameterLocation};

/// What to do with a located parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Replace(usize),
    Remove(usize),
    Insert,
    Keep,
}

fn plan(existing: Option<usize>, action: EditAction) -> Plan {
    match (action, existing) {
        (EditAction::Delete, Some(i)) => Plan::Remove(i),
        (EditAction::Update | EditAction::Override, Some(i)) => Plan::Replace(i),
        (EditAction::Add | EditAction::Override, None) => Plan::Insert,
        _ => Plan::Keep,
    }
}

fn segment_name(segment: &str) -> &str {
    segment
        .split_once('=')
        .map_or(segment, |(name, _)| name)
        .trim()
}

fn position(segments: &[String], name: &str) -> Option<usize> {
    segments
        .iter()
        .position(|s| !s.trim().is_empty() && segment_name(s) == name)
}

fn split_segments(data: &str, separator: char) -> Vec<String> {
    if data.is_empty() {
        return Vec::new();
    }
    data.split(separator).map(str::to_string).collect()
}

/// First character of the edit's name or value that cannot appear in the
/// target syntax, if any.
fn forbidden_char(edit: &EditParameter, forbidden: &[char]) -> Option<char> {
    edit.name
        .chars()
        .chain(edit.value.chars())
        .find(|c| forbidden.contains(c))
}

/// Apply a plan to `&`/`;` separated segments. Returns false for [`Plan::Keep`].
fn apply_plan(segments: &mut Vec<String>, plan: Plan, pair: String) -> bool {
    match plan {
        Plan::Replace(i) => {
            let leading = segments[i].len() - segments[i].trim_start().len();
            segments[i] = format!("{}{}", &segments[i][..leading], pair);
        }
        Plan::Remove(i) => {
            segments.remove(i);
        }
        Plan::Insert => {
            while segments.last().is_some_and(|s| s.trim().is_empty()) {
                segments.pop();
            }
            segments.push(pair);
        }
        Plan::Keep => return false,
    }
    true
}

/// Edits the query string of the request target.
pub struct QueryTransformer;

impl Transformer for QueryTransformer {
    fn transform(
        &self,
        request: &mut ParsedRequest,
        edit: &EditParameter,
        action: EditAction,
    ) -> TransformResult {
        if action == EditAction::Raw {
            return TransformResult::unsupported(ParameterLocation::Url, action);
        }

        // The target must stay a single token on the start line
        if let Some(c) = forbidden_char(edit, &[' ', '\t', '\r', '\n', '#']) {
            return TransformResult::Unsupported(format!("query parameter contains {:?}", c));
        }

        let (path, query) = split_target(&request.target);
        let path = path.to_string();
        let mut segments = split_segments(query.unwrap_or(""), '&');

        let plan = plan(position(&segments, &edit.name), action);
        if !apply_plan(&mut segments, plan, format!("{}={}", edit.name, edit.value)) {
            return TransformResult::Unchanged;
        }

        let query = segments.join("&");
        request.target = if query.is_empty() {
            path
        } else {
            format!("{}?{}", path, query)
        };
        TransformResult::Modified
    }

    fn name(&self) -> &'static str {
        "query"
    }
}

/// Edits `application/x-www-form-urlencoded` bodies; RAW replaces the body.
pub struct FormBodyTransformer;

impl Transformer for FormBodyTransformer {
    fn transform(
        &self,
        request: &mut ParsedRequest,
        edit: &EditParameter,
        action: EditAction,
    ) -> TransformResult {
        if action == EditAction::Raw {
            request.body = edit.value.clone().into_bytes();
            return TransformResult::Modified;
        }

        if !request.body.is_empty() && !request.has_form_body() {
            return TransformResult::Unsupported("body is not form-urlencoded".to_string());
        }

        let text = request.body_text();
        let mut segments = split_segments(text.trim_end_matches(['\r', '\n']), '&');
        let was_empty = segments.is_empty();

        let plan = plan(position(&segments, &edit.name), action);
        if !apply_plan(&mut segments, plan, format!("{}={}", edit.name, edit.value)) {
            return TransformResult::Unchanged;
        }

        if was_empty && !request.has_header("content-type") {
            request
                .headers
                .push("Content-Type: application/x-www-form-urlencoded".to_string());
        }
        request.body = segments.join("&").into_bytes();
        TransformResult::Modified
    }

    fn name(&self) -> &'static str {
        "form_body"
    }
}

/// Edits cookies carried in `Cookie` headers.
pub struct CookieTransformer;

impl CookieTransformer {
    fn cookie_headers(request: &ParsedRequest) -> Vec<(usize, String, Vec<String>)> {
        request
            .headers
            .iter()
            .enumerate()
            .filter_map(|(i, line)| {
                let (name, value) = split_header(line)?;
                name.eq_ignore_ascii_case("cookie")
                    .then(|| (i, name.to_string(), split_segments(value, ';')))
            })
            .collect()
    }
}

impl Transformer for CookieTransformer {
    fn transform(
        &self,
        request: &mut ParsedRequest,
        edit: &EditParameter,
        action: EditAction,
    ) -> TransformResult {
        if action == EditAction::Raw {
            return TransformResult::unsupported(ParameterLocation::Cookie, action);
        }

        if let Some(c) = forbidden_char(edit, &[';', '\r', '\n']) {
            return TransformResult::Unsupported(format!("cookie contains {:?}", c));
        }

        let headers = Self::cookie_headers(request);
        let found = headers.iter().find_map(|(i, name, segments)| {
            position(segments, &edit.name).map(|pos| (*i, name, segments, pos))
        });

        let pair = format!("{}={}", edit.name, edit.value);

        let (index, header_name, mut segments, plan) = match found {
            Some((i, name, segments, pos)) => {
                (i, name.clone(), segments.clone(), plan(Some(pos), action))
            }
            None => match plan(None, action) {
                Plan::Insert => match headers.first() {
                    Some((i, name, segments)) => (*i, name.clone(), segments.clone(), Plan::Insert),
                    None => {
                        request.headers.push(format!("Cookie: {}", pair));
                        return TransformResult::Modified;
                    }
                },
                _ => return TransformResult::Unchanged,
            },
        };

        let pair = if plan == Plan::Insert && !segments.iter().all(|s| s.trim().is_empty()) {
            format!(" {}", pair)
        } else {
            pair
        };

        if !apply_plan(&mut segments, plan, pair) {
            return TransformResult::Unchanged;
        }

        if segments.iter().all(|s| s.trim().is_empty()) {
            request.headers.remove(index);
        } else {
            let value = segments.join(";");
            request.headers[index] = format!("{}: {}", header_name, value.trim_start());
        }
        TransformResult::Modified
    }

    fn name(&self) -> &'static str {
        "cookie"
    }
}

/// Locations that are only addressable as the whole body.
pub struct WholeBodyTransformer;

impl Transformer for WholeBodyTransformer {
    fn transform(
        &self,
        request: &mut ParsedRequest,
        edit: &EditParameter,
        action: EditAction,
    ) -> TransformResult {
        match action {
            EditAction::Raw => {
                request.body = edit.value.clone().into_bytes();
                TransformResult::Modified
            }
            _ => TransformResult::Unsupported(format!(
                "{} only supports RAW, got {}",
                edit.location()
                    .map(|l| l.name())
                    .unwrap_or("whole-body location"),
                action
            )),
        }
    }

    fn name(&self) -> &'static str {
        "whole_body"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        transformer: &dyn Transformer,
        raw: &str,
        edit: EditParameter,
    ) -> (TransformResult, String) {
        let mut request = ParsedRequest::parse(raw.as_bytes()).unwrap();
        let action = edit.action().unwrap();
        let result = transformer.transform(&mut request, &edit, action);
        (result, String::from_utf8(request.to_bytes()).unwrap())
    }

    fn url(name: &str, value: &str, action: EditAction) -> EditParameter {
        EditParameter::new(name, value, ParameterLocation::Url, action)
    }

    fn cookie(name: &str, value: &str, action: EditAction) -> EditParameter {
        EditParameter::new(name, value, ParameterLocation::Cookie, action)
    }

    fn body(name: &str, value: &str, action: EditAction) -> EditParameter {
        EditParameter::new(name, value, ParameterLocation::Body, action)
    }

    #[test]
    fn test_plan_table() {
        assert_eq!(plan(Some(1), EditAction::Delete), Plan::Remove(1));
        assert_eq!(plan(None, EditAction::Delete), Plan::Keep);
        assert_eq!(plan(Some(0), EditAction::Add), Plan::Keep);
        assert_eq!(plan(None, EditAction::Add), Plan::Insert);
        assert_eq!(plan(Some(2), EditAction::Update), Plan::Replace(2));
        assert_eq!(plan(None, EditAction::Update), Plan::Keep);
        assert_eq!(plan(Some(0), EditAction::Override), Plan::Replace(0));
        assert_eq!(plan(None, EditAction::Override), Plan::Insert);
    }

    #[test]
    fn test_query_replace_keeps_other_segments() {
        let (result, out) = run(
            &QueryTransformer,
            "GET /x?a=%20&sign=old&flag HTTP/1.1\r\n\r\n",
            url("sign", "new", EditAction::Update),
        );
        assert!(result.is_modified());
        assert!(out.starts_with("GET /x?a=%20&sign=new&flag HTTP/1.1"));
    }

    #[test]
    fn test_query_insert_into_empty_target() {
        let (_, out) = run(
            &QueryTransformer,
            "GET /x HTTP/1.1\r\n\r\n",
            url("a", "1", EditAction::Add),
        );
        assert!(out.starts_with("GET /x?a=1 HTTP/1.1"));
    }

    #[test]
    fn test_query_delete_last_removes_question_mark() {
        let (_, out) = run(
            &QueryTransformer,
            "GET /x?a=1 HTTP/1.1\r\n\r\n",
            url("a", "", EditAction::Delete),
        );
        assert!(out.starts_with("GET /x HTTP/1.1"));
    }

    #[test]
    fn test_query_add_existing_is_unchanged() {
        let (result, out) = run(
            &QueryTransformer,
            "GET /x?a=1 HTTP/1.1\r\n\r\n",
            url("a", "2", EditAction::Add),
        );
        assert_eq!(result, TransformResult::Unchanged);
        assert!(out.starts_with("GET /x?a=1 HTTP/1.1"));
    }

    #[test]
    fn test_query_value_with_whitespace_unsupported() {
        for value in ["a b", "a\r\nX-Evil: 1", "a#frag"] {
            let (result, out) = run(
                &QueryTransformer,
                "GET /x?a=1 HTTP/1.1\r\n\r\n",
                url("sign", value, EditAction::Override),
            );
            assert!(matches!(result, TransformResult::Unsupported(_)), "{:?}", value);
            assert!(out.starts_with("GET /x?a=1 HTTP/1.1\r\n"));
        }
    }

    #[test]
    fn test_cookie_value_with_separator_unsupported() {
        for value in ["x; admin=1", "x\r\nX-Evil: 1"] {
            let (result, out) = run(
                &CookieTransformer,
                "GET / HTTP/1.1\r\nCookie: sid=old\r\n\r\n",
                cookie("sid", value, EditAction::Override),
            );
            assert!(matches!(result, TransformResult::Unsupported(_)), "{:?}", value);
            assert!(out.contains("\r\nCookie: sid=old\r\n"));
        }
    }

    #[test]
    fn test_cookie_update_preserves_spacing() {
        let (_, out) = run(
            &CookieTransformer,
            "GET / HTTP/1.1\r\nCookie: a=1; b=2; c=3\r\n\r\n",
            cookie("b", "9", EditAction::Override),
        );
        assert!(out.contains("\r\nCookie: a=1; b=9; c=3\r\n"));
    }

    #[test]
    fn test_cookie_insert_into_first_header() {
        let (_, out) = run(
            &CookieTransformer,
            "GET / HTTP/1.1\r\nCookie: a=1\r\nCookie: b=2\r\n\r\n",
            cookie("z", "0", EditAction::Add),
        );
        assert!(out.contains("\r\nCookie: a=1; z=0\r\nCookie: b=2\r\n"));
    }

    #[test]
    fn test_cookie_insert_creates_header() {
        let (_, out) = run(
            &CookieTransformer,
            "GET / HTTP/1.1\r\nHost: h\r\n\r\n",
            cookie("sid", "x", EditAction::Override),
        );
        assert_eq!(out, "GET / HTTP/1.1\r\nHost: h\r\nCookie: sid=x\r\n\r\n");
    }

    #[test]
    fn test_cookie_delete_in_second_header() {
        let (_, out) = run(
            &CookieTransformer,
            "GET / HTTP/1.1\r\nCookie: a=1\r\nCookie: b=2; c=3\r\n\r\n",
            cookie("b", "", EditAction::Delete),
        );
        assert!(out.contains("\r\nCookie: a=1\r\nCookie: c=3\r\n"));
    }

    #[test]
    fn test_cookie_delete_last_removes_header() {
        let (_, out) = run(
            &CookieTransformer,
            "GET / HTTP/1.1\r\nHost: h\r\nCookie: a=1\r\n\r\n",
            cookie("a", "", EditAction::Delete),
        );
        assert_eq!(out, "GET / HTTP/1.1\r\nHost: h\r\n\r\n");
    }

    #[test]
    fn test_body_insert_sets_content_type() {
        let (_, out) = run(
            &FormBodyTransformer,
            "POST /p HTTP/1.1\r\nHost: h\r\n\r\n",
            body("a", "1", EditAction::Add),
        );
        assert_eq!(
            out,
            "POST /p HTTP/1.1\r\nHost: h\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: 3\r\n\r\na=1"
        );
    }

    #[test]
    fn test_body_trailing_newline_trimmed() {
        let (result, out) = run(
            &FormBodyTransformer,
            "POST /p HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\na=1\r\n",
            body("b", "2", EditAction::Add),
        );
        assert!(result.is_modified());
        assert!(out.ends_with("Content-Length: 7\r\n\r\na=1&b=2"));
    }

    #[test]
    fn test_body_raw_replaces_body() {
        let (_, out) = run(
            &FormBodyTransformer,
            "POST /p HTTP/1.1\r\nContent-Type: application/json\r\n\
             Content-Length: 2\r\n\r\n{}",
            body("ignored", "{\"signed\":true}", EditAction::Raw),
        );
        assert!(out.ends_with("Content-Length: 15\r\n\r\n{\"signed\":true}"));
    }

    #[test]
    fn test_body_param_on_json_unsupported() {
        let (result, _) = run(
            &FormBodyTransformer,
            "POST /p HTTP/1.1\r\nContent-Type: application/json\r\n\r\n{\"a\":1}",
            body("a", "2", EditAction::Override),
        );
        assert!(matches!(result, TransformResult::Unsupported(_)));
    }

    #[test]
    fn test_whole_body_only_raw() {
        let json = |action| EditParameter::new("a", "[]", ParameterLocation::Json, action);
        let raw = "POST /p HTTP/1.1\r\nContent-Type: application/json\r\n\r\n{\"a\":1}";

        let (result, _) = run(&WholeBodyTransformer, raw, json(EditAction::Override));
        assert!(matches!(result, TransformResult::Unsupported(_)));

        let (result, out) = run(&WholeBodyTransformer, raw, json(EditAction::Raw));
        assert!(result.is_modified());
        assert!(out.ends_with("\r\n\r\n[]"));
    }
}
