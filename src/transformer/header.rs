//! Header edits.

use super::{TransformResult, Transformer};
use crate::message::{split_header, ParsedRequest};
use crate::model::{EditAction, EditParameter, ParameterLocation};

/// Header edit transformer.
///
/// Headers are matched by case-insensitive name. UPDATE, OVERRIDE and DELETE
/// act on every matching header, so a replaced header ends up present once.
pub struct HeaderTransformer;

impl HeaderTransformer {
    fn is_named(line: &str, name: &str) -> bool {
        split_header(line).is_some_and(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    fn remove_all(headers: &mut Vec<String>, name: &str) -> usize {
        let before = headers.len();
        headers.retain(|line| !Self::is_named(line, name));
        before - headers.len()
    }

    fn contains(headers: &[String], name: &str) -> bool {
        headers.iter().any(|line| Self::is_named(line, name))
    }
}

impl Transformer for HeaderTransformer {
    fn transform(
        &self,
        request: &mut ParsedRequest,
        edit: &EditParameter,
        action: EditAction,
    ) -> TransformResult {
        if edit.name.contains([':', '\r', '\n']) || edit.value.contains(['\r', '\n']) {
            let name = edit.name.escape_debug();
            return TransformResult::Unsupported(format!("invalid header '{}'", name));
        }

        let headers = &mut request.headers;
        let line = format!("{}: {}", edit.name, edit.value);

        match action {
            EditAction::Add => {
                if Self::contains(headers, &edit.name) {
                    return TransformResult::Unchanged;
                }
                headers.push(line);
            }
            EditAction::Update => {
                if Self::remove_all(headers, &edit.name) == 0 {
                    return TransformResult::Unchanged;
                }
                headers.push(line);
            }
            EditAction::Override => {
                Self::remove_all(headers, &edit.name);
                headers.push(line);
            }
            EditAction::Delete => {
                if Self::remove_all(headers, &edit.name) == 0 {
                    return TransformResult::Unchanged;
                }
            }
            EditAction::Raw => {
                return TransformResult::unsupported(ParameterLocation::Header, action);
            }
        }

        TransformResult::Modified
    }

    fn name(&self) -> &'static str {
        "header"
    }
}
