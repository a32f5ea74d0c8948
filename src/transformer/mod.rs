//! Edit application.
//!
//! Edits are applied in two strictly ordered passes. Non-header edits go
//! first, in production order, each against a freshly analyzed copy of the
//! request. An edit whose result no longer analyzes is dropped on its own.
//! Header edits follow on the header list left by the first pass. The
//! message is then rebuilt, which keeps `Content-Length` consistent.

mod header;
mod param;

pub use header::HeaderTransformer;
pub use param::{CookieTransformer, FormBodyTransformer, QueryTransformer, WholeBodyTransformer};

use crate::message::{MessageError, ParsedRequest};
use crate::model::{EditAction, EditParameter, ParameterLocation};
use tracing::{debug, warn};

/// Trait for applying a single edit to an analyzed request.
pub trait Transformer: Send + Sync {
    /// Apply the edit, mutating the request in place.
    fn transform(
        &self,
        request: &mut ParsedRequest,
        edit: &EditParameter,
        action: EditAction,
    ) -> TransformResult;

    /// Get the transformer name for debugging.
    fn name(&self) -> &'static str;
}

/// Outcome of applying one edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformResult {
    /// The request was changed
    Modified,
    /// The edit's precondition did not hold (e.g. ADD on a present parameter)
    Unchanged,
    /// The location does not support the action
    Unsupported(String),
}

impl TransformResult {
    pub fn unsupported(location: ParameterLocation, action: EditAction) -> Self {
        Self::Unsupported(format!("{} is not supported for {}", action, location))
    }

    pub fn is_modified(&self) -> bool {
        matches!(self, Self::Modified)
    }
}

static QUERY: QueryTransformer = QueryTransformer;
static FORM_BODY: FormBodyTransformer = FormBodyTransformer;
static COOKIE: CookieTransformer = CookieTransformer;
static WHOLE_BODY: WholeBodyTransformer = WholeBodyTransformer;
static HEADER: HeaderTransformer = HeaderTransformer;

/// Select the transformer responsible for a location.
pub fn transformer_for(location: ParameterLocation) -> &'static dyn Transformer {
    match location {
        ParameterLocation::Url => &QUERY,
        ParameterLocation::Body => &FORM_BODY,
        ParameterLocation::Cookie => &COOKIE,
        ParameterLocation::Header => &HEADER,
        ParameterLocation::Xml
        | ParameterLocation::XmlAttr
        | ParameterLocation::MultipartAttr
        | ParameterLocation::Json => &WHOLE_BODY,
    }
}

/// Applies edit lists to raw requests. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct EditApplier;

impl EditApplier {
    pub fn new() -> Self {
        Self
    }

    /// Apply edits to a raw request and return the rebuilt message.
    ///
    /// Unsupported or malformed edits are logged and skipped, as is any edit
    /// that would leave the request unanalyzable. Only an input request that
    /// cannot be analyzed fails the whole pass.
    pub fn apply(&self, edits: &[EditParameter], raw: &[u8]) -> Result<Vec<u8>, TransformError> {
        let mut request = ParsedRequest::parse(raw)?;

        for edit in edits.iter().filter(|e| !e.is_header()) {
            let mut candidate = request.clone();
            if !self.apply_one(&mut candidate, edit) {
                continue;
            }
            match ParsedRequest::parse(&candidate.to_bytes()) {
                Ok(reparsed) => request = reparsed,
                Err(e) => {
                    warn!(edit = %edit, error = %e, "Edit produced a malformed request, skipped");
                }
            }
        }

        for edit in edits.iter().filter(|e| e.is_header()) {
            self.apply_one(&mut request, edit);
        }

        Ok(request.to_bytes())
    }

    fn apply_one(&self, request: &mut ParsedRequest, edit: &EditParameter) -> bool {
        let (Some(location), Some(action)) = (edit.location(), edit.action()) else {
            warn!(edit = %edit, "Skipping edit with unknown location or action");
            return false;
        };

        if edit.name.is_empty() && action != EditAction::Raw {
            warn!(edit = %edit, "Skipping edit without a name");
            return false;
        }

        let transformer = transformer_for(location);
        match transformer.transform(request, edit, action) {
            TransformResult::Modified => {
                debug!(edit = %edit, transformer = transformer.name(), "Edit applied");
                true
            }
            TransformResult::Unchanged => {
                debug!(
                    edit = %edit,
                    transformer = transformer.name(),
                    "Edit left request unchanged"
                );
                false
            }
            TransformResult::Unsupported(reason) => {
                warn!(edit = %edit, reason = %reason, "Unsupported edit skipped");
                false
            }
        }
    }
}

/// Errors that can occur while applying edits.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Failed to analyze request: {0}")]
    Parse(#[from] MessageError),
}
