//! Request Sign Agent for Zentinel.
//!
//! This agent rewrites intercepted HTTP requests according to user-defined
//! signing rules:
//!
//! - Rule selection by URL regex and originating tool
//! - Sandboxed Rhai scripts computing parameter and header edits
//! - Declarative JSON edit lists with `${...}` templates
//! - Query, form body, cookie, header and whole-body edits on raw bytes
//! - `Content-Length` kept consistent with the rewritten body
//!
//! ## Configuration Example
//!
//! ```yaml
//! rules:
//!   - name: "api-sign"
//!     filter: "api\\.example\\.com"
//!     tool_flag: "TOOL_PROXY,TOOL_REPEATER"
//!     content: |
//!       fn main() {
//!         let ts = `${utils::timestamp(TimestampUnit::SECONDS)}`;
//!         [ #{ name: "ts", value: ts,
//!              location: ParameterLocation::PARAM_URL, action: EditAction::OVERRIDE },
//!           #{ name: "sign", value: utils::md5(request::uri + ts),
//!              location: ParameterLocation::PARAM_URL, action: EditAction::OVERRIDE } ]
//!       }
//! ```

pub mod binding;
pub mod config;
pub mod evaluator;
pub mod matcher;
pub mod message;
pub mod model;
pub mod pipeline;
pub mod script;
pub mod store;
pub mod transformer;

pub use binding::{HttpService, RequestBinding};
pub use config::{Settings, SignerConfig};
pub use model::{EditAction, EditParameter, ParameterLocation, RuleKind, SignRule, ToolFlag};
pub use pipeline::{InterceptedMessage, RuleTestRequest, SignPipeline, SignerError};
pub use store::{MemoryRuleStore, RuleStore};
