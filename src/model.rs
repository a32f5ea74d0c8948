//! Core data model shared by the matcher, evaluators and edit applier.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Sentinel code carried by an edit whose location or action was missing.
pub const INVALID_CODE: i64 = -1;

/// Syntactic slot a parameter occupies in a request.
///
/// The integer codes are stable and shared with stored rules and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterLocation {
    /// Query string parameter
    Url,
    /// Form-encoded body parameter
    Body,
    /// Cookie
    Cookie,
    /// XML element (whole-body only)
    Xml,
    /// XML attribute (whole-body only)
    XmlAttr,
    /// Multipart attribute (whole-body only)
    MultipartAttr,
    /// JSON body field (whole-body only)
    Json,
    /// Request header
    Header,
}

impl ParameterLocation {
    /// All locations, in code order.
    pub const ALL: [ParameterLocation; 8] = [
        Self::Url,
        Self::Body,
        Self::Cookie,
        Self::Xml,
        Self::XmlAttr,
        Self::MultipartAttr,
        Self::Json,
        Self::Header,
    ];

    pub fn code(self) -> i64 {
        match self {
            Self::Url => 0,
            Self::Body => 1,
            Self::Cookie => 2,
            Self::Xml => 3,
            Self::XmlAttr => 4,
            Self::MultipartAttr => 5,
            Self::Json => 6,
            Self::Header => 10,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.code() == code)
    }

    /// Symbolic name used in scripts and declarative rules.
    pub fn name(self) -> &'static str {
        match self {
            Self::Url => "PARAM_URL",
            Self::Body => "PARAM_BODY",
            Self::Cookie => "PARAM_COOKIE",
            Self::Xml => "PARAM_XML",
            Self::XmlAttr => "PARAM_XML_ATTR",
            Self::MultipartAttr => "PARAM_MULTIPART_ATTR",
            Self::Json => "PARAM_JSON",
            Self::Header => "HEADER",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.name() == name)
    }

    /// Locations that cannot address a single parameter; edits replace the body.
    pub fn is_whole_body(self) -> bool {
        matches!(
            self,
            Self::Xml | Self::XmlAttr | Self::MultipartAttr | Self::Json
        )
    }
}

impl fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Upsert/delete semantic applied to a single parameter or header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditAction {
    /// Replace the whole body with the edit value
    Raw,
    /// Insert only if absent
    Add,
    /// Modify only if present
    Update,
    /// Insert or replace
    Override,
    /// Remove if present
    Delete,
}

impl EditAction {
    pub const ALL: [EditAction; 5] = [
        Self::Raw,
        Self::Add,
        Self::Update,
        Self::Override,
        Self::Delete,
    ];

    pub fn code(self) -> i64 {
        match self {
            Self::Raw => 0,
            Self::Add => 1,
            Self::Update => 2,
            Self::Override => 3,
            Self::Delete => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Override => "OVERRIDE",
            Self::Delete => "DELETE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }
}

impl fmt::Display for EditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitmask over the proxy tools a request can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ToolFlag(u32);

impl ToolFlag {
    pub const SUITE: ToolFlag = ToolFlag(1 << 0);
    pub const TARGET: ToolFlag = ToolFlag(1 << 1);
    pub const PROXY: ToolFlag = ToolFlag(1 << 2);
    pub const SPIDER: ToolFlag = ToolFlag(1 << 3);
    pub const SCANNER: ToolFlag = ToolFlag(1 << 4);
    pub const INTRUDER: ToolFlag = ToolFlag(1 << 5);
    pub const REPEATER: ToolFlag = ToolFlag(1 << 6);
    pub const SEQUENCER: ToolFlag = ToolFlag(1 << 7);
    pub const DECODER: ToolFlag = ToolFlag(1 << 8);
    pub const COMPARER: ToolFlag = ToolFlag(1 << 9);
    pub const EXTENDER: ToolFlag = ToolFlag(1 << 10);

    const NAMED: [(&'static str, ToolFlag); 11] = [
        ("TOOL_SUITE", Self::SUITE),
        ("TOOL_TARGET", Self::TARGET),
        ("TOOL_PROXY", Self::PROXY),
        ("TOOL_SPIDER", Self::SPIDER),
        ("TOOL_SCANNER", Self::SCANNER),
        ("TOOL_INTRUDER", Self::INTRUDER),
        ("TOOL_REPEATER", Self::REPEATER),
        ("TOOL_SEQUENCER", Self::SEQUENCER),
        ("TOOL_DECODER", Self::DECODER),
        ("TOOL_COMPARER", Self::COMPARER),
        ("TOOL_EXTENDER", Self::EXTENDER),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when the two masks share at least one tool.
    pub const fn intersects(self, other: ToolFlag) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: ToolFlag) -> Self {
        Self(self.0 | other.0)
    }

    /// Parse comma-separated symbolic names. Unknown names are ignored.
    pub fn parse(names: &str) -> Self {
        names
            .split(',')
            .map(str::trim)
            .filter_map(|name| {
                Self::NAMED
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, flag)| *flag)
            })
            .fold(Self::empty(), Self::union)
    }

    /// Readable names of every tool set in this mask.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(_, flag)| self.intersects(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}

impl fmt::Display for ToolFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

impl Serialize for ToolFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ToolFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bits(u32),
            Names(String),
            List(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Bits(bits) => ToolFlag::from_bits(bits),
            Repr::Names(names) => ToolFlag::parse(&names),
            Repr::List(names) => ToolFlag::parse(&names.join(",")),
        })
    }
}

/// How a rule's content is evaluated.
///
/// Serialized by name; stored rules may also carry the integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Embedded script defining `main()`
    #[default]
    Script,
    /// Static JSON edit list
    Declarative,
}

impl RuleKind {
    pub fn code(self) -> i64 {
        match self {
            Self::Script => 1,
            Self::Declarative => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Script),
            2 => Some(Self::Declarative),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for RuleKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(i64),
            Name(String),
        }

        let kind = match Repr::deserialize(deserializer)? {
            Repr::Code(code) => RuleKind::from_code(code),
            Repr::Name(name) => match name.to_ascii_lowercase().as_str() {
                "script" => Some(RuleKind::Script),
                "declarative" => Some(RuleKind::Declarative),
                _ => None,
            },
        };
        kind.ok_or_else(|| serde::de::Error::custom("unknown rule kind"))
    }
}

/// A user-defined signing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRule {
    /// Store-assigned identifier
    #[serde(default)]
    pub id: u64,
    /// Rule name (unique, used as log prefix)
    pub name: String,
    /// Regex searched anywhere in the absolute URL
    pub filter: String,
    /// Script source or declarative JSON
    pub content: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub kind: RuleKind,
    /// Tools this rule applies to
    #[serde(default)]
    pub tool_flag: ToolFlag,
    /// Creation time (epoch millis)
    #[serde(default = "now_millis")]
    pub created_at: i64,
    /// Last update time (epoch millis)
    #[serde(default = "now_millis")]
    pub updated_at: i64,
}

fn default_true() -> bool {
    true
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SignRule {
    /// Create an enabled script rule.
    pub fn script(
        name: impl Into<String>,
        filter: impl Into<String>,
        content: impl Into<String>,
        tool_flag: ToolFlag,
    ) -> Self {
        let now = now_millis();
        Self {
            id: 0,
            name: name.into(),
            filter: filter.into(),
            content: content.into(),
            enabled: true,
            kind: RuleKind::Script,
            tool_flag,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an enabled declarative rule.
    pub fn declarative(
        name: impl Into<String>,
        filter: impl Into<String>,
        content: impl Into<String>,
        tool_flag: ToolFlag,
    ) -> Self {
        Self {
            kind: RuleKind::Declarative,
            ..Self::script(name, filter, content, tool_flag)
        }
    }
}

/// One parameter or header mutation produced by a rule.
///
/// Location and action are kept as raw codes so that malformed rule output
/// survives evaluation and is rejected per edit when applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditParameter {
    pub name: String,
    pub value: String,
    pub location: i64,
    pub action: i64,
}

impl EditParameter {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        location: ParameterLocation,
        action: EditAction,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            location: location.code(),
            action: action.code(),
        }
    }

    pub fn location(&self) -> Option<ParameterLocation> {
        ParameterLocation::from_code(self.location)
    }

    pub fn action(&self) -> Option<EditAction> {
        EditAction::from_code(self.action)
    }

    pub fn is_header(&self) -> bool {
        self.location() == Some(ParameterLocation::Header)
    }
}

impl fmt::Display for EditParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self
            .location()
            .map(|l| l.name().to_string())
            .unwrap_or_else(|| format!("<{}>", self.location));
        let action = self
            .action()
            .map(|a| a.name().to_string())
            .unwrap_or_else(|| format!("<{}>", self.action));
        write!(f, "{} {}[{}]", action, location, self.name)
    }
}
