//! Tag vocabulary embedded in model output
//!
//! ```text
//! <write file_path="relative/path.ext"> ...body, optionally fenced... </write>
//! <delete file_path="relative/path.ext" />
//! <rename original_file_path="old/path" new_file_path="new/path" />
//! <thinking> ...free text... </thinking>
//! <add-dependency> package-name </add-dependency>
//! <code> ... </code>
//! ```
//!
//! Anything else between `<` and `>` is an unrecognized tag and is ignored.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Attribute carrying the target of `write` and `delete`
pub const FILE_PATH: &str = "file_path";
/// Source attribute of `rename`
pub const ORIGINAL_FILE_PATH: &str = "original_file_path";
/// Destination attribute of `rename`
pub const NEW_FILE_PATH: &str = "new_file_path";

/// The six recognized tag names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagName {
    Thinking,
    Write,
    AddDependency,
    Delete,
    Rename,
    /// Pure envelope around a batch of other tags
    Code,
}

impl TagName {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "thinking" => Some(TagName::Thinking),
            "write" => Some(TagName::Write),
            "add-dependency" => Some(TagName::AddDependency),
            "delete" => Some(TagName::Delete),
            "rename" => Some(TagName::Rename),
            "code" => Some(TagName::Code),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagName::Thinking => "thinking",
            TagName::Write => "write",
            TagName::AddDependency => "add-dependency",
            TagName::Delete => "delete",
            TagName::Rename => "rename",
            TagName::Code => "code",
        }
    }

    /// Paired tags capture an opaque body up to their closing tag.
    pub fn is_paired(&self) -> bool {
        matches!(
            self,
            TagName::Thinking | TagName::Write | TagName::AddDependency
        )
    }

    /// Literal closing sequence, e.g. `</write>`
    pub fn closing_tag(&self) -> &'static str {
        match self {
            TagName::Thinking => "</thinking>",
            TagName::Write => "</write>",
            TagName::AddDependency => "</add-dependency>",
            TagName::Delete => "</delete>",
            TagName::Rename => "</rename>",
            TagName::Code => "</code>",
        }
    }
}

impl std::fmt::Display for TagName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a tag's attribute list could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeError {
    /// Text between attributes that is not a `key="value"` pair
    Malformed(String),
    DuplicateKey(String),
}

impl std::fmt::Display for AttributeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeError::Malformed(residue) => {
                write!(f, "malformed attribute syntax near {:?}", residue)
            }
            AttributeError::DuplicateKey(key) => write!(f, "duplicate attribute {:?}", key),
        }
    }
}

/// One scanned tag: the text between `<` and the matching `>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub self_closing: bool,
    /// `</name>` rather than `<name ...>`
    pub closing: bool,
}

impl Tag {
    /// Parse the inside of a tag (without the angle brackets).
    pub fn parse(inner: &str) -> Result<Self, AttributeError> {
        let mut rest = inner.trim();

        let closing = rest.starts_with('/');
        if closing {
            rest = rest[1..].trim_start();
        }
        let self_closing = !closing && rest.ends_with('/');
        if self_closing {
            rest = rest[..rest.len() - 1].trim_end();
        }

        let name_end = rest
            .find(|c: char| c.is_whitespace())
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_string();
        let attributes = parse_attributes(&rest[name_end..])?;

        Ok(Self {
            name,
            attributes,
            self_closing,
            closing,
        })
    }

    /// The recognized vocabulary entry, if any
    pub fn known(&self) -> Option<TagName> {
        TagName::from_name(&self.name)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Name of a tag from its inner text, ignoring the attribute list.
///
/// Used when the attributes are malformed but the tag kind still decides
/// which state the parser moves to.
pub fn tag_name(inner: &str) -> &str {
    let rest = inner.trim().trim_start_matches('/').trim_start();
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '/')
        .unwrap_or(rest.len());
    &rest[..end]
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][A-Za-z0-9_:\-]*)\s*=\s*"([^"]*)""#)
            .expect("attribute pattern is valid")
    })
}

/// Extract `key="value"` pairs. Order is irrelevant; keys must be unique.
pub fn parse_attributes(input: &str) -> Result<BTreeMap<String, String>, AttributeError> {
    let mut attributes = BTreeMap::new();
    let mut cursor = 0;

    for caps in attribute_regex().captures_iter(input) {
        let (Some(whole), Some(key), Some(value)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let gap = &input[cursor..whole.start()];
        if !gap.trim().is_empty() {
            return Err(AttributeError::Malformed(gap.trim().to_string()));
        }
        cursor = whole.end();

        let key = key.as_str().to_string();
        if attributes.contains_key(&key) {
            return Err(AttributeError::DuplicateKey(key));
        }
        attributes.insert(key, value.as_str().to_string());
    }

    let tail = &input[cursor..];
    if !tail.trim().is_empty() {
        return Err(AttributeError::Malformed(tail.trim().to_string()));
    }

    Ok(attributes)
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^```[\w.+#-]*[ \t]*\r?\n((?s:.*?))\r?\n?```$")
            .expect("fence pattern is valid")
    })
}

/// Remove a Markdown code fence wrapping the whole body.
///
/// The opening line is three backticks plus an optional language tag, the
/// closing line is three backticks. Bodies that are not wholly wrapped in a
/// single fence, including several fenced blocks in a row, are returned
/// verbatim.
pub fn strip_code_fence(body: &str) -> &str {
    match fence_regex().captures(body).and_then(|caps| caps.get(1)) {
        Some(inner) if !inner.as_str().lines().any(|line| line.trim() == "```") => inner.as_str(),
        _ => body,
    }
}
