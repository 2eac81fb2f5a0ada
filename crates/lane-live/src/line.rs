//! Single-line result element parsing.
//!
//! A per-test line is one markup element carrying `name` and `result`
//! attributes, e.g. `<test name="Foo.Bar" result="Pass" />`. Streaming runners
//! sometimes emit the opening tag without the self-closing terminator; such
//! lines are repaired before parsing.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token a line must contain to be considered at all.
pub const TEST_MARKER: &str = "<test";

/// Display state for one test result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultState {
    Pass,
    Fail,
    Skip,
    Unknown,
}

impl ResultState {
    /// Map a `result` attribute value (case-insensitive).
    pub fn from_attribute(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "pass" => ResultState::Pass,
            "fail" => ResultState::Fail,
            "skip" => ResultState::Skip,
            _ => ResultState::Unknown,
        }
    }

    /// Fixed-width console label.
    pub fn label(&self) -> &'static str {
        match self {
            ResultState::Pass => "[ OK ]",
            ResultState::Fail => "[FAIL]",
            ResultState::Skip => "[SKIP]",
            ResultState::Unknown => "[????]",
        }
    }
}

/// A parsed per-test line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLine {
    /// Element name (`test`, `test-case`, ...)
    pub element: String,
    /// Test name
    pub name: String,
    /// Raw `result` attribute
    pub result: String,
    /// Display state derived from `result`
    pub state: ResultState,
}

impl TestLine {
    /// Render as `<label> <name>`.
    pub fn render(&self) -> String {
        format!("{} {}", self.state.label(), self.name)
    }
}

/// Why a candidate line could not be parsed as an element.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line has no closing angle bracket")]
    Unterminated,

    #[error("not a single well-formed element: {0}")]
    Malformed(String),

    #[error("duplicate attribute: {0}")]
    DuplicateAttribute(String),

    #[error("invalid entity reference in attribute {0}")]
    BadEntity(String),
}

fn element_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^\s*<([A-Za-z_][\w.:-]*)((?:\s+[A-Za-z_][\w.:-]*\s*=\s*(?:"[^"<]*"|'[^'<]*'))*)\s*/>\s*$"#,
        )
        .expect("element pattern is valid")
    })
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w.:-]*)\s*=\s*(?:"([^"<]*)"|'([^'<]*)')"#)
            .expect("attribute pattern is valid")
    })
}

/// Insert a self-closing terminator before the final `>` unless one exists.
pub fn repair_terminator(line: &str) -> Result<String, ParseError> {
    if line.contains("/>") {
        return Ok(line.to_string());
    }
    let position = line.rfind('>').ok_or(ParseError::Unterminated)?;
    let mut repaired = String::with_capacity(line.len() + 1);
    repaired.push_str(&line[..position]);
    repaired.push('/');
    repaired.push_str(&line[position..]);
    Ok(repaired)
}

/// Parse one complete line.
///
/// Returns `Ok(None)` for lines that are not per-test lines: no marker,
/// or an element without both `name` and `result`.
pub fn parse_result_line(line: &str) -> Result<Option<TestLine>, ParseError> {
    if line.is_empty() || !line.contains(TEST_MARKER) {
        return Ok(None);
    }

    let repaired = repair_terminator(line)?;
    let captures = element_regex()
        .captures(&repaired)
        .ok_or_else(|| ParseError::Malformed(truncate(&repaired)))?;

    let element = captures
        .get(1)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let attribute_text = captures.get(2).map(|m| m.as_str()).unwrap_or_default();

    let mut attributes: HashMap<String, String> = HashMap::new();
    for attr in attribute_regex().captures_iter(attribute_text) {
        let key = attr.get(1).map(|m| m.as_str()).unwrap_or_default();
        let raw = attr
            .get(2)
            .or_else(|| attr.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let value = unescape(raw).ok_or_else(|| ParseError::BadEntity(key.to_string()))?;
        if attributes.insert(key.to_string(), value).is_some() {
            return Err(ParseError::DuplicateAttribute(key.to_string()));
        }
    }

    let (Some(name), Some(result)) = (attributes.remove("name"), attributes.remove("result"))
    else {
        return Ok(None);
    };

    Ok(Some(TestLine {
        element,
        state: ResultState::from_attribute(&result),
        name,
        result,
    }))
}

fn unescape(raw: &str) -> Option<String> {
    if !raw.contains('&') {
        return Some(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let end = tail.find(';')?;
        let entity = &tail[..end];
        let decoded = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ if entity.starts_with("#x") => {
                char::from_u32(u32::from_str_radix(&entity[2..], 16).ok()?)?
            }
            _ if entity.starts_with('#') => char::from_u32(entity[1..].parse().ok()?)?,
            _ => return None,
        };
        out.push(decoded);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn truncate(line: &str) -> String {
    const MAX: usize = 120;
    if line.len() <= MAX {
        return line.to_string();
    }
    let mut end = MAX;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}
