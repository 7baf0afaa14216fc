//! URL pattern compilation and matching.
//!
//! # Responsibilities
//! - Parse `/`-delimited patterns into literal, named and splat segments
//! - Match a pathname against a compiled pattern
//! - Capture named segments and the splat remainder
//!
//! # Design Decisions
//! - Literal segments compare on the raw (still percent-encoded) segment
//! - Captured values are percent-decoded
//! - No regex, matching is a single pass over the segments

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;

/// Key under which a trailing `*` stores the captured remainder.
pub const SPLAT: &str = "splat";

/// Captured path parameters.
pub type Params = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern `{0}` has a wildcard before its last segment")]
    WildcardNotLast(String),
    #[error("pattern `{0}` has an unnamed parameter")]
    EmptyParamName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Splat,
}

/// A compiled route pattern such as `/pg/:database/:table` or `/build/*`.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        let raw: Vec<&str> = source.split('/').collect();
        let last = raw.len() - 1;
        let mut segments = Vec::with_capacity(raw.len());

        for (i, seg) in raw.iter().enumerate() {
            let segment = if *seg == "*" {
                if i != last {
                    return Err(PatternError::WildcardNotLast(source.to_string()));
                }
                Segment::Splat
            } else if let Some(name) = seg.strip_prefix(':') {
                if name.is_empty() {
                    return Err(PatternError::EmptyParamName(source.to_string()));
                }
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(seg.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The bare `*` pattern.
    pub fn catch_all() -> Self {
        Self {
            source: "*".to_string(),
            segments: vec![Segment::Splat],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True for the bare `*` pattern, which matches every path.
    pub fn is_catch_all(&self) -> bool {
        matches!(self.segments.as_slice(), [Segment::Splat])
    }

    /// Match the whole pathname, returning captured parameters on success.
    pub fn matches(&self, pathname: &str) -> Option<Params> {
        let path: Vec<&str> = pathname.split('/').collect();
        let mut params = Params::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Splat => {
                    let rest = path.get(i..).map(|r| r.join("/")).unwrap_or_default();
                    params.insert(SPLAT.to_string(), decode(&rest));
                    return Some(params);
                }
                Segment::Param(name) => {
                    let value = path.get(i).filter(|v| !v.is_empty())?;
                    params.insert(name.clone(), decode(value));
                }
                Segment::Literal(literal) => {
                    if path.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
            }
        }

        // no partial matches
        (path.len() == self.segments.len()).then_some(params)
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}
