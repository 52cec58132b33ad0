//! # Event Name Patterns
//!
//! Event names are `:`-delimited segment lists (`modules:heartbeat:beat`).
//! A subscription pattern uses the same shape, where a `*` segment matches
//! exactly one segment of the event name. `modules:*:beat` therefore matches
//! `modules:heartbeat:beat` but not `modules:heartbeat:engine:ready`.
//!
//! Patterns are parsed once at subscription time; matching is a plain
//! segment walk with no allocation.

use std::fmt;
use std::str::FromStr;

use super::event_bus::{EventError, EventResult};

/// Delimiter between event name segments.
pub const SEGMENT_DELIMITER: char = ':';

/// One parsed segment of a subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSegment {
    Literal(String),
    Wildcard,
}

/// A parsed subscription pattern.
///
/// Kept alongside its source text so namespace eviction can match on the
/// raw prefix without re-rendering segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPattern {
    segments: Vec<PatternSegment>,
    text: String,
}

impl EventPattern {
    /// Parses a pattern string. Empty patterns and empty segments
    /// (`a::b`) are rejected.
    pub fn parse(pattern: &str) -> EventResult<Self> {
        if pattern.is_empty() {
            return Err(EventError::InvalidPattern {
                pattern: pattern.to_string(),
                message: "pattern is empty".to_string(),
            });
        }
        let mut segments = Vec::new();
        for segment in pattern.split(SEGMENT_DELIMITER) {
            if segment.is_empty() {
                return Err(EventError::InvalidPattern {
                    pattern: pattern.to_string(),
                    message: "empty segment".to_string(),
                });
            }
            if segment == "*" {
                segments.push(PatternSegment::Wildcard);
            } else {
                segments.push(PatternSegment::Literal(segment.to_string()));
            }
        }
        Ok(Self {
            segments,
            text: pattern.to_string(),
        })
    }

    /// Returns true when the pattern matches the given event name.
    ///
    /// Segment counts must agree; a `*` segment accepts any single segment.
    pub fn matches(&self, event_name: &str) -> bool {
        let mut name_segments = event_name.split(SEGMENT_DELIMITER);
        for pattern_segment in &self.segments {
            let Some(name_segment) = name_segments.next() else {
                return false;
            };
            match pattern_segment {
                PatternSegment::Wildcard => {}
                PatternSegment::Literal(literal) => {
                    if literal != name_segment {
                        return false;
                    }
                }
            }
        }
        name_segments.next().is_none()
    }

    /// True when the pattern contains no wildcard segments.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, PatternSegment::Literal(_)))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl FromStr for EventPattern {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}
