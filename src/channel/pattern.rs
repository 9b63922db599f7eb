//! Channel pattern compilation and matching

use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Parameters captured while matching a channel name: parameter name → segment
pub type ChannelParams = HashMap<String, String>;

/// A compiled channel name template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPattern {
    /// The template as it was registered
    source: String,
    /// Parsed segments, in order
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Errors raised while compiling a channel pattern
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("Invalid channel pattern {pattern:?}: pattern is empty")]
    Empty { pattern: String },

    #[error("Invalid channel pattern {pattern:?}: empty segment at position {position}")]
    EmptySegment { pattern: String, position: usize },

    #[error("Invalid channel pattern {pattern:?}: invalid parameter name {name:?}")]
    InvalidParamName { pattern: String, name: String },

    #[error("Invalid channel pattern {pattern:?}: duplicate parameter {name:?}")]
    DuplicateParam { pattern: String, name: String },
}

impl ChannelPattern {
    /// Compile a channel template such as `chats/:room/messages`
    ///
    /// Leading and trailing `/` are ignored.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let trimmed = strip_slashes(pattern);
        if trimmed.is_empty() {
            return Err(PatternError::Empty {
                pattern: pattern.to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut segments = Vec::new();

        for (position, raw) in trimmed.split('/').enumerate() {
            if raw.is_empty() {
                return Err(PatternError::EmptySegment {
                    pattern: pattern.to_string(),
                    position,
                });
            }

            match raw.strip_prefix(':') {
                Some(name) => {
                    if !is_valid_param_name(name) {
                        return Err(PatternError::InvalidParamName {
                            pattern: pattern.to_string(),
                            name: name.to_string(),
                        });
                    }
                    if !seen.insert(name) {
                        return Err(PatternError::DuplicateParam {
                            pattern: pattern.to_string(),
                            name: name.to_string(),
                        });
                    }
                    segments.push(Segment::Param(name.to_string()));
                }
                None => segments.push(Segment::Literal(raw.to_string())),
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// The template this pattern was compiled from
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names of the parameters, in template order
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Whether the template has no parameter segments
    pub fn is_literal(&self) -> bool {
        self.param_names().next().is_none()
    }

    /// Match a concrete channel name, returning the captured parameters
    pub fn captures(&self, channel: &str) -> Option<ChannelParams> {
        let parts: Vec<&str> = strip_slashes(channel).split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = ChannelParams::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }

        Some(params)
    }
}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Find the first pattern (in list order) matching `channel`
pub fn find_match<'a>(
    channel: &str,
    patterns: &'a [ChannelPattern],
) -> Option<(&'a ChannelPattern, ChannelParams)> {
    patterns
        .iter()
        .find_map(|pattern| pattern.captures(channel).map(|params| (pattern, params)))
}

fn strip_slashes(value: &str) -> &str {
    value.trim_matches('/')
}

fn is_valid_param_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern_matches_exact_name() {
        let pattern = ChannelPattern::compile("foo").unwrap();

        assert!(pattern.is_literal());
        assert_eq!(pattern.captures("foo"), Some(ChannelParams::new()));
        assert_eq!(pattern.captures("foo/bar"), None);
        assert_eq!(pattern.captures("fo"), None);
    }

    #[test]
    fn test_param_extraction() {
        let pattern = ChannelPattern::compile("chats/:room/messages/:id").unwrap();
        let params = pattern.captures("chats/general/messages/7").unwrap();

        assert_eq!(params.len(), 2);
        assert_eq!(params["room"], "general");
        assert_eq!(params["id"], "7");
        assert_eq!(
            pattern.param_names().collect::<Vec<_>>(),
            vec!["room", "id"]
        );
    }

    #[test]
    fn test_segment_count_must_match() {
        let pattern = ChannelPattern::compile("users/:id").unwrap();

        assert!(pattern.captures("users").is_none());
        assert!(pattern.captures("users/1/posts").is_none());
        assert!(pattern.captures("users//").is_none());
    }

    #[test]
    fn test_surrounding_slashes_ignored() {
        let pattern = ChannelPattern::compile("/users/:id/").unwrap();

        assert_eq!(pattern.as_str(), "/users/:id/");
        assert_eq!(pattern.captures("users/1").unwrap()["id"], "1");
        assert_eq!(pattern.captures("/users/1").unwrap()["id"], "1");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(
            ChannelPattern::compile(""),
            Err(PatternError::Empty { .. })
        ));
        assert!(matches!(
            ChannelPattern::compile("/"),
            Err(PatternError::Empty { .. })
        ));
        assert!(matches!(
            ChannelPattern::compile("a//b"),
            Err(PatternError::EmptySegment { position: 1, .. })
        ));
        assert!(matches!(
            ChannelPattern::compile("users/:"),
            Err(PatternError::InvalidParamName { .. })
        ));
        assert!(matches!(
            ChannelPattern::compile("users/:id-x"),
            Err(PatternError::InvalidParamName { .. })
        ));
        assert!(matches!(
            ChannelPattern::compile("a/:id/b/:id"),
            Err(PatternError::DuplicateParam { .. })
        ));
    }

    #[test]
    fn test_first_registered_pattern_wins() {
        let patterns = vec![
            ChannelPattern::compile("users/:id").unwrap(),
            ChannelPattern::compile("users/admin").unwrap(),
        ];

        let (pattern, params) = find_match("users/admin", &patterns).unwrap();
        assert_eq!(pattern.as_str(), "users/:id");
        assert_eq!(params["id"], "admin");
    }

    #[test]
    fn test_no_match() {
        let patterns = vec![ChannelPattern::compile("foo/:id").unwrap()];

        assert!(find_match("bar/1", &patterns).is_none());
        assert!(find_match("bar", &[]).is_none());
    }

    #[test]
    fn test_error_display() {
        let err = ChannelPattern::compile("").unwrap_err();
        assert_eq!(err.to_string(), "Invalid channel pattern \"\": pattern is empty");
    }
}
