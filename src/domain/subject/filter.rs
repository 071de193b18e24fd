//! Wildcard subscription patterns.
//!
//! - `*` matches exactly one segment
//! - `>` matches one or more trailing segments and must be last
//!
//! Patterns that are all wildcards, or use more wildcards than allowed, are
//! rejected as too broad.

use std::fmt;

use super::pattern::{is_valid_segment, Subject, MAX_SUBJECT_LEN, SEPARATOR};
use super::SubjectError;

/// Default maximum number of wildcard segments in a subscription.
pub const DEFAULT_MAX_WILDCARDS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterSegment {
    Literal(String),
    Single,
    Tail,
}

/// A validated subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFilter {
    raw: String,
    segments: Vec<FilterSegment>,
}

impl SubjectFilter {
    /// Parses a subscription pattern, enforcing the breadth limit.
    pub fn parse(pattern: &str, max_wildcards: usize) -> Result<Self, SubjectError> {
        if pattern.is_empty() {
            return Err(SubjectError::invalid_subject(pattern, "empty pattern"));
        }
        if pattern.len() > MAX_SUBJECT_LEN {
            return Err(SubjectError::invalid_subject(
                pattern,
                format!("longer than {} characters", MAX_SUBJECT_LEN),
            ));
        }

        let raw_segments: Vec<&str> = pattern.split(SEPARATOR).collect();
        let last = raw_segments.len() - 1;
        let mut segments = Vec::with_capacity(raw_segments.len());

        for (index, raw) in raw_segments.iter().enumerate() {
            let segment = match *raw {
                "*" => FilterSegment::Single,
                ">" if index == last => FilterSegment::Tail,
                ">" => {
                    return Err(SubjectError::invalid_subject(
                        pattern,
                        "'>' is only allowed as the last segment",
                    ))
                }
                lit if is_valid_segment(lit) => FilterSegment::Literal(lit.to_string()),
                other => {
                    return Err(SubjectError::invalid_subject(
                        pattern,
                        format!("invalid segment '{}'", other),
                    ))
                }
            };
            segments.push(segment);
        }

        let wildcards = segments
            .iter()
            .filter(|s| !matches!(s, FilterSegment::Literal(_)))
            .count();

        if wildcards == segments.len() {
            return Err(SubjectError::SubscriptionTooBroad {
                pattern: pattern.to_string(),
                reason: "every segment is a wildcard".to_string(),
            });
        }
        if wildcards > max_wildcards {
            return Err(SubjectError::SubscriptionTooBroad {
                pattern: pattern.to_string(),
                reason: format!(
                    "{} wildcard segments, at most {} allowed",
                    wildcards, max_wildcards
                ),
            });
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn wildcard_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| !matches!(s, FilterSegment::Literal(_)))
            .count()
    }

    /// Whether a literal subject is selected by this pattern.
    pub fn matches(&self, subject: &Subject) -> bool {
        let actual: Vec<&str> = subject.segments().collect();
        let mut index = 0;
        for segment in &self.segments {
            match segment {
                FilterSegment::Tail => return index < actual.len(),
                FilterSegment::Single => {
                    if index >= actual.len() {
                        return false;
                    }
                }
                FilterSegment::Literal(lit) => {
                    if actual.get(index) != Some(&lit.as_str()) {
                        return false;
                    }
                }
            }
            index += 1;
        }
        index == actual.len()
    }

    /// Renders the pattern as a Redis `PSUBSCRIBE` glob.
    ///
    /// Redis globs let `*` cross segment boundaries, so the glob may select
    /// more than this filter does; callers re-check with [`matches`].
    ///
    /// [`matches`]: SubjectFilter::matches
    pub fn to_redis_glob(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                FilterSegment::Literal(lit) => lit.as_str(),
                FilterSegment::Single | FilterSegment::Tail => "*",
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for SubjectFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(p: &str) -> SubjectFilter {
        SubjectFilter::parse(p, DEFAULT_MAX_WILDCARDS).unwrap()
    }

    fn subject(s: &str) -> Subject {
        Subject::parse(s).unwrap()
    }

    #[test]
    fn single_wildcard_matches_one_segment() {
        let f = filter("chat.say.room.*");
        assert!(f.matches(&subject("chat.say.room.library")));
        assert!(!f.matches(&subject("chat.say.room")));
        assert!(!f.matches(&subject("chat.say.room.a.b")));
    }

    #[test]
    fn tail_wildcard_matches_one_or_more() {
        let f = filter("game.player.>");
        assert!(f.matches(&subject("game.player.p1")));
        assert!(f.matches(&subject("game.player.p1.direct")));
        assert!(!f.matches(&subject("game.player")));
    }

    #[test]
    fn literal_pattern_matches_exactly() {
        let f = filter("system.announce.global");
        assert!(f.matches(&subject("system.announce.global")));
        assert!(!f.matches(&subject("system.announce.zone")));
    }

    #[test]
    fn all_wildcards_are_too_broad() {
        for p in ["*", ">", "*.*", "*.>"] {
            let err = SubjectFilter::parse(p, 5).unwrap_err();
            assert!(
                matches!(err, SubjectError::SubscriptionTooBroad { .. }),
                "{} gave {:?}",
                p,
                err
            );
        }
    }

    #[test]
    fn more_than_two_wildcards_are_too_broad() {
        let err = SubjectFilter::parse("game.*.*.*", DEFAULT_MAX_WILDCARDS).unwrap_err();
        assert!(matches!(err, SubjectError::SubscriptionTooBroad { .. }));

        assert!(SubjectFilter::parse("game.*.*", DEFAULT_MAX_WILDCARDS).is_ok());
        assert!(SubjectFilter::parse("game.*.>", DEFAULT_MAX_WILDCARDS).is_ok());
    }

    #[test]
    fn tail_must_be_last() {
        assert!(SubjectFilter::parse("game.>.x", DEFAULT_MAX_WILDCARDS).is_err());
    }

    #[test]
    fn redis_glob_translation() {
        assert_eq!(filter("chat.*.room.>").to_redis_glob(), "chat.*.room.*");
    }
}
