//! Topic patterns and the topic surface used by the dashboard.
//!
//! Topics are slash-delimited (`vm/vm-003/heartbeat`). A pattern is matched
//! segment by segment; `+` matches exactly one segment and the segment
//! counts must be equal. There is no multi-level wildcard.

use std::fmt;
use std::str::FromStr;

use super::BusError;

// Fleet telemetry
pub const VM_HEARTBEAT: &str = "vm/+/heartbeat";

// Task lifecycle
pub const TASK_ASSIGNED: &str = "task/+/assigned";
pub const TASK_CANCELLED: &str = "task/+/cancelled";
pub const TASK_PROGRESS: &str = "task/+/progress";
pub const TASK_QUEUE_NEW: &str = "task/queue/new";

// Step dispatch
pub const SCRAPER_EXECUTE: &str = "scraper/execute";
pub const SCRAPER_RESULT: &str = "scraper/result";

// Connection
pub const CONNECTION_STATUS: &str = "mqtt/connection/status";

/// Wildcard segment.
pub const WILDCARD: &str = "+";

/// `vm/{id}/heartbeat`
pub fn vm_heartbeat(vm_id: &str) -> String {
    format!("vm/{}/heartbeat", vm_id)
}

/// `task/{id}/assigned`
pub fn task_assigned(task_id: &str) -> String {
    format!("task/{}/assigned", task_id)
}

/// `task/{id}/cancelled`
pub fn task_cancelled(task_id: &str) -> String {
    format!("task/{}/cancelled", task_id)
}

/// `task/{id}/progress`
pub fn task_progress(task_id: &str) -> String {
    format!("task/{}/progress", task_id)
}

/// `config/{target}/apply`
pub fn config_apply(target: &str) -> String {
    format!("config/{}/apply", target)
}

/// Returns the segment at `index` of a concrete topic.
pub fn segment(topic: &str, index: usize) -> Option<&str> {
    topic.split('/').nth(index)
}

/// One segment of a subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    /// Parse a pattern, rejecting empty patterns and segments that mix `+`
    /// with other characters. `#` is rejected since multi-level wildcards
    /// are not supported.
    pub fn parse(pattern: &str) -> Result<Self, BusError> {
        if pattern.is_empty() {
            return Err(BusError::InvalidPattern(
                "pattern cannot be empty".to_string(),
            ));
        }

        let mut segments = Vec::new();
        for part in pattern.split('/') {
            if part == WILDCARD {
                segments.push(Segment::Any);
            } else if part.contains('+') || part.contains('#') {
                return Err(BusError::InvalidPattern(format!(
                    "invalid segment '{}' in '{}'",
                    part, pattern
                )));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Returns true if `topic` matches this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.split('/');
        for segment in &self.segments {
            match (segment, parts.next()) {
                (Segment::Any, Some(_)) => {}
                (Segment::Literal(expected), Some(actual)) if expected == actual => {}
                _ => return false,
            }
        }
        parts.next().is_none()
    }

    /// Returns true if the pattern contains no wildcard.
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for TopicPattern {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let pattern = TopicPattern::parse("task/queue/new").unwrap();
        assert!(pattern.matches("task/queue/new"));
        assert!(!pattern.matches("task/queue/old"));
        assert!(pattern.is_literal());
    }

    #[test]
    fn test_wildcard_matches_one_segment() {
        let pattern = TopicPattern::parse(VM_HEARTBEAT).unwrap();
        assert!(pattern.matches("vm/vm-003/heartbeat"));
        assert!(pattern.matches("vm/anything/heartbeat"));
        assert!(!pattern.matches("vm/heartbeat"));
        assert!(!pattern.matches("vm/a/b/heartbeat"));
        assert!(!pattern.is_literal());
    }

    #[test]
    fn test_segment_count_must_match() {
        let pattern = TopicPattern::parse("+/+").unwrap();
        assert!(pattern.matches("a/b"));
        assert!(!pattern.matches("a"));
        assert!(!pattern.matches("a/b/c"));
    }

    #[test]
    fn test_wildcard_matches_empty_segment() {
        // Segments are opaque tokens, an empty one is still a segment.
        let pattern = TopicPattern::parse("task/+/progress").unwrap();
        assert!(pattern.matches("task//progress"));
    }

    #[test]
    fn test_rejects_invalid_patterns() {
        assert!(TopicPattern::parse("").is_err());
        assert!(TopicPattern::parse("vm/#").is_err());
        assert!(TopicPattern::parse("vm/a+/heartbeat").is_err());
    }

    #[test]
    fn test_topic_builders() {
        assert_eq!(vm_heartbeat("vm-1"), "vm/vm-1/heartbeat");
        assert_eq!(task_progress("t1"), "task/t1/progress");
        assert_eq!(segment("task/t1/progress", 1), Some("t1"));
        assert_eq!(segment("task", 1), None);

        for topic in [task_assigned("t1"), task_cancelled("t1")] {
            let pattern = if topic.ends_with("assigned") {
                TASK_ASSIGNED
            } else {
                TASK_CANCELLED
            };
            assert!(TopicPattern::parse(pattern).unwrap().matches(&topic));
        }
    }
}
