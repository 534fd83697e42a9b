//! MQTT-style topic patterns
//!
//! `+` matches exactly one level, `#` matches the remainder of the path
//! (including the parent level itself) and may only be the final segment.

use crate::error::{Result, SentinelError};

/// Check a pattern is well-formed
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(SentinelError::Parse("empty topic pattern".to_string()));
    }

    let segments: Vec<&str> = pattern.split('/').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if segment.contains('#') && (*segment != "#" || i != last) {
            return Err(SentinelError::Parse(format!(
                "'#' must be the whole final segment: {}",
                pattern
            )));
        }
        if segment.contains('+') && *segment != "+" {
            return Err(SentinelError::Parse(format!(
                "'+' must occupy a whole segment: {}",
                pattern
            )));
        }
    }
    Ok(())
}

/// Whether `topic` matches `pattern`
///
/// Malformed patterns never match.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if validate_pattern(pattern).is_err() {
        return false;
    }

    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Translate an MQTT topic or pattern to a NATS subject
///
/// `.` separates NATS tokens, so topics containing it (or empty levels,
/// which NATS rejects) have no faithful subject and are refused.
pub fn to_nats_subject(topic: &str) -> Result<String> {
    let mut tokens = Vec::new();
    for segment in topic.split('/') {
        if segment.is_empty() || segment.contains('.') || segment.contains(char::is_whitespace) {
            return Err(SentinelError::Parse(format!(
                "topic has no NATS subject equivalent: '{}'",
                topic
            )));
        }
        tokens.push(match segment {
            "+" => "*",
            "#" => ">",
            other => other,
        });
    }
    Ok(tokens.join("."))
}

/// Translate a NATS subject back to an MQTT topic
pub fn from_nats_subject(subject: &str) -> String {
    subject.replace('.', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("safenest/motion/state", "safenest/motion/state"));
        assert!(!topic_matches("safenest/motion/state", "safenest/motion"));
        assert!(!topic_matches("safenest/motion", "safenest/motion/state"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("safenest/#", "safenest/light1/set"));
        assert!(topic_matches("safenest/#", "safenest"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("safenest/alerts/#", "safenest/alerts/critical"));
        assert!(!topic_matches("safenest/alerts/#", "safenest/alertsx/critical"));
        assert!(!topic_matches("safenest/#", "other/light1"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("safenest/+/state", "safenest/light1/state"));
        assert!(!topic_matches("safenest/+/state", "safenest/light1/set"));
        assert!(!topic_matches("safenest/+", "safenest/light1/state"));
        assert!(topic_matches("+/+/+", "a/b/c"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(validate_pattern("safenest/#/state").is_err());
        assert!(validate_pattern("safenest/li#").is_err());
        assert!(validate_pattern("safenest/light+").is_err());
        assert!(validate_pattern("").is_err());
        assert!(validate_pattern("safenest/+/#").is_ok());
        assert!(!topic_matches("safenest/#/state", "safenest/x/state"));
    }

    #[test]
    fn test_nats_translation() {
        assert_eq!(
            to_nats_subject("safenest/alerts/critical").unwrap(),
            "safenest.alerts.critical"
        );
        assert_eq!(to_nats_subject("#").unwrap(), ">");
        assert_eq!(to_nats_subject("safenest/+/state").unwrap(), "safenest.*.state");
        assert_eq!(from_nats_subject("safenest.motion.state"), "safenest/motion/state");
    }

    #[test]
    fn test_dotted_topics_have_no_subject() {
        assert!(to_nats_subject("safenest/fw.v2/state").is_err());
        assert!(to_nats_subject("a.b/c").is_err());
        assert!(to_nats_subject("safenest//state").is_err());
        assert!(to_nats_subject("/safenest").is_err());
        assert!(to_nats_subject("safenest/light 1").is_err());

        // Every accepted topic comes back unchanged
        for topic in ["safenest/light1/state", "safenest/alerts/warn", "a_b/c"] {
            let subject = to_nats_subject(topic).unwrap();
            assert_eq!(from_nats_subject(&subject), topic);
        }
    }
}
