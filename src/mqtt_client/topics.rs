//! MQTT topic filter matching (`+` single level, `#` multi level)

/// Whether `topic` matches `filter`
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if filter.is_empty() || topic.is_empty() {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        assert!(topic_matches("cs/settings", "cs/settings"));
        assert!(!topic_matches("cs/settings", "cs/settings/x"));
        assert!(!topic_matches("cs/settings/x", "cs/settings"));
        assert!(!topic_matches("", "cs"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("cs/+/ping", "cs/orin-01/ping"));
        assert!(!topic_matches("cs/+/ping", "cs/orin-01/x/ping"));
        assert!(!topic_matches("cs/+", "cs"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("larch/#", "larch/detections/cam0"));
        assert!(topic_matches("larch/#", "larch"));
        assert!(!topic_matches("larch/#/x", "larch/a/x"));
    }
}
