//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Topic layout and MQTT-style filter matching."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---

/// Escape the characters that would break topic structure inside one segment.
pub fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for ch in segment.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '#' => out.push_str("%23"),
            '+' => out.push_str("%2B"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape_segment`]. Unknown escapes are kept verbatim.
pub fn unescape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        let decoded = match tail.get(..3) {
            Some("%25") => Some('%'),
            Some("%2F") | Some("%2f") => Some('/'),
            Some("%23") => Some('#'),
            Some("%2B") | Some("%2b") => Some('+'),
            _ => None,
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &tail[3..];
            }
            None => {
                out.push('%');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// `{base}/device/{service}/{profile}/{device}/{source}` with escaped segments.
pub fn event_topic(base: &str, service: &str, profile: &str, device: &str, source: &str) -> String {
    format!(
        "{}/device/{}/{}/{}/{}",
        base.trim_end_matches('/'),
        escape_segment(service),
        escape_segment(profile),
        escape_segment(device),
        escape_segment(source)
    )
}

/// Filter matching every command request addressed to `service`.
pub fn command_request_filter(base: &str, service: &str) -> String {
    format!(
        "{}/device/command/request/{}/#",
        base.trim_end_matches('/'),
        escape_segment(service)
    )
}

/// Topic a command response for `request_id` is published to.
pub fn command_response_topic(base: &str, service: &str, request_id: &str) -> String {
    format!(
        "{}/response/{}/{}",
        base.trim_end_matches('/'),
        escape_segment(service),
        escape_segment(request_id)
    )
}

/// Decoded tail of a command request topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic {
    /// Target device, or `all` for command-all.
    pub device: String,
    /// Command or resource name.
    pub command: String,
    /// `get` or `set`.
    pub method: String,
}

/// Split `{base}/device/command/request/{service}/{device}/{command}/{method}`.
pub fn parse_command_topic(base: &str, service: &str, topic: &str) -> Option<CommandTopic> {
    let prefix = format!(
        "{}/device/command/request/{}/",
        base.trim_end_matches('/'),
        escape_segment(service)
    );
    let tail = topic.strip_prefix(&prefix)?;
    let mut parts = tail.split('/');
    let device = parts.next()?;
    let command = parts.next()?;
    let method = parts.next()?;
    if parts.next().is_some() || device.is_empty() || command.is_empty() {
        return None;
    }
    Some(CommandTopic {
        device: unescape_segment(device),
        command: unescape_segment(command),
        method: method.to_ascii_lowercase(),
    })
}

/// MQTT-style matching: `+` matches one level, a trailing `#` matches the rest
/// (including nothing).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_escaped_in_event_topics() {
        assert_eq!(
            event_topic("edgex/", "ds", "P/1", "dev#2", "a+b"),
            "edgex/device/ds/P%2F1/dev%232/a%2Bb"
        );
        assert_eq!(unescape_segment("P%2F1%25x%zz"), "P/1%x%zz");
    }

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("edgex/device/#", "edgex/device/ds/P/D/S"));
        assert!(topic_matches("edgex/device/#", "edgex/device"));
        assert!(topic_matches("edgex/+/ds/#", "edgex/device/ds/P"));
        assert!(!topic_matches("edgex/+/ds", "edgex/device/ds/P"));
        assert!(!topic_matches("edgex/device/#/x", "edgex/device/a/x"));
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/c"));
    }

    #[test]
    fn command_topics_parse() {
        let filter = command_request_filter("edgex", "ds");
        let topic = "edgex/device/command/request/ds/Thermo%2F1/Temperature/GET";
        assert!(topic_matches(&filter, topic));
        let parsed = parse_command_topic("edgex", "ds", topic).unwrap();
        assert_eq!(parsed.device, "Thermo/1");
        assert_eq!(parsed.command, "Temperature");
        assert_eq!(parsed.method, "get");
        assert!(parse_command_topic("edgex", "ds", "edgex/device/command/request/ds/x").is_none());
    }
}
