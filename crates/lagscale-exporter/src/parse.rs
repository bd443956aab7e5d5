//! Exposition-text parsing for consumer-lag metrics.
//!
//! A lag line looks like:
//!
//! ```text
//! kafka_consumergroup_lag_sum{consumergroup="g1",topic="t1"} 300.0
//! ```
//!
//! Labels are split on `,` then on the first `=`, quotes trimmed. Unknown
//! labels are ignored; `consumergroup` and `topic` are the only labels
//! consumed. Lines that do not match the expected shape are silently
//! dropped; malformed-line tolerance, not an error.

/// Name of the per-(group, topic) lag counter the exporter publishes.
pub const LAG_METRIC: &str = "kafka_consumergroup_lag_sum";

const GROUP_LABEL: &str = "consumergroup";
const TOPIC_LABEL: &str = "topic";

/// One parsed lag observation. Ephemeral; never persisted per-sample.
#[derive(Debug, Clone, PartialEq)]
pub struct LagSample {
    pub group: String,
    pub topic: String,
    pub lag: f64,
}

/// Lazily extract lag samples from exposition text.
///
/// With `group = Some(name)`, only samples for that consumer group are
/// yielded; with `None` every group passes (discovery mode). Inputs with
/// zero matching lines yield an empty sequence; the parser never fails.
pub fn parse_lag_samples<'a>(
    text: &'a str,
    group: Option<&'a str>,
) -> impl Iterator<Item = LagSample> + 'a {
    text.lines().filter_map(move |line| {
        let sample = parse_line(line)?;
        match group {
            Some(wanted) if sample.group != wanted => None,
            _ => Some(sample),
        }
    })
}

/// Every distinct `consumergroup` label value in the text, first-seen order.
pub fn discover_groups(text: &str) -> Vec<String> {
    let mut groups: Vec<String> = Vec::new();
    let needle = format!("{GROUP_LABEL}=\"");
    for line in text.lines() {
        let mut rest = line;
        while let Some(at) = rest.find(&needle) {
            rest = &rest[at + needle.len()..];
            let Some(end) = rest.find('"') else { break };
            let name = &rest[..end];
            if !name.is_empty() && !groups.iter().any(|g| g == name) {
                groups.push(name.to_string());
            }
            rest = &rest[end..];
        }
    }
    groups
}

/// Parse a single candidate line; `None` for anything malformed.
fn parse_line(line: &str) -> Option<LagSample> {
    let rest = line.strip_prefix(LAG_METRIC)?;
    let rest = rest.strip_prefix('{')?;
    let (labels, value) = rest.split_once('}')?;
    let lag: f64 = value.trim().parse().ok()?;

    let mut group = None;
    let mut topic = None;
    for pair in labels.split(',') {
        let (key, val) = pair.split_once('=')?;
        let val = val.trim().trim_matches('"');
        match key.trim() {
            GROUP_LABEL => group = Some(val),
            TOPIC_LABEL => topic = Some(val),
            _ => {}
        }
    }

    Some(LagSample {
        group: group?.to_string(),
        topic: topic?.to_string(),
        lag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TEXT: &str = "\
# HELP kafka_consumergroup_lag_sum Current Approximate Lag of a ConsumerGroup at Topic for all partitions\n\
# TYPE kafka_consumergroup_lag_sum gauge\n\
kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t1\"} 300.0\n\
kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t2\"} 120\n\
kafka_consumergroup_lag_sum{consumergroup=\"g2\",topic=\"t1\"} 7.5\n\
kafka_consumergroup_lag_members_sum{consumergroup=\"g3\",topic=\"t1\"} 2\n\
malformed_line\n";

    #[test]
    fn filters_by_group() {
        let samples: Vec<_> = parse_lag_samples(SAMPLE_TEXT, Some("g1")).collect();
        assert_eq!(
            samples,
            vec![
                LagSample {
                    group: "g1".to_string(),
                    topic: "t1".to_string(),
                    lag: 300.0,
                },
                LagSample {
                    group: "g1".to_string(),
                    topic: "t2".to_string(),
                    lag: 120.0,
                },
            ]
        );
    }

    #[test]
    fn no_filter_yields_all_groups() {
        let samples: Vec<_> = parse_lag_samples(SAMPLE_TEXT, None).collect();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2].group, "g2");
    }

    #[test]
    fn unknown_group_yields_empty() {
        assert_eq!(parse_lag_samples(SAMPLE_TEXT, Some("absent")).count(), 0);
    }

    #[test]
    fn malformed_lines_are_dropped_not_errors() {
        let text = "\
kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t1\"} 300.0\n\
malformed_line\n\
kafka_consumergroup_lag_sum{consumergroup=\"g1\" topic} not-a-number\n\
kafka_consumergroup_lag_sum no-braces 12\n\
kafka_consumergroup_lag_sum{consumergroup=\"g1\"} 5\n";
        // The last line has no topic label, so it is dropped too.
        let samples: Vec<_> = parse_lag_samples(text, Some("g1")).collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].lag, 300.0);
    }

    #[test]
    fn longer_metric_names_do_not_match_by_prefix() {
        let text =
            "kafka_consumergroup_lag_sum_extra{consumergroup=\"g1\",topic=\"t1\"} 99\n";
        assert_eq!(parse_lag_samples(text, None).count(), 0);
    }

    #[test]
    fn unknown_labels_are_ignored() {
        let text = "kafka_consumergroup_lag_sum{instance=\"kafka:9308\",consumergroup=\"g1\",topic=\"t1\",job=\"exporter\"} 42\n";
        let samples: Vec<_> = parse_lag_samples(text, Some("g1")).collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].topic, "t1");
        assert_eq!(samples[0].lag, 42.0);
    }

    #[test]
    fn whitespace_around_labels_is_trimmed() {
        let text =
            "kafka_consumergroup_lag_sum{ consumergroup = \"g1\", topic = \"t1\" } 10\n";
        let samples: Vec<_> = parse_lag_samples(text, Some("g1")).collect();
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn empty_input_yields_empty() {
        assert_eq!(parse_lag_samples("", Some("g1")).count(), 0);
        assert_eq!(parse_lag_samples("", None).count(), 0);
    }

    #[test]
    fn parsing_is_idempotent() {
        let first: Vec<_> = parse_lag_samples(SAMPLE_TEXT, Some("g1")).collect();
        let second: Vec<_> = parse_lag_samples(SAMPLE_TEXT, Some("g1")).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn discover_groups_first_seen_order() {
        // Discovery scans every line mentioning the label, not just the
        // lag metric, and deduplicates.
        let groups = discover_groups(SAMPLE_TEXT);
        assert_eq!(
            groups,
            vec!["g1".to_string(), "g2".to_string(), "g3".to_string()]
        );
    }

    #[test]
    fn discover_groups_empty_text() {
        assert!(discover_groups("").is_empty());
        assert!(discover_groups("no labels here\n").is_empty());
    }
}
