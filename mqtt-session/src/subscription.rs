//! Subscription table: filter → granted QoS, plus topic matching.
//!
//! A simplified, `HashMap`-backed restatement of the teacher's `FilterTree`
//! (a `Slab`-based trie over topic `Level`s): a client session holds at most
//! a few hundred filters, so a linear scan over them on each inbound Publish
//! is simpler and plenty fast, trading the trie's sublinear lookup for far
//! less code. The level-by-level matching rule (`+` one level, `#` trailing
//! only, `$`-prefixed topics excluded from a leading wildcard) is unchanged.

use std::collections::HashMap;

use mqtt_wire::QoS;

#[derive(Default)]
pub struct SubscriptionTable {
    filters: HashMap<String, QoS>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        SubscriptionTable::default()
    }

    pub fn insert(&mut self, filter: impl Into<String>, qos: QoS) {
        self.filters.insert(filter.into(), qos);
    }

    pub fn remove(&mut self, filter: &str) {
        self.filters.remove(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn filters(&self) -> impl Iterator<Item = (&str, QoS)> {
        self.filters.iter().map(|(f, q)| (f.as_str(), *q))
    }

    /// QoS of every held filter that matches `topic`, most specific match
    /// order unspecified (the caller typically wants the max).
    pub fn matching<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = QoS> + 'a {
        self.filters
            .iter()
            .filter(move |(filter, _)| topic_matches(filter, topic))
            .map(|(_, qos)| *qos)
    }
}

/// `true` if `topic` (never containing wildcards) is matched by `filter`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/').peekable();

    let filter_starts_with_wildcard = matches!(filter.split('/').next(), Some("+") | Some("#"));
    let topic_starts_with_dollar = topic_levels.peek().map_or(false, |l| l.starts_with('$'));
    if filter_starts_with_wildcard && topic_starts_with_dollar {
        return false;
    }

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some("+"), None) => return false,
            (Some(f), Some(t)) => {
                if f != t {
                    return false;
                }
            }
            (Some(_), None) => return false,
            (None, Some(_)) => return false,
            (None, None) => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(topic_matches("sport/tennis/player1", "sport/tennis/player1"));
        assert!(!topic_matches("sport/tennis/player1", "sport/tennis/player2"));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches("sport/+/player1", "sport/tennis/player1"));
        assert!(!topic_matches("sport/+/player1", "sport/tennis/open/player1"));
    }

    #[test]
    fn multi_level_wildcard_matches_trailing_levels() {
        assert!(topic_matches("sport/tennis/#", "sport/tennis"));
        assert!(topic_matches("sport/tennis/#", "sport/tennis/player1"));
        assert!(topic_matches("sport/tennis/#", "sport/tennis/player1/ranking"));
        assert!(topic_matches("#", "anything/at/all"));
    }

    #[test]
    fn leading_wildcard_excludes_dollar_topics() {
        assert!(!topic_matches("#", "$SYS/uptime"));
        assert!(!topic_matches("+/uptime", "$SYS/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/uptime"));
    }

    #[test]
    fn table_reports_granted_qos_for_matches() {
        let mut table = SubscriptionTable::new();
        table.insert("a/+", QoS::AtLeastOnce);
        table.insert("a/#", QoS::ExactlyOnce);

        let granted: Vec<QoS> = table.matching("a/b").collect();
        assert_eq!(granted.len(), 2);
        assert!(granted.contains(&QoS::AtLeastOnce));
        assert!(granted.contains(&QoS::ExactlyOnce));
    }
}
