//! Tab-keyed "last clicked source" pointer. One entry per tab, consumed on
//! first use, ignored once older than the TTL.

use chrono::{DateTime, Duration, Utc};
use navgraph_protocol::TabId;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickSource {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ClickSources {
    ttl: Duration,
    entries: HashMap<TabId, ClickSource>,
}

impl ClickSources {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Records `node_id` as the click source for `tab_id`, replacing any
    /// earlier entry.
    pub fn record(&mut self, tab_id: TabId, node_id: &str, timestamp: DateTime<Utc>) {
        self.entries.insert(
            tab_id,
            ClickSource {
                node_id: node_id.to_string(),
                timestamp,
            },
        );
    }

    /// Removes the entry for the tab and returns it if it had not expired.
    pub fn take(&mut self, tab_id: TabId, now: DateTime<Utc>) -> Option<ClickSource> {
        let entry = self.entries.remove(&tab_id)?;
        if now - entry.timestamp < self.ttl {
            Some(entry)
        } else {
            None
        }
    }

    pub fn forget(&mut self, tab_id: TabId) {
        self.entries.remove(&tab_id);
    }

    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.timestamp < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn take_consumes_the_entry() {
        let mut sources = ClickSources::new(Duration::seconds(30));
        sources.record(1, "node_a", t0());
        let hit = sources.take(1, t0() + Duration::seconds(1)).expect("hit");
        assert_eq!(hit.node_id, "node_a");
        assert!(sources.take(1, t0() + Duration::seconds(1)).is_none());
    }

    #[test]
    fn expired_entry_is_discarded_on_take() {
        let mut sources = ClickSources::new(Duration::seconds(30));
        sources.record(1, "node_a", t0());
        assert!(sources.take(1, t0() + Duration::seconds(30)).is_none());
        assert!(sources.is_empty());
    }

    #[test]
    fn newer_click_replaces_older() {
        let mut sources = ClickSources::new(Duration::seconds(30));
        sources.record(1, "node_a", t0());
        sources.record(1, "node_b", t0() + Duration::seconds(2));
        assert_eq!(sources.len(), 1);
        let hit = sources.take(1, t0() + Duration::seconds(3)).expect("hit");
        assert_eq!(hit.node_id, "node_b");
    }

    #[test]
    fn sweep_drops_stale_entries() {
        let mut sources = ClickSources::new(Duration::seconds(30));
        sources.record(1, "node_a", t0());
        sources.record(2, "node_b", t0() + Duration::seconds(20));
        assert_eq!(sources.sweep(t0() + Duration::seconds(31)), 1);
        assert_eq!(sources.len(), 1);
    }
}
