//! Pending-navigation table.
//!
//! Content-side observers report link clicks and form submissions before the
//! browser commits the resulting navigation. Each report is parked here under
//! the normalized target URL until a commit consumes it or its TTL runs out.
//! The table never expires entries on its own; a host timer calls
//! [`PendingNavigations::sweep`].

use chrono::{DateTime, Duration, Utc};
use navgraph_protocol::TabId;
use serde::Serialize;
use std::collections::HashMap;

use crate::ids::normalize_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
    Link,
    Form,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingNavigation {
    pub kind: PendingKind,
    pub source_node_id: String,
    pub target_url: String,
    pub timestamp: DateTime<Utc>,
    pub source_tab_id: TabId,
    pub expire_at: DateTime<Utc>,
}

impl PendingNavigation {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expire_at
    }
}

#[derive(Debug)]
pub struct PendingNavigations {
    ttl: Duration,
    buckets: HashMap<String, Vec<PendingNavigation>>,
}

impl PendingNavigations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            buckets: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        kind: PendingKind,
        source_node_id: &str,
        target_url: &str,
        tab_id: TabId,
        timestamp: DateTime<Utc>,
    ) {
        let entry = PendingNavigation {
            kind,
            source_node_id: source_node_id.to_string(),
            target_url: target_url.to_string(),
            timestamp,
            source_tab_id: tab_id,
            expire_at: timestamp + self.ttl,
        };
        self.buckets
            .entry(normalize_url(target_url))
            .or_default()
            .push(entry);
    }

    /// Removes the bucket for `normalized_url` and returns its most recent
    /// entry that is still live at `now`.
    pub fn consume(
        &mut self,
        normalized_url: &str,
        now: DateTime<Utc>,
    ) -> Option<PendingNavigation> {
        let bucket = self.buckets.remove(normalized_url)?;
        bucket
            .into_iter()
            .filter(|entry| entry.is_live(now))
            .max_by_key(|entry| entry.timestamp)
    }

    /// Drops expired entries and empty buckets. Returns how many entries went.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|entry| entry.is_live(now));
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
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
    fn consume_returns_most_recent_and_drops_bucket() {
        let mut table = PendingNavigations::new(Duration::seconds(10));
        table.register(PendingKind::Link, "node_a", "https://b.example/x?q=1", 1, t0());
        table.register(
            PendingKind::Form,
            "node_c",
            "https://b.example/x/",
            2,
            t0() + Duration::seconds(2),
        );
        assert_eq!(table.len(), 2);

        let hit = table
            .consume("https://b.example/x", t0() + Duration::seconds(3))
            .expect("pending hit");
        assert_eq!(hit.source_node_id, "node_c");
        assert_eq!(hit.kind, PendingKind::Form);
        assert!(table.is_empty());
        assert!(table
            .consume("https://b.example/x", t0() + Duration::seconds(3))
            .is_none());
    }

    #[test]
    fn expired_entries_are_ineligible() {
        let mut table = PendingNavigations::new(Duration::seconds(10));
        table.register(PendingKind::Link, "node_a", "https://b.example", 1, t0());
        assert!(table
            .consume("https://b.example", t0() + Duration::seconds(10))
            .is_none());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let mut table = PendingNavigations::new(Duration::seconds(10));
        table.register(PendingKind::Link, "node_a", "https://b.example/1", 1, t0());
        table.register(
            PendingKind::Link,
            "node_a",
            "https://b.example/2",
            1,
            t0() + Duration::seconds(8),
        );

        assert_eq!(table.sweep(t0() + Duration::seconds(12)), 1);
        assert_eq!(table.len(), 1);
        assert!(table
            .consume("https://b.example/2", t0() + Duration::seconds(12))
            .is_some());
    }
}
