//! Debounce for re-fired navigation callbacks.
//!
//! Browsers routinely deliver the same commit or history-state update more
//! than once. A `(tab, raw URL)` pair seen within the window is dropped; the
//! record itself lives until the eviction age and is removed by [`Dedup::evict`].

use chrono::{DateTime, Duration, Utc};
use navgraph_protocol::TabId;
use std::collections::HashMap;

#[derive(Debug)]
pub struct Dedup {
    window: Duration,
    eviction: Duration,
    seen: HashMap<(TabId, String), DateTime<Utc>>,
}

impl Dedup {
    pub fn new(window: Duration, eviction: Duration) -> Self {
        Self {
            window,
            eviction,
            seen: HashMap::new(),
        }
    }

    /// Returns false without touching the record when the pair was processed
    /// less than one window ago, or when `now` predates the last processing
    /// (a late re-fire). Otherwise records `now` and returns true, so the
    /// recorded time only moves forward.
    pub fn should_process(&mut self, tab_id: TabId, raw_url: &str, now: DateTime<Utc>) -> bool {
        let key = (tab_id, raw_url.to_string());
        if let Some(last) = self.seen.get(&key) {
            if now - *last < self.window {
                return false;
            }
        }
        self.seen.insert(key, now);
        true
    }

    pub fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        let eviction = self.eviction;
        self.seen.retain(|_, last| now - *last < eviction);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap()
    }

    fn dedup() -> Dedup {
        Dedup::new(Duration::seconds(1), Duration::seconds(5))
    }

    #[test]
    fn repeat_within_window_is_dropped() {
        let mut gate = dedup();
        assert!(gate.should_process(1, "https://a.example", t0()));
        assert!(!gate.should_process(
            1,
            "https://a.example",
            t0() + Duration::milliseconds(400)
        ));
        assert!(gate.should_process(1, "https://a.example", t0() + Duration::seconds(1)));
    }

    #[test]
    fn dropped_repeat_does_not_extend_window() {
        let mut gate = dedup();
        assert!(gate.should_process(1, "https://a.example", t0()));
        assert!(!gate.should_process(
            1,
            "https://a.example",
            t0() + Duration::milliseconds(900)
        ));
        assert!(gate.should_process(
            1,
            "https://a.example",
            t0() + Duration::milliseconds(1100)
        ));
    }

    #[test]
    fn out_of_order_repeat_is_dropped_and_keeps_latest_time() {
        let mut gate = dedup();
        assert!(gate.should_process(1, "https://a.example", t0() + Duration::seconds(3)));
        assert!(!gate.should_process(1, "https://a.example", t0()));
        // Measured from the later time, not the stale one.
        assert!(!gate.should_process(
            1,
            "https://a.example",
            t0() + Duration::milliseconds(3_500)
        ));
        assert!(gate.should_process(1, "https://a.example", t0() + Duration::seconds(4)));
    }

    #[test]
    fn keys_are_per_tab_and_raw_url() {
        let mut gate = dedup();
        assert!(gate.should_process(1, "https://a.example", t0()));
        assert!(gate.should_process(2, "https://a.example", t0()));
        assert!(gate.should_process(1, "https://a.example/?q", t0()));
    }

    #[test]
    fn evict_removes_old_records() {
        let mut gate = dedup();
        gate.should_process(1, "https://a.example", t0());
        gate.should_process(1, "https://b.example", t0() + Duration::seconds(3));
        assert_eq!(gate.evict(t0() + Duration::seconds(5)), 1);
        assert_eq!(gate.len(), 1);
    }
}
