//! Focused-time accounting.
//!
//! At most one tab accumulates time: the active tab of the focused window.
//! Every transition that ends its run yields an [`ActiveTimeFlush`]; the
//! engine adds the duration to that tab's most recent node.

use chrono::{DateTime, Utc};
use navgraph_protocol::{TabId, WindowId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTimeFlush {
    pub tab_id: TabId,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub struct ActiveTimeTracker {
    started: HashMap<TabId, DateTime<Utc>>,
    active_tab: Option<TabId>,
    active_tab_by_window: HashMap<WindowId, TabId>,
    window_focused: bool,
}

impl Default for ActiveTimeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveTimeTracker {
    /// The browser is assumed focused until told otherwise.
    pub fn new() -> Self {
        Self {
            started: HashMap::new(),
            active_tab: None,
            active_tab_by_window: HashMap::new(),
            window_focused: true,
        }
    }

    pub fn note_active_in_window(&mut self, window_id: WindowId, tab_id: TabId) {
        self.active_tab_by_window.insert(window_id, tab_id);
    }

    pub fn activate(
        &mut self,
        tab_id: TabId,
        window_id: WindowId,
        now: DateTime<Utc>,
    ) -> Option<ActiveTimeFlush> {
        self.active_tab_by_window.insert(window_id, tab_id);

        let flushed = match self.active_tab {
            Some(previous) if previous != tab_id => self.flush(previous, now),
            _ => None,
        };

        self.active_tab = Some(tab_id);
        if self.window_focused {
            self.started.entry(tab_id).or_insert(now);
        }
        flushed
    }

    pub fn blur(&mut self, now: DateTime<Utc>) -> Option<ActiveTimeFlush> {
        self.window_focused = false;
        self.active_tab.and_then(|tab_id| self.flush(tab_id, now))
    }

    pub fn focus(&mut self, window_id: WindowId, now: DateTime<Utc>) -> Option<ActiveTimeFlush> {
        self.window_focused = true;
        let tab_id = *self.active_tab_by_window.get(&window_id)?;

        let flushed = match self.active_tab {
            Some(previous) if previous != tab_id => self.flush(previous, now),
            _ => None,
        };
        self.active_tab = Some(tab_id);
        self.started.entry(tab_id).or_insert(now);
        flushed
    }

    pub fn remove_tab(&mut self, tab_id: TabId, now: DateTime<Utc>) -> Option<ActiveTimeFlush> {
        let flushed = self.flush(tab_id, now);
        if self.active_tab == Some(tab_id) {
            self.active_tab = None;
        }
        self.active_tab_by_window.retain(|_, active| *active != tab_id);
        flushed
    }

    pub fn active_tab(&self) -> Option<TabId> {
        self.active_tab
    }

    pub fn is_timing(&self, tab_id: TabId) -> bool {
        self.started.contains_key(&tab_id)
    }

    fn flush(&mut self, tab_id: TabId, now: DateTime<Utc>) -> Option<ActiveTimeFlush> {
        let started = self.started.remove(&tab_id)?;
        let duration_ms = (now - started).num_milliseconds().max(0) as u64;
        Some(ActiveTimeFlush {
            tab_id,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn switching_tabs_flushes_previous() {
        let mut tracker = ActiveTimeTracker::new();
        assert_eq!(tracker.activate(1, 10, t(0)), None);
        let flushed = tracker.activate(2, 10, t(4)).expect("flush");
        assert_eq!(
            flushed,
            ActiveTimeFlush {
                tab_id: 1,
                duration_ms: 4000
            }
        );
        assert!(tracker.is_timing(2));
        assert!(!tracker.is_timing(1));
    }

    #[test]
    fn reactivating_same_tab_keeps_timer() {
        let mut tracker = ActiveTimeTracker::new();
        tracker.activate(1, 10, t(0));
        assert_eq!(tracker.activate(1, 10, t(3)), None);
        let flushed = tracker.remove_tab(1, t(5)).expect("flush");
        assert_eq!(flushed.duration_ms, 5000);
    }

    #[test]
    fn blur_flushes_and_focus_restarts_window_tab() {
        let mut tracker = ActiveTimeTracker::new();
        tracker.activate(1, 10, t(0));
        let flushed = tracker.blur(t(2)).expect("flush");
        assert_eq!(flushed.duration_ms, 2000);
        assert!(!tracker.is_timing(1));

        assert_eq!(tracker.focus(10, t(10)), None);
        assert!(tracker.is_timing(1));
        assert_eq!(tracker.remove_tab(1, t(11)).map(|f| f.duration_ms), Some(1000));
    }

    #[test]
    fn activation_while_blurred_does_not_start_timer() {
        let mut tracker = ActiveTimeTracker::new();
        tracker.blur(t(0));
        tracker.activate(3, 10, t(1));
        assert!(!tracker.is_timing(3));
        assert_eq!(tracker.active_tab(), Some(3));
    }

    #[test]
    fn focus_on_unknown_window_starts_nothing() {
        let mut tracker = ActiveTimeTracker::new();
        tracker.blur(t(0));
        assert_eq!(tracker.focus(99, t(1)), None);
        assert_eq!(tracker.active_tab(), None);
    }

    #[test]
    fn focusing_another_window_flushes_previous_tab() {
        let mut tracker = ActiveTimeTracker::new();
        tracker.note_active_in_window(20, 7);
        tracker.activate(1, 10, t(0));
        let flushed = tracker.focus(20, t(6)).expect("flush");
        assert_eq!(flushed.tab_id, 1);
        assert!(tracker.is_timing(7));
    }

    #[test]
    fn removing_inactive_tab_flushes_nothing() {
        let mut tracker = ActiveTimeTracker::new();
        tracker.activate(1, 10, t(0));
        assert_eq!(tracker.remove_tab(2, t(1)), None);
        assert_eq!(tracker.active_tab(), Some(1));
    }
}
