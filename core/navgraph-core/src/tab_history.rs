//! Per-tab ordered stack of visited node ids, most recent last.

use navgraph_protocol::TabId;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct TabHistory {
    tabs: HashMap<TabId, Vec<String>>,
}

impl TabHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty entry for a new tab. Existing history is kept.
    pub fn ensure(&mut self, tab_id: TabId) {
        self.tabs.entry(tab_id).or_default();
    }

    /// Pushes `node_id` unless it is already the top of the stack.
    /// Returns whether the history changed.
    pub fn append(&mut self, tab_id: TabId, node_id: &str) -> bool {
        let stack = self.tabs.entry(tab_id).or_default();
        if stack.last().map(|top| top == node_id).unwrap_or(false) {
            return false;
        }
        stack.push(node_id.to_string());
        true
    }

    pub fn most_recent(&self, tab_id: TabId) -> Option<&str> {
        self.tabs
            .get(&tab_id)
            .and_then(|stack| stack.last())
            .map(String::as_str)
    }

    /// Node ids for the tab, newest first.
    pub fn entries(&self, tab_id: TabId) -> Vec<String> {
        self.tabs
            .get(&tab_id)
            .map(|stack| stack.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, tab_id: TabId) -> usize {
        self.tabs.get(&tab_id).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, tab_id: TabId) -> bool {
        self.len(tab_id) == 0
    }

    pub fn clear(&mut self, tab_id: TabId) -> bool {
        self.tabs.remove(&tab_id).is_some()
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_is_idempotent_for_the_top() {
        let mut history = TabHistory::new();
        assert!(history.append(1, "node_a"));
        assert!(!history.append(1, "node_a"));
        assert_eq!(history.len(1), 1);

        assert!(history.append(1, "node_b"));
        assert!(history.append(1, "node_a"));
        assert_eq!(history.len(1), 3);
        assert_eq!(history.most_recent(1), Some("node_a"));
    }

    #[test]
    fn entries_are_newest_first() {
        let mut history = TabHistory::new();
        history.append(2, "node_a");
        history.append(2, "node_b");
        history.append(2, "node_c");
        assert_eq!(history.entries(2), vec!["node_c", "node_b", "node_a"]);
        assert!(history.entries(3).is_empty());
    }

    #[test]
    fn clear_forgets_the_tab() {
        let mut history = TabHistory::new();
        history.ensure(5);
        assert!(history.is_empty(5));
        history.append(5, "node_a");
        assert!(history.clear(5));
        assert_eq!(history.most_recent(5), None);
        assert_eq!(history.tab_count(), 0);
        assert!(!history.clear(5));
    }

    #[test]
    fn ensure_keeps_existing_history() {
        let mut history = TabHistory::new();
        history.append(1, "node_a");
        history.ensure(1);
        assert_eq!(history.most_recent(1), Some("node_a"));
    }
}
