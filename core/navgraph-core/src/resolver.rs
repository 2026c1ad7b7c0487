//! Parent resolution for new visits.
//!
//! # Cascade
//!
//! Signals are tried strongest first and the first candidate that passes the
//! cycle guard wins:
//!
//! 1. **Click source**: the page the user clicked in this tab moments ago.
//!    Left for the main frame when the visit is a sub-frame.
//! 2. **Pending navigation**: a link/form observed anywhere whose target
//!    matches this URL. Skipped for root-eligible navigations.
//! 3. **Tab history**: the tab's current page, for same-tab and sub-frame
//!    navigations.
//! 4. **Exhaustive fallback**, `javascript` navigations only: tab history
//!    oldest entries, then this tab's nodes in the session, then any node in
//!    the session (roots first), then other sessions.
//! 5. Otherwise the visit is a root.
//!
//! A candidate is accepted only if it exists in storage, differs from the
//! new node, and linking to it would not close a loop.

use chrono::{DateTime, Utc};
use navgraph_protocol::TabId;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::classifier::Classification;
use crate::cycle_guard::would_create_cycle;
use crate::error::StorageError;
use crate::ids::normalize_url;
use crate::storage::Storage;
use crate::types::{NavigationType, OpenTarget, RecordFilter, VisitNode};

/// The short-lived signal tables the cascade consults. Implementations must
/// consume entries they hand out.
pub trait SignalTables {
    fn take_click_source(&self, tab_id: TabId, now: DateTime<Utc>) -> Option<String>;
    fn consume_pending(&self, normalized_url: &str, now: DateTime<Utc>) -> Option<String>;
    /// Node ids for the tab, newest first.
    fn tab_history(&self, tab_id: TabId) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentSource {
    ClickSource,
    PendingNavigation,
    TabHistory,
    FallbackTabHistory,
    FallbackTabSession,
    FallbackSession,
    FallbackOtherSessions,
    Root,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub parent_id: Option<String>,
    pub source: ParentSource,
}

impl Resolution {
    fn parent(parent_id: String, source: ParentSource) -> Self {
        Self {
            parent_id: Some(parent_id),
            source,
        }
    }

    fn root() -> Self {
        Self {
            parent_id: None,
            source: ParentSource::Root,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NewVisit<'a> {
    pub node_id: &'a str,
    pub tab_id: TabId,
    pub url: &'a str,
    pub classification: Classification,
    pub timestamp: DateTime<Utc>,
}

pub fn resolve_parent<S, T>(
    visit: &NewVisit<'_>,
    tables: &T,
    storage: &S,
    session_id: &str,
) -> Result<Resolution, StorageError>
where
    S: Storage + ?Sized,
    T: SignalTables + ?Sized,
{
    let normalized = normalize_url(visit.url);

    let open_target = visit.classification.open_target;
    let click_source = if open_target == OpenTarget::Frame {
        None
    } else {
        tables.take_click_source(visit.tab_id, visit.timestamp)
    };
    if let Some(candidate) = click_source {
        // The click explains this commit, so any pending entry for the same
        // target is spent as well.
        let _ = tables.consume_pending(&normalized, visit.timestamp);
        if accepts(storage, visit.node_id, &candidate)? {
            return Ok(Resolution::parent(candidate, ParentSource::ClickSource));
        }
    }

    if !visit.classification.root_eligible {
        if let Some(candidate) = tables.consume_pending(&normalized, visit.timestamp) {
            if accepts(storage, visit.node_id, &candidate)? {
                return Ok(Resolution::parent(
                    candidate,
                    ParentSource::PendingNavigation,
                ));
            }
        }
    }

    let history = tables.tab_history(visit.tab_id);
    if matches!(open_target, OpenTarget::SameTab | OpenTarget::Frame) {
        if let Some(candidate) = history.first() {
            if candidate != visit.node_id && accepts(storage, visit.node_id, candidate)? {
                return Ok(Resolution::parent(
                    candidate.clone(),
                    ParentSource::TabHistory,
                ));
            }
        }
    }

    if visit.classification.navigation_type == NavigationType::Javascript {
        if let Some(resolution) = exhaustive_fallback(visit, &history, storage, session_id)? {
            return Ok(resolution);
        }
        debug!(
            node_id = %visit.node_id,
            tab_id = visit.tab_id,
            "Exhaustive fallback found no parent; committing root"
        );
    }

    Ok(Resolution::root())
}

fn exhaustive_fallback<S>(
    visit: &NewVisit<'_>,
    history: &[String],
    storage: &S,
    session_id: &str,
) -> Result<Option<Resolution>, StorageError>
where
    S: Storage + ?Sized,
{
    let mut tried: HashSet<String> = HashSet::new();

    if let Some(id) = first_accepted(storage, visit.node_id, history.iter().cloned(), &mut tried)? {
        return Ok(Some(Resolution::parent(id, ParentSource::FallbackTabHistory)));
    }

    let tab_nodes = storage.query_records(&RecordFilter {
        session_id: Some(session_id.to_string()),
        tab_id: Some(visit.tab_id),
        ..RecordFilter::default()
    })?;
    if let Some(id) = first_accepted(storage, visit.node_id, ids(tab_nodes), &mut tried)? {
        return Ok(Some(Resolution::parent(id, ParentSource::FallbackTabSession)));
    }

    let mut session_nodes = storage.query_records(&RecordFilter {
        session_id: Some(session_id.to_string()),
        ..RecordFilter::default()
    })?;
    // Stable sort keeps newest-first order within roots and non-roots.
    session_nodes.sort_by_key(|node| !node.is_root());
    if let Some(id) = first_accepted(storage, visit.node_id, ids(session_nodes), &mut tried)? {
        return Ok(Some(Resolution::parent(id, ParentSource::FallbackSession)));
    }

    let other_nodes = storage.query_records(&RecordFilter {
        exclude_session_id: Some(session_id.to_string()),
        ..RecordFilter::default()
    })?;
    if let Some(id) = first_accepted(storage, visit.node_id, ids(other_nodes), &mut tried)? {
        return Ok(Some(Resolution::parent(
            id,
            ParentSource::FallbackOtherSessions,
        )));
    }

    Ok(None)
}

fn ids(records: Vec<VisitNode>) -> impl Iterator<Item = String> {
    records.into_iter().map(|record| record.id)
}

fn first_accepted<S, I>(
    storage: &S,
    node_id: &str,
    candidates: I,
    tried: &mut HashSet<String>,
) -> Result<Option<String>, StorageError>
where
    S: Storage + ?Sized,
    I: Iterator<Item = String>,
{
    for candidate in candidates {
        if candidate == node_id || !tried.insert(candidate.clone()) {
            continue;
        }
        if accepts(storage, node_id, &candidate)? {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Candidate must exist and must not already descend from the new node.
pub(crate) fn accepts<S>(storage: &S, node_id: &str, candidate: &str) -> Result<bool, StorageError>
where
    S: Storage + ?Sized,
{
    if storage.get_record(candidate)?.is_none() {
        debug!(node_id = %node_id, candidate = %candidate, "Parent candidate not in storage");
        return Ok(false);
    }
    let cycle = would_create_cycle(node_id, candidate, |id| {
        storage
            .get_record(id)
            .map(|record| record.and_then(|node| node.parent_id))
    })?;
    if cycle {
        debug!(node_id = %node_id, candidate = %candidate, "Cycle guard rejected parent");
    }
    Ok(!cycle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{classify, ClassifierInput};
    use crate::storage::MemoryStore;
    use crate::types::OpenTarget;
    use chrono::{Duration, TimeZone};
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeTables {
        clicks: RefCell<HashMap<TabId, String>>,
        pending: RefCell<HashMap<String, String>>,
        history: HashMap<TabId, Vec<String>>,
    }

    impl SignalTables for FakeTables {
        fn take_click_source(&self, tab_id: TabId, _now: DateTime<Utc>) -> Option<String> {
            self.clicks.borrow_mut().remove(&tab_id)
        }

        fn consume_pending(&self, normalized_url: &str, _now: DateTime<Utc>) -> Option<String> {
            self.pending.borrow_mut().remove(normalized_url)
        }

        fn tab_history(&self, tab_id: TabId) -> Vec<String> {
            self.history
                .get(&tab_id)
                .map(|stack| stack.iter().rev().cloned().collect())
                .unwrap_or_default()
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn node(id: &str, parent: Option<&str>, tab_id: TabId, session: &str, at: i64) -> VisitNode {
        VisitNode {
            id: id.to_string(),
            url: format!("https://a.example/{}", id),
            title: String::new(),
            favicon: None,
            tab_id,
            session_id: session.to_string(),
            parent_id: parent.map(str::to_string),
            navigation_type: NavigationType::LinkClick,
            open_target: OpenTarget::SameTab,
            frame_id: 0,
            parent_frame_id: -1,
            first_visit: t(at),
            last_visit: t(at),
            visit_count: 1,
            reload_count: 0,
            load_time: 0,
            active_time: 0,
            is_closed: false,
        }
    }

    fn classification(kind: &str, history_empty: bool, spa: bool) -> Classification {
        classify(ClassifierInput {
            transition_kind: Some(kind),
            transition_qualifiers: &[],
            frame_id: 0,
            tab_history_empty: history_empty,
            history_state_update: spa,
        })
    }

    fn visit<'a>(node_id: &'a str, url: &'a str, classification: Classification) -> NewVisit<'a> {
        NewVisit {
            node_id,
            tab_id: 1,
            url,
            classification,
            timestamp: t(60),
        }
    }

    fn store_with(nodes: &[VisitNode]) -> MemoryStore {
        let store = MemoryStore::with_session("s1", t(0));
        for record in nodes {
            store.save_record(record.clone()).expect("save");
        }
        store
    }

    #[test]
    fn click_source_wins_and_spends_pending() {
        let store = store_with(&[node("a", None, 1, "s1", 0), node("p", None, 2, "s1", 1)]);
        let tables = FakeTables::default();
        tables.clicks.borrow_mut().insert(1, "a".to_string());
        tables
            .pending
            .borrow_mut()
            .insert("https://b.example/x".to_string(), "p".to_string());

        let new = visit("new", "https://b.example/x?ref=1", classification("link", false, false));
        let resolution = resolve_parent(&new, &tables, &store, "s1").expect("resolve");
        assert_eq!(resolution, Resolution::parent("a".to_string(), ParentSource::ClickSource));
        assert!(tables.pending.borrow().is_empty());
    }

    #[test]
    fn pending_skipped_for_root_eligible_navigation() {
        let store = store_with(&[node("p", None, 2, "s1", 1)]);
        let tables = FakeTables::default();
        tables
            .pending
            .borrow_mut()
            .insert("https://b.example".to_string(), "p".to_string());

        let new = visit("new", "https://b.example", classification("typed", true, false));
        let resolution = resolve_parent(&new, &tables, &store, "s1").expect("resolve");
        assert_eq!(resolution.source, ParentSource::Root);
        assert_eq!(tables.pending.borrow().len(), 1);
    }

    #[test]
    fn pending_used_for_new_tab_link() {
        let store = store_with(&[node("p", None, 2, "s1", 1)]);
        let tables = FakeTables::default();
        tables
            .pending
            .borrow_mut()
            .insert("https://b.example".to_string(), "p".to_string());

        let new = visit("new", "https://b.example/", classification("link", true, false));
        let resolution = resolve_parent(&new, &tables, &store, "s1").expect("resolve");
        assert_eq!(
            resolution,
            Resolution::parent("p".to_string(), ParentSource::PendingNavigation)
        );
    }

    #[test]
    fn same_tab_history_is_third_tier() {
        let store = store_with(&[node("a", None, 1, "s1", 0), node("b", Some("a"), 1, "s1", 5)]);
        let mut tables = FakeTables::default();
        tables
            .history
            .insert(1, vec!["a".to_string(), "b".to_string()]);

        let new = visit("new", "https://a.example/c", classification("link", false, false));
        let resolution = resolve_parent(&new, &tables, &store, "s1").expect("resolve");
        assert_eq!(resolution, Resolution::parent("b".to_string(), ParentSource::TabHistory));
    }

    #[test]
    fn sub_frame_attaches_to_tab_page_and_leaves_click_source() {
        let store = store_with(&[node("a", None, 1, "s1", 0), node("b", Some("a"), 1, "s1", 5)]);
        let mut tables = FakeTables::default();
        tables.clicks.borrow_mut().insert(1, "a".to_string());
        tables
            .history
            .insert(1, vec!["a".to_string(), "b".to_string()]);

        let frame = classify(ClassifierInput {
            transition_kind: Some("auto_subframe"),
            transition_qualifiers: &[],
            frame_id: 7,
            tab_history_empty: false,
            history_state_update: false,
        });
        assert_eq!(frame.open_target, OpenTarget::Frame);
        let new = visit("frame", "https://ads.example/slot", frame);
        let resolution = resolve_parent(&new, &tables, &store, "s1").expect("resolve");
        assert_eq!(resolution, Resolution::parent("b".to_string(), ParentSource::TabHistory));
        assert_eq!(tables.clicks.borrow().get(&1), Some(&"a".to_string()));
    }

    #[test]
    fn missing_candidate_falls_through() {
        let store = store_with(&[node("a", None, 1, "s1", 0)]);
        let mut tables = FakeTables::default();
        tables.clicks.borrow_mut().insert(1, "ghost".to_string());
        tables.history.insert(1, vec!["a".to_string()]);

        let new = visit("new", "https://a.example/c", classification("link", false, false));
        let resolution = resolve_parent(&new, &tables, &store, "s1").expect("resolve");
        assert_eq!(resolution, Resolution::parent("a".to_string(), ParentSource::TabHistory));
    }

    #[test]
    fn cycle_rejection_moves_to_next_tier_then_root() {
        // "new" already exists as the parent of "child"; linking new -> child loops.
        let store = store_with(&[
            node("new", None, 1, "s1", 0),
            node("child", Some("new"), 1, "s1", 5),
        ]);
        let mut tables = FakeTables::default();
        tables.clicks.borrow_mut().insert(1, "child".to_string());
        tables.history.insert(1, vec!["child".to_string()]);

        let new = visit("new", "https://a.example/new", classification("link", false, false));
        let resolution = resolve_parent(&new, &tables, &store, "s1").expect("resolve");
        assert_eq!(resolution.source, ParentSource::Root);
    }

    #[test]
    fn javascript_walks_older_tab_history() {
        let store = store_with(&[
            node("new", None, 1, "s1", 0),
            node("older", None, 1, "s1", 1),
            node("child", Some("new"), 1, "s1", 5),
        ]);
        let mut tables = FakeTables::default();
        tables
            .history
            .insert(1, vec!["older".to_string(), "child".to_string()]);

        let new = visit("new", "https://a.example/new", classification("link", false, true));
        let resolution = resolve_parent(&new, &tables, &store, "s1").expect("resolve");
        assert_eq!(
            resolution,
            Resolution::parent("older".to_string(), ParentSource::FallbackTabHistory)
        );
    }

    #[test]
    fn javascript_falls_back_to_session_then_other_sessions() {
        let store = store_with(&[
            node("other-tab-child", Some("other-tab-root"), 2, "s1", 9),
            node("other-tab-root", None, 2, "s1", 3),
        ]);
        let tables = FakeTables::default();
        let new = visit("new", "https://a.example/new", classification("link", true, true));
        let resolution = resolve_parent(&new, &tables, &store, "s1").expect("resolve");
        assert_eq!(
            resolution,
            Resolution::parent("other-tab-root".to_string(), ParentSource::FallbackSession)
        );

        let archived = MemoryStore::with_session("s0", t(0));
        archived
            .save_record(node("old", None, 4, "s0", 0))
            .expect("save");
        archived.start_session("s1", t(50));
        let resolution = resolve_parent(&new, &tables, &archived, "s1").expect("resolve");
        assert_eq!(
            resolution,
            Resolution::parent("old".to_string(), ParentSource::FallbackOtherSessions)
        );
    }

    #[test]
    fn javascript_prefers_this_tab_in_session() {
        let store = store_with(&[
            node("mine", None, 1, "s1", 2),
            node("theirs", None, 2, "s1", 8),
        ]);
        let tables = FakeTables::default();
        let new = visit("new", "https://a.example/new", classification("link", true, true));
        let resolution = resolve_parent(&new, &tables, &store, "s1").expect("resolve");
        assert_eq!(
            resolution,
            Resolution::parent("mine".to_string(), ParentSource::FallbackTabSession)
        );
    }

    #[test]
    fn javascript_with_empty_graph_is_root() {
        let store = store_with(&[]);
        let tables = FakeTables::default();
        let new = visit("new", "https://a.example/new", classification("link", true, true));
        let resolution = resolve_parent(&new, &tables, &store, "s1").expect("resolve");
        assert_eq!(resolution.source, ParentSource::Root);
    }
}
