//! The navigation graph engine.
//!
//! One [`NavGraphEngine`] turns a stream of [`NavEvent`]s into visit records
//! and edges in its storage collaborator. Each event runs through:
//!
//! ```text
//! Received → ingestion filter → dedup gate → classify
//!          → existing node?  yes → metadata update (Updated)
//!                            no  → parent resolution → cycle check
//!                                  → Committed | RootCommitted
//! ```
//!
//! # Locking
//!
//! Every in-memory table has its own mutex so the sweeper can expire entries
//! while the worker is mid-event. Guards are always dropped before a storage
//! call; state is re-read from storage right before it is mutated.

use chrono::{DateTime, Utc};
use navgraph_protocol::{NavEvent, NavigationDetails, PageSignal, TabChanges, TabId, TabInfo};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::active_time::{ActiveTimeFlush, ActiveTimeTracker};
use crate::classifier::{classify, ClassifierInput};
use crate::click_source::ClickSources;
use crate::config::EngineConfig;
use crate::dedup::Dedup;
use crate::error::StorageError;
use crate::ids::{edge_id, is_trackable_url, node_id, normalize_url};
use crate::pending::{PendingKind, PendingNavigations};
use crate::resolver::{resolve_parent, NewVisit, ParentSource, SignalTables};
use crate::source::EventSource;
use crate::storage::Storage;
use crate::tab_history::TabHistory;
use crate::types::{NavEdge, NavigationType, RecordFilter, RecordPatch, SessionDetails, VisitNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Rejected by protocol validation.
    Invalid,
    /// Empty URL or an excluded scheme.
    Untrackable,
    /// Same (tab, URL) processed within the dedup window.
    Duplicate,
    /// The record an enrichment event refers to does not exist.
    MissingRecord,
    /// Sub-frame completion; only main-frame loads are timed.
    Subframe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Dropped {
        reason: DropReason,
    },
    /// A repeat visit mutated an existing node; no edge.
    Updated {
        node_id: String,
    },
    Committed {
        node_id: String,
        parent_id: String,
        source: ParentSource,
        edge_id: String,
        sequence: u64,
    },
    RootCommitted {
        node_id: String,
    },
    /// A non-navigation event changed engine or record state.
    Applied,
    /// Storage failed; the event was abandoned.
    Failed {
        error: String,
    },
}

impl EventOutcome {
    fn dropped(reason: DropReason) -> Self {
        EventOutcome::Dropped { reason }
    }
}

/// Counts of entries removed by one [`NavGraphEngine::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub pending: usize,
    pub click_sources: usize,
    pub dedup: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.pending + self.click_sources + self.dedup
    }
}

pub struct NavGraphEngine<S: Storage> {
    storage: S,
    config: EngineConfig,
    tab_history: Mutex<TabHistory>,
    pending: Mutex<PendingNavigations>,
    click_sources: Mutex<ClickSources>,
    dedup: Mutex<Dedup>,
    active_time: Mutex<ActiveTimeTracker>,
    sequence: AtomicU64,
}

/// Recovers the guard from a poisoned lock. The tables hold plain data, so a
/// panic elsewhere cannot leave them half-updated in a way later events can
/// not tolerate.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<S: Storage> NavGraphEngine<S> {
    pub fn new(storage: S, config: EngineConfig) -> Self {
        Self {
            tab_history: Mutex::new(TabHistory::new()),
            pending: Mutex::new(PendingNavigations::new(config.pending_ttl())),
            click_sources: Mutex::new(ClickSources::new(config.click_source_ttl())),
            dedup: Mutex::new(Dedup::new(
                config.dedup_window(),
                config.dedup_eviction(),
            )),
            active_time: Mutex::new(ActiveTimeTracker::new()),
            sequence: AtomicU64::new(0),
            storage,
            config,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Node ids recorded for the tab, newest first.
    pub fn tab_history(&self, tab_id: TabId) -> Vec<String> {
        lock(&self.tab_history).entries(tab_id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn click_source_count(&self) -> usize {
        lock(&self.click_sources).len()
    }

    /// Drains `source` until it reports end of stream. Returns the number of
    /// events handled.
    pub fn run<E: EventSource + ?Sized>(&self, source: &mut E) -> usize {
        let mut handled = 0;
        while let Some(event) = source.next_event() {
            self.handle_event(&event);
            handled += 1;
        }
        debug!(handled, "Event source exhausted");
        handled
    }

    /// Processes one event. Never fails: storage errors are logged and
    /// reported as [`EventOutcome::Failed`].
    pub fn handle_event(&self, event: &NavEvent) -> EventOutcome {
        if let Err(err) = event.validate() {
            debug!(kind = event.kind(), code = %err.code, message = %err.message, "Dropping invalid event");
            return EventOutcome::dropped(DropReason::Invalid);
        }

        match self.dispatch(event) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(kind = event.kind(), error = %err, "Storage failure; event abandoned");
                EventOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    /// Expires pending navigations, click sources and dedup records as of
    /// `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let report = SweepReport {
            pending: lock(&self.pending).sweep(now),
            click_sources: lock(&self.click_sources).sweep(now),
            dedup: lock(&self.dedup).evict(now),
        };
        if report.total() > 0 {
            debug!(
                pending = report.pending,
                click_sources = report.click_sources,
                dedup = report.dedup,
                "Swept expired entries"
            );
        }
        report
    }

    /// Rebuilds tab histories from `session_id`'s open records, oldest visit
    /// first. A host that starts a fresh session on launch passes the one
    /// that was current before it. Returns the number of tabs restored.
    pub fn reconcile_tab_history(&self, session_id: &str) -> Result<usize, StorageError> {
        let mut records = self.storage.query_records(&RecordFilter {
            session_id: Some(session_id.to_string()),
            only_open: true,
            ..RecordFilter::default()
        })?;
        records.reverse();

        let mut history = lock(&self.tab_history);
        for record in records.iter().filter(|record| record.frame_id == 0) {
            history.append(record.tab_id, &record.id);
        }
        let tabs = history.tab_count();
        info!(
            session_id = %session_id,
            records = records.len(),
            tabs,
            "Reconciled tab history"
        );
        Ok(tabs)
    }

    pub fn session_details(&self, session_id: Option<&str>) -> Result<SessionDetails, StorageError> {
        match session_id {
            Some(id) => self.storage.session_details(id),
            None => {
                let session = self.storage.current_session()?;
                self.storage.session_details(&session.id)
            }
        }
    }

    fn dispatch(&self, event: &NavEvent) -> Result<EventOutcome, StorageError> {
        match event {
            NavEvent::TabCreated { tab, timestamp } => Ok(self.on_tab_created(tab, *timestamp)),
            NavEvent::TabUpdated {
                tab_id, changes, ..
            } => self.on_tab_updated(*tab_id, changes),
            NavEvent::TabRemoved { tab_id, timestamp } => self.on_tab_removed(*tab_id, *timestamp),
            NavEvent::TabActivated {
                tab_id,
                window_id,
                timestamp,
            } => {
                let flushed = lock(&self.active_time).activate(*tab_id, *window_id, *timestamp);
                self.apply_flush(flushed)?;
                Ok(EventOutcome::Applied)
            }
            NavEvent::WindowFocusChanged {
                window_id,
                timestamp,
            } => {
                let flushed = {
                    let mut tracker = lock(&self.active_time);
                    match window_id {
                        Some(window_id) => tracker.focus(*window_id, *timestamp),
                        None => tracker.blur(*timestamp),
                    }
                };
                self.apply_flush(flushed)?;
                Ok(EventOutcome::Applied)
            }
            NavEvent::NavigationCommitted(details) => self.on_commit(details, false),
            NavEvent::HistoryStateUpdated(details) => self.on_commit(details, true),
            NavEvent::NavigationCompleted(details) => self.on_completed(details),
            NavEvent::LinkClicked(signal) => Ok(self.on_page_signal(PendingKind::Link, signal)),
            NavEvent::FormSubmitted(signal) => Ok(self.on_page_signal(PendingKind::Form, signal)),
            NavEvent::PageLoaded {
                tab_id,
                url,
                load_time_ms,
                ..
            } => self.patch_record(
                &node_id(*tab_id, url),
                RecordPatch {
                    load_time: Some(*load_time_ms),
                    ..RecordPatch::default()
                },
            ),
            NavEvent::TitleUpdated { node_id, title } => self.patch_record(
                node_id,
                RecordPatch {
                    title: Some(title.clone()),
                    ..RecordPatch::default()
                },
            ),
            NavEvent::FaviconUpdated { node_id, favicon } => self.patch_record(
                node_id,
                RecordPatch {
                    favicon: Some(favicon.clone()),
                    ..RecordPatch::default()
                },
            ),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Navigation commits
    // ─────────────────────────────────────────────────────────────────────

    fn on_commit(
        &self,
        details: &NavigationDetails,
        history_state_update: bool,
    ) -> Result<EventOutcome, StorageError> {
        let tab_id = details.tab_id;
        let timestamp = details.timestamp;

        if !is_trackable_url(&details.url, &self.config.excluded_schemes) {
            debug!(tab_id, url = %details.url, "Ignoring untrackable URL");
            return Ok(EventOutcome::dropped(DropReason::Untrackable));
        }
        if !lock(&self.dedup).should_process(tab_id, &details.url, timestamp) {
            debug!(tab_id, url = %details.url, "Suppressing duplicate navigation");
            return Ok(EventOutcome::dropped(DropReason::Duplicate));
        }

        let tab_history_empty = lock(&self.tab_history).is_empty(tab_id);
        let classification = classify(ClassifierInput {
            transition_kind: details.transition_kind.as_deref(),
            transition_qualifiers: &details.transition_qualifiers,
            frame_id: details.frame_id,
            tab_history_empty,
            history_state_update,
        });
        let id = node_id(tab_id, &details.url);

        if let Some(existing) = self.storage.get_record(&id)? {
            return self.revisit(&existing, details, classification.navigation_type);
        }

        let session = self.storage.current_session()?;
        let tables = LiveTables {
            tab_history: &self.tab_history,
            pending: &self.pending,
            click_sources: &self.click_sources,
        };
        let visit = NewVisit {
            node_id: &id,
            tab_id,
            url: &details.url,
            classification,
            timestamp,
        };
        let resolution = resolve_parent(&visit, &tables, &self.storage, &session.id)?;

        let record = VisitNode {
            id: id.clone(),
            url: details.url.clone(),
            title: String::new(),
            favicon: None,
            tab_id,
            session_id: session.id.clone(),
            parent_id: resolution.parent_id.clone(),
            navigation_type: classification.navigation_type,
            open_target: classification.open_target,
            frame_id: details.frame_id,
            parent_frame_id: details.parent_frame_id,
            first_visit: timestamp,
            last_visit: timestamp,
            visit_count: 1,
            reload_count: 0,
            load_time: 0,
            active_time: 0,
            is_closed: false,
        };
        self.storage.save_record(record)?;

        let outcome = match resolution.parent_id {
            Some(parent_id) => {
                let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                let edge = NavEdge {
                    id: edge_id(&parent_id, &id, timestamp),
                    source_id: parent_id.clone(),
                    target_id: id.clone(),
                    timestamp,
                    action: classification.navigation_type,
                    sequence,
                    session_id: session.id.clone(),
                };
                self.storage.save_edge(&edge)?;
                info!(
                    tab_id,
                    node_id = %id,
                    parent_id = %parent_id,
                    source = ?resolution.source,
                    action = classification.navigation_type.as_str(),
                    sequence,
                    "Committed visit"
                );
                EventOutcome::Committed {
                    node_id: id.clone(),
                    parent_id,
                    source: resolution.source,
                    edge_id: edge.id,
                    sequence,
                }
            }
            None => {
                self.storage.add_root_to_session(&session.id, &id)?;
                info!(
                    tab_id,
                    node_id = %id,
                    action = classification.navigation_type.as_str(),
                    "Committed root visit"
                );
                EventOutcome::RootCommitted { node_id: id.clone() }
            }
        };

        // Sub-frame visits are recorded but never become the tab's current
        // page.
        if details.is_main_frame() {
            lock(&self.tab_history).append(tab_id, &id);
        }
        Ok(outcome)
    }

    /// Repeat commit of a known (tab, URL) pair. Signals that pointed at
    /// this navigation are spent so they cannot explain a later one. A record
    /// left over from an earlier session moves into the current one.
    fn revisit(
        &self,
        existing: &VisitNode,
        details: &NavigationDetails,
        navigation_type: NavigationType,
    ) -> Result<EventOutcome, StorageError> {
        let tab_id = details.tab_id;
        let timestamp = details.timestamp;
        let main_frame = details.is_main_frame();
        let reload = navigation_type == NavigationType::Reload;

        if main_frame {
            let spent_click = lock(&self.click_sources).take(tab_id, timestamp).is_some();
            let spent_pending = lock(&self.pending)
                .consume(&normalize_url(&details.url), timestamp)
                .is_some();
            if spent_click || spent_pending {
                debug!(tab_id, node_id = %existing.id, spent_click, spent_pending, "Revisit consumed signals");
            }
        }

        let session = self.storage.current_session()?;
        let adopted = existing.session_id != session.id;
        let patch = RecordPatch {
            last_visit: Some(timestamp),
            add_visits: 1,
            add_reloads: u32::from(reload),
            is_closed: Some(false),
            session_id: adopted.then(|| session.id.clone()),
            ..RecordPatch::default()
        };
        let Some(updated) = self.storage.update_record(&existing.id, &patch)? else {
            // Deleted between the lookup and the update.
            warn!(node_id = %existing.id, "Record vanished before revisit update");
            return Ok(EventOutcome::dropped(DropReason::MissingRecord));
        };
        if adopted {
            if updated.is_root() {
                self.storage.add_root_to_session(&session.id, &updated.id)?;
            }
            info!(
                tab_id,
                node_id = %updated.id,
                from_session = %existing.session_id,
                session_id = %session.id,
                "Adopted visit from earlier session"
            );
        }

        if main_frame {
            lock(&self.tab_history).append(tab_id, &updated.id);
        }
        debug!(tab_id, node_id = %updated.id, reload, "Updated existing visit");
        Ok(EventOutcome::Updated { node_id: updated.id })
    }

    fn on_completed(&self, details: &NavigationDetails) -> Result<EventOutcome, StorageError> {
        if !details.is_main_frame() {
            return Ok(EventOutcome::dropped(DropReason::Subframe));
        }
        if !is_trackable_url(&details.url, &self.config.excluded_schemes) {
            return Ok(EventOutcome::dropped(DropReason::Untrackable));
        }
        let id = node_id(details.tab_id, &details.url);
        let Some(record) = self.storage.get_record(&id)? else {
            warn!(tab_id = details.tab_id, node_id = %id, "Completion for unknown record");
            return Ok(EventOutcome::dropped(DropReason::MissingRecord));
        };
        let load_time = (details.timestamp - record.last_visit)
            .num_milliseconds()
            .max(0) as u64;
        self.patch_record(
            &id,
            RecordPatch {
                load_time: Some(load_time),
                ..RecordPatch::default()
            },
        )
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tab lifecycle
    // ─────────────────────────────────────────────────────────────────────

    fn on_tab_created(&self, tab: &TabInfo, timestamp: DateTime<Utc>) -> EventOutcome {
        let opener_node = {
            let mut history = lock(&self.tab_history);
            history.ensure(tab.tab_id);
            tab.opener_tab_id
                .and_then(|opener| history.most_recent(opener).map(str::to_string))
        };

        if tab.active {
            if let Some(window_id) = tab.window_id {
                lock(&self.active_time).note_active_in_window(window_id, tab.tab_id);
            }
        }

        if let Some(opener_node) = opener_node {
            debug!(tab_id = tab.tab_id, source = %opener_node, "Seeding click source from opener");
            lock(&self.click_sources).record(tab.tab_id, &opener_node, timestamp);
        }
        EventOutcome::Applied
    }

    fn on_tab_updated(&self, tab_id: TabId, changes: &TabChanges) -> Result<EventOutcome, StorageError> {
        if changes.title.is_none() && changes.fav_icon_url.is_none() {
            return Ok(EventOutcome::Applied);
        }
        let Some(current) = lock(&self.tab_history).most_recent(tab_id).map(str::to_string) else {
            debug!(tab_id, "Tab update before any committed visit");
            return Ok(EventOutcome::dropped(DropReason::MissingRecord));
        };
        self.patch_record(
            &current,
            RecordPatch {
                title: changes.title.clone(),
                favicon: changes.fav_icon_url.clone(),
                ..RecordPatch::default()
            },
        )
    }

    fn on_tab_removed(&self, tab_id: TabId, timestamp: DateTime<Utc>) -> Result<EventOutcome, StorageError> {
        // Active time lands on the tab's current node, so it must be flushed
        // while the history still knows which node that is.
        let flushed = lock(&self.active_time).remove_tab(tab_id, timestamp);
        let flush_result = self.apply_flush(flushed);

        let session = self.storage.current_session();
        let close_result = session.and_then(|session| {
            let open = self.storage.query_records(&RecordFilter {
                session_id: Some(session.id),
                tab_id: Some(tab_id),
                only_open: true,
                ..RecordFilter::default()
            })?;
            let closing = RecordPatch {
                is_closed: Some(true),
                ..RecordPatch::default()
            };
            for record in &open {
                self.storage.update_record(&record.id, &closing)?;
            }
            Ok(open.len())
        });

        lock(&self.tab_history).clear(tab_id);
        lock(&self.click_sources).forget(tab_id);

        flush_result?;
        let closed = close_result?;
        debug!(tab_id, closed, "Tab removed");
        Ok(EventOutcome::Applied)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Page signals and enrichment
    // ─────────────────────────────────────────────────────────────────────

    fn on_page_signal(&self, kind: PendingKind, signal: &PageSignal) -> EventOutcome {
        if !is_trackable_url(&signal.target_url, &self.config.excluded_schemes) {
            return EventOutcome::dropped(DropReason::Untrackable);
        }
        lock(&self.click_sources).record(signal.tab_id, &signal.source_page_id, signal.timestamp);
        lock(&self.pending).register(
            kind,
            &signal.source_page_id,
            &signal.target_url,
            signal.tab_id,
            signal.timestamp,
        );
        debug!(
            tab_id = signal.tab_id,
            source = %signal.source_page_id,
            target = %signal.target_url,
            kind = ?kind,
            "Registered pending navigation"
        );
        EventOutcome::Applied
    }

    fn patch_record(&self, id: &str, patch: RecordPatch) -> Result<EventOutcome, StorageError> {
        match self.storage.update_record(id, &patch)? {
            Some(_) => Ok(EventOutcome::Applied),
            None => {
                warn!(node_id = %id, "Update for unknown record ignored");
                Ok(EventOutcome::dropped(DropReason::MissingRecord))
            }
        }
    }

    fn apply_flush(&self, flushed: Option<ActiveTimeFlush>) -> Result<(), StorageError> {
        let Some(flush) = flushed else {
            return Ok(());
        };
        if flush.duration_ms == 0 {
            return Ok(());
        }
        let Some(current) = lock(&self.tab_history)
            .most_recent(flush.tab_id)
            .map(str::to_string)
        else {
            debug!(tab_id = flush.tab_id, "No visit to credit active time to");
            return Ok(());
        };
        let patch = RecordPatch {
            add_active_time: flush.duration_ms,
            ..RecordPatch::default()
        };
        if self.storage.update_record(&current, &patch)?.is_none() {
            warn!(node_id = %current, "Active time for unknown record dropped");
        }
        Ok(())
    }
}

/// Resolver view over the engine's tables. Each call takes and releases one
/// lock.
struct LiveTables<'a> {
    tab_history: &'a Mutex<TabHistory>,
    pending: &'a Mutex<PendingNavigations>,
    click_sources: &'a Mutex<ClickSources>,
}

impl SignalTables for LiveTables<'_> {
    fn take_click_source(&self, tab_id: TabId, now: DateTime<Utc>) -> Option<String> {
        lock(self.click_sources)
            .take(tab_id, now)
            .map(|source| source.node_id)
    }

    fn consume_pending(&self, normalized_url: &str, now: DateTime<Utc>) -> Option<String> {
        lock(self.pending)
            .consume(normalized_url, now)
            .map(|entry| entry.source_node_id)
    }

    fn tab_history(&self, tab_id: TabId) -> Vec<String> {
        lock(self.tab_history).entries(tab_id)
    }
}
