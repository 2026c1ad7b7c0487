//! Graph records exchanged between the engine and its storage collaborator.

use chrono::{DateTime, Utc};
use navgraph_protocol::TabId;
use serde::{Deserialize, Serialize};

/// How a visit was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationType {
    Reload,
    AddressBar,
    FormSubmit,
    LinkClick,
    Javascript,
    HistoryBack,
    HistoryForward,
    Redirect,
    Initial,
}

impl NavigationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationType::Reload => "reload",
            NavigationType::AddressBar => "address_bar",
            NavigationType::FormSubmit => "form_submit",
            NavigationType::LinkClick => "link_click",
            NavigationType::Javascript => "javascript",
            NavigationType::HistoryBack => "history_back",
            NavigationType::HistoryForward => "history_forward",
            NavigationType::Redirect => "redirect",
            NavigationType::Initial => "initial",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "reload" => Some(NavigationType::Reload),
            "address_bar" => Some(NavigationType::AddressBar),
            "form_submit" => Some(NavigationType::FormSubmit),
            "link_click" => Some(NavigationType::LinkClick),
            "javascript" => Some(NavigationType::Javascript),
            "history_back" => Some(NavigationType::HistoryBack),
            "history_forward" => Some(NavigationType::HistoryForward),
            "redirect" => Some(NavigationType::Redirect),
            "initial" => Some(NavigationType::Initial),
            _ => None,
        }
    }
}

/// Where the navigation landed relative to the tab it happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenTarget {
    Frame,
    NewTab,
    SameTab,
}

impl OpenTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenTarget::Frame => "frame",
            OpenTarget::NewTab => "new_tab",
            OpenTarget::SameTab => "same_tab",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "frame" => Some(OpenTarget::Frame),
            "new_tab" => Some(OpenTarget::NewTab),
            "same_tab" => Some(OpenTarget::SameTab),
            _ => None,
        }
    }
}

/// One page-visit record. Mutated in place on repeat visits to the same
/// (tab, URL) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitNode {
    pub id: String,
    pub url: String,
    pub title: String,
    pub favicon: Option<String>,
    pub tab_id: TabId,
    pub session_id: String,
    /// `None` marks a root.
    pub parent_id: Option<String>,
    pub navigation_type: NavigationType,
    pub open_target: OpenTarget,
    pub frame_id: i64,
    pub parent_frame_id: i64,
    pub first_visit: DateTime<Utc>,
    pub last_visit: DateTime<Utc>,
    pub visit_count: u32,
    pub reload_count: u32,
    /// Milliseconds from commit to load completion.
    pub load_time: u64,
    /// Milliseconds the page spent in the focused, active tab.
    pub active_time: u64,
    pub is_closed: bool,
}

impl VisitNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// A title is never replaced by a strictly shorter one.
    pub fn accepts_title(&self, candidate: &str) -> bool {
        candidate.chars().count() >= self.title.chars().count()
    }
}

/// An inferred transition between two visits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: NavigationType,
    /// Process-lifetime counter; not continuous across restarts.
    pub sequence: u64,
    pub session_id: String,
}

/// Partial update applied by [`crate::storage::Storage::update_record`].
///
/// Counters are increments rather than absolute values so a storage backend
/// can apply them against the stored row without a read-modify-write race.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    pub title: Option<String>,
    pub favicon: Option<String>,
    pub last_visit: Option<DateTime<Utc>>,
    pub add_visits: u32,
    pub add_reloads: u32,
    pub load_time: Option<u64>,
    pub add_active_time: u64,
    pub is_closed: Option<bool>,
    /// Moves the record into another session.
    pub session_id: Option<String>,
}

impl RecordPatch {
    pub fn apply(&self, node: &mut VisitNode) {
        if let Some(title) = self.title.as_ref() {
            if node.accepts_title(title) {
                node.title = title.clone();
            }
        }
        if let Some(favicon) = self.favicon.as_ref() {
            node.favicon = Some(favicon.clone());
        }
        if let Some(last_visit) = self.last_visit {
            if last_visit > node.last_visit {
                node.last_visit = last_visit;
            }
        }
        node.visit_count = node.visit_count.saturating_add(self.add_visits);
        node.reload_count = node.reload_count.saturating_add(self.add_reloads);
        if let Some(load_time) = self.load_time {
            node.load_time = load_time;
        }
        node.active_time = node.active_time.saturating_add(self.add_active_time);
        if let Some(is_closed) = self.is_closed {
            node.is_closed = is_closed;
        }
        if let Some(session_id) = self.session_id.as_ref() {
            node.session_id = session_id.clone();
        }
    }
}

/// Selection for [`crate::storage::Storage::query_records`]. Results come back
/// newest first by `last_visit`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub session_id: Option<String>,
    pub exclude_session_id: Option<String>,
    pub tab_id: Option<TabId>,
    pub only_open: bool,
}

impl RecordFilter {
    pub fn matches(&self, node: &VisitNode) -> bool {
        if let Some(session_id) = self.session_id.as_ref() {
            if &node.session_id != session_id {
                return false;
            }
        }
        if let Some(excluded) = self.exclude_session_id.as_ref() {
            if &node.session_id == excluded {
                return false;
            }
        }
        if let Some(tab_id) = self.tab_id {
            if node.tab_id != tab_id {
                return false;
            }
        }
        !(self.only_open && node.is_closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub roots: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDetails {
    pub records: Vec<VisitNode>,
    pub edges: Vec<NavEdge>,
}
