//! Event and IPC protocol types for the navgraph daemon.
//!
//! This crate is shared by the engine, the daemon and its clients so the
//! navigation event schema cannot drift. The daemon remains the authority on
//! validation, but clients reuse the same types to build valid requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_URL_BYTES: usize = 32 * 1024;

pub type TabId = i64;
pub type WindowId = i64;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Event,
    GetSession,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Fields shared by commit, completion and history-state callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavigationDetails {
    pub tab_id: TabId,
    pub url: String,
    #[serde(default)]
    pub frame_id: i64,
    #[serde(default = "default_parent_frame_id")]
    pub parent_frame_id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub transition_kind: Option<String>,
    #[serde(default)]
    pub transition_qualifiers: Vec<String>,
}

fn default_parent_frame_id() -> i64 {
    -1
}

impl NavigationDetails {
    pub fn is_main_frame(&self) -> bool {
        self.frame_id == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TabInfo {
    pub tab_id: TabId,
    #[serde(default)]
    pub window_id: Option<WindowId>,
    #[serde(default)]
    pub opener_tab_id: Option<TabId>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// The subset of tab properties a `TabUpdated` callback reports as changed.
///
/// Only `title` and `fav_icon_url` feed the graph. Browsers also report `url`
/// and `status` in the same callback; they are accepted so those payloads
/// pass `deny_unknown_fields`, and otherwise ignored. URL changes reach the
/// engine as navigation commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TabChanges {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl TabChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.fav_icon_url.is_none()
            && self.url.is_none()
            && self.status.is_none()
    }
}

/// A link click or form submission observed by a content-side script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageSignal {
    pub source_page_id: String,
    pub target_url: String,
    pub tab_id: TabId,
    pub timestamp: DateTime<Utc>,
}

/// Everything the host environment and the content-side observers can
/// deliver to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavEvent {
    TabCreated {
        tab: TabInfo,
        timestamp: DateTime<Utc>,
    },
    TabUpdated {
        tab_id: TabId,
        changes: TabChanges,
        timestamp: DateTime<Utc>,
    },
    TabRemoved {
        tab_id: TabId,
        timestamp: DateTime<Utc>,
    },
    TabActivated {
        tab_id: TabId,
        window_id: WindowId,
        timestamp: DateTime<Utc>,
    },
    WindowFocusChanged {
        /// `None` means every browser window lost focus.
        window_id: Option<WindowId>,
        timestamp: DateTime<Utc>,
    },
    NavigationCommitted(NavigationDetails),
    NavigationCompleted(NavigationDetails),
    HistoryStateUpdated(NavigationDetails),
    LinkClicked(PageSignal),
    FormSubmitted(PageSignal),
    PageLoaded {
        tab_id: TabId,
        url: String,
        load_time_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TitleUpdated {
        node_id: String,
        title: String,
    },
    FaviconUpdated {
        node_id: String,
        favicon: String,
    },
}

impl NavEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NavEvent::TabCreated { .. } => "tab_created",
            NavEvent::TabUpdated { .. } => "tab_updated",
            NavEvent::TabRemoved { .. } => "tab_removed",
            NavEvent::TabActivated { .. } => "tab_activated",
            NavEvent::WindowFocusChanged { .. } => "window_focus_changed",
            NavEvent::NavigationCommitted(_) => "navigation_committed",
            NavEvent::NavigationCompleted(_) => "navigation_completed",
            NavEvent::HistoryStateUpdated(_) => "history_state_updated",
            NavEvent::LinkClicked(_) => "link_clicked",
            NavEvent::FormSubmitted(_) => "form_submitted",
            NavEvent::PageLoaded { .. } => "page_loaded",
            NavEvent::TitleUpdated { .. } => "title_updated",
            NavEvent::FaviconUpdated { .. } => "favicon_updated",
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            NavEvent::TabCreated { timestamp, .. }
            | NavEvent::TabUpdated { timestamp, .. }
            | NavEvent::TabRemoved { timestamp, .. }
            | NavEvent::TabActivated { timestamp, .. }
            | NavEvent::WindowFocusChanged { timestamp, .. }
            | NavEvent::PageLoaded { timestamp, .. } => Some(*timestamp),
            NavEvent::NavigationCommitted(details)
            | NavEvent::NavigationCompleted(details)
            | NavEvent::HistoryStateUpdated(details) => Some(details.timestamp),
            NavEvent::LinkClicked(signal) | NavEvent::FormSubmitted(signal) => {
                Some(signal.timestamp)
            }
            NavEvent::TitleUpdated { .. } | NavEvent::FaviconUpdated { .. } => None,
        }
    }

    pub fn tab_id(&self) -> Option<TabId> {
        match self {
            NavEvent::TabCreated { tab, .. } => Some(tab.tab_id),
            NavEvent::TabUpdated { tab_id, .. }
            | NavEvent::TabRemoved { tab_id, .. }
            | NavEvent::TabActivated { tab_id, .. }
            | NavEvent::PageLoaded { tab_id, .. } => Some(*tab_id),
            NavEvent::NavigationCommitted(details)
            | NavEvent::NavigationCompleted(details)
            | NavEvent::HistoryStateUpdated(details) => Some(details.tab_id),
            NavEvent::LinkClicked(signal) | NavEvent::FormSubmitted(signal) => {
                Some(signal.tab_id)
            }
            NavEvent::WindowFocusChanged { .. }
            | NavEvent::TitleUpdated { .. }
            | NavEvent::FaviconUpdated { .. } => None,
        }
    }

    /// Structural checks only. Filtering of uninteresting URLs (internal
    /// schemes, blank pages) is engine policy, not a protocol error.
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(tab_id) = self.tab_id() {
            require_tab_id(tab_id)?;
        }

        match self {
            NavEvent::NavigationCommitted(details)
            | NavEvent::NavigationCompleted(details)
            | NavEvent::HistoryStateUpdated(details) => {
                require_url_len(&details.url, "url")?;
                if details.frame_id < 0 {
                    return Err(ErrorInfo::new(
                        "invalid_frame_id",
                        "frame_id must be zero or positive",
                    ));
                }
            }
            NavEvent::LinkClicked(signal) | NavEvent::FormSubmitted(signal) => {
                require_string(&signal.source_page_id, "source_page_id")?;
                require_string(&signal.target_url, "target_url")?;
                require_url_len(&signal.target_url, "target_url")?;
            }
            NavEvent::TabUpdated { changes, .. } => {
                if changes.is_empty() {
                    return Err(ErrorInfo::new(
                        "missing_field",
                        "changes must contain at least one field",
                    ));
                }
            }
            NavEvent::PageLoaded { url, .. } => {
                require_string(url, "url")?;
                require_url_len(url, "url")?;
            }
            NavEvent::TitleUpdated { node_id, .. } => require_string(node_id, "node_id")?,
            NavEvent::FaviconUpdated { node_id, favicon } => {
                require_string(node_id, "node_id")?;
                require_string(favicon, "favicon")?;
            }
            NavEvent::TabCreated { .. }
            | NavEvent::TabRemoved { .. }
            | NavEvent::TabActivated { .. }
            | NavEvent::WindowFocusChanged { .. } => {}
        }

        Ok(())
    }
}

pub fn parse_event(params: Value) -> Result<NavEvent, ErrorInfo> {
    let event: NavEvent = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("event payload is invalid JSON: {}", err),
        )
    })?;
    event.validate()?;
    Ok(event)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionParams {
    #[serde(default)]
    pub session_id: Option<String>,
}

pub fn parse_session_params(params: Option<Value>) -> Result<SessionParams, ErrorInfo> {
    let params = match params {
        Some(Value::Null) | None => return Ok(SessionParams::default()),
        Some(params) => params,
    };
    let parsed: SessionParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("session params are invalid: {}", err),
        )
    })?;
    if let Some(session_id) = parsed.session_id.as_ref() {
        require_string(session_id, "session_id")?;
    }
    Ok(parsed)
}

fn require_tab_id(tab_id: TabId) -> Result<(), ErrorInfo> {
    if tab_id < 0 {
        return Err(ErrorInfo::new(
            "invalid_tab_id",
            "tab_id must be zero or positive",
        ));
    }
    Ok(())
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

fn require_url_len(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.len() > MAX_URL_BYTES {
        return Err(ErrorInfo::new(
            "url_too_long",
            format!("{} must be {} bytes or fewer", field, MAX_URL_BYTES),
        ));
    }
    Ok(())
}
