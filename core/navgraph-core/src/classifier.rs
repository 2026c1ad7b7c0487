//! Navigation classification.
//!
//! Maps the raw transition fields a browser reports into the engine's own
//! [`NavigationType`] and [`OpenTarget`]. The mapping is a fixed priority
//! table; the first matching row wins.
//!
//! ```text
//! reload                          → reload
//! typed | generated               → address_bar
//! form_submit                     → form_submit
//! auto_bookmark | link            → link_click
//! auto_subframe | manual_subframe → javascript
//! qualifier forward_back | back   → history_back
//! qualifier forward               → history_forward
//! qualifier *_redirect            → redirect
//! anything else                   → initial
//! ```

use crate::types::{NavigationType, OpenTarget};

/// Raw inputs for one classification.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    pub transition_kind: Option<&'a str>,
    pub transition_qualifiers: &'a [String],
    pub frame_id: i64,
    pub tab_history_empty: bool,
    /// Set for single-page-app `pushState`/`replaceState` updates.
    pub history_state_update: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub navigation_type: NavigationType,
    pub open_target: OpenTarget,
    /// Address-bar, initial and bookmark navigations may legitimately start
    /// a new tree, so pending link/form signals are not consulted for them.
    pub root_eligible: bool,
}

pub fn classify(input: ClassifierInput<'_>) -> Classification {
    let kind = input.transition_kind.unwrap_or_default();
    let navigation_type = if input.history_state_update {
        NavigationType::Javascript
    } else {
        navigation_type_for(kind, input.transition_qualifiers)
    };

    let open_target = if input.frame_id > 0 {
        OpenTarget::Frame
    } else if input.tab_history_empty {
        OpenTarget::NewTab
    } else {
        OpenTarget::SameTab
    };

    let root_eligible = matches!(
        navigation_type,
        NavigationType::AddressBar | NavigationType::Initial
    ) || kind == "auto_bookmark";

    Classification {
        navigation_type,
        open_target,
        root_eligible,
    }
}

fn navigation_type_for(kind: &str, qualifiers: &[String]) -> NavigationType {
    let has = |name: &str| qualifiers.iter().any(|q| q == name);

    match kind {
        "reload" => NavigationType::Reload,
        "typed" | "generated" => NavigationType::AddressBar,
        "form_submit" => NavigationType::FormSubmit,
        "auto_bookmark" | "link" => NavigationType::LinkClick,
        "auto_subframe" | "manual_subframe" => NavigationType::Javascript,
        _ if has("forward_back") || has("back") => NavigationType::HistoryBack,
        _ if has("forward") => NavigationType::HistoryForward,
        _ if has("server_redirect") || has("client_redirect") => NavigationType::Redirect,
        _ => NavigationType::Initial,
    }
}
