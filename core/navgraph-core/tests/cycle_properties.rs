//! Property: whatever order events arrive in, the committed graph never
//! contains a node that is its own ancestor.

use chrono::{DateTime, Duration, TimeZone, Utc};
use navgraph_core::{
    find_cycle_violations, node_id, EngineConfig, MemoryStore, NavGraphEngine,
};
use navgraph_protocol::{NavEvent, NavigationDetails, PageSignal, TabInfo};
use proptest::prelude::*;

const URLS: [&str; 5] = [
    "https://a.example",
    "https://a.example/one",
    "https://b.example",
    "https://b.example/two",
    "https://c.example/three",
];

const KINDS: [&str; 6] = ["typed", "link", "reload", "form_submit", "auto_subframe", "keyword"];

#[derive(Debug, Clone)]
enum Step {
    Commit { tab: i64, url: usize, kind: usize },
    PushState { tab: i64, url: usize },
    Click { tab: i64, source_tab: i64, source_url: usize, target: usize },
    Open { tab: i64, opener: i64 },
    Close { tab: i64 },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..3i64, 0..URLS.len(), 0..KINDS.len())
            .prop_map(|(tab, url, kind)| Step::Commit { tab, url, kind }),
        2 => (0..3i64, 0..URLS.len()).prop_map(|(tab, url)| Step::PushState { tab, url }),
        2 => (0..3i64, 0..3i64, 0..URLS.len(), 0..URLS.len()).prop_map(
            |(tab, source_tab, source_url, target)| Step::Click {
                tab,
                source_tab,
                source_url,
                target,
            }
        ),
        1 => (0..3i64, 0..3i64).prop_map(|(tab, opener)| Step::Open { tab, opener }),
        1 => (0..3i64).prop_map(|tab| Step::Close { tab }),
    ]
}

fn at(ms: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap() + Duration::milliseconds(ms)
}

fn to_event(step: &Step, ms: i64) -> NavEvent {
    let timestamp = at(ms);
    let details = |tab: i64, url: usize, kind: Option<&str>| NavigationDetails {
        tab_id: tab,
        url: URLS[url].to_string(),
        frame_id: 0,
        parent_frame_id: -1,
        timestamp,
        transition_kind: kind.map(str::to_string),
        transition_qualifiers: Vec::new(),
    };
    match *step {
        Step::Commit { tab, url, kind } => {
            NavEvent::NavigationCommitted(details(tab, url, Some(KINDS[kind])))
        }
        Step::PushState { tab, url } => NavEvent::HistoryStateUpdated(details(tab, url, None)),
        Step::Click {
            tab,
            source_tab,
            source_url,
            target,
        } => NavEvent::LinkClicked(PageSignal {
            source_page_id: node_id(source_tab, URLS[source_url]),
            target_url: URLS[target].to_string(),
            tab_id: tab,
            timestamp,
        }),
        Step::Open { tab, opener } => NavEvent::TabCreated {
            tab: TabInfo {
                tab_id: tab,
                window_id: Some(1),
                opener_tab_id: Some(opener),
                url: None,
                active: false,
            },
            timestamp,
        },
        Step::Close { tab } => NavEvent::TabRemoved { tab_id: tab, timestamp },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn committed_graph_stays_acyclic(
        steps in proptest::collection::vec(step(), 1..60),
        gaps in proptest::collection::vec(0i64..4_000, 60),
    ) {
        let engine = NavGraphEngine::new(
            MemoryStore::with_session("s1", at(0)),
            EngineConfig::default(),
        );
        let mut clock = 0i64;
        for (index, step) in steps.iter().enumerate() {
            clock += gaps[index];
            engine.handle_event(&to_event(step, clock));
        }

        let records = engine.storage().records();
        prop_assert!(find_cycle_violations(&records).is_empty());
        for edge in engine.storage().edges() {
            prop_assert_ne!(&edge.source_id, &edge.target_id);
        }
        for record in &records {
            let ancestors = engine.storage().ancestors(&record.id);
            prop_assert!(!ancestors.contains(&record.id));
        }
    }
}
