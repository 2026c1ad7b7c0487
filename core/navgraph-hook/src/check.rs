//! Structural audit of a session graph fetched from the daemon.

use navgraph_core::{find_cycle_violations, SessionDetails};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub records: usize,
    pub edges: usize,
    pub roots: usize,
    /// Records whose parent chain loops.
    pub cycles: Vec<String>,
    /// Edges whose target does not name the edge source as its parent.
    /// Edges into records that moved to a later session are skipped.
    pub mismatched_edges: Vec<String>,
    /// Non-root records with no edge leading into them.
    pub orphans: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.cycles.is_empty() && self.mismatched_edges.is_empty() && self.orphans.is_empty()
    }
}

pub fn audit(details: &SessionDetails) -> CheckReport {
    let parents: HashMap<&str, Option<&str>> = details
        .records
        .iter()
        .map(|record| (record.id.as_str(), record.parent_id.as_deref()))
        .collect();

    let mut mismatched_edges: Vec<String> = details
        .edges
        .iter()
        .filter(|edge| match parents.get(edge.target_id.as_str()) {
            Some(parent) => *parent != Some(edge.source_id.as_str()),
            None => false,
        })
        .map(|edge| edge.id.clone())
        .collect();
    mismatched_edges.sort();

    let mut orphans: Vec<String> = details
        .records
        .iter()
        .filter(|record| !record.is_root())
        .filter(|record| !details.edges.iter().any(|edge| edge.target_id == record.id))
        .map(|record| record.id.clone())
        .collect();
    orphans.sort();

    CheckReport {
        records: details.records.len(),
        edges: details.edges.len(),
        roots: details.records.iter().filter(|record| record.is_root()).count(),
        cycles: find_cycle_violations(&details.records),
        mismatched_edges,
        orphans,
    }
}

pub fn run(session_id: Option<&str>) -> Result<CheckReport, String> {
    let details = crate::daemon_client::fetch_session(session_id)?;
    let report = audit(&details);
    if !report.is_clean() {
        tracing::warn!(
            cycles = report.cycles.len(),
            mismatched_edges = report.mismatched_edges.len(),
            orphans = report.orphans.len(),
            "Session graph failed audit"
        );
    }
    Ok(report)
}
