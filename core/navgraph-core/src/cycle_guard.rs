//! Ancestor-chain cycle checks.
//!
//! Parent links are plain ids looked up through a caller-supplied function,
//! so the same walk runs against the in-memory arena, SQLite, or a test map.

use std::collections::{HashMap, HashSet};

use crate::types::VisitNode;

/// True when `source_id` equals `target_id` or appears on `target_id`'s
/// ancestor chain. A chain that revisits a node also counts, which catches
/// corruption already present in storage.
///
/// To check whether `candidate` may become the parent of `child`, call
/// `would_create_cycle(child, candidate, ..)`: linking them closes a loop
/// exactly when `child` is already an ancestor of `candidate`.
///
/// `parent_of` returns `Ok(None)` for roots and for ids it does not know.
pub fn would_create_cycle<F, E>(source_id: &str, target_id: &str, mut parent_of: F) -> Result<bool, E>
where
    F: FnMut(&str) -> Result<Option<String>, E>,
{
    if source_id == target_id {
        return Ok(true);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut current = target_id.to_string();
    loop {
        if !seen.insert(current.clone()) {
            return Ok(true);
        }
        match parent_of(&current)? {
            Some(parent) if parent == source_id => return Ok(true),
            Some(parent) => current = parent,
            None => return Ok(false),
        }
    }
}

/// Ids of every node in `nodes` whose parent chain loops back on itself or
/// that is its own parent. Parents outside the set end the walk.
pub fn find_cycle_violations(nodes: &[VisitNode]) -> Vec<String> {
    let parents: HashMap<&str, Option<&str>> = nodes
        .iter()
        .map(|node| (node.id.as_str(), node.parent_id.as_deref()))
        .collect();

    let mut violations: Vec<String> = nodes
        .iter()
        .filter(|node| {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut current = Some(node.id.as_str());
            while let Some(id) = current {
                if !seen.insert(id) {
                    return true;
                }
                current = parents.get(id).copied().flatten();
            }
            false
        })
        .map(|node| node.id.clone())
        .collect();
    violations.sort();
    violations
}
