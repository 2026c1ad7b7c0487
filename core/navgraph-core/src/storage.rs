//! Storage collaborator interface and the in-memory arena store.
//!
//! The engine only talks to persistence through [`Storage`]. `MemoryStore`
//! backs tests and embedders that do not need durability; the daemon ships a
//! SQLite implementation.
//!
//! # Arena Layout
//!
//! `MemoryStore` keeps nodes in a `Vec` and links each node to its parent by
//! index rather than by reference. Ancestor walks are index hops, and a
//! corrupted loop can be detected without any shared ownership.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::StorageError;
use crate::types::{NavEdge, RecordFilter, RecordPatch, Session, SessionDetails, VisitNode};

pub trait Storage: Send + Sync {
    fn get_record(&self, id: &str) -> Result<Option<VisitNode>, StorageError>;

    /// Inserts or replaces a record and returns what was stored.
    fn save_record(&self, record: VisitNode) -> Result<VisitNode, StorageError>;

    /// Applies `patch` to an existing record. `Ok(None)` when the record does
    /// not exist; callers treat that as a soft no-op.
    fn update_record(
        &self,
        id: &str,
        patch: &RecordPatch,
    ) -> Result<Option<VisitNode>, StorageError>;

    /// Matching records, newest `last_visit` first.
    fn query_records(&self, filter: &RecordFilter) -> Result<Vec<VisitNode>, StorageError>;

    fn save_edge(&self, edge: &NavEdge) -> Result<(), StorageError>;

    fn current_session(&self) -> Result<Session, StorageError>;

    fn add_root_to_session(&self, session_id: &str, node_id: &str) -> Result<(), StorageError>;

    fn session_details(&self, session_id: &str) -> Result<SessionDetails, StorageError>;
}

impl<S: Storage + ?Sized> Storage for &S {
    fn get_record(&self, id: &str) -> Result<Option<VisitNode>, StorageError> {
        (**self).get_record(id)
    }

    fn save_record(&self, record: VisitNode) -> Result<VisitNode, StorageError> {
        (**self).save_record(record)
    }

    fn update_record(
        &self,
        id: &str,
        patch: &RecordPatch,
    ) -> Result<Option<VisitNode>, StorageError> {
        (**self).update_record(id, patch)
    }

    fn query_records(&self, filter: &RecordFilter) -> Result<Vec<VisitNode>, StorageError> {
        (**self).query_records(filter)
    }

    fn save_edge(&self, edge: &NavEdge) -> Result<(), StorageError> {
        (**self).save_edge(edge)
    }

    fn current_session(&self) -> Result<Session, StorageError> {
        (**self).current_session()
    }

    fn add_root_to_session(&self, session_id: &str, node_id: &str) -> Result<(), StorageError> {
        (**self).add_root_to_session(session_id, node_id)
    }

    fn session_details(&self, session_id: &str) -> Result<SessionDetails, StorageError> {
        (**self).session_details(session_id)
    }
}

/// Newest `last_visit` first, ties broken by `first_visit` then id so the
/// order is total.
pub fn sort_newest_first(records: &mut [VisitNode]) {
    records.sort_by(|a, b| {
        b.last_visit
            .cmp(&a.last_visit)
            .then_with(|| b.first_visit.cmp(&a.first_visit))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[derive(Debug)]
struct ArenaNode {
    record: VisitNode,
    parent: Option<usize>,
}

#[derive(Debug, Default)]
struct Arena {
    nodes: Vec<ArenaNode>,
    index: HashMap<String, usize>,
    edges: Vec<NavEdge>,
    sessions: Vec<Session>,
}

impl Arena {
    fn link_parent(&mut self, slot: usize) {
        let parent = self.nodes[slot]
            .record
            .parent_id
            .as_ref()
            .and_then(|parent_id| self.index.get(parent_id).copied());
        self.nodes[slot].parent = parent;

        // Children saved before their parent are linked once it arrives.
        let id = self.nodes[slot].record.id.clone();
        for node in self.nodes.iter_mut() {
            if node.parent.is_none() && node.record.parent_id.as_deref() == Some(id.as_str()) {
                node.parent = Some(slot);
            }
        }
    }

    fn session_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions
            .iter_mut()
            .find(|session| session.id == session_id)
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    arena: Mutex<Arena>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_session("session-1", Utc::now())
    }

    pub fn with_session(session_id: &str, started_at: DateTime<Utc>) -> Self {
        let store = Self {
            arena: Mutex::new(Arena::default()),
        };
        store.start_session(session_id, started_at);
        store
    }

    /// Opens a new session; it becomes the current one.
    pub fn start_session(&self, session_id: &str, started_at: DateTime<Utc>) {
        self.lock().sessions.push(Session {
            id: session_id.to_string(),
            started_at,
            roots: Vec::new(),
        });
    }

    pub fn edges(&self) -> Vec<NavEdge> {
        self.lock().edges.clone()
    }

    pub fn records(&self) -> Vec<VisitNode> {
        self.lock()
            .nodes
            .iter()
            .map(|node| node.record.clone())
            .collect()
    }

    /// Ancestor ids of `id`, nearest first, following arena indices. Stops
    /// at a root or at the first repeated index.
    pub fn ancestors(&self, id: &str) -> Vec<String> {
        let arena = self.lock();
        let mut result = Vec::new();
        let mut visited = vec![false; arena.nodes.len()];
        let mut current = arena.index.get(id).and_then(|slot| arena.nodes[*slot].parent);
        while let Some(slot) = current {
            if visited[slot] {
                break;
            }
            visited[slot] = true;
            result.push(arena.nodes[slot].record.id.clone());
            current = arena.nodes[slot].parent;
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Storage for MemoryStore {
    fn get_record(&self, id: &str) -> Result<Option<VisitNode>, StorageError> {
        let arena = self.lock();
        Ok(arena
            .index
            .get(id)
            .map(|slot| arena.nodes[*slot].record.clone()))
    }

    fn save_record(&self, record: VisitNode) -> Result<VisitNode, StorageError> {
        let mut arena = self.lock();
        let slot = match arena.index.get(&record.id).copied() {
            Some(slot) => {
                arena.nodes[slot].record = record.clone();
                slot
            }
            None => {
                let slot = arena.nodes.len();
                arena.index.insert(record.id.clone(), slot);
                arena.nodes.push(ArenaNode {
                    record: record.clone(),
                    parent: None,
                });
                slot
            }
        };
        arena.link_parent(slot);
        Ok(record)
    }

    fn update_record(
        &self,
        id: &str,
        patch: &RecordPatch,
    ) -> Result<Option<VisitNode>, StorageError> {
        let mut arena = self.lock();
        let slot = match arena.index.get(id).copied() {
            Some(slot) => slot,
            None => return Ok(None),
        };
        patch.apply(&mut arena.nodes[slot].record);
        Ok(Some(arena.nodes[slot].record.clone()))
    }

    fn query_records(&self, filter: &RecordFilter) -> Result<Vec<VisitNode>, StorageError> {
        let arena = self.lock();
        let mut records: Vec<VisitNode> = arena
            .nodes
            .iter()
            .map(|node| &node.record)
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn save_edge(&self, edge: &NavEdge) -> Result<(), StorageError> {
        self.lock().edges.push(edge.clone());
        Ok(())
    }

    fn current_session(&self) -> Result<Session, StorageError> {
        self.lock()
            .sessions
            .last()
            .cloned()
            .ok_or_else(|| StorageError::SessionNotFound("current".to_string()))
    }

    fn add_root_to_session(&self, session_id: &str, node_id: &str) -> Result<(), StorageError> {
        let mut arena = self.lock();
        let session = arena
            .session_mut(session_id)
            .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;
        if !session.roots.iter().any(|root| root == node_id) {
            session.roots.push(node_id.to_string());
        }
        Ok(())
    }

    fn session_details(&self, session_id: &str) -> Result<SessionDetails, StorageError> {
        let arena = self.lock();
        if !arena.sessions.iter().any(|session| session.id == session_id) {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        let mut records: Vec<VisitNode> = arena
            .nodes
            .iter()
            .filter(|node| node.record.session_id == session_id)
            .map(|node| node.record.clone())
            .collect();
        sort_newest_first(&mut records);
        let edges = arena
            .edges
            .iter()
            .filter(|edge| edge.session_id == session_id)
            .cloned()
            .collect();
        Ok(SessionDetails { records, edges })
    }
}
