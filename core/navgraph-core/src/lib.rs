//! # navgraph-core
//!
//! Builds a directed graph of page visits from a live stream of browser
//! navigation events. Nodes are visit records, edges are inferred
//! transitions between them.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Hosts drive the engine from a worker
//!   thread and a sweeper thread.
//! - **Injected collaborators**: Persistence goes through [`Storage`], events
//!   arrive through [`EventSource`]. Engines are independent of each other.
//! - **Deterministic**: TTLs and dedup windows are measured against event
//!   timestamps, never the wall clock.
//! - **Acyclic**: Every parent candidate passes the cycle guard against
//!   storage right before the edge is written.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use navgraph_core::{EngineConfig, MemoryStore, NavGraphEngine, ScriptedSource};
//!
//! let engine = NavGraphEngine::new(MemoryStore::new(), EngineConfig::default());
//! engine.run(&mut ScriptedSource::new(events));
//! let graph = engine.session_details(None)?;
//! ```

pub mod active_time;
pub mod classifier;
pub mod click_source;
pub mod config;
pub mod cycle_guard;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod ids;
pub mod pending;
pub mod resolver;
pub mod source;
pub mod storage;
pub mod tab_history;
pub mod types;

pub use classifier::{classify, Classification, ClassifierInput};
pub use config::{default_config_path, load_engine_config, EngineConfig};
pub use cycle_guard::{find_cycle_violations, would_create_cycle};
pub use engine::{DropReason, EventOutcome, NavGraphEngine, SweepReport};
pub use error::{NavGraphError, Result, StorageError};
pub use ids::{edge_id, node_id, normalize_url};
pub use resolver::{ParentSource, Resolution};
pub use source::{EventSource, ScriptedSource};
pub use storage::{MemoryStore, Storage};
pub use types::*;
