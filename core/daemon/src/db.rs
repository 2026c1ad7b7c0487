//! SQLite persistence for navgraph-daemon.
//!
//! The daemon's worker thread is the only writer; connection threads read
//! session graphs concurrently. Every call opens its own connection, so WAL
//! and a busy timeout keep readers and the writer out of each other's way.
//!
//! Timestamps are stored as Unix milliseconds.

use chrono::{DateTime, TimeZone, Utc};
use navgraph_core::{
    NavEdge, NavigationType, OpenTarget, RecordFilter, RecordPatch, Session, SessionDetails,
    Storage, StorageError, VisitNode,
};
use rusqlite::types::{Type, Value};
use rusqlite::{
    params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior,
};
use std::path::PathBuf;

const RECORD_COLUMNS: &str = "id, url, title, favicon, tab_id, session_id, parent_id, \
     navigation_type, open_target, frame_id, parent_frame_id, first_visit, last_visit, \
     visit_count, reload_count, load_time, active_time, is_closed";

/// Same total order as the in-memory store: newest visit first.
const NEWEST_FIRST: &str = "last_visit DESC, first_visit DESC, id ASC";

pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    /// Registers a new session. The most recently started session is the
    /// current one.
    pub fn start_session(
        &self,
        session_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Session, String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, started_at) VALUES (?1, ?2)",
                params![session_id, started_at.timestamp_millis()],
            )
            .map_err(|err| format!("Failed to insert session: {}", err))?;
            Ok(Session {
                id: session_id.to_string(),
                started_at,
                roots: Vec::new(),
            })
        })
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, started_at FROM sessions ORDER BY started_at DESC, rowid DESC")
                .map_err(|err| format!("Failed to prepare sessions query: {}", err))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|err| format!("Failed to read session rows: {}", err))?;

            let mut sessions = Vec::new();
            for row in rows {
                let (id, started_at) =
                    row.map_err(|err| format!("Failed to decode session row: {}", err))?;
                let roots = load_roots(conn, &id)?;
                sessions.push(Session {
                    id,
                    started_at: from_millis(started_at)?,
                    roots,
                });
            }
            Ok(sessions)
        })
    }

    fn load_record(&self, id: &str) -> Result<Option<VisitNode>, String> {
        self.with_connection(|conn| select_record(conn, id))
    }

    fn write_record(&self, record: &VisitNode) -> Result<(), String> {
        self.with_connection(|conn| upsert_record(conn, record))
    }

    fn patch_record(&self, id: &str, patch: &RecordPatch) -> Result<Option<VisitNode>, String> {
        self.with_connection(|conn| {
            // Read-modify-write under an immediate transaction so a concurrent
            // reader never observes a half-applied patch.
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| format!("Failed to begin record update: {}", err))?;
            let Some(mut record) = select_record(&tx, id)? else {
                return Ok(None);
            };
            patch.apply(&mut record);
            upsert_record(&tx, &record)?;
            tx.commit()
                .map_err(|err| format!("Failed to commit record update: {}", err))?;
            Ok(Some(record))
        })
    }

    fn select_records(&self, filter: &RecordFilter) -> Result<Vec<VisitNode>, String> {
        self.with_connection(|conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut values: Vec<Value> = Vec::new();
            if let Some(session_id) = filter.session_id.as_ref() {
                clauses.push("session_id = ?");
                values.push(Value::Text(session_id.clone()));
            }
            if let Some(excluded) = filter.exclude_session_id.as_ref() {
                clauses.push("session_id != ?");
                values.push(Value::Text(excluded.clone()));
            }
            if let Some(tab_id) = filter.tab_id {
                clauses.push("tab_id = ?");
                values.push(Value::Integer(tab_id));
            }
            if filter.only_open {
                clauses.push("is_closed = 0");
            }

            let mut sql = format!("SELECT {} FROM records", RECORD_COLUMNS);
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(NEWEST_FIRST);

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|err| format!("Failed to prepare records query: {}", err))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), read_record)
                .map_err(|err| format!("Failed to read record rows: {}", err))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(|err| format!("Failed to decode record row: {}", err))?);
            }
            Ok(records)
        })
    }

    fn insert_edge(&self, edge: &NavEdge) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO edges (id, source_id, target_id, timestamp, action, sequence, session_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(id) DO NOTHING",
                params![
                    edge.id,
                    edge.source_id,
                    edge.target_id,
                    edge.timestamp.timestamp_millis(),
                    edge.action.as_str(),
                    edge.sequence as i64,
                    edge.session_id
                ],
            )
            .map_err(|err| format!("Failed to insert edge: {}", err))?;
            Ok(())
        })
    }

    fn latest_session(&self) -> Result<Option<Session>, String> {
        self.with_connection(|conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT id, started_at FROM sessions ORDER BY started_at DESC, rowid DESC LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|err| format!("Failed to query current session: {}", err))?;
            let Some((id, started_at)) = row else {
                return Ok(None);
            };
            let roots = load_roots(conn, &id)?;
            Ok(Some(Session {
                id,
                started_at: from_millis(started_at)?,
                roots,
            }))
        })
    }

    fn session_exists(&self, session_id: &str) -> Result<bool, String> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT 1 FROM sessions WHERE id = ?1",
                params![session_id],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|err| format!("Failed to query session: {}", err))
        })
    }

    fn insert_root(&self, session_id: &str, node_id: &str) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO session_roots (session_id, node_id, position) \
                 VALUES (?1, ?2, (SELECT COUNT(*) FROM session_roots WHERE session_id = ?1))",
                params![session_id, node_id],
            )
            .map_err(|err| format!("Failed to insert session root: {}", err))?;
            Ok(())
        })
    }

    fn select_edges(&self, session_id: &str) -> Result<Vec<NavEdge>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, source_id, target_id, timestamp, action, sequence, session_id \
                     FROM edges WHERE session_id = ?1 ORDER BY timestamp ASC, sequence ASC",
                )
                .map_err(|err| format!("Failed to prepare edges query: {}", err))?;
            let rows = stmt
                .query_map(params![session_id], read_edge)
                .map_err(|err| format!("Failed to read edge rows: {}", err))?;

            let mut edges = Vec::new();
            for row in rows {
                edges.push(row.map_err(|err| format!("Failed to decode edge row: {}", err))?);
            }
            Ok(edges)
        })
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    started_at INTEGER NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS session_roots (
                    session_id TEXT NOT NULL,
                    node_id TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    PRIMARY KEY (session_id, node_id)
                 );
                 CREATE TABLE IF NOT EXISTS records (
                    id TEXT PRIMARY KEY,
                    url TEXT NOT NULL,
                    title TEXT NOT NULL DEFAULT '',
                    favicon TEXT,
                    tab_id INTEGER NOT NULL,
                    session_id TEXT NOT NULL,
                    parent_id TEXT,
                    navigation_type TEXT NOT NULL,
                    open_target TEXT NOT NULL,
                    frame_id INTEGER NOT NULL DEFAULT 0,
                    parent_frame_id INTEGER NOT NULL DEFAULT -1,
                    first_visit INTEGER NOT NULL,
                    last_visit INTEGER NOT NULL,
                    visit_count INTEGER NOT NULL DEFAULT 1,
                    reload_count INTEGER NOT NULL DEFAULT 0,
                    load_time INTEGER NOT NULL DEFAULT 0,
                    active_time INTEGER NOT NULL DEFAULT 0,
                    is_closed INTEGER NOT NULL DEFAULT 0
                 );
                 CREATE INDEX IF NOT EXISTS records_session_tab
                    ON records (session_id, tab_id);
                 CREATE INDEX IF NOT EXISTS records_last_visit
                    ON records (last_visit DESC);
                 CREATE TABLE IF NOT EXISTS edges (
                    id TEXT PRIMARY KEY,
                    source_id TEXT NOT NULL,
                    target_id TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    action TEXT NOT NULL,
                    sequence INTEGER NOT NULL,
                    session_id TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS edges_session
                    ON edges (session_id);
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))?;
            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create daemon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

impl Storage for Db {
    fn get_record(&self, id: &str) -> Result<Option<VisitNode>, StorageError> {
        self.load_record(id).map_err(backend("get record"))
    }

    fn save_record(&self, record: VisitNode) -> Result<VisitNode, StorageError> {
        self.write_record(&record).map_err(backend("save record"))?;
        Ok(record)
    }

    fn update_record(
        &self,
        id: &str,
        patch: &RecordPatch,
    ) -> Result<Option<VisitNode>, StorageError> {
        self.patch_record(id, patch).map_err(backend("update record"))
    }

    fn query_records(&self, filter: &RecordFilter) -> Result<Vec<VisitNode>, StorageError> {
        self.select_records(filter).map_err(backend("query records"))
    }

    fn save_edge(&self, edge: &NavEdge) -> Result<(), StorageError> {
        self.insert_edge(edge).map_err(backend("save edge"))
    }

    fn current_session(&self) -> Result<Session, StorageError> {
        self.latest_session()
            .map_err(backend("current session"))?
            .ok_or_else(|| StorageError::SessionNotFound("current".to_string()))
    }

    fn add_root_to_session(&self, session_id: &str, node_id: &str) -> Result<(), StorageError> {
        if !self.session_exists(session_id).map_err(backend("add root"))? {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        self.insert_root(session_id, node_id).map_err(backend("add root"))
    }

    fn session_details(&self, session_id: &str) -> Result<SessionDetails, StorageError> {
        if !self
            .session_exists(session_id)
            .map_err(backend("session details"))?
        {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        let records = self
            .select_records(&RecordFilter {
                session_id: Some(session_id.to_string()),
                ..RecordFilter::default()
            })
            .map_err(backend("session details"))?;
        let edges = self
            .select_edges(session_id)
            .map_err(backend("session details"))?;
        Ok(SessionDetails { records, edges })
    }
}

fn backend(context: &'static str) -> impl Fn(String) -> StorageError {
    move |details| StorageError::backend(context, details)
}

fn select_record(conn: &Connection, id: &str) -> Result<Option<VisitNode>, String> {
    conn.query_row(
        &format!("SELECT {} FROM records WHERE id = ?1", RECORD_COLUMNS),
        params![id],
        read_record,
    )
    .optional()
    .map_err(|err| format!("Failed to query record: {}", err))
}

fn upsert_record(conn: &Connection, record: &VisitNode) -> Result<(), String> {
    conn.execute(
        "INSERT INTO records \
            (id, url, title, favicon, tab_id, session_id, parent_id, navigation_type, open_target, \
             frame_id, parent_frame_id, first_visit, last_visit, visit_count, reload_count, \
             load_time, active_time, is_closed) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18) \
         ON CONFLICT(id) DO UPDATE SET \
            url = excluded.url, \
            title = excluded.title, \
            favicon = excluded.favicon, \
            tab_id = excluded.tab_id, \
            session_id = excluded.session_id, \
            parent_id = excluded.parent_id, \
            navigation_type = excluded.navigation_type, \
            open_target = excluded.open_target, \
            frame_id = excluded.frame_id, \
            parent_frame_id = excluded.parent_frame_id, \
            first_visit = excluded.first_visit, \
            last_visit = excluded.last_visit, \
            visit_count = excluded.visit_count, \
            reload_count = excluded.reload_count, \
            load_time = excluded.load_time, \
            active_time = excluded.active_time, \
            is_closed = excluded.is_closed",
        params![
            record.id,
            record.url,
            record.title,
            record.favicon,
            record.tab_id,
            record.session_id,
            record.parent_id,
            record.navigation_type.as_str(),
            record.open_target.as_str(),
            record.frame_id,
            record.parent_frame_id,
            record.first_visit.timestamp_millis(),
            record.last_visit.timestamp_millis(),
            record.visit_count,
            record.reload_count,
            record.load_time as i64,
            record.active_time as i64,
            record.is_closed
        ],
    )
    .map_err(|err| format!("Failed to upsert record: {}", err))?;
    Ok(())
}

fn load_roots(conn: &Connection, session_id: &str) -> Result<Vec<String>, String> {
    let mut stmt = conn
        .prepare("SELECT node_id FROM session_roots WHERE session_id = ?1 ORDER BY position ASC")
        .map_err(|err| format!("Failed to prepare roots query: {}", err))?;
    let rows = stmt
        .query_map(params![session_id], |row| row.get::<_, String>(0))
        .map_err(|err| format!("Failed to read root rows: {}", err))?;

    let mut roots = Vec::new();
    for row in rows {
        roots.push(row.map_err(|err| format!("Failed to decode root row: {}", err))?);
    }
    Ok(roots)
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<VisitNode> {
    let navigation_type: String = row.get(7)?;
    let open_target: String = row.get(8)?;
    Ok(VisitNode {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        favicon: row.get(3)?,
        tab_id: row.get(4)?,
        session_id: row.get(5)?,
        parent_id: row.get(6)?,
        navigation_type: NavigationType::from_str(&navigation_type)
            .ok_or_else(|| conversion_error(7, "unknown navigation type"))?,
        open_target: OpenTarget::from_str(&open_target)
            .ok_or_else(|| conversion_error(8, "unknown open target"))?,
        frame_id: row.get(9)?,
        parent_frame_id: row.get(10)?,
        first_visit: column_time(row, 11)?,
        last_visit: column_time(row, 12)?,
        visit_count: row.get(13)?,
        reload_count: row.get(14)?,
        load_time: row.get::<_, i64>(15)?.max(0) as u64,
        active_time: row.get::<_, i64>(16)?.max(0) as u64,
        is_closed: row.get(17)?,
    })
}

fn read_edge(row: &Row<'_>) -> rusqlite::Result<NavEdge> {
    let action: String = row.get(4)?;
    Ok(NavEdge {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        timestamp: column_time(row, 3)?,
        action: NavigationType::from_str(&action)
            .ok_or_else(|| conversion_error(4, "unknown navigation type"))?,
        sequence: row.get::<_, i64>(5)?.max(0) as u64,
        session_id: row.get(6)?,
    })
}

fn column_time(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(index)?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| conversion_error(index, "timestamp out of range"))
}

fn conversion_error(index: usize, message: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.to_string().into())
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, String> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| format!("Timestamp out of range: {}", millis))
}
