//! SQLite adapter for `ProvenanceStore`
//!
//! Schema:
//! - `prov_node`: graph nodes (runs, data, materials), soft-deletable
//! - `prov_edge`: append-only lineage edges, `(from, to, role)` primary key
//! - `exp_protocol` / `exp_run`: run records created transactionally
//! - `exp_batch`: batch records with saved properties, soft-deletable
//!
//! `create_run_staged` is the two-phase-commit half of the XAR staging
//! protocol: record inserts and the staging closure share one transaction.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use crate::domain::{
    ExperimentBatch, ExperimentRun, NodeKind, Protocol, ProvEdge, ProvNode, ProvenanceStore,
};
use crate::query::SqlFragment;
use crate::{Result, StorageError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS prov_node (
    lsid        TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    deleted     INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_prov_node_name ON prov_node(name);

CREATE TABLE IF NOT EXISTS prov_edge (
    from_lsid   TEXT NOT NULL,
    to_lsid     TEXT NOT NULL,
    role        TEXT NOT NULL,
    PRIMARY KEY (from_lsid, to_lsid, role)
);
CREATE INDEX IF NOT EXISTS idx_prov_edge_to ON prov_edge(to_lsid);

CREATE TABLE IF NOT EXISTS exp_protocol (
    lsid        TEXT PRIMARY KEY,
    name        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS exp_run (
    lsid          TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    protocol_lsid TEXT NOT NULL,
    batch_lsid    TEXT,
    job_id        TEXT,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS exp_batch (
    lsid        TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    properties  TEXT NOT NULL DEFAULT 'null',
    deleted     INTEGER NOT NULL DEFAULT 0
);
";

/// SQLite-backed provenance store.
pub struct SqliteProvenanceStore {
    conn: Mutex<Connection>,
}

impl SqliteProvenanceStore {
    /// Open an in-memory store (tests, scratch analyses).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProvNode> {
        let kind_str: String = row.get(1)?;
        let kind = NodeKind::parse(&kind_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(ProvNode {
            lsid: row.get(0)?,
            kind,
            name: row.get(2)?,
            created_at: row.get::<_, DateTime<Utc>>(3)?,
            deleted: row.get::<_, i64>(4)? != 0,
        })
    }

    fn query_node(&self, sql: &str, param: &str) -> Result<Option<ProvNode>> {
        let conn = self.conn.lock();
        let node = conn
            .query_row(sql, params![param], Self::row_to_node)
            .optional()?;
        Ok(node)
    }

    /// Run a compiled lineage fragment against the node table, returning
    /// matching LSIDs. This is the simplest embedding of a compiled filter.
    pub fn select_node_lsids_where(&self, fragment: &SqlFragment) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT lsid FROM prov_node WHERE {} ORDER BY lsid",
            fragment.sql
        );
        self.select_lsids(&sql, &fragment.rusqlite_params())
    }

    /// Execute an arbitrary caller-composed query returning LSID rows.
    pub fn select_lsids(&self, sql: &str, params: &[rusqlite::types::Value]) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            row.get::<_, String>(0)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl ProvenanceStore for SqliteProvenanceStore {
    fn insert_node(&self, node: &ProvNode) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO prov_node (lsid, kind, name, created_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                node.lsid,
                node.kind.as_str(),
                node.name,
                node.created_at,
                node.deleted as i64
            ],
        )?;
        Ok(())
    }

    fn get_node(&self, lsid: &str) -> Result<Option<ProvNode>> {
        self.query_node(
            "SELECT lsid, kind, name, created_at, deleted FROM prov_node WHERE lsid = ?1",
            lsid,
        )
    }

    fn resolve_node(&self, value: &str) -> Result<Option<ProvNode>> {
        if let Some(node) = self.query_node(
            "SELECT lsid, kind, name, created_at, deleted
             FROM prov_node WHERE lsid = ?1 AND deleted = 0",
            value,
        )? {
            return Ok(Some(node));
        }

        self.query_node(
            "SELECT lsid, kind, name, created_at, deleted
             FROM prov_node WHERE name = ?1 AND deleted = 0
             ORDER BY lsid LIMIT 1",
            value,
        )
    }

    fn soft_delete_node(&self, lsid: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE prov_node SET deleted = 1 WHERE lsid = ?1",
            params![lsid],
        )?;
        if changed == 0 {
            return Err(StorageError::node_not_found(lsid));
        }
        Ok(())
    }

    fn insert_edge(&self, edge: &ProvEdge) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO prov_edge (from_lsid, to_lsid, role) VALUES (?1, ?2, ?3)",
            params![edge.from_lsid, edge.to_lsid, edge.role],
        )?;
        Ok(())
    }

    fn edges(&self) -> Result<Vec<ProvEdge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT from_lsid, to_lsid, role FROM prov_edge")?;
        let rows = stmt.query_map([], |row| {
            Ok(ProvEdge {
                from_lsid: row.get(0)?,
                to_lsid: row.get(1)?,
                role: row.get(2)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn create_run_staged(
        &self,
        run: &ExperimentRun,
        protocol: &Protocol,
        stage: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| StorageError::transaction(format!("begin failed: {}", e)))?;

        tx.execute(
            "INSERT OR IGNORE INTO exp_protocol (lsid, name) VALUES (?1, ?2)",
            params![protocol.lsid, protocol.name],
        )?;

        tx.execute(
            "INSERT INTO prov_node (lsid, kind, name, created_at, deleted)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![run.lsid, NodeKind::Run.as_str(), run.name, run.created_at],
        )?;

        tx.execute(
            "INSERT INTO exp_run (lsid, name, protocol_lsid, batch_lsid, job_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.lsid,
                run.name,
                run.protocol_lsid,
                run.batch_lsid,
                run.job_id.map(|id| id.to_string()),
                run.created_at
            ],
        )?;

        // Staging (XAR serialization) happens inside the transaction
        // window; a staging failure unwinds the inserts above.
        stage()?;

        tx.commit()
            .map_err(|e| StorageError::transaction(format!("commit failed: {}", e)))?;
        Ok(())
    }

    fn get_run(&self, lsid: &str) -> Result<Option<ExperimentRun>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT lsid, name, protocol_lsid, batch_lsid, job_id, created_at
                 FROM exp_run WHERE lsid = ?1",
                params![lsid],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, DateTime<Utc>>(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((lsid, name, protocol_lsid, batch_lsid, job_id, created_at)) => {
                let job_id = job_id
                    .map(|s| {
                        Uuid::parse_str(&s).map_err(|e| {
                            StorageError::serialization(format!("bad job id {:?}: {}", s, e))
                        })
                    })
                    .transpose()?;
                Ok(Some(ExperimentRun {
                    lsid,
                    name,
                    protocol_lsid,
                    batch_lsid,
                    job_id,
                    created_at,
                }))
            }
        }
    }

    fn run_exists(&self, lsid: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM exp_run WHERE lsid = ?1",
            params![lsid],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn delete_run(&self, lsid: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| StorageError::transaction(format!("begin failed: {}", e)))?;

        // Outputs of this run, so orphaned output nodes can be removed once
        // their edges are gone.
        let outputs: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT to_lsid FROM prov_edge WHERE from_lsid = ?1")?;
            let rows = stmt.query_map(params![lsid], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        tx.execute("DELETE FROM exp_run WHERE lsid = ?1", params![lsid])?;
        tx.execute(
            "DELETE FROM prov_edge WHERE from_lsid = ?1 OR to_lsid = ?1",
            params![lsid],
        )?;
        tx.execute("DELETE FROM prov_node WHERE lsid = ?1", params![lsid])?;

        for output in outputs {
            tx.execute(
                "DELETE FROM prov_node WHERE lsid = ?1
                 AND NOT EXISTS (SELECT 1 FROM prov_edge WHERE from_lsid = ?1 OR to_lsid = ?1)",
                params![output],
            )?;
        }

        tx.commit()
            .map_err(|e| StorageError::transaction(format!("commit failed: {}", e)))?;
        Ok(())
    }

    fn save_batch(&self, batch: &ExperimentBatch) -> Result<()> {
        let properties = serde_json::to_string(&batch.properties)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO exp_batch (lsid, name, properties, deleted)
             VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(lsid) DO UPDATE SET
                 name = excluded.name,
                 properties = excluded.properties,
                 deleted = 0",
            params![batch.lsid, batch.name, properties],
        )?;
        Ok(())
    }

    fn get_batch(&self, lsid: &str) -> Result<Option<ExperimentBatch>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT lsid, name, properties, deleted FROM exp_batch
                 WHERE lsid = ?1 AND deleted = 0",
                params![lsid],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((lsid, name, properties)) => Ok(Some(ExperimentBatch {
                lsid,
                name,
                properties: serde_json::from_str(&properties)?,
                deleted: false,
            })),
        }
    }

    fn delete_batch(&self, lsid: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE exp_batch SET deleted = 1 WHERE lsid = ?1",
            params![lsid],
        )?;
        if changed == 0 {
            return Err(StorageError::batch_not_found(lsid));
        }
        Ok(())
    }

    fn attach_run_to_batch(&self, run_lsid: &str, batch_lsid: &str) -> Result<()> {
        let conn = self.conn.lock();

        let batch_live: i64 = conn.query_row(
            "SELECT COUNT(*) FROM exp_batch WHERE lsid = ?1 AND deleted = 0",
            params![batch_lsid],
            |row| row.get(0),
        )?;
        if batch_live == 0 {
            return Err(StorageError::batch_not_found(batch_lsid));
        }

        let changed = conn.execute(
            "UPDATE exp_run SET batch_lsid = ?2 WHERE lsid = ?1",
            params![run_lsid, batch_lsid],
        )?;
        if changed == 0 {
            return Err(StorageError::run_not_found(run_lsid));
        }
        Ok(())
    }
}
