//! Domain layer for the experiment provenance store
//!
//! # Core Principles
//!
//! 1. **Stable Identity**: every provenance object carries an LSID-style
//!    string identifier that never changes once assigned
//! 2. **Append-only Edges**: lineage edges are only ever added, never
//!    updated; deletion happens through run deletion
//! 3. **Soft Delete**: nodes and batches are marked deleted, not removed,
//!    so historical lineage stays resolvable
//!
//! # Domain Models
//!
//! - `ProvNode`: a run, data object, or material in the provenance graph
//! - `ProvEdge`: typed `(from, to, role)` lineage edge
//! - `ExperimentRun` / `Protocol`: one executed run and its protocol record
//! - `ExperimentBatch`: grouping a set of runs, with saved properties
//!
//! # Port Trait
//!
//! - `ProvenanceStore`: primary storage abstraction; `create_run_staged`
//!   is the transactional unit of work used by the XAR staging protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Edge role used for run inputs.
pub const ROLE_INPUT: &str = "input";
/// Edge role used for run outputs.
pub const ROLE_OUTPUT: &str = "output";

/// Build a new LSID-style identifier under the given namespace.
///
/// # Examples
///
/// ```rust
/// use provgraph_storage::domain::new_lsid;
///
/// let lsid = new_lsid("Data");
/// assert!(lsid.starts_with("urn:lsid:provgraph:Data:"));
/// ```
pub fn new_lsid(namespace: &str) -> String {
    format!("urn:lsid:provgraph:{}:{}", namespace, Uuid::new_v4())
}

/// Build an LSID from a namespace plus a caller-chosen object id.
///
/// Used where the identifier must be derivable from job-specific inputs
/// (e.g. the run created for a pipeline job).
pub fn lsid_for(namespace: &str, object_id: &str) -> String {
    format!("urn:lsid:provgraph:{}:{}", namespace, object_id)
}

/// What a provenance node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Run,
    Data,
    Material,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Run => "run",
            NodeKind::Data => "data",
            NodeKind::Material => "material",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "run" => Ok(NodeKind::Run),
            "data" => Ok(NodeKind::Data),
            "material" => Ok(NodeKind::Material),
            _ => Err(crate::StorageError::serialization(format!(
                "Invalid node kind: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A node in the provenance graph (run, data object, or material).
///
/// Immutable once created; `deleted` is the soft-delete marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvNode {
    /// Stable LSID-style identifier
    pub lsid: String,
    /// Node kind
    pub kind: NodeKind,
    /// Display name (resolvable as a lineage seed)
    pub name: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker
    #[serde(default)]
    pub deleted: bool,
}

impl ProvNode {
    pub fn new(lsid: impl Into<String>, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            lsid: lsid.into(),
            kind,
            name: name.into(),
            created_at: Utc::now(),
            deleted: false,
        }
    }
}

/// A typed, append-only lineage edge.
///
/// `role` is free text describing the edge's semantic purpose
/// ("input", "output", "transform output", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProvEdge {
    pub from_lsid: String,
    pub to_lsid: String,
    pub role: String,
}

impl ProvEdge {
    pub fn new(
        from_lsid: impl Into<String>,
        to_lsid: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            from_lsid: from_lsid.into(),
            to_lsid: to_lsid.into(),
            role: role.into(),
        }
    }
}

/// Protocol record describing how a run was executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub lsid: String,
    pub name: String,
}

impl Protocol {
    pub fn new(lsid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            lsid: lsid.into(),
            name: name.into(),
        }
    }
}

/// One executed experiment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRun {
    pub lsid: String,
    pub name: String,
    pub protocol_lsid: String,
    /// Batch this run is attached to, if any
    pub batch_lsid: Option<String>,
    /// Pipeline job that created this run, if any
    pub job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ExperimentRun {
    pub fn new(
        lsid: impl Into<String>,
        name: impl Into<String>,
        protocol_lsid: impl Into<String>,
    ) -> Self {
        Self {
            lsid: lsid.into(),
            name: name.into(),
            protocol_lsid: protocol_lsid.into(),
            batch_lsid: None,
            job_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

/// A batch grouping a set of runs, with caller-saved properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentBatch {
    pub lsid: String,
    pub name: String,
    /// Batch-level properties, re-saved on batch recreation
    #[serde(default)]
    pub properties: serde_json::Value,
    /// Soft-delete marker
    #[serde(default)]
    pub deleted: bool,
}

impl ExperimentBatch {
    pub fn new(lsid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            lsid: lsid.into(),
            name: name.into(),
            properties: serde_json::Value::Null,
            deleted: false,
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Experiment provenance storage abstraction.
///
/// # Core Operations
///
/// 1. **Node Management**
///    - `insert_node` (idempotent), `get_node`, `resolve_node`,
///      `soft_delete_node`
///
/// 2. **Edge Management**
///    - `insert_edge` (idempotent, append-only), `edges`
///
/// 3. **Run Management**
///    - `create_run_staged`: the transactional unit of work. Protocol and
///      run records are inserted, the supplied staging closure runs (the
///      XAR serialization step), and only then does the transaction commit.
///      Any failure unwinds cleanly with no partial insert visible.
///    - `get_run`, `run_exists`, `delete_run` (compensating deletion)
///
/// 4. **Batch Management**
///    - `save_batch` (upsert, re-saves properties), `get_batch`,
///      `delete_batch` (soft), `attach_run_to_batch`
///
/// # Implementations
///
/// - `SqliteProvenanceStore`: SQLite adapter behind the `sqlite` feature
pub trait ProvenanceStore: Send + Sync {
    // Node operations

    /// Insert a node. Inserting the same LSID twice is a no-op.
    fn insert_node(&self, node: &ProvNode) -> Result<()>;

    /// Get a node by LSID (including soft-deleted nodes).
    fn get_node(&self, lsid: &str) -> Result<Option<ProvNode>>;

    /// Resolve a lineage seed value to a node: exact LSID match first,
    /// then name match. Soft-deleted nodes do not resolve.
    fn resolve_node(&self, value: &str) -> Result<Option<ProvNode>>;

    /// Mark a node deleted without removing it.
    fn soft_delete_node(&self, lsid: &str) -> Result<()>;

    // Edge operations

    /// Append an edge. Re-inserting an identical `(from, to, role)` triple
    /// is a no-op.
    fn insert_edge(&self, edge: &ProvEdge) -> Result<()>;

    /// All persisted edges, for building an in-memory lineage graph.
    fn edges(&self) -> Result<Vec<ProvEdge>>;

    // Run operations

    /// Create protocol + run records and run the staging closure inside a
    /// single transaction. Commits only if the closure succeeds; a closure
    /// error rolls every insert back.
    fn create_run_staged(
        &self,
        run: &ExperimentRun,
        protocol: &Protocol,
        stage: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()>;

    fn get_run(&self, lsid: &str) -> Result<Option<ExperimentRun>>;

    fn run_exists(&self, lsid: &str) -> Result<bool>;

    /// Delete a run, its graph node, and every edge touching it.
    /// Used for compensating deletion after cancellation.
    fn delete_run(&self, lsid: &str) -> Result<()>;

    // Batch operations

    /// Insert or update a batch; an update re-saves its properties and
    /// clears the deleted marker.
    fn save_batch(&self, batch: &ExperimentBatch) -> Result<()>;

    /// Get a batch by LSID. Soft-deleted batches return `None`.
    fn get_batch(&self, lsid: &str) -> Result<Option<ExperimentBatch>>;

    /// Soft-delete a batch.
    fn delete_batch(&self, lsid: &str) -> Result<()>;

    /// Attach an existing run to an existing batch.
    fn attach_run_to_batch(&self, run_lsid: &str, batch_lsid: &str) -> Result<()>;
}
