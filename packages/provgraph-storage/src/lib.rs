//! Experiment provenance storage: lineage graph + query compilation
//!
//! ## Core Principles
//!
//! 1. **Append-only lineage**: edges are only ever added; runs are removed
//!    whole (compensating deletion), nodes and batches soft-delete
//! 2. **Graph rebuilt on demand**: the in-memory `LineageGraph` is derived
//!    from persisted edge records, not held as global mutable state
//! 3. **Defensive queries**: unknown lineage seeds degrade to empty
//!    results / unsatisfiable predicates, never to "all rows" or an error
//!
//! ## Usage
//!
//! ```rust,ignore
//! use provgraph_storage::{
//!     compile_lineage_filter, LineageDirection, LineageGraph, LineageQuery,
//!     ProvenanceStore, SqliteProvenanceStore,
//! };
//!
//! let store = SqliteProvenanceStore::new_in_memory()?;
//!
//! // In-memory traversal over persisted edges
//! let graph = LineageGraph::from_edges(store.edges()?);
//! let descendants = graph.traverse(&run_lsid, LineageOptions::descendants(Some(2)));
//!
//! // Or compiled into a composable SQL predicate
//! let query = LineageQuery::new(&run_lsid, LineageDirection::Descendants, 2);
//! let fragment = compile_lineage_filter(&store, "lsid", &query)?;
//! ```

pub mod domain;
pub mod error;
pub mod lineage;
pub mod query;

#[cfg(feature = "sqlite")]
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

// Domain re-exports
pub use domain::{
    lsid_for, new_lsid, ExperimentBatch, ExperimentRun, NodeKind, Protocol, ProvEdge, ProvNode,
    ProvenanceStore, ROLE_INPUT, ROLE_OUTPUT,
};

// Lineage re-exports
pub use lineage::{LineageDirection, LineageGraph, LineageOptions, LineageQuery};
pub use query::{compile_lineage_filter, SqlFragment, SqlParam, MAX_TRAVERSAL_DEPTH};

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteProvenanceStore;
