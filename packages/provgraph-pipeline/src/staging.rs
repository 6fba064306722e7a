//! XAR staging protocol
//!
//! A run becomes durable in three observable steps, each marked on the
//! filesystem so a restarted job can resume without repeating work:
//!
//! 1. Protocol + run rows are inserted and the XAR document is serialized
//!    to the `.loading` path, all inside one storage transaction.
//! 2. The document is reimported: data nodes and provenance edges are
//!    derived from its recorded actions. Reimport is idempotent.
//! 3. The `.loading` file is atomically promoted to its permanent name.
//!
//! On entry the protocol inspects the staged files and re-enters at the
//! first incomplete step. Cancellation is polled between steps; once the
//! run row is committed, honoring a cancel requires compensating deletion
//! of the run and its staged files.

use crate::error::{PipelineError, Result};
use crate::xar::{self, StagePhase, StagedPaths, XarDocument};
use async_trait::async_trait;
use provgraph_storage::{
    NodeKind, ProvEdge, ProvNode, Protocol, ExperimentRun, ProvenanceStore, StorageError,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Terminal result of one staging pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingOutcome {
    /// The run is fully committed and its document carries the permanent name.
    Promoted { run_lsid: String },
    /// A cancel request was honored; any committed run row was deleted.
    Cancelled,
}

/// Materializes a XAR document's contents into provenance storage.
///
/// Implementations must be idempotent: the protocol re-runs import on
/// every resume, including after the run is already permanent.
#[async_trait]
pub trait XarImporter: Send + Sync {
    async fn import(&self, doc: &XarDocument, store: &dyn ProvenanceStore) -> Result<()>;
}

/// Default importer: every recorded action's inputs and outputs become
/// data nodes, linked to the run node through role-labeled edges.
/// Inputs point at the run; the run points at outputs.
#[derive(Debug, Default)]
pub struct ProvenanceEdgeImporter;

#[async_trait]
impl XarImporter for ProvenanceEdgeImporter {
    async fn import(&self, doc: &XarDocument, store: &dyn ProvenanceStore) -> Result<()> {
        let run_lsid = &doc.run.lsid;

        for action in doc.actions.actions() {
            for input in action.inputs() {
                store.insert_node(&ProvNode::new(&input.uri, NodeKind::Data, &input.uri))?;
                store.insert_edge(&ProvEdge::new(&input.uri, run_lsid, &input.role))?;
            }
            for output in action.outputs() {
                store.insert_node(&ProvNode::new(&output.uri, NodeKind::Data, &output.uri))?;
                store.insert_edge(&ProvEdge::new(run_lsid, &output.uri, &output.role))?;
            }
        }

        debug!(run = %run_lsid, actions = doc.actions.len(), "reimport complete");
        Ok(())
    }
}

/// Drives one run through insert, reimport, and promotion.
pub struct XarStagingProtocol<S> {
    store: Arc<S>,
    importer: Arc<dyn XarImporter>,
    paths: StagedPaths,
}

impl<S: ProvenanceStore> XarStagingProtocol<S> {
    pub fn new(store: Arc<S>, paths: StagedPaths) -> Self {
        Self {
            store,
            importer: Arc::new(ProvenanceEdgeImporter),
            paths,
        }
    }

    pub fn with_importer(store: Arc<S>, paths: StagedPaths, importer: Arc<dyn XarImporter>) -> Self {
        Self {
            store,
            importer,
            paths,
        }
    }

    pub fn paths(&self) -> &StagedPaths {
        &self.paths
    }

    /// Run the protocol to completion, resuming from whatever a previous
    /// attempt left behind.
    ///
    /// Errors during reimport are retryable: the run row and `.loading`
    /// file stay in place so a later pass re-enters at reimport. Errors
    /// during serialization roll the run insert back and leave no staged
    /// file.
    pub async fn execute(
        &self,
        doc: &XarDocument,
        cancel: &CancellationToken,
    ) -> Result<StagingOutcome> {
        if cancel.is_cancelled() {
            info!(run = %doc.run.lsid, "cancel honored before staging began");
            return Ok(StagingOutcome::Cancelled);
        }

        // A crash between the loading-file rename and the transaction
        // commit leaves a file without run rows; treat that as not started
        // and redo the insert, which rewrites the file.
        let phase = match self.paths.detect_phase() {
            StagePhase::TempStaged if !self.store.run_exists(&doc.run.lsid)? => {
                warn!(run = %doc.run.lsid, "staged file found without run rows, restarting");
                StagePhase::NotStarted
            }
            phase => phase,
        };

        match phase {
            StagePhase::Promoted => {
                // The run is already permanent; only the idempotent
                // reimport is repeated.
                info!(run = %doc.run.lsid, "resuming promoted run, reimporting");
                let staged = xar::read_document(self.paths.permanent())?;
                self.reimport(&staged).await?;
                Ok(StagingOutcome::Promoted {
                    run_lsid: staged.run.lsid,
                })
            }
            StagePhase::TempStaged => {
                info!(run = %doc.run.lsid, "resuming from staged file");
                let staged = xar::read_document(self.paths.loading())?;
                self.finish(&staged, cancel).await
            }
            StagePhase::NotStarted => {
                self.insert_and_stage(doc)?;
                if cancel.is_cancelled() {
                    return self.compensate(&doc.run.lsid);
                }
                self.finish(doc, cancel).await
            }
        }
    }

    /// Step 1: protocol + run rows and the staged document, one transaction.
    fn insert_and_stage(&self, doc: &XarDocument) -> Result<()> {
        let mut run = ExperimentRun::new(&doc.run.lsid, &doc.run.name, &doc.protocol.lsid);
        run.job_id = doc.run.job_id;
        let protocol = Protocol::new(&doc.protocol.lsid, &doc.protocol.name);

        let mut stage_err: Option<PipelineError> = None;
        let result = self.store.create_run_staged(&run, &protocol, &mut || {
            match xar::write_document(doc, self.paths.loading()) {
                Ok(()) => Ok(()),
                Err(e) => {
                    let msg = e.to_string();
                    stage_err = Some(e);
                    Err(StorageError::transaction(msg))
                }
            }
        });

        // Surface the original serialization error, not its transaction
        // wrapper, so the caller sees a fatal disposition.
        if let Some(e) = stage_err {
            return Err(e);
        }
        result?;
        info!(run = %doc.run.lsid, path = %self.paths.loading().display(), "run staged");
        Ok(())
    }

    /// Steps 2 and 3: reimport, final cancel poll, promote.
    async fn finish(&self, doc: &XarDocument, cancel: &CancellationToken) -> Result<StagingOutcome> {
        self.reimport(doc).await?;

        if cancel.is_cancelled() {
            return self.compensate(&doc.run.lsid);
        }

        self.paths.promote()?;
        info!(run = %doc.run.lsid, path = %self.paths.permanent().display(), "run promoted");
        Ok(StagingOutcome::Promoted {
            run_lsid: doc.run.lsid.clone(),
        })
    }

    async fn reimport(&self, doc: &XarDocument) -> Result<()> {
        self.importer
            .import(doc, self.store.as_ref())
            .await
            .map_err(|e| PipelineError::reimport(e.to_string()))
    }

    /// Honor a cancel after the run row is committed: delete the run, its
    /// node and edges, and the staged files.
    fn compensate(&self, run_lsid: &str) -> Result<StagingOutcome> {
        warn!(run = %run_lsid, "cancel honored, deleting staged run");
        self.store.delete_run(run_lsid)?;
        self.paths.remove_staged()?;
        Ok(StagingOutcome::Cancelled)
    }
}
