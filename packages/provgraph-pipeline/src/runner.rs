//! Experiment job runner
//!
//! Wraps one unit of pipeline work in the full job lifecycle: run the
//! work to collect recorded actions, stage the resulting XAR document,
//! attach the run to its batch, and land the job in exactly one terminal
//! state. Errors never escape `execute`; they become an `Error` state on
//! the returned job.

use crate::action::RecordedActionSet;
use crate::error::Result;
use crate::job::{JobStateMachine, PipelineJob};
use crate::staging::{StagingOutcome, XarStagingProtocol};
use crate::xar::{ProtocolDescription, RunDescription, StagedPaths, XarDocument};
use async_trait::async_trait;
use provgraph_storage::{lsid_for, ExperimentBatch, ProvenanceStore};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// The domain work a job performs, yielding the actions to record.
///
/// Implementations should poll `cancel` at convenient points and return
/// early with whatever they have; the runner re-checks the token before
/// any run is inserted.
#[async_trait]
pub trait PipelineWork: Send + Sync {
    async fn run(&self, cancel: &CancellationToken) -> Result<RecordedActionSet>;
}

/// Terminal result of one job execution.
#[derive(Debug)]
pub struct JobOutcome {
    /// The job with its terminal state applied.
    pub job: PipelineJob,
    /// LSID of the committed run, when one was promoted.
    pub run_lsid: Option<String>,
    /// Actions the work recorded, even when the job did not complete.
    pub actions: RecordedActionSet,
}

/// One experiment job bound to a store, a protocol, and a staging area.
pub struct ExperimentJob<S> {
    store: Arc<S>,
    job: PipelineJob,
    run: RunDescription,
    protocol: ProtocolDescription,
    staging: XarStagingProtocol<S>,
    batch: Option<ExperimentBatch>,
}

impl<S: ProvenanceStore> ExperimentJob<S> {
    /// Create a queued job. The staged file pair is derived from the job
    /// id, so concurrent jobs never share staged paths.
    pub fn new(
        store: Arc<S>,
        analysis_dir: &Path,
        name: impl Into<String>,
        protocol: ProtocolDescription,
    ) -> Self {
        Self::from_job(store, analysis_dir, PipelineJob::new_queued(name, None), protocol)
    }

    /// Re-create the wrapper for a job whose previous attempt died. The
    /// staged paths and the run LSID derive from the job id, so the
    /// resumed job re-enters the staging protocol wherever the prior
    /// attempt stopped instead of orphaning its run.
    pub fn resume(
        store: Arc<S>,
        analysis_dir: &Path,
        job_id: Uuid,
        name: impl Into<String>,
        protocol: ProtocolDescription,
    ) -> Self {
        let job = PipelineJob::new_queued(name, None).with_id(job_id);
        Self::from_job(store, analysis_dir, job, protocol)
    }

    fn from_job(
        store: Arc<S>,
        analysis_dir: &Path,
        job: PipelineJob,
        protocol: ProtocolDescription,
    ) -> Self {
        let run = RunDescription {
            lsid: lsid_for("Run", &format!("job-{}", job.id)),
            name: job.name.clone(),
            job_id: Some(job.id),
        };
        let paths = StagedPaths::new(analysis_dir, &format!("job-{}", job.id));
        let staging = XarStagingProtocol::new(Arc::clone(&store), paths);
        Self {
            store,
            job,
            run,
            protocol,
            staging,
            batch: None,
        }
    }

    /// The staged file pair this job's run is materialized through.
    pub fn staged_paths(&self) -> &StagedPaths {
        self.staging.paths()
    }

    /// Attach the eventual run to this batch. If the batch is missing or
    /// deleted at attach time it is saved again, which re-saves its
    /// properties.
    pub fn with_batch(mut self, batch: ExperimentBatch) -> Self {
        self.job.batch_lsid = Some(batch.lsid.clone());
        self.batch = Some(batch);
        self
    }

    pub fn job(&self) -> &PipelineJob {
        &self.job
    }

    pub fn run_lsid(&self) -> &str {
        &self.run.lsid
    }

    /// Handle for requesting cancellation while `execute` is in flight.
    pub fn cancel_token(&self) -> CancellationToken {
        self.job.cancel_token()
    }

    /// Run the job to a terminal state. Never returns an error: failures
    /// are recorded on the job itself.
    pub async fn execute(self, work: &dyn PipelineWork) -> JobOutcome {
        let Self {
            store,
            job,
            run,
            protocol,
            staging,
            batch,
        } = self;

        let cancel = job.cancel_token();
        let mut machine = JobStateMachine::new(job);
        let mut actions = RecordedActionSet::new();
        let mut run_lsid = None;

        let result: Result<bool> = async {
            machine.start()?;
            info!(job = %machine.job().id, name = %machine.job().name, "job started");

            actions = work.run(&cancel).await?;
            if cancel.is_cancelled() {
                return Ok(false);
            }

            let doc = XarDocument::new(run, protocol, actions.clone());
            match staging.execute(&doc, &cancel).await? {
                StagingOutcome::Cancelled => Ok(false),
                StagingOutcome::Promoted { run_lsid: lsid } => {
                    attach_batch(store.as_ref(), batch.as_ref(), &lsid)?;
                    run_lsid = Some(lsid);
                    Ok(true)
                }
            }
        }
        .await;

        let transition = match result {
            Ok(true) => {
                info!(
                    job = %machine.job().id,
                    actions = actions.len(),
                    "job complete"
                );
                machine.complete(actions.len())
            }
            Ok(false) => {
                info!(job = %machine.job().id, "job cancelled");
                machine.cancel("cancel requested".to_string())
            }
            Err(e) => {
                error!(job = %machine.job().id, error = %e, "job failed");
                let disposition = e.disposition();
                machine.fail(e.to_string(), disposition)
            }
        };
        if let Err(e) = transition {
            error!(job = %machine.job().id, error = %e, "terminal transition rejected");
        }

        JobOutcome {
            job: machine.into_job(),
            run_lsid,
            actions,
        }
    }
}

fn attach_batch(
    store: &dyn ProvenanceStore,
    batch: Option<&ExperimentBatch>,
    run_lsid: &str,
) -> Result<()> {
    let Some(batch) = batch else {
        return Ok(());
    };
    // A missing or soft-deleted batch is recreated from the caller's copy,
    // which re-saves its properties and clears the deleted marker.
    if store.get_batch(&batch.lsid)?.is_none() {
        info!(batch = %batch.lsid, "recreating batch before attach");
        store.save_batch(batch)?;
    }
    store.attach_run_to_batch(run_lsid, &batch.lsid)?;
    Ok(())
}
