/*
 * Provgraph Pipeline - Experiment Job Execution
 *
 * Runs experiment jobs against provenance storage with durable staging.
 *
 * Architecture:
 * - Recorded Actions (what a job did, as inputs/outputs/params)
 * - XAR Documents (serialized run archives, atomic staged writes)
 * - Staging Protocol (insert -> reimport -> promote, crash-resumable)
 * - Job State Machine (queued/running + three terminal states)
 * - Cooperative Cancellation (token polls between macro-steps)
 */

// Public modules
pub mod action;
pub mod error;
pub mod job;
pub mod runner;
pub mod staging;
pub mod xar;

// Re-exports
pub use action::{
    DataFile, ParamValueType, ParameterType, RecordedAction, RecordedActionSet,
};
pub use error::{FailureDisposition, PipelineError, Result};
pub use job::{JobState, JobStateMachine, PipelineJob};
pub use runner::{ExperimentJob, JobOutcome, PipelineWork};
pub use staging::{ProvenanceEdgeImporter, StagingOutcome, XarImporter, XarStagingProtocol};
pub use xar::{
    read_document, write_document, ProtocolDescription, RunDescription, StagePhase, StagedPaths,
    XarDocument, STAGED_EXTENSION, XAR_FORMAT_VERSION,
};
