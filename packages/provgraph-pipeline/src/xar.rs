//! XAR document model and staged-file layout
//!
//! The XAR (experiment archive) document is the serialized description of
//! one run: its protocol, and the recorded actions whose inputs/outputs
//! become provenance edges on import. Staged files live under a
//! job-specific analysis directory:
//!
//! - `<base>.xar.json`: permanent, the run is fully committed
//! - `<base>.xar.json.loading`: temp, DB insert done, heavy import may be
//!   incomplete
//! - `<base>.xar.json.loading.temp`: write scratch, never read
//!
//! Document writes go to the scratch name first and are renamed into place
//! so an observer never reads a partially-written staged file.

use crate::action::RecordedActionSet;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const XAR_FORMAT_VERSION: u32 = 1;

/// Staged file extension for serialized run documents.
pub const STAGED_EXTENSION: &str = "xar.json";

const LOADING_SUFFIX: &str = ".loading";
const SCRATCH_SUFFIX: &str = ".temp";

/// Run metadata inside a XAR document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDescription {
    pub lsid: String,
    pub name: String,
    pub job_id: Option<Uuid>,
}

/// Protocol metadata inside a XAR document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDescription {
    pub lsid: String,
    pub name: String,
}

/// A serialized experiment archive: one run, its protocol, and the
/// recorded actions to import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XarDocument {
    pub format_version: u32,
    pub run: RunDescription,
    pub protocol: ProtocolDescription,
    pub actions: RecordedActionSet,
}

impl XarDocument {
    pub fn new(
        run: RunDescription,
        protocol: ProtocolDescription,
        actions: RecordedActionSet,
    ) -> Self {
        Self {
            format_version: XAR_FORMAT_VERSION,
            run,
            protocol,
            actions,
        }
    }
}

/// How far a previous staging attempt progressed, read off the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    /// Neither staged file exists
    NotStarted,
    /// Loading file present: DB insert already happened
    TempStaged,
    /// Permanent file present: run fully materialized
    Promoted,
}

/// The staged file pair owned by one job for the duration of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPaths {
    permanent: PathBuf,
    loading: PathBuf,
}

impl StagedPaths {
    /// Derive the staged pair for a job-specific base name inside its
    /// analysis directory. Distinct jobs get distinct paths by
    /// construction.
    pub fn new(analysis_dir: &Path, base: &str) -> Self {
        let permanent = analysis_dir.join(format!("{}.{}", base, STAGED_EXTENSION));
        let loading = analysis_dir.join(format!(
            "{}.{}{}",
            base, STAGED_EXTENSION, LOADING_SUFFIX
        ));
        Self { permanent, loading }
    }

    pub fn permanent(&self) -> &Path {
        &self.permanent
    }

    pub fn loading(&self) -> &Path {
        &self.loading
    }

    /// Check file presence to decide where to re-enter the protocol.
    /// The permanent file wins if both somehow exist.
    pub fn detect_phase(&self) -> StagePhase {
        if self.permanent.exists() {
            StagePhase::Promoted
        } else if self.loading.exists() {
            StagePhase::TempStaged
        } else {
            StagePhase::NotStarted
        }
    }

    /// Atomically promote the loading file to its permanent name.
    pub fn promote(&self) -> Result<()> {
        fs::rename(&self.loading, &self.permanent)?;
        Ok(())
    }

    /// Remove any staged files; used by compensating deletion so a later
    /// restart does not mistake the job for partially complete.
    pub fn remove_staged(&self) -> Result<()> {
        for path in [&self.loading, &self.permanent] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn scratch_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(SCRATCH_SUFFIX);
    PathBuf::from(name)
}

/// Serialize a XAR document to `target`, via scratch file + atomic rename.
pub fn write_document(doc: &XarDocument, target: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(doc).map_err(PipelineError::serialization)?;

    let scratch = scratch_path(target);
    fs::write(&scratch, json)?;
    fs::rename(&scratch, target)?;
    Ok(())
}

/// Read a previously staged XAR document.
pub fn read_document(path: &Path) -> Result<XarDocument> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(PipelineError::serialization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{RecordedAction, RecordedActionSet};

    fn sample_doc() -> XarDocument {
        let mut action = RecordedAction::new("upload");
        action.add_input("file:///data/plate.tsv", "data");
        action.add_output("file:///out/result.tsv", "result", false);

        let mut actions = RecordedActionSet::new();
        actions.push(action);

        XarDocument::new(
            RunDescription {
                lsid: "urn:lsid:provgraph:Run:r1".to_string(),
                name: "assay upload".to_string(),
                job_id: Some(Uuid::new_v4()),
            },
            ProtocolDescription {
                lsid: "urn:lsid:provgraph:Protocol:p1".to_string(),
                name: "assay protocol".to_string(),
            },
            actions,
        )
    }

    #[test]
    fn test_staged_paths_layout() {
        let paths = StagedPaths::new(Path::new("/analysis/job-7"), "upload-42");

        assert_eq!(
            paths.permanent(),
            Path::new("/analysis/job-7/upload-42.xar.json")
        );
        assert_eq!(
            paths.loading(),
            Path::new("/analysis/job-7/upload-42.xar.json.loading")
        );
    }

    #[test]
    fn test_phase_detection() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StagedPaths::new(dir.path(), "run");

        assert_eq!(paths.detect_phase(), StagePhase::NotStarted);

        fs::write(paths.loading(), b"{}").unwrap();
        assert_eq!(paths.detect_phase(), StagePhase::TempStaged);

        fs::write(paths.permanent(), b"{}").unwrap();
        // Permanent wins over a leftover loading file
        assert_eq!(paths.detect_phase(), StagePhase::Promoted);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StagedPaths::new(dir.path(), "run");
        let doc = sample_doc();

        write_document(&doc, paths.loading()).unwrap();
        let back = read_document(paths.loading()).unwrap();

        assert_eq!(doc, back);
        // Scratch file is gone after the rename
        assert!(!scratch_path(paths.loading()).exists());
    }

    #[test]
    fn test_promote_renames_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StagedPaths::new(dir.path(), "run");

        write_document(&sample_doc(), paths.loading()).unwrap();
        paths.promote().unwrap();

        assert!(!paths.loading().exists());
        assert!(paths.permanent().exists());
        assert_eq!(paths.detect_phase(), StagePhase::Promoted);
    }

    #[test]
    fn test_remove_staged_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StagedPaths::new(dir.path(), "run");

        write_document(&sample_doc(), paths.loading()).unwrap();
        paths.remove_staged().unwrap();
        paths.remove_staged().unwrap();

        assert_eq!(paths.detect_phase(), StagePhase::NotStarted);
    }

    #[test]
    fn test_read_missing_document_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StagedPaths::new(dir.path(), "run");

        let err = read_document(paths.permanent()).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
