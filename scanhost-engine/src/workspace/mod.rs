//! Job workspaces
//!
//! Every job gets its own folder holding uploaded archives, extracted content,
//! output files, product messages and events:
//!
//! ```text
//! <root>/workspace/<job-uuid>/
//!     upload/sourcecode.zip
//!     upload/binaries.tar
//!     upload/extracted/{sources,binaries,assets}/
//!     output/result.txt
//!     output/system-out.log
//!     output/system-error.log
//!     output/messages/
//!     events/
//!     metadata.txt
//! ```

mod local;
mod messages;

use scanhost_core::domain::event::{ExecutionEvent, ExecutionEventType};
use scanhost_core::domain::job::JobConfiguration;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub use local::{ArchiveExtractor, ExtractionFilter, LocalWorkspace, NoopArchiveExtractor};
pub use messages::collect_messages;

/// Errors of workspace operations
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workspace file is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive extraction failed: {0}")]
    Extraction(String),
}

impl WorkspaceError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Locations handed to the launched product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLocation {
    pub workspace_location: PathBuf,
    pub result_file: PathBuf,
    pub user_messages_folder: PathBuf,
    pub events_folder: PathBuf,
    pub meta_data_file: PathBuf,
    pub source_code_zip_file: PathBuf,
    pub binaries_tar_file: PathBuf,
    pub extracted_sources_folder: PathBuf,
    pub extracted_binaries_folder: PathBuf,
    pub extracted_assets_folder: PathBuf,
    pub has_extracted_sources: bool,
    pub has_extracted_binaries: bool,
}

/// Workspace operations used by the execution engine
///
/// File locations derive from [`WorkspaceService::workspace_folder`].
pub trait WorkspaceService: Send + Sync {
    /// Folder of the given job
    fn workspace_folder(&self, job_id: Uuid) -> PathBuf;

    /// Creates the folder layout and writes the job metadata
    fn prepare(
        &self,
        job_id: Uuid,
        config: &JobConfiguration,
        meta_data: Option<&str>,
    ) -> Result<(), WorkspaceError>;

    /// Extracts uploaded source and binary archives into the workspace
    fn extract_uploaded_archives(
        &self,
        job_id: Uuid,
        config: &JobConfiguration,
    ) -> Result<(), WorkspaceError>;

    /// Writes an event file the running product may observe
    fn send_event(&self, job_id: Uuid, event: &ExecutionEvent) -> Result<(), WorkspaceError>;

    /// Reads an event file back, `None` when it was never sent
    fn fetch_event(
        &self,
        job_id: Uuid,
        event_type: ExecutionEventType,
    ) -> Result<Option<ExecutionEvent>, WorkspaceError>;

    /// Removes the workspace of the job
    fn cleanup(&self, job_id: Uuid, config: Option<&JobConfiguration>)
    -> Result<(), WorkspaceError>;

    /// Workspaces are kept after execution when true
    fn is_auto_clean_disabled(&self) -> bool;

    fn upload_folder(&self, job_id: Uuid) -> PathBuf {
        self.workspace_folder(job_id).join("upload")
    }

    fn output_folder(&self, job_id: Uuid) -> PathBuf {
        self.workspace_folder(job_id).join("output")
    }

    fn result_file(&self, job_id: Uuid) -> PathBuf {
        self.output_folder(job_id).join("result.txt")
    }

    fn system_out_file(&self, job_id: Uuid) -> PathBuf {
        self.output_folder(job_id).join("system-out.log")
    }

    fn system_error_file(&self, job_id: Uuid) -> PathBuf {
        self.output_folder(job_id).join("system-error.log")
    }

    fn messages_folder(&self, job_id: Uuid) -> PathBuf {
        self.output_folder(job_id).join("messages")
    }

    fn events_folder(&self, job_id: Uuid) -> PathBuf {
        self.workspace_folder(job_id).join("events")
    }

    fn meta_data_file(&self, job_id: Uuid) -> PathBuf {
        self.workspace_folder(job_id).join("metadata.txt")
    }

    fn extracted_folder(&self, job_id: Uuid) -> PathBuf {
        self.upload_folder(job_id).join("extracted")
    }

    /// All locations of the job, including whether content was extracted
    fn location_data(&self, job_id: Uuid) -> WorkspaceLocation {
        let extracted = self.extracted_folder(job_id);
        let extracted_sources_folder = extracted.join("sources");
        let extracted_binaries_folder = extracted.join("binaries");

        WorkspaceLocation {
            workspace_location: self.workspace_folder(job_id),
            result_file: self.result_file(job_id),
            user_messages_folder: self.messages_folder(job_id),
            events_folder: self.events_folder(job_id),
            meta_data_file: self.meta_data_file(job_id),
            source_code_zip_file: self.upload_folder(job_id).join("sourcecode.zip"),
            binaries_tar_file: self.upload_folder(job_id).join("binaries.tar"),
            has_extracted_sources: has_content(&extracted_sources_folder),
            has_extracted_binaries: has_content(&extracted_binaries_folder),
            extracted_sources_folder,
            extracted_binaries_folder,
            extracted_assets_folder: extracted.join("assets"),
        }
    }
}

fn has_content(folder: &Path) -> bool {
    std::fs::read_dir(folder)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
