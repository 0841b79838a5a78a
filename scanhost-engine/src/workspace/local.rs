//! Filesystem workspace

use scanhost_core::domain::event::{ExecutionEvent, ExecutionEventType};
use scanhost_core::domain::job::JobConfiguration;
use scanhost_core::params::{PARAM_KEY_FILEFILTER_EXCLUDES, PARAM_KEY_FILEFILTER_INCLUDES};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{WorkspaceError, WorkspaceService};

/// File filter applied while extracting uploaded archives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionFilter {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl ExtractionFilter {
    /// Reads the comma separated include/exclude patterns of a job
    pub fn from_configuration(config: &JobConfiguration) -> Self {
        Self {
            includes: split_patterns(config.parameter(PARAM_KEY_FILEFILTER_INCLUDES)),
            excludes: split_patterns(config.parameter(PARAM_KEY_FILEFILTER_EXCLUDES)),
        }
    }
}

fn split_patterns(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Archive extraction backend
///
/// Implementations enforce their own limits (size, entry count, depth,
/// duration) and return the number of extracted files.
pub trait ArchiveExtractor: Send + Sync {
    fn extract(
        &self,
        archive: &Path,
        target: &Path,
        filter: &ExtractionFilter,
    ) -> Result<usize, WorkspaceError>;
}

/// Extractor that leaves uploaded archives untouched
///
/// Products then read the archives themselves from the upload folder.
#[derive(Debug, Default)]
pub struct NoopArchiveExtractor;

impl ArchiveExtractor for NoopArchiveExtractor {
    fn extract(
        &self,
        archive: &Path,
        _target: &Path,
        _filter: &ExtractionFilter,
    ) -> Result<usize, WorkspaceError> {
        info!("Archive {} is left untouched, no extractor configured", archive.display());
        Ok(0)
    }
}

/// Workspace below `<root>/workspace`
pub struct LocalWorkspace {
    workspace_root: PathBuf,
    auto_clean_disabled: bool,
    extractor: Arc<dyn ArchiveExtractor>,
}

impl LocalWorkspace {
    /// Creates a workspace service
    ///
    /// # Arguments
    /// * `root` - Parent folder, job workspaces live in `<root>/workspace`
    /// * `auto_clean_disabled` - Keep workspaces after execution
    /// * `extractor` - Backend for uploaded archives
    pub fn new(root: &Path, auto_clean_disabled: bool, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        Self {
            workspace_root: root.join("workspace"),
            auto_clean_disabled,
            extractor,
        }
    }
}

impl WorkspaceService for LocalWorkspace {
    fn workspace_folder(&self, job_id: Uuid) -> PathBuf {
        self.workspace_root.join(job_id.to_string())
    }

    fn prepare(
        &self,
        job_id: Uuid,
        _config: &JobConfiguration,
        meta_data: Option<&str>,
    ) -> Result<(), WorkspaceError> {
        let location = self.location_data(job_id);

        for folder in [
            &location.extracted_sources_folder,
            &location.extracted_binaries_folder,
            &location.extracted_assets_folder,
            &location.user_messages_folder,
            &location.events_folder,
        ] {
            fs::create_dir_all(folder).map_err(|e| WorkspaceError::io(folder, e))?;
        }

        if let Some(meta_data) = meta_data {
            fs::write(&location.meta_data_file, meta_data)
                .map_err(|e| WorkspaceError::io(&location.meta_data_file, e))?;
        }

        debug!(job_id = %job_id, "Prepared workspace {}", location.workspace_location.display());
        Ok(())
    }

    fn extract_uploaded_archives(
        &self,
        job_id: Uuid,
        config: &JobConfiguration,
    ) -> Result<(), WorkspaceError> {
        let location = self.location_data(job_id);
        let filter = ExtractionFilter::from_configuration(config);

        for (archive, target) in [
            (&location.source_code_zip_file, &location.extracted_sources_folder),
            (&location.binaries_tar_file, &location.extracted_binaries_folder),
        ] {
            if !archive.is_file() {
                continue;
            }

            let extracted = self.extractor.extract(archive, target, &filter)?;
            info!(
                job_id = %job_id,
                "Extracted {} file(s) from {}",
                extracted,
                archive.display()
            );

            // only an archive that was actually unpacked may go
            if extracted > 0 {
                fs::remove_file(archive).map_err(|e| WorkspaceError::io(archive, e))?;
            }
        }

        Ok(())
    }

    fn send_event(&self, job_id: Uuid, event: &ExecutionEvent) -> Result<(), WorkspaceError> {
        let folder = self.events_folder(job_id);
        fs::create_dir_all(&folder).map_err(|e| WorkspaceError::io(&folder, e))?;

        let file = folder.join(event.event_type.file_name());
        let json = serde_json::to_string_pretty(event)?;
        fs::write(&file, json).map_err(|e| WorkspaceError::io(&file, e))?;

        debug!(job_id = %job_id, "Sent event {:?}", event.event_type);
        Ok(())
    }

    fn fetch_event(
        &self,
        job_id: Uuid,
        event_type: ExecutionEventType,
    ) -> Result<Option<ExecutionEvent>, WorkspaceError> {
        let file = self.events_folder(job_id).join(event_type.file_name());
        if !file.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&file).map_err(|e| WorkspaceError::io(&file, e))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn cleanup(
        &self,
        job_id: Uuid,
        _config: Option<&JobConfiguration>,
    ) -> Result<(), WorkspaceError> {
        let folder = self.workspace_folder(job_id);
        if folder.exists() {
            fs::remove_dir_all(&folder).map_err(|e| WorkspaceError::io(&folder, e))?;
            info!(job_id = %job_id, "Removed workspace {}", folder.display());
        }

        Ok(())
    }

    fn is_auto_clean_disabled(&self) -> bool {
        self.auto_clean_disabled
    }
}
