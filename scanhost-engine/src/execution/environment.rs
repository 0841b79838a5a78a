//! Process environment
//!
//! Builds the environment of a launched product from the inherited engine
//! environment in three stages:
//! - Clean: keep only allow-listed inherited variables
//! - Inject: add job locations and the job parameters the product may see
//! - Default-fill: add defaults of declared parameters the job did not set
//!
//! The result never contains a missing value; absent parameter values become
//! empty strings.

use scanhost_core::domain::job::JobConfiguration;
use scanhost_core::domain::product::ProductSetup;
use scanhost_core::params::{key_to_env, well_known};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::workspace::WorkspaceLocation;

/// Inherited variables every product keeps
pub const DEFAULT_ENV_ALLOW_LIST: &[&str] = &["HOME", "HOSTNAME", "PATH", "PWD", "TERM", "UID", "USER"];

pub const ENV_JOB_WORKSPACE_LOCATION: &str = "PDS_JOB_WORKSPACE_LOCATION";
pub const ENV_JOB_RESULT_FILE: &str = "PDS_JOB_RESULT_FILE";
pub const ENV_JOB_USER_MESSAGES_FOLDER: &str = "PDS_JOB_USER_MESSAGES_FOLDER";
pub const ENV_JOB_EVENTS_FOLDER: &str = "PDS_JOB_EVENTS_FOLDER";
pub const ENV_JOB_METADATA_FILE: &str = "PDS_JOB_METADATA_FILE";
pub const ENV_JOB_UUID: &str = "PDS_JOB_UUID";
pub const ENV_ORIGIN_JOB_UUID: &str = "SECHUB_JOB_UUID";
pub const ENV_JOB_SOURCECODE_ZIP_FILE: &str = "PDS_JOB_SOURCECODE_ZIP_FILE";
pub const ENV_JOB_BINARIES_TAR_FILE: &str = "PDS_JOB_BINARIES_TAR_FILE";
pub const ENV_JOB_EXTRACTED_SOURCES_FOLDER: &str = "PDS_JOB_EXTRACTED_SOURCES_FOLDER";
/// Older name of the extracted sources folder, still read by existing scripts
pub const ENV_JOB_SOURCECODE_UNZIPPED_FOLDER: &str = "PDS_JOB_SOURCECODE_UNZIPPED_FOLDER";
pub const ENV_JOB_EXTRACTED_BINARIES_FOLDER: &str = "PDS_JOB_EXTRACTED_BINARIES_FOLDER";
pub const ENV_JOB_EXTRACTED_ASSETS_FOLDER: &str = "PDS_JOB_EXTRACTED_ASSETS_FOLDER";
pub const ENV_JOB_HAS_EXTRACTED_SOURCES: &str = "PDS_JOB_HAS_EXTRACTED_SOURCES";
pub const ENV_JOB_HAS_EXTRACTED_BINARIES: &str = "PDS_JOB_HAS_EXTRACTED_BINARIES";

/// Allow-list of inherited variable names
///
/// Entries are exact names or prefixes written as `NAME*`.
#[derive(Debug, Clone, Default)]
pub struct EnvAllowList {
    names: HashSet<String>,
    prefixes: Vec<String>,
}

impl EnvAllowList {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            match pattern.strip_suffix('*') {
                Some(prefix) if !prefix.is_empty() => list.prefixes.push(prefix.to_string()),
                Some(_) => warn!("Ignoring allow-list entry without prefix: '{}'", pattern),
                None if !pattern.is_empty() => {
                    list.names.insert(pattern.to_string());
                }
                None => {}
            }
        }
        list
    }

    /// Default names plus the product specific entries
    pub fn for_product(product: Option<&ProductSetup>) -> Self {
        let product_entries = product
            .map(|p| p.env_whitelist.as_slice())
            .unwrap_or_default();

        Self::new(
            DEFAULT_ENV_ALLOW_LIST
                .iter()
                .copied()
                .chain(product_entries.iter().map(String::as_str)),
        )
    }

    pub fn allows(&self, name: &str) -> bool {
        self.names.contains(name) || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

/// Builds the environment of a launched product
///
/// # Arguments
/// * `inherited` - Environment of the engine process
/// * `job_id` - The job being executed
/// * `config` - Job configuration with the parameters
/// * `product` - Setup of the product, `None` when the product is unknown
/// * `location` - Workspace locations of the job
pub fn build_environment(
    inherited: &HashMap<String, String>,
    job_id: Uuid,
    config: &JobConfiguration,
    product: Option<&ProductSetup>,
    location: &WorkspaceLocation,
) -> HashMap<String, String> {
    let allow_list = EnvAllowList::for_product(product);

    // clean
    let mut env: HashMap<String, String> = inherited
        .iter()
        .filter(|(name, _)| allow_list.allows(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    // inject
    inject_locations(&mut env, job_id, config, location);

    let mut unset = Vec::new();
    for entry in &config.parameters {
        if !is_available_inside_script(&entry.key, product) {
            continue;
        }
        let name = key_to_env(&entry.key);
        match &entry.value {
            Some(value) => {
                env.insert(name, value.clone());
            }
            None => unset.push((entry.key.as_str(), name)),
        }
    }

    // default-fill
    if let Some(product) = product {
        for definition in product.parameter_definitions() {
            let Some(default_value) = &definition.default_value else {
                continue;
            };
            let name = key_to_env(&definition.key);
            if !env.contains_key(&name) {
                debug!(job_id = %job_id, "Using default for parameter {}", definition.key);
                env.insert(name, default_value.clone());
            }
        }
    }

    for (key, name) in unset {
        if !env.contains_key(&name) {
            warn!(job_id = %job_id, "Parameter {} has no value, using empty string", key);
            env.insert(name, String::new());
        }
    }

    env
}

fn is_available_inside_script(key: &str, product: Option<&ProductSetup>) -> bool {
    if let Some(param) = well_known(key) {
        if !param.available_inside_script {
            debug!("Parameter {} is not available inside scripts", key);
        }
        return param.available_inside_script;
    }

    if product.is_some_and(|p| p.declares_parameter(key)) {
        return true;
    }

    warn!("Parameter {} is not declared by the product and will be dropped", key);
    false
}

fn inject_locations(
    env: &mut HashMap<String, String>,
    job_id: Uuid,
    config: &JobConfiguration,
    location: &WorkspaceLocation,
) {
    let path = |p: &Path| p.to_string_lossy().into_owned();

    let extracted_sources = path(&location.extracted_sources_folder);

    let entries = [
        (ENV_JOB_WORKSPACE_LOCATION, path(&location.workspace_location)),
        (ENV_JOB_RESULT_FILE, path(&location.result_file)),
        (ENV_JOB_USER_MESSAGES_FOLDER, path(&location.user_messages_folder)),
        (ENV_JOB_EVENTS_FOLDER, path(&location.events_folder)),
        (ENV_JOB_METADATA_FILE, path(&location.meta_data_file)),
        (ENV_JOB_UUID, job_id.to_string()),
        (
            ENV_ORIGIN_JOB_UUID,
            config
                .origin_job_uuid
                .map(|id| id.to_string())
                .unwrap_or_default(),
        ),
        (ENV_JOB_SOURCECODE_ZIP_FILE, path(&location.source_code_zip_file)),
        (ENV_JOB_BINARIES_TAR_FILE, path(&location.binaries_tar_file)),
        (ENV_JOB_EXTRACTED_SOURCES_FOLDER, extracted_sources.clone()),
        (ENV_JOB_SOURCECODE_UNZIPPED_FOLDER, extracted_sources),
        (
            ENV_JOB_EXTRACTED_BINARIES_FOLDER,
            path(&location.extracted_binaries_folder),
        ),
        (ENV_JOB_EXTRACTED_ASSETS_FOLDER, path(&location.extracted_assets_folder)),
        (
            ENV_JOB_HAS_EXTRACTED_SOURCES,
            location.has_extracted_sources.to_string(),
        ),
        (
            ENV_JOB_HAS_EXTRACTED_BINARIES,
            location.has_extracted_binaries.to_string(),
        ),
    ];

    for (name, value) in entries {
        env.insert(name.to_string(), value);
    }
}
