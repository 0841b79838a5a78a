//! Well-known job parameters
//!
//! Parameters every product understands without declaring them. Only the ones
//! marked as available inside the script are handed to the launched process.

pub const PARAM_KEY_PRODUCT_ID: &str = "pds.config.productid";
pub const PARAM_KEY_SCAN_TARGET_URL: &str = "pds.scan.target.url";
pub const PARAM_KEY_SCAN_TARGET_TYPE: &str = "pds.scan.target.type";
pub const PARAM_KEY_SCAN_CONFIGURATION: &str = "pds.scan.configuration";
pub const PARAM_KEY_USE_SHARED_STORAGE: &str = "pds.config.use.sechub.storage";
pub const PARAM_KEY_SHARED_STORAGE_PATH: &str = "pds.config.sechub.storage.path";
pub const PARAM_KEY_FILEFILTER_INCLUDES: &str = "pds.config.filefilter.includes";
pub const PARAM_KEY_FILEFILTER_EXCLUDES: &str = "pds.config.filefilter.excludes";
pub const PARAM_KEY_SUPPORTED_DATATYPES: &str = "pds.config.supported.datatypes";
pub const PARAM_KEY_DEBUG_ENABLED: &str = "pds.debug.enabled";
pub const PARAM_KEY_SCRIPT_TRUSTALL_CERTIFICATES: &str =
    "pds.config.script.trustall.certificates.enabled";
pub const PARAM_KEY_TEMPLATE_METADATA_LIST: &str = "pds.config.template.metadata.list";
pub const PARAM_KEY_SCRIPTLOG_TO_SERVERLOG: &str = "pds.config.debug.scriptlog.enabled";
pub const PARAM_KEY_PRODUCT_TIMEOUT_MINUTES: &str = "pds.config.product.timeout.minutes";
pub const PARAM_KEY_CANCEL_CHECK_INTERVAL_MILLISECONDS: &str =
    "pds.config.cancel.event.checkinterval.milliseconds";
pub const PARAM_KEY_CANCEL_MAXIMUM_WAITTIME_SECONDS: &str =
    "pds.config.cancel.maximum.waittime.seconds";

/// Default check interval used for a graceful cancel
pub const DEFAULT_CANCEL_CHECK_INTERVAL_MILLISECONDS: i64 = 1_000;
/// By default a cancel does not wait for the process to end itself
pub const DEFAULT_CANCEL_MAXIMUM_WAITTIME_SECONDS: i64 = 0;

/// A parameter known to every product
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellKnownParameter {
    pub key: &'static str,
    /// Whether the value is exported into the launched process environment
    pub available_inside_script: bool,
}

const fn param(key: &'static str, available_inside_script: bool) -> WellKnownParameter {
    WellKnownParameter {
        key,
        available_inside_script,
    }
}

pub static WELL_KNOWN_PARAMETERS: &[WellKnownParameter] = &[
    param(PARAM_KEY_PRODUCT_ID, true),
    param(PARAM_KEY_SCAN_TARGET_URL, true),
    param(PARAM_KEY_SCAN_TARGET_TYPE, true),
    param(PARAM_KEY_SCAN_CONFIGURATION, true),
    param(PARAM_KEY_USE_SHARED_STORAGE, false),
    param(PARAM_KEY_SHARED_STORAGE_PATH, false),
    param(PARAM_KEY_FILEFILTER_INCLUDES, false),
    param(PARAM_KEY_FILEFILTER_EXCLUDES, false),
    param(PARAM_KEY_SUPPORTED_DATATYPES, false),
    param(PARAM_KEY_DEBUG_ENABLED, true),
    param(PARAM_KEY_SCRIPT_TRUSTALL_CERTIFICATES, true),
    param(PARAM_KEY_TEMPLATE_METADATA_LIST, true),
    param(PARAM_KEY_SCRIPTLOG_TO_SERVERLOG, false),
    param(PARAM_KEY_PRODUCT_TIMEOUT_MINUTES, false),
    param(PARAM_KEY_CANCEL_CHECK_INTERVAL_MILLISECONDS, false),
    param(PARAM_KEY_CANCEL_MAXIMUM_WAITTIME_SECONDS, false),
];

/// Looks up a well-known parameter by key
pub fn well_known(key: &str) -> Option<&'static WellKnownParameter> {
    WELL_KNOWN_PARAMETERS.iter().find(|p| p.key == key)
}

/// Converts a parameter key to its environment variable name
///
/// Upper-cases the key and turns dots and hyphens into underscores, so
/// `pds.some-key.value` becomes `PDS_SOME_KEY_VALUE`.
pub fn key_to_env(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| match c {
            '.' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}
