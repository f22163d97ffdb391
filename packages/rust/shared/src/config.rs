//! Application configuration for Tailor.
//!
//! User config lives at `~/.tailor/tailor.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TailorError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tailor.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tailor";

// ---------------------------------------------------------------------------
// Config structs (matching tailor.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Capability provider endpoints.
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Evaluation engine tuning.
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Quality gate thresholds.
    #[serde(default)]
    pub quality_gate: QualityGateConfig,

    /// Stage executor retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Housekeeper sweep policy.
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for the job database and local object store.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Days a finished job's artifacts are retained.
    #[serde(default = "default_artifact_ttl_days")]
    pub artifact_ttl_days: u32,

    /// Evidence chunks kept after retrieval dedup.
    #[serde(default = "default_evidence_limit")]
    pub evidence_limit: usize,

    /// Job-level wall-clock timeout in seconds.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            artifact_ttl_days: default_artifact_ttl_days(),
            evidence_limit: default_evidence_limit(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

fn default_data_dir() -> String {
    "~/tailor-data".into()
}
fn default_artifact_ttl_days() -> u32 {
    7
}
fn default_evidence_limit() -> usize {
    20
}
fn default_job_timeout_secs() -> u64 {
    900
}

/// `[endpoints]` section — one URL per remote capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsConfig {
    pub parse: Option<Url>,
    pub embed: Option<Url>,
    pub retrieve: Option<Url>,
    pub generate: Option<Url>,
    pub render: Option<Url>,
}

impl EndpointsConfig {
    /// All five endpoints, labeled, for validation and logging.
    pub fn entries(&self) -> [(&'static str, Option<&Url>); 5] {
        [
            ("parse", self.parse.as_ref()),
            ("embed", self.embed.as_ref()),
            ("retrieve", self.retrieve.as_ref()),
            ("generate", self.generate.as_ref()),
            ("render", self.render.as_ref()),
        ]
    }
}

/// `[evaluation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Fraction of a target's stemmed tokens that must appear in the
    /// document for the target to count as covered.
    #[serde(default = "default_coverage_overlap")]
    pub coverage_overlap_threshold: f64,

    /// Token-overlap fraction against a single evidence text above which a
    /// statement is attributable.
    #[serde(default = "default_evidence_overlap")]
    pub evidence_overlap_threshold: f64,

    /// Statement prefix length for the substring attribution short-circuit.
    #[serde(default = "default_evidence_prefix_len")]
    pub evidence_prefix_len: usize,

    /// Explicitly required ATS keywords, checked in addition to JD skills
    /// and competency evidence indicators.
    #[serde(default)]
    pub ats_keywords: Vec<String>,

    /// Claims that must never appear in a tailored document.
    #[serde(default)]
    pub banned_claims: Vec<String>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            coverage_overlap_threshold: default_coverage_overlap(),
            evidence_overlap_threshold: default_evidence_overlap(),
            evidence_prefix_len: default_evidence_prefix_len(),
            ats_keywords: Vec::new(),
            banned_claims: Vec::new(),
        }
    }
}

fn default_coverage_overlap() -> f64 {
    1.0
}
fn default_evidence_overlap() -> f64 {
    0.6
}
fn default_evidence_prefix_len() -> usize {
    80
}

/// `[quality_gate]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateConfig {
    #[serde(default = "default_min_jd_coverage")]
    pub min_jd_coverage: f64,

    #[serde(default = "default_min_ats_keyword_score")]
    pub min_ats_keyword_score: f64,

    /// VALIDATE→GENERATE re-entries allowed before QualityGateExceeded.
    #[serde(default = "default_max_gap_fill_cycles")]
    pub max_gap_fill_cycles: u32,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            min_jd_coverage: default_min_jd_coverage(),
            min_ats_keyword_score: default_min_ats_keyword_score(),
            max_gap_fill_cycles: default_max_gap_fill_cycles(),
        }
    }
}

fn default_min_jd_coverage() -> f64 {
    0.7
}
fn default_min_ats_keyword_score() -> f64 {
    0.6
}
fn default_max_gap_fill_cycles() -> u32 {
    2
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per stage, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// First backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff multiplier between attempts.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_attempt_timeout_secs() -> u64 {
    60
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

/// `[housekeeping]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingConfig {
    /// Seconds a non-terminal job may sit untouched before re-dispatch.
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,

    /// Sweep interval in seconds for the interval runner.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            stuck_after_secs: default_stuck_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_stuck_after_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tailor/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TailorError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tailor/tailor.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TailorError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TailorError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TailorError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TailorError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TailorError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that all five capability endpoints are configured.
pub fn validate_endpoints(config: &AppConfig) -> Result<()> {
    let missing: Vec<&str> = config
        .endpoints
        .entries()
        .iter()
        .filter(|(_, url)| url.is_none())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(TailorError::config(format!(
            "capability endpoints not configured: {}. Set them under [endpoints] in tailor.toml.",
            missing.join(", ")
        )))
    }
}
