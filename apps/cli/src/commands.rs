//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use tailor_artifacts::FsObjectStore;
use tailor_capabilities::{CapabilitySet, http::HttpCapabilities};
use tailor_core::{
    Housekeeper, JobApi, Orchestrator, OrchestratorConfig, RetryPolicy, api::UploadKind,
};
use tailor_shared::{
    AppConfig, JobId, JobStatus, init_config, load_config, validate_endpoints,
};
use tailor_storage::JobStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Tailor — tailor documents to a job description, gated by evaluation.
#[derive(Parser)]
#[command(
    name = "tailor",
    version,
    about = "Run document-tailoring jobs with retries, recovery, and a quality gate.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Upload a JD and resume, submit a job, and drive it to completion.
    Submit {
        /// Tenant identifier all keys are scoped under.
        #[arg(long, env = "TAILOR_TENANT_ID")]
        tenant: String,

        /// Path to the job description document.
        #[arg(long)]
        jd: PathBuf,

        /// Path to the base resume document.
        #[arg(long)]
        resume: PathBuf,
    },

    /// Show the last committed state of a job.
    Status {
        /// Tenant identifier.
        #[arg(long, env = "TAILOR_TENANT_ID")]
        tenant: String,

        /// Job identifier.
        job_id: String,
    },

    /// Request cooperative cancellation of a job.
    Cancel {
        /// Tenant identifier.
        #[arg(long, env = "TAILOR_TENANT_ID")]
        tenant: String,

        /// Job identifier.
        job_id: String,
    },

    /// Print signed download references for a job's artifacts.
    Download {
        /// Tenant identifier.
        #[arg(long, env = "TAILOR_TENANT_ID")]
        tenant: String,

        /// Job identifier.
        job_id: String,
    },

    /// List all live artifact keys for a tenant.
    Artifacts {
        /// Tenant identifier.
        #[arg(long, env = "TAILOR_TENANT_ID")]
        tenant: String,
    },

    /// Run one housekeeping sweep (stuck jobs, expired artifacts).
    Housekeeping,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "tailor=info",
        1 => "tailor=debug",
        _ => "tailor=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Submit { tenant, jd, resume } => cmd_submit(&tenant, &jd, &resume).await,
        Command::Status { tenant, job_id } => cmd_status(&tenant, &job_id).await,
        Command::Cancel { tenant, job_id } => cmd_cancel(&tenant, &job_id).await,
        Command::Download { tenant, job_id } => cmd_download(&tenant, &job_id).await,
        Command::Artifacts { tenant } => cmd_artifacts(&tenant).await,
        Command::Housekeeping => cmd_housekeeping().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Build the full API stack from config: store, object store, HTTP
/// capabilities, orchestrator, housekeeper.
async fn build_api(config: &AppConfig) -> Result<JobApi> {
    validate_endpoints(config)?;

    let data_dir = expand_home(&config.defaults.data_dir);
    let store = Arc::new(JobStore::open(&data_dir.join("tailor.db")).await?);
    let objects = Arc::new(FsObjectStore::new(data_dir.join("objects"))?);

    let policy = RetryPolicy::from(&config.retry);
    // The transport gets a little slack beyond the per-attempt timeout so
    // the executor owns the deadline.
    let http = Arc::new(HttpCapabilities::new(
        config.endpoints.clone(),
        policy.attempt_timeout + Duration::from_secs(5),
    )?);
    let capabilities = CapabilitySet {
        parse: http.clone(),
        embed: http.clone(),
        retrieve: http.clone(),
        generate: http.clone(),
        render: http,
    };

    let orchestrator = Arc::new(Orchestrator::new(
        store,
        objects.clone(),
        capabilities,
        policy,
        OrchestratorConfig::from(config),
    ));
    let housekeeper = Arc::new(Housekeeper::new(
        orchestrator.clone(),
        objects.clone(),
        config.housekeeping.clone(),
        Duration::from_secs(config.defaults.job_timeout_secs),
    ));

    let secret = std::env::var("TAILOR_SIGNING_SECRET")
        .unwrap_or_else(|_| "local-dev-signing-secret".into());
    Ok(JobApi::new(orchestrator, housekeeper, objects, secret))
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    raw.parse()
        .map_err(|e| eyre!("invalid job id '{raw}': {e}"))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_submit(tenant: &str, jd: &PathBuf, resume: &PathBuf) -> Result<()> {
    let config = load_config()?;
    let api = build_api(&config).await?;

    let jd_bytes = std::fs::read(jd).map_err(|e| eyre!("cannot read {}: {e}", jd.display()))?;
    let resume_bytes =
        std::fs::read(resume).map_err(|e| eyre!("cannot read {}: {e}", resume.display()))?;

    let jd_ref = api
        .upload(tenant, UploadKind::JobDescription, extension_of(jd), &jd_bytes)
        .await?;
    let resume_ref = api
        .upload(tenant, UploadKind::Resume, extension_of(resume), &resume_bytes)
        .await?;

    let job_id = api.submit(tenant, &jd_ref, &resume_ref).await?;
    info!(tenant, %job_id, "job submitted");

    let spinner = spinner();
    spinner.set_message(format!("Running pipeline for job {job_id}"));

    let summary = api.run(tenant, job_id).await?;
    spinner.finish_and_clear();

    println!();
    println!("  Job finished.");
    println!("  ID:       {job_id}");
    println!("  Status:   {}", summary.status);
    println!("  Stage:    {}", summary.stage);
    if let Some(reason) = summary.failure_reason {
        println!("  Reason:   {reason}");
    }
    if summary.gap_fill_cycles > 0 {
        println!("  Gap-fill: {} cycle(s)", summary.gap_fill_cycles);
    }
    if summary.status == JobStatus::Succeeded {
        println!();
        println!("  Download artifacts with: tailor download --tenant {tenant} {job_id}");
    }
    println!();

    Ok(())
}

async fn cmd_status(tenant: &str, job_id: &str) -> Result<()> {
    let config = load_config()?;
    let api = build_api(&config).await?;
    let summary = api.get_status(tenant, parse_job_id(job_id)?).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn cmd_cancel(tenant: &str, job_id: &str) -> Result<()> {
    let config = load_config()?;
    let api = build_api(&config).await?;
    let accepted = api.cancel(tenant, parse_job_id(job_id)?).await?;
    if accepted {
        println!("Cancellation requested; it takes effect at the next stage boundary.");
    } else {
        println!("Job is already terminal; nothing to cancel.");
    }
    Ok(())
}

async fn cmd_download(tenant: &str, job_id: &str) -> Result<()> {
    let config = load_config()?;
    let api = build_api(&config).await?;
    let downloads = api.get_artifacts(tenant, parse_job_id(job_id)?).await?;

    if downloads.is_empty() {
        println!("No artifacts (job not finished, or artifacts expired).");
        return Ok(());
    }
    for download in downloads {
        println!(
            "{:20} {}  (token {}, expires {})",
            download.kind,
            download.reference.key,
            download.reference.token,
            download.reference.expires_at
        );
    }
    Ok(())
}

async fn cmd_artifacts(tenant: &str) -> Result<()> {
    let config = load_config()?;
    let api = build_api(&config).await?;
    let keys = api.list_artifacts(tenant).await?;
    if keys.is_empty() {
        println!("No artifacts for tenant {tenant}.");
    }
    for key in keys {
        println!("{key}");
    }
    Ok(())
}

async fn cmd_housekeeping() -> Result<()> {
    let config = load_config()?;
    let api = build_api(&config).await?;

    let spinner = spinner();
    spinner.set_message("Sweeping stuck jobs and expired artifacts");
    let report = api.run_housekeeping().await?;
    spinner.finish_and_clear();

    println!("Housekeeping complete:");
    println!("  resumed:   {}", report.resumed);
    println!("  timed out: {}", report.timed_out);
    println!("  expired:   {}", report.expired);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn extension_of(path: &Path) -> &str {
    path.extension().and_then(|ext| ext.to_str()).unwrap_or("txt")
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}
