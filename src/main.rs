//! Groundplan CLI entrypoint.
//!
//! Exit codes:
//! - 0: full success
//! - 1: fatal configuration or state error
//! - 2: nothing to do (plan or apply found no changes)
//! - 3: applied with failures or skipped actions

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use groundplan::cli::{Cli, Commands, OutputFormatter, StateCommands};
use groundplan::config::{
    Manifest, ManifestParser, ManifestValidator, StateBackend, find_manifest_file,
};
use groundplan::error::Result;
use groundplan::planner::Plan;
use groundplan::provider::HttpProvider;
use groundplan::reconciler::{Reconciler, RunReport};
use groundplan::state::{LocalStateStore, S3StateStore, StateStore};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Terminal status of a successful run.
enum RunStatus {
    /// Everything the command attempted succeeded.
    Success,
    /// There was nothing to do.
    NoChanges,
    /// The run completed but some actions failed or were skipped.
    AppliedWithFailures,
}

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(RunStatus::Success) => ExitCode::SUCCESS,
        Ok(RunStatus::NoChanges) => ExitCode::from(2),
        Ok(RunStatus::AppliedWithFailures) => ExitCode::from(3),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<RunStatus> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings),
        Commands::Plan { detailed } => cmd_plan(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Apply { yes, parallelism } => {
            cmd_apply(cli.config.as_ref(), yes, parallelism, &formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(cli.config.as_ref(), yes, &formatter).await,
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &PathBuf, force: bool) -> Result<RunStatus> {
    info!("Initializing new Groundplan project in: {}", path.display());

    let manifest_path = path.join("groundplan.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && manifest_path.exists() {
        eprintln!("Manifest file already exists: {}", manifest_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(RunStatus::NoChanges);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let manifest_template = include_str!("../templates/groundplan.yaml");
    std::fs::write(&manifest_path, manifest_template)?;
    eprintln!("Created: {}", manifest_path.display());

    let env_template = include_str!("../templates/.env.example");
    std::fs::write(&env_path, env_template)?;
    eprintln!("Created: {}", env_path.display());

    let gitignore_content = ".env\n.groundplan/\n";
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(".groundplan") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Groundplan")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(".groundplan") {
                writeln!(file, ".groundplan/")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, gitignore_content)?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your provider token");
    eprintln!("  2. Edit groundplan.yaml with your resources");
    eprintln!("  3. Run 'groundplan validate' to check the manifest");
    eprintln!("  4. Run 'groundplan plan' to see what would change");
    eprintln!("  5. Run 'groundplan apply' to converge the infrastructure");

    Ok(RunStatus::Success)
}

/// Validate the manifest.
fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool) -> Result<RunStatus> {
    let manifest_file = resolve_manifest_path(config_path)?;
    info!("Validating manifest: {}", manifest_file.display());

    let parser = ManifestParser::new().with_base_path(
        manifest_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    );
    parser.load_dotenv()?;

    let manifest = parser.load_file(&manifest_file)?;

    let validator = ManifestValidator::new();
    let result = validator.validate(&manifest)?;

    if result.is_valid() {
        eprintln!("Manifest is valid!");
        if show_warnings && !result.warnings.is_empty() {
            eprintln!("\nWarnings:");
            for warning in &result.warnings {
                eprintln!("  - {warning}");
            }
        }
    }

    eprintln!("\nManifest summary:");
    eprintln!("  Project: {}", manifest.project.name);
    eprintln!("  Environment: {}", manifest.project.environment);
    eprintln!("  Resources: {}", manifest.resources.len());

    Ok(RunStatus::Success)
}

/// Show the plan without applying.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<RunStatus> {
    let (manifest, store) = load_manifest_and_store(config_path).await?;

    // Planning makes no provider calls, so a missing token is fine here
    let token = ManifestParser::provider_token().unwrap_or_default();
    let provider = HttpProvider::with_timeout(
        &manifest.provider.endpoint,
        &token,
        manifest.provider.timeout_secs,
    )?;

    let reconciler = Reconciler::new(manifest, Arc::new(provider), store);
    let plan = reconciler.plan().await?;

    let output = formatter.format_plan(&plan);
    eprintln!("{output}");

    if detailed && !plan.is_empty() {
        eprintln!("\nDetailed actions:");
        for action in &plan.actions {
            eprintln!("  {} - {}", action.description(), action.reason);
        }
    }

    if plan.is_empty() {
        Ok(RunStatus::NoChanges)
    } else {
        Ok(RunStatus::Success)
    }
}

/// Apply the plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<RunStatus> {
    let (mut manifest, store) = load_manifest_and_store(config_path).await?;

    if let Some(max_parallel) = parallelism {
        debug!("Overriding max_parallel to {max_parallel}");
        manifest.apply.max_parallel = max_parallel;
    }

    let provider = create_provider(&manifest)?;
    let reconciler = Reconciler::new(manifest, Arc::new(provider), store);

    let plan = reconciler.plan().await?;

    if plan.is_empty() {
        eprintln!("No changes to apply.");
        return Ok(RunStatus::NoChanges);
    }

    let output = formatter.format_plan(&plan);
    eprintln!("{output}");

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ")? {
        eprintln!("Apply cancelled.");
        return Ok(RunStatus::NoChanges);
    }

    let report = run_apply(&reconciler, plan, formatter).await?;

    eprintln!("{}", formatter.format_report(&report));

    if report.all_successful() {
        Ok(RunStatus::Success)
    } else {
        Ok(RunStatus::AppliedWithFailures)
    }
}

/// Destroy all recorded resources.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<RunStatus> {
    let (manifest, store) = load_manifest_and_store(config_path).await?;

    let provider = create_provider(&manifest)?;
    let reconciler = Reconciler::new(manifest, Arc::new(provider), store);

    let plan = reconciler.destroy_plan().await?;

    if plan.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(RunStatus::NoChanges);
    }

    eprintln!("The following resources will be destroyed:");
    for action in &plan.actions {
        eprintln!("  - {} ({})", action.resource_id, action.kind);
    }

    if !auto_approve {
        eprint!("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim() != "destroy" {
            eprintln!("Destruction cancelled.");
            return Ok(RunStatus::NoChanges);
        }
    }

    let report = run_apply(&reconciler, plan, formatter).await?;

    eprintln!("{}", formatter.format_report(&report));

    if report.all_successful() {
        Ok(RunStatus::Success)
    } else {
        Ok(RunStatus::AppliedWithFailures)
    }
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<RunStatus> {
    let (_manifest, store) = load_manifest_and_store(config_path).await?;

    match command {
        StateCommands::Show => {
            let snapshot = store.load().await?;
            eprintln!("{}", formatter.format_state(&snapshot));
        }
        StateCommands::Lock { holder } => {
            let holder_str = holder.as_deref().unwrap_or("");
            let lock = store.acquire_lock(holder_str).await?;
            eprintln!("State locked: {}", lock.lock_id);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = store.lock_info().await? {
                    store.release_lock(&lock_info.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(RunStatus::Success)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Streams an apply run to the terminal, wiring Ctrl-C to cancellation.
async fn run_apply(
    reconciler: &Reconciler,
    plan: Plan,
    formatter: &OutputFormatter,
) -> Result<RunReport> {
    let mut handle = reconciler.start_apply(plan).await?;

    let cancel = handle.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested; in-flight actions will finish.");
            cancel.cancel();
        }
    });

    let mut results = Vec::new();
    while let Some(result) = handle.next_result().await {
        eprintln!("{}", formatter.format_result(&result));
        results.push(result);
    }

    let summary = handle.finish().await;
    ctrl_c.abort();

    Ok(RunReport {
        results,
        summary: summary?,
    })
}

/// Prompts for a yes/no confirmation.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Resolves the manifest file path.
fn resolve_manifest_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_manifest_file("."), |path| Ok(path.clone()))
}

/// Loads the manifest and creates the configured state store.
async fn load_manifest_and_store(
    config_path: Option<&PathBuf>,
) -> Result<(Manifest, Arc<dyn StateStore>)> {
    let manifest_file = resolve_manifest_path(config_path)?;
    debug!("Loading manifest from: {}", manifest_file.display());

    let parser = ManifestParser::new().with_base_path(
        manifest_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    );
    parser.load_dotenv()?;

    let manifest = parser.load_with_env(&manifest_file)?;

    let validator = ManifestValidator::new();
    validator.validate(&manifest)?;

    let store: Arc<dyn StateStore> = match manifest.state.backend {
        StateBackend::Local => {
            let path = manifest.state.path.as_ref().map_or_else(
                || {
                    manifest_file
                        .parent()
                        .unwrap_or_else(|| std::path::Path::new("."))
                        .join(".groundplan")
                },
                PathBuf::from,
            );
            Arc::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = manifest.state.bucket.as_deref().ok_or_else(|| {
                groundplan::error::GroundplanError::internal("S3 bucket not configured")
            })?;
            let prefix = manifest.state.prefix.as_deref();
            let region = manifest.state.region.as_deref();
            Arc::new(S3StateStore::new(bucket, prefix, region).await?)
        }
    };

    Ok((manifest, store))
}

/// Creates the provider API client.
fn create_provider(manifest: &Manifest) -> Result<HttpProvider> {
    let token = ManifestParser::provider_token()?;
    HttpProvider::with_timeout(
        &manifest.provider.endpoint,
        &token,
        manifest.provider.timeout_secs,
    )
}
