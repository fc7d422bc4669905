//! Rigging CLI entrypoint.
//!
//! This is the main entrypoint for the rigging command-line tool.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use rigging::apply::{ApplyEngine, ApplyOptions};
use rigging::cli::{Cli, Commands, OutputFormatter, StateCommands};
use rigging::config::{
    find_config_file, ConfigHasher, ConfigParser, ConfigValidator, Document, ValidationResult,
};
use rigging::error::Result;
use rigging::graph::{Graph, GraphBuilder};
use rigging::planner::{ChangeSet, PlanEngine};
use rigging::provider::ProviderRegistry;
use rigging::state::{
    generate_holder_id, keep_alive, LocalStateStore, LockInfo, StateStore, LOCK_REFRESH_SECS,
};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for a fully successful run.
const EXIT_OK: u8 = 0;

/// Exit code for a run with failed, skipped, or cancelled resources, or
/// detected drift.
const EXIT_INCOMPLETE: u8 = 1;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system. Logs go to stderr so stdout stays
/// parseable with `--output json`.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<u8> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config, &cli.vars, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config, &cli.vars, detailed, &formatter).await,
        Commands::Apply { yes } => cmd_apply(config, &cli.vars, yes, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config, &cli.vars, yes, &formatter).await,
        Commands::Drift => cmd_drift(config, &cli.vars, &formatter).await,
        Commands::State { command } => cmd_state(config, &cli.vars, command, &formatter).await,
    }
}

/// Write a starter document.
fn cmd_init(path: &Path, force: bool) -> Result<u8> {
    info!("Initializing new Rigging project in: {}", path.display());

    let config_path = path.join("rigging.yaml");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Document already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(EXIT_INCOMPLETE);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let template = include_str!("../templates/rigging.yaml");
    std::fs::write(&config_path, template)?;
    eprintln!("Created: {}", config_path.display());

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".rigging") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Rigging state")?;
            writeln!(file, ".rigging/")?;
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n.rigging/\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit rigging.yaml to declare your resources");
    eprintln!("  2. Run 'rigging validate' to check the document");
    eprintln!("  3. Run 'rigging plan' to see what will change");
    eprintln!("  4. Run 'rigging apply' to converge");

    Ok(EXIT_OK)
}

/// Validate the document and build the graph.
fn cmd_validate(
    config_path: Option<&Path>,
    vars: &[String],
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let project = Project::load(config_path, vars)?;
    let (validation, graph) = project.check()?;
    project.registry.ensure_kinds(&graph)?;

    emit(&formatter.format_validation(&validation, &graph, show_warnings))?;
    Ok(EXIT_OK)
}

/// Show the change set.
async fn cmd_plan(
    config_path: Option<&Path>,
    vars: &[String],
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let project = Project::load(config_path, vars)?;
    let (_, graph) = project.check()?;
    let store = project.open_store().await?;

    let plan = project.plan(&graph, store.as_ref()).await?;
    emit(&formatter.format_plan(&plan, detailed))?;

    Ok(EXIT_OK)
}

/// Converge to the document.
async fn cmd_apply(
    config_path: Option<&Path>,
    vars: &[String],
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let project = Project::load(config_path, vars)?;
    let (_, graph) = project.check()?;
    let store = project.open_store().await?;

    locked(&store, async {
        let plan = project.plan(&graph, store.as_ref()).await?;
        emit(&formatter.format_plan(&plan, false))?;

        if plan.has_changes()
            && !auto_approve
            && !confirm("Do you want to apply this change set? [y/N]: ", "y")?
        {
            eprintln!("Apply cancelled.");
            return Ok(EXIT_OK);
        }

        project.execute(&store, &plan, formatter).await
    })
    .await
}

/// Delete every tracked resource. Only settings and provider bindings are
/// needed, so a document whose graph no longer builds can still be torn
/// down.
async fn cmd_destroy(
    config_path: Option<&Path>,
    vars: &[String],
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let project = Project::load(config_path, vars)?;
    let store = project.open_store().await?;

    locked(&store, async {
        let plan = project
            .planner(store.as_ref())
            .plan_destroy()
            .await?
            .with_config_hash(&project.config_hash);

        if !plan.has_changes() {
            emit(&formatter.success("No tracked resources to destroy."))?;
            return Ok(EXIT_OK);
        }

        emit(&formatter.format_plan(&plan, false))?;

        if !auto_approve
            && !confirm(
                "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
                "destroy",
            )?
        {
            eprintln!("Destruction cancelled.");
            return Ok(EXIT_OK);
        }

        project.execute(&store, &plan, formatter).await
    })
    .await
}

/// Check for drift.
async fn cmd_drift(
    config_path: Option<&Path>,
    vars: &[String],
    formatter: &OutputFormatter,
) -> Result<u8> {
    let project = Project::load(config_path, vars)?;
    let (_, graph) = project.check()?;
    let store = project.open_store().await?;

    let plan = project.plan(&graph, store.as_ref()).await?;
    emit(&formatter.format_drift(&plan))?;

    Ok(if plan.has_changes() { EXIT_INCOMPLETE } else { EXIT_OK })
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    vars: &[String],
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let project = Project::load(config_path, vars)?;
    let store = project.open_store().await?;

    match command {
        StateCommands::Show => {
            let resources = store.list().await?;
            let history = store.history().await?;
            let lock = store.lock_info().await?;
            emit(&formatter.format_state(&resources, &history, lock.as_ref()))?;
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder).await?;
            emit(&formatter.success(&format!("State locked: {}", lock.lock_id)))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock) = store.lock_info().await? {
                    store.release_lock(&lock.lock_id).await?;
                    emit(&formatter.warning("State forcefully unlocked."))?;
                } else {
                    emit(&formatter.success("State is not locked."))?;
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                emit(&formatter.success("State unlocked."))?;
            } else {
                emit(&formatter.error("Please provide --lock-id or use --force"))?;
                return Ok(EXIT_INCOMPLETE);
            }
        }
    }

    Ok(EXIT_OK)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// A loaded document with its providers. The graph is built on demand by
/// [`Project::check`].
struct Project {
    document: Document,
    base_dir: PathBuf,
    registry: Arc<ProviderRegistry>,
    config_hash: String,
}

impl Project {
    /// Loads the document and applies overrides. Performs no provider calls
    /// and touches no state.
    fn load(config_path: Option<&Path>, vars: &[String]) -> Result<Self> {
        let config_file = resolve_config_path(config_path)?;
        debug!("Loading document from: {}", config_file.display());

        let base_dir = config_file
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let parser = ConfigParser::new().with_base_path(base_dir.clone());
        parser.load_dotenv()?;

        let mut document = parser.load_with_env(&config_file)?;
        ConfigParser::apply_var_overrides(&mut document, vars)?;

        let registry = Arc::new(ProviderRegistry::from_bindings(
            &document.providers,
            &base_dir.join(&document.settings.state.path),
        ));
        let config_hash = ConfigHasher::new().hash_document(&document);

        Ok(Self {
            document,
            base_dir,
            registry,
            config_hash,
        })
    }

    /// Validates the document and builds its dependency graph.
    fn check(&self) -> Result<(ValidationResult, Graph)> {
        let validation = ConfigValidator::new().validate(&self.document)?;
        for warning in &validation.warnings {
            debug!("Validation warning: {warning}");
        }

        let graph = GraphBuilder::new(self.document.variables.clone())
            .build(&self.document.resources)?;
        Ok((validation, graph))
    }

    /// Opens the state store named by the document.
    async fn open_store(&self) -> Result<Arc<LocalStateStore>> {
        let state_dir = self.base_dir.join(&self.document.settings.state.path);
        Ok(Arc::new(LocalStateStore::open(state_dir).await?))
    }

    fn options(&self) -> ApplyOptions {
        ApplyOptions::from_settings(&self.document.settings.apply)
    }

    /// A planner whose provider reads follow the document's retry settings.
    fn planner<'a>(&'a self, store: &'a dyn StateStore) -> PlanEngine<'a> {
        PlanEngine::new(&self.registry, store).with_options(&self.options())
    }

    /// Computes the change set for `graph`.
    async fn plan(&self, graph: &Graph, store: &dyn StateStore) -> Result<ChangeSet> {
        Ok(self
            .planner(store)
            .plan(graph)
            .await?
            .with_config_hash(&self.config_hash))
    }

    /// Executes a change set and prints the report. Ctrl-C cancels the run.
    async fn execute(
        &self,
        store: &Arc<LocalStateStore>,
        plan: &ChangeSet,
        formatter: &OutputFormatter,
    ) -> Result<u8> {
        let cancel = CancellationToken::new();
        cancel_on_interrupt(cancel.clone());

        let store: Arc<dyn StateStore> = store.clone();
        let engine = ApplyEngine::new(self.registry.clone(), store).with_options(self.options());

        let report = engine.apply(plan, cancel).await?;
        emit(&formatter.format_report(&report))?;

        Ok(if report.is_success() { EXIT_OK } else { EXIT_INCOMPLETE })
    }
}

/// Resolves the document path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, letting in-flight operations finish");
            token.cancel();
        }
    });
}

/// Runs `work` under the state lock, refreshing the lock until `work` is done.
async fn locked<F>(store: &Arc<LocalStateStore>, work: F) -> Result<u8>
where
    F: Future<Output = Result<u8>>,
{
    let lock = store.acquire_lock(&generate_holder_id()).await?;
    let stop = CancellationToken::new();
    let refresher = keep_alive(
        store.clone(),
        lock.lock_id.clone(),
        Duration::from_secs(LOCK_REFRESH_SECS),
        stop.clone(),
    );

    let result = work.await;

    stop.cancel();
    if let Err(e) = refresher.await {
        warn!("Lock refresher did not stop cleanly: {e}");
    }
    release(store.as_ref(), &lock).await;
    result
}

/// Releases the run lock, logging rather than failing on error.
async fn release(store: &LocalStateStore, lock: &LockInfo) {
    if let Err(e) = store.release_lock(&lock.lock_id).await {
        warn!("Failed to release state lock {}: {e}", lock.lock_id);
    }
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}
