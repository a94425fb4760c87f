/// Version injected at compile time via CLOUDSYNC_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDSYNC_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cloudsync::config::Config;
use cloudsync::engine::{ApplyReport, LifecycleDriver, Operation, SyncError, Synchronizer};
use cloudsync::remote::{format_remote_error, ControlPlaneClient};
use cloudsync::resource::{
    state_path_for, AutonomousDataWarehouseSync, ResourceManifest, StateFile,
};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Reconcile declared resources against a cloud control plane
#[derive(Parser, Debug)]
#[command(name = "cloudsync", version = VERSION, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Control-plane endpoint (overrides CLOUDSYNC_ENDPOINT and the config file)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the resources declared in the manifests
    Create {
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
    /// Refresh recorded state from the remote system
    Read {
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
    /// Apply manifest changes to created resources
    Update {
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
    /// Delete created resources
    Delete {
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
    /// Store the endpoint (from --endpoint) and token in the config file
    Configure {
        /// Bearer token
        #[arg(long)]
        token: Option<String>,
    },
}

impl Command {
    /// Operation and manifests, or `None` for `configure`
    fn reconcile_target(&self) -> Option<(Operation, &[PathBuf])> {
        match self {
            Command::Create { manifests } => Some((Operation::Create, manifests.as_slice())),
            Command::Read { manifests } => Some((Operation::Read, manifests.as_slice())),
            Command::Update { manifests } => Some((Operation::Update, manifests.as_slice())),
            Command::Delete { manifests } => Some((Operation::Delete, manifests.as_slice())),
            Command::Configure { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: cannot open log file {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudsync {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cloudsync").join("cloudsync.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudsync").join("cloudsync.log");
    }
    PathBuf::from("cloudsync.log")
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Reconcile every manifest; `Ok(false)` when at least one failed
async fn run(args: Args) -> Result<bool> {
    let mut config = Config::load();

    let Some((operation, manifests)) = args.command.reconcile_target() else {
        if let Command::Configure { token } = &args.command {
            configure(&mut config, args.endpoint.as_deref(), token.as_deref());
        }
        config.save().context("saving configuration")?;
        match Config::config_path() {
            Some(path) => println!("Saved {}", path.display()),
            None => println!("No config directory on this platform; nothing saved"),
        }
        return Ok(true);
    };

    let endpoint = config
        .effective_endpoint(args.endpoint.as_deref())
        .ok_or_else(|| {
            anyhow!("No endpoint configured. Set CLOUDSYNC_ENDPOINT or use --endpoint")
        })?;

    let client = ControlPlaneClient::new(&endpoint, config.effective_token())
        .with_context(|| format!("connecting to {endpoint}"))?;

    let cancel = CancellationToken::new();
    let driver = LifecycleDriver::new(
        config.retry.to_policy(),
        config.poll.to_poll_config(),
        config.timeouts.to_timeouts(),
        cancel.clone(),
    )
    .with_overrides(config.timeout_overrides.clone());

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight operations");
            on_interrupt.cancel();
        }
    });

    tracing::info!("{} {} manifest(s) at {}", operation, manifests.len(), endpoint);

    let results = join_all(
        manifests
            .iter()
            .map(|path| reconcile(operation, path, &client, &driver)),
    )
    .await;

    let mut all_ok = true;
    for (path, result) in manifests.iter().zip(results) {
        match result {
            Ok(summary) => println!("{}: {}", path.display(), summary),
            Err(err) => {
                all_ok = false;
                eprintln!("{}: {}", path.display(), describe_error(&err));
            }
        }
    }

    Ok(all_ok)
}

/// Overwrite only the settings given on the command line
fn configure(config: &mut Config, endpoint: Option<&str>, token: Option<&str>) {
    if let Some(endpoint) = endpoint {
        config.endpoint = Some(endpoint.to_string());
    }
    if let Some(token) = token {
        config.token = Some(token.to_string());
    }
}

/// User-facing message; remote failures get the short form
fn describe_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::Remote { source, .. }) => {
            format!("{} ({:#})", format_remote_error(source), err)
        }
        _ => format!("{err:#}"),
    }
}

fn summarize(kind: &str, report: &ApplyReport, state: Option<&impl std::fmt::Display>) -> String {
    let state = state.map_or_else(|| "-".to_string(), |s| s.to_string());
    format!(
        "{} {} done, state {} ({} status fetches, {} polls)",
        kind, report.operation, state, report.status_fetches, report.poll_iterations
    )
}

async fn reconcile(
    operation: Operation,
    manifest_path: &Path,
    client: &ControlPlaneClient,
    driver: &LifecycleDriver,
) -> Result<String> {
    let state_path = state_path_for(manifest_path);
    let recorded = StateFile::load(&state_path)?;

    match operation {
        Operation::Create => {
            if let Some(state) = recorded {
                bail!(
                    "already created as {} ({} exists); use update",
                    state.id,
                    state_path.display()
                );
            }

            let manifest = ResourceManifest::load(manifest_path)?;
            let kind = manifest.kind();
            let ResourceManifest::AutonomousDataWarehouse(mut declared) = manifest;

            let mut sync = AutonomousDataWarehouseSync::new(client.clone())?;
            let result = driver.create(&mut sync, &mut declared).await;

            // Record whatever identity the remote assigned, even on failure,
            // so the resource can still be read or deleted
            if let Some(id) = sync.identity().cloned() {
                let summary_state = declared.state.clone();
                StateFile {
                    id,
                    resource: ResourceManifest::AutonomousDataWarehouse(declared),
                }
                .save(&state_path)?;
                let report = result?;
                return Ok(summarize(kind, &report, summary_state.as_ref()));
            }

            let report = result?;
            Ok(summarize(kind, &report, declared.state.as_ref()))
        }

        Operation::Read => {
            let state = recorded
                .ok_or_else(|| anyhow!("not created yet (no {})", state_path.display()))?;
            let kind = state.resource.kind();
            let ResourceManifest::AutonomousDataWarehouse(mut declared) = state.resource;

            let mut sync =
                AutonomousDataWarehouseSync::new(client.clone())?.with_identity(state.id.clone());
            let report = driver.read(&mut sync, &mut declared).await?;

            if !report.present {
                StateFile::remove(&state_path)?;
                return Ok(format!("{} {} no longer exists; state removed", kind, state.id));
            }

            let summary = summarize(kind, &report, declared.state.as_ref());
            StateFile {
                id: state.id,
                resource: ResourceManifest::AutonomousDataWarehouse(declared),
            }
            .save(&state_path)?;
            Ok(summary)
        }

        Operation::Update => {
            let state = recorded
                .ok_or_else(|| {
                    anyhow!("not created yet (no {}); use create", state_path.display())
                })?;
            let kind = state.resource.kind();
            let ResourceManifest::AutonomousDataWarehouse(prior) = state.resource;
            let ResourceManifest::AutonomousDataWarehouse(mut desired) =
                ResourceManifest::load(manifest_path)?;

            let mut sync =
                AutonomousDataWarehouseSync::new(client.clone())?.with_identity(state.id.clone());
            let report = driver.update(&mut sync, &prior, &mut desired).await?;

            if !report.mutation_sent {
                return Ok(format!("{} {} unchanged", kind, state.id));
            }

            if desired.admin_password.is_none() {
                desired.admin_password = prior.admin_password;
            }
            let summary = summarize(kind, &report, desired.state.as_ref());
            StateFile {
                id: state.id,
                resource: ResourceManifest::AutonomousDataWarehouse(desired),
            }
            .save(&state_path)?;
            Ok(summary)
        }

        Operation::Delete => {
            let Some(state) = recorded else {
                return Ok("not created; nothing to delete".to_string());
            };
            let kind = state.resource.kind();

            let mut sync =
                AutonomousDataWarehouseSync::new(client.clone())?.with_identity(state.id.clone());
            let report = driver.delete(&mut sync).await?;
            StateFile::remove(&state_path)?;

            Ok(summarize(kind, &report, None::<&String>))
        }
    }
}
