use auto_deployer::config::{DeployerConfig, default_config_path};
use auto_deployer::error::Result;
use auto_deployer::git::GitSynchronizer;
use auto_deployer::logging::{FileLogger, setup_logging};
use auto_deployer::notify::{EmailNotifier, LogNotifier, Notifier};
use auto_deployer::pipeline::DeploymentPipeline;
use auto_deployer::queue::{DEFAULT_QUEUE_CAPACITY, DeploymentQueue};
use auto_deployer::registry::{WatchRegistry, WatchedTarget};
use auto_deployer::runner::ShellRunner;
use auto_deployer::{AppState, api};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "auto_deployer")]
#[command(about = "Pull and redeploy local checkouts on GitHub push webhooks", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, env = "DEPLOYER_CONFIG")]
    config: Option<PathBuf>,

    /// Also write daily-rotated log files to this directory
    #[arg(long, global = true, env = "DEPLOYER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Start,
    /// Watch a local git checkout
    AddFolder {
        /// Path to the working copy
        path: PathBuf,
        /// Shell command to run after each successful pull
        #[arg(long, default_value = "")]
        command: String,
        /// Kill the command after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Also send a notification when a deployment succeeds
        #[arg(long)]
        notify_on_success: bool,
    },
    /// List watched checkouts
    ListFolders,
    /// Stop watching a checkout
    RemoveFolder {
        /// Path to the working copy
        path: PathBuf,
    },
}

async fn start(config_path: PathBuf) -> Result<()> {
    let mut config = DeployerConfig::load(&config_path)?;
    config.apply_env_overrides();
    config.validate_for_server()?;

    let registry = Arc::new(WatchRegistry::from_config(&config)?);
    if registry.is_empty() {
        warn!("No folders are being watched; add one with `add-folder`");
    }

    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) if smtp.is_configured() => Arc::new(EmailNotifier::new(smtp)?),
        _ => {
            info!("SMTP not configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    };

    let pipeline = Arc::new(DeploymentPipeline::new(
        registry.clone(),
        Arc::new(GitSynchronizer::default()),
        Arc::new(ShellRunner),
        notifier,
    ));
    let queue = DeploymentQueue::start(pipeline.clone(), DEFAULT_QUEUE_CAPACITY);

    let state = Arc::new(AppState {
        webhook_secret: config.github.webhook_secret.clone(),
        pipeline,
        queue,
        start_time: Instant::now(),
        started_at: Utc::now(),
    });
    let app = api::router(state);

    let bind_address = config.server.bind_address();
    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    for target in registry.targets() {
        info!(
            path = %target.local_path.display(),
            branch = %target.branch,
            "Watching"
        );
    }

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn add_folder(
    config_path: PathBuf,
    path: PathBuf,
    command: String,
    timeout_secs: Option<u64>,
    notify_on_success: bool,
) -> Result<()> {
    let mut config = DeployerConfig::load_or_default(&config_path)?;
    let target = WatchedTarget::register(
        &path,
        &command,
        timeout_secs.map(Duration::from_secs),
        notify_on_success,
    )
    .await?;

    config.add_folder(target.to_folder())?;
    config.save(&config_path)?;

    println!(
        "Watching {} (branch {}, remote {})",
        target.local_path.display(),
        target.branch,
        target.remote_url
    );
    Ok(())
}

fn list_folders(config_path: PathBuf) -> Result<()> {
    let config = DeployerConfig::load_or_default(&config_path)?;
    if config.folders.is_empty() {
        println!("No folders are being watched.");
        return Ok(());
    }

    for folder in &config.folders {
        println!("{}", folder.path.display());
        println!("  branch:  {}", folder.branch);
        println!("  remote:  {}", folder.repo_url);
        if !folder.command.is_empty() {
            println!(
                "  command: {} (timeout {}s)",
                folder.command,
                folder.command_timeout().as_secs()
            );
        }
    }
    Ok(())
}

fn remove_folder(config_path: PathBuf, path: PathBuf) -> Result<()> {
    let mut config = DeployerConfig::load(&config_path)?;
    // Accept the path as typed or in the canonical form stored by add-folder.
    let path = std::fs::canonicalize(&path).unwrap_or(path);
    let removed = config.remove_folder(&path)?;
    config.save(&config_path)?;

    println!("Stopped watching {}", removed.path.display());
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let file_logger = cli.log_dir.clone().map(FileLogger::new);
    let _guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging error: {}", e);
            std::process::exit(1);
        }
    };

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let result = match cli.command {
        Commands::Start => start(config_path).await,
        Commands::AddFolder {
            path,
            command,
            timeout_secs,
            notify_on_success,
        } => add_folder(config_path, path, command, timeout_secs, notify_on_success).await,
        Commands::ListFolders => list_folders(config_path),
        Commands::RemoveFolder { path } => remove_folder(config_path, path),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
