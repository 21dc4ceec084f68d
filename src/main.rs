// src/main.rs

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use kernel_mirror::cancel::CancelToken;
use kernel_mirror::config::{self, Settings};
use kernel_mirror::repository::{HttpFetcher, RemoteCatalog, RepoTool};
use kernel_mirror::resolver::{ResolvePolicy, StdinPrompt};
use kernel_mirror::state::StateStore;
use kernel_mirror::sync::{SyncReport, SyncSession};
use kernel_mirror::transaction::Outcome;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "kernel-mirror")]
#[command(author, version, about = "Mirror Arch Linux kernels into a local repository, one version per kernel", long_about = None)]
struct Cli {
    #[command(flatten)]
    repo: RepoArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct RepoArgs {
    /// Directory holding the mirrored packages
    #[arg(short, long, global = true, default_value = "/srv/repo/kernels")]
    repo_dir: PathBuf,

    /// Repository database (default: <repo-dir>/kernels.db.tar.gz)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Kernel list file
    #[arg(short, long, global = true, default_value = "/etc/kernel-mirror/kernels.conf")]
    kernels: PathBuf,

    /// Repository database listing the available kernels
    #[arg(long, global = true, default_value = config::DEFAULT_CATALOG_URL)]
    catalog_url: String,

    /// Archive serving every package version
    #[arg(long, global = true, default_value = config::DEFAULT_ARCHIVE_URL)]
    archive_url: String,
}

#[derive(Args)]
struct PolicyArgs {
    /// Pick the newest version when the catalog lists several
    #[arg(long)]
    prefer_newest: bool,

    /// Always ask instead of keeping the tracked version
    #[arg(long)]
    no_prefer_current: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the repository in line with the catalog
    Sync {
        #[command(flatten)]
        policy: PolicyArgs,

        /// Run even if the last check is recent
        #[arg(short, long)]
        force: bool,

        /// Minimum seconds between checks
        #[arg(long, default_value_t = 3600)]
        interval: u64,
    },
    /// Show what a sync would do without changing anything
    Plan {
        #[command(flatten)]
        policy: PolicyArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the tracked kernels and when they were last checked
    Status,
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

impl RepoArgs {
    fn settings(&self, policy: &PolicyArgs) -> Settings {
        let mut settings = Settings::new(&self.repo_dir);
        if let Some(database) = &self.database {
            settings.database_path = database.clone();
        }
        settings.catalog_url = self.catalog_url.clone();
        settings.archive_url = self.archive_url.clone();
        settings.policy = ResolvePolicy {
            prefer_current: !policy.no_prefer_current,
            prefer_newest: policy.prefer_newest,
        };
        settings
    }
}

fn main() -> ExitCode {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("Failed to install interrupt handler: {}", e);
    }

    match run(cli, cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<kernel_mirror::Error>() {
            Some(kernel_mirror::Error::Interrupted) => {
                info!("Interrupted, exiting");
                ExitCode::SUCCESS
            }
            Some(kernel_mirror::Error::LockBusy(path)) => {
                warn!("Another sync holds {}, exiting", path.display());
                ExitCode::FAILURE
            }
            _ => {
                error!("{:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn run(cli: Cli, cancel: CancelToken) -> Result<()> {
    match cli.command {
        Some(Commands::Sync {
            policy,
            force,
            interval,
        }) => {
            let mut settings = cli.repo.settings(&policy);
            settings.force = force;
            settings.check_interval = Duration::from_secs(interval);

            let families = config::load_kernel_list(&cli.repo.kernels)?;
            info!("Tracking families: {}", families.join(", "));

            let fetcher = HttpFetcher::new()?;
            let catalog = RemoteCatalog::new(&fetcher, settings.catalog_url.clone(), cancel.clone());
            let database = RepoTool::new(&settings.database_path);
            let mut prompt = StdinPrompt::new(cancel.clone());

            let mut session =
                SyncSession::new(settings, &catalog, &fetcher, &database, &mut prompt, cancel);
            match session.run(&families)? {
                SyncReport::Skipped { age } => {
                    println!("Checked {}s ago, nothing to do (use --force)", age.as_secs());
                }
                SyncReport::Completed {
                    outcome: Outcome::NoOp,
                    ..
                } => println!("Repository is up to date"),
                SyncReport::Completed {
                    outcome: Outcome::Applied(applied),
                    ..
                } => {
                    for token in &applied.deleted {
                        println!("Removed {}", token);
                    }
                    for token in &applied.published {
                        println!("Added {}", token);
                    }
                }
            }
            Ok(())
        }
        Some(Commands::Plan { policy, json }) => {
            let settings = cli.repo.settings(&policy);
            let families = config::load_kernel_list(&cli.repo.kernels)?;

            let fetcher = HttpFetcher::new()?;
            let catalog = RemoteCatalog::new(&fetcher, settings.catalog_url.clone(), cancel.clone());
            let database = RepoTool::new(&settings.database_path);
            let mut prompt = StdinPrompt::new(cancel.clone());

            let mut session =
                SyncSession::new(settings, &catalog, &fetcher, &database, &mut prompt, cancel);
            let (_, plan) = session.prepare(&families)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else if plan.is_noop() {
                println!("Nothing to do");
            } else {
                for token in &plan.to_download {
                    println!("download  {}", token);
                }
                for token in &plan.to_delete {
                    println!("delete    {}", token);
                }
                for token in &plan.to_keep {
                    println!("keep      {}", token);
                }
            }
            Ok(())
        }
        Some(Commands::Status) => {
            let settings = Settings::new(&cli.repo.repo_dir);
            let state = StateStore::new(&settings.state_path);
            let current = state.load()?;

            if current.is_empty() {
                println!("No kernels tracked.");
            } else {
                println!("Tracked kernels:");
                for token in current.tokens() {
                    println!("  {} {} [{}]", token.family(), token.version(), token.arch());
                }
            }

            let age = state.age_since_last_check();
            match SystemTime::now().checked_sub(age) {
                Some(checked) if age != Duration::MAX => {
                    let checked: chrono::DateTime<chrono::Local> = checked.into();
                    println!("\nLast check: {} ({}s ago)", checked.to_rfc3339(), age.as_secs());
                }
                _ => println!("\nNever checked"),
            }
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "kernel-mirror",
                &mut std::io::stdout(),
            );
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("kernel-mirror v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'kernel-mirror --help' for usage information");
            Ok(())
        }
    }
}
