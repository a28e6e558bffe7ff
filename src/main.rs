mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use taproom::{Brew, Config, ExecutionError};

#[derive(Parser)]
#[command(name = "taproom")]
#[command(author, version, about = "Drive Homebrew with cached, streaming output", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the brew executable
    #[arg(long, global = true, env = "TAPROOM_BREW")]
    brew: Option<PathBuf>,

    /// Directory for cached results
    #[arg(long, global = true, env = "TAPROOM_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed packages
    List {
        /// List casks instead of formulae
        #[arg(long)]
        casks: bool,

        /// Ignore the cache and ask brew
        #[arg(long)]
        refresh: bool,
    },

    /// Show outdated installed packages
    Outdated {
        #[arg(long)]
        refresh: bool,
    },

    /// Show dependencies of installed formulae
    Deps {
        #[arg(long)]
        refresh: bool,
    },

    /// Show installed formulae that are not dependencies of another
    Leaves {
        #[arg(long)]
        refresh: bool,
    },

    /// Show information about a formula or cask
    Info {
        name: String,

        #[arg(long)]
        cask: bool,
    },

    /// Search for formulae and casks
    Search { query: String },

    /// Install formulae or casks
    Install {
        names: Vec<String>,

        #[arg(long)]
        cask: bool,
    },

    /// Uninstall formulae or casks
    Uninstall {
        names: Vec<String>,

        #[arg(long)]
        cask: bool,
    },

    /// Upgrade installed packages (or all if empty)
    Upgrade { names: Vec<String> },

    /// Fetch the newest Homebrew and formula definitions
    Update,

    /// Remove old versions and stale downloads
    Cleanup,

    /// Check the system for problems
    Doctor,

    /// Show Homebrew configuration
    Config,

    /// Pin a formula at its current version
    Pin { name: String },

    /// Allow a pinned formula to be upgraded
    Unpin { name: String },

    /// List taps, or add one
    Tap { name: Option<String> },

    /// Remove a tap
    Untap { name: String },

    /// Manage background services
    Services {
        /// Action: list, start, stop, restart
        action: Option<String>,

        /// Formula name
        formula: Option<String>,

        #[arg(long)]
        refresh: bool,
    },

    /// Brewfile management
    Bundle {
        /// Action: dump, install, check
        action: Option<String>,

        /// Brewfile path
        #[arg(long, default_value = "Brewfile")]
        file: PathBuf,
    },

    /// Manage the result cache
    Cache {
        /// Action: path, clear
        action: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env();
    if let Some(brew) = cli.brew {
        config.brew_path = brew;
    }
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }
    let brew = Brew::new(&config);

    let Some(command) = cli.command else {
        println!("{} taproom - Homebrew with cached, streaming output", "🍺".bold());
        println!("\nRun {} to see available commands.", "taproom --help".cyan());
        return;
    };

    if let Err(err) = run(&brew, command).await {
        report(&err);
        std::process::exit(1);
    }
}

async fn run(brew: &Brew, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::List { casks, refresh } => commands::list(brew, casks, refresh).await,
        Commands::Outdated { refresh } => commands::outdated(brew, refresh).await,
        Commands::Deps { refresh } => commands::deps(brew, refresh).await,
        Commands::Leaves { refresh } => commands::leaves(brew, refresh).await,
        Commands::Info { name, cask } => commands::info(brew, &name, cask).await,
        Commands::Search { query } => commands::search(brew, &query).await,
        Commands::Install { names, cask } => commands::install(brew, names, cask).await,
        Commands::Uninstall { names, cask } => commands::uninstall(brew, names, cask).await,
        Commands::Upgrade { names } => commands::upgrade(brew, names).await,
        Commands::Update => commands::update(brew).await,
        Commands::Cleanup => commands::cleanup(brew).await,
        Commands::Doctor => commands::doctor(brew).await,
        Commands::Config => commands::config(brew).await,
        Commands::Pin { name } => commands::pin(brew, name).await,
        Commands::Unpin { name } => commands::unpin(brew, name).await,
        Commands::Tap { name } => commands::tap(brew, name).await,
        Commands::Untap { name } => commands::untap(brew, name).await,
        Commands::Services {
            action,
            formula,
            refresh,
        } => commands::services(brew, action.as_deref(), formula.as_deref(), refresh).await,
        Commands::Bundle { action, file } => commands::bundle(brew, action.as_deref(), file).await,
        Commands::Cache { action } => commands::cache(brew, action.as_deref()),
    }
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<ExecutionError>() {
        Some(ExecutionError::NotFound { program }) => {
            eprintln!("{} Homebrew not found at {}", "✗".red(), program.bold());
            eprintln!("  Install it from {} or pass {}", "https://brew.sh".cyan(), "--brew <path>".cyan());
        }
        Some(ExecutionError::NonZeroExit { code, stderr }) => {
            eprintln!("{} brew exited with status {}", "✗".red(), code.to_string().bold());
            if !stderr.trim().is_empty() {
                eprintln!("{}", stderr.trim_end());
            }
        }
        Some(ExecutionError::Cancelled) => eprintln!("{} Cancelled", "✗".yellow()),
        _ => eprintln!("{} {:#}", "✗".red(), err),
    }
}
