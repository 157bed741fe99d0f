use anyhow::Result;
use bpm::commands;
use bpm::runtime::RealRuntime;
use bpm::settings::{Scope, Settings};
use clap::Parser;
use std::path::PathBuf;

/// bpm - B+ Package Manager
///
/// Install, update and publish B+ packages and extensions.
///
/// If the BPM_TOKEN environment variable is set, it is sent as a bearer
/// token when publishing.
///
/// Examples:
///   bpm install fmt            # Install the latest fmt from the registry
///   bpm install fmt@1.2.0      # Install a specific version
///   bpm install ./my-ext       # Install from a local directory
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use the global (per-user) scope instead of the current project
    #[arg(long, short = 'g', global = true)]
    global: bool,

    /// Registry URL (defaults to https://registry.bpluslang.org)
    #[arg(long, env = "BPM_REGISTRY", value_name = "URL", global = true)]
    registry: Option<String>,

    /// Home directory holding the cache and global config
    #[arg(long, env = "BPM_HOME", value_name = "PATH", global = true)]
    home: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Create a bplus.toml in the current directory
    Init {
        /// Project name (defaults to the directory name)
        name: Option<String>,
    },

    /// Install a package by name, name@version, or local path
    Install {
        #[arg(value_name = "PACKAGE")]
        package: String,

        /// Replace an existing install
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Remove an installed package
    Uninstall { name: String },

    /// Update one package, or all installed packages
    Update { name: Option<String> },

    /// Pack a project and publish it to the registry
    Publish {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Search the registry
    Search { query: String },

    /// List installed packages
    List,

    /// Enable an installed extension
    Enable { name: String },

    /// Disable an extension
    Disable { name: String },

    /// Show details of an installed package
    Info { name: String },

    /// Check a project directory and its manifest
    Verify {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Remove all cached archives
    CacheClear,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;
    let scope = Scope::from_global_flag(cli.global);
    let settings = || Settings::new(&runtime, cli.home.clone(), cli.registry.clone());

    match cli.command {
        Commands::Init { name } => commands::init(&runtime, name.as_deref()),
        Commands::Install { package, force } => {
            commands::install(&runtime, &settings()?, &package, scope, force).await
        }
        Commands::Uninstall { name } => commands::uninstall(&runtime, &settings()?, &name, scope),
        Commands::Update { name } => {
            commands::update(&runtime, &settings()?, name.as_deref(), scope).await
        }
        Commands::Publish { path } => commands::publish(&runtime, &settings()?, &path).await,
        Commands::Search { query } => commands::search(&runtime, &settings()?, &query).await,
        Commands::List => commands::list(&runtime, &settings()?, scope),
        Commands::Enable { name } => commands::enable(&runtime, &settings()?, &name, scope),
        Commands::Disable { name } => commands::disable(&runtime, &settings()?, &name, scope),
        Commands::Info { name } => commands::info(&runtime, &settings()?, &name, scope),
        Commands::Verify { path } => commands::verify(&runtime, &path),
        Commands::CacheClear => commands::cache_clear(&runtime, &settings()?),
    }
}
