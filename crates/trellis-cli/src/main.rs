mod config;
mod db_cmd;
mod error;
mod init_cmd;
mod repo_cmds;
mod run_cmd;
mod serve_cmd;
mod status_cmd;
mod tree_cmds;

use clap::{Parser, Subcommand};

use error::CliError;
use trellis_db::pool;

#[derive(Parser)]
#[command(name = "trellis", about = "durable LLM-agent workflow orchestrator")]
struct Cli {
    /// Database URL (overrides ALPHRED_DB_PATH env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file (no database required)
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create and migrate the configured database
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Start a run, or drive an existing run with an operator action
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Show a run's status and its nodes
    Status {
        /// Run ID
        #[arg(long)]
        run: i64,
    },
    /// Manage registered Git repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Publish or inspect workflow trees
    Tree {
        #[command(subcommand)]
        command: TreeCommands,
    },
    /// Run the dashboard HTTP server
    Serve {
        /// Port to bind
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Create the database if needed and apply migrations
    Init,
}

#[derive(Subcommand)]
enum RunCommands {
    /// Start a new run from a published tree
    Start {
        /// Tree key to materialize a run from
        #[arg(long)]
        tree: String,
        /// Repository: a registered name, or a `github:owner/repo` /
        /// `azure:org/project/repo` shorthand
        #[arg(long)]
        repo: Option<String>,
        /// Branch to check out for the run's worktree
        #[arg(long)]
        branch: Option<String>,
    },
    /// Cancel a run from any non-terminal status
    Cancel {
        #[arg(long)]
        run: i64,
    },
    /// Pause a running run
    Pause {
        #[arg(long)]
        run: i64,
    },
    /// Resume a paused run
    Resume {
        #[arg(long)]
        run: i64,
    },
    /// Re-queue a failed run's latest failed nodes
    Retry {
        #[arg(long)]
        run: i64,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Register a new repository
    Add {
        name: String,
        #[arg(long)]
        remote_url: String,
        #[arg(long, default_value = "main")]
        default_branch: String,
    },
    /// List registered repositories
    List,
    /// Show a single registered repository
    Show { name: String },
    /// Remove a registered repository
    Remove {
        name: String,
        /// Also delete the local clone
        #[arg(long)]
        purge: bool,
    },
    /// Clone or fetch a repository into the sandbox
    Sync { name: String },
}

#[derive(Subcommand)]
enum TreeCommands {
    /// Publish a tree definition from a TOML file
    Publish {
        /// Path to the tree TOML file
        file: String,
    },
    /// Show a tree's nodes and edges
    Show {
        #[arg(long)]
        tree: String,
        #[arg(long)]
        version: Option<i32>,
        /// Overlay live node status from this run
        #[arg(long)]
        run: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Init { force } => {
            init_cmd::run(force)?;
        }
        Commands::Db { command } => {
            let engine_config = config::resolve(cli.database_url.as_deref()).map_err(CliError::runtime)?;
            match command {
                DbCommands::Init => db_cmd::init(&engine_config).await?,
            }
        }
        Commands::Run { command } => {
            let engine_config = config::resolve(cli.database_url.as_deref()).map_err(CliError::runtime)?;
            let db_pool = pool::create_pool(&engine_config.store).await.map_err(CliError::runtime)?;
            let result = match command {
                RunCommands::Start { tree, repo, branch } => {
                    run_cmd::start_run(&db_pool, &engine_config, &tree, repo.as_deref(), branch.as_deref()).await
                }
                RunCommands::Cancel { run } => run_cmd::cancel(&db_pool, run).await,
                RunCommands::Pause { run } => run_cmd::pause(&db_pool, run).await,
                RunCommands::Resume { run } => run_cmd::resume(&db_pool, run).await,
                RunCommands::Retry { run } => run_cmd::retry(&db_pool, run).await,
            };
            db_pool.close().await;
            result?;
        }
        Commands::Status { run } => {
            let engine_config = config::resolve(cli.database_url.as_deref()).map_err(CliError::runtime)?;
            let db_pool = pool::create_pool(&engine_config.store).await.map_err(CliError::runtime)?;
            let result = status_cmd::run_status(&db_pool, run).await;
            db_pool.close().await;
            result?;
        }
        Commands::Repo { command } => {
            let engine_config = config::resolve(cli.database_url.as_deref()).map_err(CliError::runtime)?;
            let db_pool = pool::create_pool(&engine_config.store).await.map_err(CliError::runtime)?;
            let result = match command {
                RepoCommands::Add { name, remote_url, default_branch } => {
                    repo_cmds::add(&db_pool, &name, &remote_url, &default_branch).await
                }
                RepoCommands::List => repo_cmds::list(&db_pool).await,
                RepoCommands::Show { name } => repo_cmds::show(&db_pool, &name).await,
                RepoCommands::Remove { name, purge } => {
                    repo_cmds::remove(&db_pool, &name, purge, &engine_config.sandbox_dir).await
                }
                RepoCommands::Sync { name } => repo_cmds::sync(&db_pool, &engine_config.sandbox_dir, &name).await,
            };
            db_pool.close().await;
            result?;
        }
        Commands::Tree { command } => {
            let engine_config = config::resolve(cli.database_url.as_deref()).map_err(CliError::runtime)?;
            let db_pool = pool::create_pool(&engine_config.store).await.map_err(CliError::runtime)?;
            let result = match command {
                TreeCommands::Publish { file } => tree_cmds::publish(&db_pool, &file).await,
                TreeCommands::Show { tree, version, run } => {
                    tree_cmds::show(&db_pool, &tree, version, run).await
                }
            };
            db_pool.close().await;
            result?;
        }
        Commands::Serve { port, bind } => {
            let engine_config = config::resolve(cli.database_url.as_deref()).map_err(CliError::runtime)?;
            let db_pool = pool::create_pool(&engine_config.store).await.map_err(CliError::runtime)?;
            let result = serve_cmd::run_serve(db_pool.clone(), &bind, port).await.map_err(CliError::runtime);
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
