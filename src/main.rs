//! # repo-index-sync CLI (`ris`)
//!
//! Registers Git repositories against a project and keeps the project's
//! four semantic indexes (code, markup, config, all) in step with them.
//!
//! ## Usage
//!
//! ```bash
//! ris --config ./config/ris.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ris init` | Create the SQLite database and run schema migrations |
//! | `ris project create <name>` | Create a project and its four indexes |
//! | `ris project list` | List projects |
//! | `ris project indexes <id>` | Print index ids in binding order |
//! | `ris repo add --project <id> <uri>` | Register a repository and run its first sync |
//! | `ris repo remove <id>` | Remove a repository and its indexed files |
//! | `ris sync <id>` / `ris sync --project <id>` | Run the due pass for one or all repositories |
//! | `ris status` | Resources, states and index member counts |
//! | `ris check <project>` | Verify the union and partition invariants |
//!
//! Logs go to stderr; set `RUST_LOG` to override `[logging].filter`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use repo_index_sync::commands::{self, SyncTarget};
use repo_index_sync::config;
use repo_index_sync::migrate;
use repo_index_sync::progress::ProgressMode;

/// repo-index-sync: keeps per-category semantic search indexes
/// synchronized with Git repositories.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "ris",
    about = "Keep per-category semantic search indexes synchronized with Git repositories",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ris.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a TTY, `off`
    /// otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage tracked repositories.
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// Synchronize a repository, or every repository of a project.
    ///
    /// Runs a full pass for repositories that never synced and an
    /// incremental pass otherwise.
    Sync {
        /// Resource id.
        #[arg(required_unless_present = "project", conflicts_with = "project")]
        resource: Option<i64>,

        /// Sync every resource of this project.
        #[arg(long)]
        project: Option<i64>,
    },

    /// Show resources, sync states and index member counts.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Check a project's index invariants. Exits non-zero on any violation.
    Check {
        /// Project id.
        project: i64,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project and its code, markup, config and all indexes.
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List projects.
    List,
    /// Print provider index ids in binding order (code, markup, config, all).
    Indexes {
        project: i64,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RepoAction {
    /// Register a repository and run its first full sync.
    Add {
        /// Owning project id.
        #[arg(long)]
        project: i64,
        /// Clone URL.
        uri: String,
        #[arg(long, default_value = "main")]
        branch: String,
        /// Secret-store reference for private repositories.
        #[arg(long)]
        credentials: Option<String>,
        /// Only register; sync later with `ris sync`.
        #[arg(long)]
        no_sync: bool,
    },
    /// Remove a repository and everything indexed from it.
    Remove { resource: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Project { action } => match action {
            ProjectAction::Create { name, description } => {
                commands::run_project_create(&cfg, &name, &description).await?;
            }
            ProjectAction::List => {
                commands::run_project_list(&cfg).await?;
            }
            ProjectAction::Indexes { project, json } => {
                commands::run_project_indexes(&cfg, project, json).await?;
            }
        },
        Commands::Repo { action } => match action {
            RepoAction::Add {
                project,
                uri,
                branch,
                credentials,
                no_sync,
            } => {
                commands::run_repo_add(
                    &cfg,
                    project,
                    &uri,
                    &branch,
                    credentials.as_deref(),
                    no_sync,
                    progress,
                )
                .await?;
            }
            RepoAction::Remove { resource } => {
                commands::run_repo_remove(&cfg, resource).await?;
            }
        },
        Commands::Sync { resource, project } => {
            let target = match (resource, project) {
                (_, Some(project)) => SyncTarget::Project(project),
                (Some(resource), None) => SyncTarget::Resource(resource),
                (None, None) => anyhow::bail!("either a resource id or --project is required"),
            };
            commands::run_sync(&cfg, target, progress).await?;
        }
        Commands::Status { json } => {
            repo_index_sync::status::run_status(&cfg, json).await?;
        }
        Commands::Check { project } => {
            commands::run_check(&cfg, project).await?;
        }
    }

    Ok(())
}
