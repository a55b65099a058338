//! Command-line interface for tp
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::auth::{Session, StaticToken, TokenProvider};
use crate::config::Settings;
use crate::error::Result;
use crate::model::{TaskPriority, TaskStatus};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::remote::UsableClient;
use crate::service::TaskService;
use crate::storage::{self, Storage};
use crate::workspace::WorkspaceStore;

mod auth;
mod dep;
mod tag;
mod task;
mod workspace;

/// tp - task planner backed by Usable memory fragments
#[derive(Parser, Debug)]
#[command(name = "tp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true, env = "TP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding tokens and the workspace pointer
    #[arg(long, global = true, env = "TP_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Bearer token to use instead of the stored session
    #[arg(long, global = true, env = "TP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Session management
    #[command(subcommand)]
    Auth(AuthCommands),

    /// Choose the workspace tasks live in
    #[command(subcommand)]
    Workspace(WorkspaceCommands),

    /// Create, edit and archive tasks
    #[command(subcommand)]
    Task(TaskCommands),

    /// Task dependencies
    #[command(subcommand)]
    Dep(DepCommands),

    /// User tags
    #[command(subcommand)]
    Tag(TagCommands),

    /// Add the source tag to task fragments created before it existed
    Migrate,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Show the current session
    Status,

    /// Install tokens obtained from the identity provider
    Login {
        #[arg(long, env = "TP_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        #[arg(long, env = "TP_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: String,

        /// Access token lifetime in seconds
        #[arg(long, default_value_t = 300)]
        expires_in: u64,
    },

    /// Exchange the refresh token now
    Refresh,

    /// Forget the stored session
    Logout,
}

#[derive(Subcommand, Debug)]
pub enum WorkspaceCommands {
    /// List workspaces visible to the session
    List,

    /// List fragment types of a workspace
    Types { workspace_id: String },

    /// Store tasks in this workspace
    Connect {
        workspace_id: String,
        name: String,
    },

    /// Show the connected workspace
    Show,

    /// Disconnect the workspace
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// List tasks (archived hidden unless --status archived)
    List {
        #[arg(long)]
        status: Option<TaskStatus>,

        #[arg(long)]
        priority: Option<TaskPriority>,

        #[arg(long)]
        tag: Option<String>,
    },

    /// Show one task
    Show { id: String },

    /// Create a task
    New {
        title: String,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        status: Option<TaskStatus>,

        #[arg(long)]
        priority: Option<TaskPriority>,

        /// User tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Project name (repeatable)
        #[arg(long = "project")]
        projects: Vec<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },

    /// Change fields of a task
    Update {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        status: Option<TaskStatus>,

        #[arg(long)]
        priority: Option<TaskPriority>,

        /// Replace the user tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Replace the projects (repeatable)
        #[arg(long = "project")]
        projects: Vec<String>,

        /// Start date; empty clears it
        #[arg(long)]
        start: Option<String>,

        /// End date; empty clears it
        #[arg(long)]
        end: Option<String>,
    },

    /// Archive a task
    Delete { id: String },

    /// Append a comment
    Comment { id: String, text: String },

    /// Move tasks: `<id>=<order>` pairs
    Reorder {
        #[arg(required = true)]
        moves: Vec<String>,

        /// Apply to the board order instead of the list order
        #[arg(long)]
        board: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DepCommands {
    /// Show what a task depends on and what it blocks
    List { id: String },

    /// `id` depends on `depends_on`
    Add { id: String, depends_on: String },

    /// `blocker` blocks `blocked`
    Block { blocker: String, blocked: String },

    /// Remove a dependency
    Rm { id: String, depends_on: String },

    /// Print every task and dependency edge
    Graph,

    /// Open tasks whose dependencies are all done
    Ready,
}

#[derive(Subcommand, Debug)]
pub enum TagCommands {
    /// All user tags in the workspace
    List,

    /// Add a tag to a task
    Assign { id: String, tag: String },

    /// Remove a tag from a task
    Unassign { id: String, tag: String },

    /// Remove a tag from every task
    Delete { tag: String },
}

/// Everything a command needs, built once per invocation.
pub(crate) struct Context {
    pub settings: Settings,
    pub session: Session,
    pub service: TaskService,
    pub output: OutputOptions,
}

impl Context {
    async fn build(cli: &Cli) -> Result<Self> {
        let settings = match cli.config.as_deref() {
            Some(path) => Settings::load(path)?,
            None => Settings::load_or_default(storage::default_settings_path().as_deref()),
        };
        let storage = match cli.data_dir.as_ref() {
            Some(dir) => Storage::new(dir),
            None => Storage::platform_default()?,
        };

        let session = Session::new(storage.clone(), &settings);
        let tokens: Arc<dyn TokenProvider> = match cli.token.as_deref() {
            Some(token) => Arc::new(StaticToken::new(token)),
            None => {
                session.init().await?;
                Arc::new(session.clone())
            }
        };

        let client = UsableClient::new(&settings.api.base_url, Arc::clone(&tokens))?;
        let service = TaskService::with_settings(
            Arc::new(client),
            WorkspaceStore::new(storage),
            &settings,
            Some(tokens),
        );

        Ok(Self {
            settings,
            session,
            service,
            output: OutputOptions {
                json: cli.json,
                quiet: cli.quiet,
            },
        })
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.run_async())
    }

    async fn run_async(self) -> Result<()> {
        let ctx = Context::build(&self).await?;
        match self.command {
            Commands::Auth(cmd) => auth::run(&ctx, cmd).await,
            Commands::Workspace(cmd) => workspace::run(&ctx, cmd).await,
            Commands::Task(cmd) => task::run(&ctx, cmd).await,
            Commands::Dep(cmd) => dep::run(&ctx, cmd).await,
            Commands::Tag(cmd) => tag::run(&ctx, cmd).await,
            Commands::Migrate => run_migrate(&ctx).await,
        }
    }
}

#[derive(serde::Serialize)]
struct MigrateReport {
    updated: usize,
}

async fn run_migrate(ctx: &Context) -> Result<()> {
    let updated = ctx.service.migrate_source_tag().await?;

    let mut human = HumanOutput::new(format!("tp migrate: {updated} fragment(s) tagged"));
    human.push_summary("tag", crate::codec::SOURCE_TAG);
    if updated == 0 {
        human.push_detail("nothing to migrate");
    }

    emit_success(ctx.output, "migrate", &MigrateReport { updated }, Some(&human))
}
