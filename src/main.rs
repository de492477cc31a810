use anyhow::Result;
use clap::{Parser, Subcommand};
use modshelf::config::Paths;
use modshelf::db::MetadataEdit;
use modshelf::error::ModError;
use modshelf::nexus::NexusError;
use modshelf::{App, Config};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "modshelf")]
#[command(
    author,
    version,
    about = "A CLI mod manager that keeps game and storage mod folders in sync"
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the game's mods directory and run the first sync
    Init {
        /// The game's mods directory
        #[arg(long)]
        game_mods_dir: String,
        /// Where the browser saves downloads
        #[arg(long)]
        downloads_dir: Option<String>,
    },

    /// Reconcile folders and the library
    Sync,

    /// List mods grouped by category
    List,

    /// Show details of a mod
    Info { id: String },

    /// Enable mods
    Enable {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Disable mods
    Disable {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete a mod's folder and library entry
    Delete { id: String },

    /// Change a mod's display name
    Rename { id: String, name: String },

    /// Move a mod to another category
    Category { id: String, category: String },

    /// Move a mod to a position within its category
    Move { id: String, position: i64 },

    /// Move a category to a position
    MoveCategory { category: String, position: i64 },

    /// Import a mod archive or folder (imported disabled)
    Import {
        path: String,
        #[arg(long, default_value = "default")]
        category: String,
    },

    /// Edit a mod's metadata
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },

    /// Hide the pending update of a mod
    IgnoreUpdate { id: String },

    /// Manage profiles
    Profile {
        #[command(subcommand)]
        action: ProfileCommands,
    },

    /// Nexus Mods metadata operations
    Nexus {
        #[command(subcommand)]
        action: NexusCommands,
    },

    /// Download and install the pending update of a mod
    Update { id: String },

    /// Update every mod with a pending update, one at a time
    UpdateAll,
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List profiles
    List,
    /// Create a profile
    Create {
        id: String,
        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
    },
    /// Switch the active profile
    Switch { id: String },
    /// Rename a profile
    Rename { id: String, name: String },
}

#[derive(Subcommand)]
enum NexusCommands {
    /// Save and validate an API key
    SetKey { key: String },
    /// Validate the saved API key
    Validate,
    /// Fill metadata from Nexus (all mods when no id is given)
    Fill { id: Option<String> },
    /// Look up the latest version of linked mods
    CheckUpdates,
}

fn setup_logging(verbosity: u8, log_file: &Path, also_stderr: bool) {
    let filter = match verbosity {
        0 => "modshelf=info",
        1 => "modshelf=debug",
        2 => "modshelf=trace",
        _ => "trace",
    };

    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file);

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    let stderr_layer = also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    match file {
        Ok(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::sync::Arc::new(file));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(stderr_layer)
                .init();
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
                .init();
            tracing::warn!("Cannot open log file {}: {}", log_file.display(), e);
        }
    }
}

fn report_error(err: &anyhow::Error) {
    eprintln!("Error: {:#}", err);
    if let Some(ModError::Config(_)) = err.downcast_ref::<ModError>() {
        eprintln!("Run 'modshelf init --game-mods-dir <dir>' to configure the game folder.");
    } else if let Some(NexusError::InvalidKey) = err.downcast_ref::<NexusError>() {
        eprintln!("Run 'modshelf nexus set-key <key>' with your personal API key.");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let paths = match Paths::new() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    setup_logging(cli.verbose, &paths.log_file(), cli.verbose > 0);

    if let Err(e) = run(cli, paths).await {
        tracing::error!("{:#}", e);
        report_error(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, paths: Paths) -> Result<()> {
    let config = Config::load(paths).await?;
    let mut app = App::new(config).await?;

    match cli.command {
        Commands::Init {
            game_mods_dir,
            downloads_dir,
        } => app.cmd_init(&game_mods_dir, downloads_dir.as_deref()).await?,
        Commands::Sync => app.cmd_sync().await?,
        Commands::List => app.cmd_list().await?,
        Commands::Info { id } => app.cmd_info(&id).await?,
        Commands::Enable { ids } => app.cmd_set_enabled(&ids, true).await?,
        Commands::Disable { ids } => app.cmd_set_enabled(&ids, false).await?,
        Commands::Delete { id } => app.cmd_delete(&id).await?,
        Commands::Rename { id, name } => app.cmd_rename(&id, &name).await?,
        Commands::Category { id, category } => app.cmd_category(&id, &category).await?,
        Commands::Move { id, position } => app.cmd_move(&id, position).await?,
        Commands::MoveCategory { category, position } => {
            app.cmd_move_category(&category, position).await?
        }
        Commands::Import { path, category } => app.cmd_import(&path, &category).await?,
        Commands::Edit {
            id,
            name,
            version,
            author,
            description,
            url,
            image,
        } => {
            let edit = MetadataEdit {
                name,
                version,
                author,
                description,
                source_url: url,
                image_url: image,
            };
            app.cmd_edit(&id, &edit).await?
        }
        Commands::IgnoreUpdate { id } => app.cmd_ignore_update(&id).await?,
        Commands::Profile { action } => match action {
            ProfileCommands::List => app.cmd_profile_list().await?,
            ProfileCommands::Create { id, name } => {
                app.cmd_profile_create(&id, name.as_deref()).await?
            }
            ProfileCommands::Switch { id } => app.cmd_profile_switch(&id).await?,
            ProfileCommands::Rename { id, name } => app.cmd_profile_rename(&id, &name).await?,
        },
        Commands::Nexus { action } => match action {
            NexusCommands::SetKey { key } => app.cmd_nexus_set_key(&key).await?,
            NexusCommands::Validate => app.cmd_nexus_validate().await?,
            NexusCommands::Fill { id } => app.cmd_nexus_fill(id.as_deref()).await?,
            NexusCommands::CheckUpdates => app.cmd_nexus_check_updates().await?,
        },
        Commands::Update { id } => app.cmd_update(&id).await?,
        Commands::UpdateAll => app.cmd_update_all().await?,
    }

    Ok(())
}
