//! petstore - inspect and maintain a pet store from the command line
//!
//! Opens the configured backend through the full lifecycle (prepare, reset if
//! requested, patch), runs one command, persists the updated config and
//! closes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use petstore::{callback, PetData, PetStore, StoreConfig, APP_NAME, APP_VERSION};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Default config file location
const CONFIG_PATH_DEFAULT: &str = "~/.petstore/config.json";

/// Default leaderboard page length
const LEADERBOARD_PAGE_DEFAULT: usize = 10;

// =============================================================================
// CLI
// =============================================================================

/// Pet store maintenance tool
#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(about = "Persistence for player-owned pets")]
#[command(version)]
struct Cli {
    /// Config file (JSON)
    #[arg(short, long, default_value = CONFIG_PATH_DEFAULT)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the store (running reset and migrations as configured) and close it
    Open,

    /// Print a page of the leaderboard
    Leaderboard {
        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Rows to print, at most 100
        #[arg(long, default_value_t = LEADERBOARD_PAGE_DEFAULT)]
        length: usize,

        /// Only pets of this entity type
        #[arg(long)]
        entity: Option<String>,
    },

    /// Print every pet of one owner
    Load {
        /// Owner name
        owner: String,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    tracing::info!("{} v{}", APP_NAME, APP_VERSION);

    let config_path = PathBuf::from(shellexpand::tilde(&cli.config).to_string());
    let mut config = StoreConfig::load(&config_path).await?;
    config.apply_env();

    let backend = config.backend.build()?;
    let store = PetStore::open(backend, &mut config, Default::default()).await?;

    // Records the cleared reset flag and the new schema version
    config.save(&config_path).await?;
    tracing::info!("Config saved to {}", config_path.display());

    let result = run(&store, cli.command).await;
    store.close().await;
    result
}

async fn run(store: &PetStore, command: Command) -> anyhow::Result<()> {
    let mut errors = store.subscribe_errors();

    let pets = match command {
        Command::Open => {
            println!("{} ready ({})", store.backend_name(), petstore::SCHEMA_VERSION_CURRENT);
            return Ok(());
        }
        Command::Leaderboard {
            offset,
            length,
            entity,
        } => {
            let (on_result, rx) = callback::channel::<Vec<PetData>>();
            store.get_pets_leaderboard(offset, length, entity.as_deref(), on_result);
            rx.await?
        }
        Command::Load { owner } => {
            let (on_result, rx) = callback::channel::<Vec<PetData>>();
            store.load(owner, on_result);
            rx.await?
        }
    };

    if let Ok(event) = errors.try_recv() {
        anyhow::bail!("{} failed: {}", event.op, event.error);
    }

    print_pets(&pets);
    Ok(())
}

fn print_pets(pets: &[PetData]) {
    if pets.is_empty() {
        println!("no pets");
        return;
    }
    for pet in pets {
        println!(
            "{:<16} {:<16} {:<12} lvl {:>3} ({:>5} pts){}",
            pet.owner_name,
            pet.pet_name,
            pet.entity_name,
            pet.level,
            pet.level_points,
            if pet.visible { "" } else { " [disabled]" },
        );
    }
}
