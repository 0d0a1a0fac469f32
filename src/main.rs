//! crosspost - detect login state and dispatch drafts across content platforms
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crosspost::{commands, Event};
use crosspost_core::prelude::*;

/// Detect login state and dispatch drafts across content platforms
#[derive(Parser, Debug)]
#[command(name = "crosspost", version)]
#[command(about = "Detect login state and dispatch drafts across content platforms", long_about = None)]
struct Args {
    /// DevTools endpoint of the browser to drive
    #[arg(long, global = true, value_name = "URL")]
    devtools: Option<String>,

    /// Config file (default: <config_dir>/crosspost/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered platforms
    Platforms,

    /// Detect login state (all platforms when none are given)
    Detect {
        #[arg(value_name = "ID")]
        ids: Vec<String>,

        /// Emit each result as soon as it is known
        #[arg(long)]
        progressive: bool,

        /// Ignore cached results
        #[arg(long)]
        refresh: bool,
    },

    /// Fill a draft on each platform from a markdown file
    Publish {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Title (default: the first `# ` heading)
        #[arg(long)]
        title: Option<String>,

        /// Target platform, repeatable (default: all)
        #[arg(long = "platform", value_name = "ID")]
        platforms: Vec<String>,
    },

    /// Manage the detection cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Write a default config file
    Init,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Drop cached results (all platforms when none are given)
    Clear {
        #[arg(value_name = "ID")]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::install().map_err(|e| Error::startup(e.to_string()))?;
    crosspost_core::logging::init()?;

    let result = run(args).await;
    if let Err(ref e) = result {
        error!("Command failed: {:?}", e);
        Event::error(e).emit();
    }

    info!("crosspost exiting");
    result
}

async fn run(args: Args) -> Result<()> {
    if let Command::Init = args.command {
        return commands::init(args.config);
    }

    let settings = commands::load_settings(args.config.as_deref(), args.devtools);

    match args.command {
        Command::Platforms => commands::platforms(&settings),
        Command::Detect {
            ids,
            progressive,
            refresh,
        } => commands::detect(&settings, &ids, progressive, refresh).await,
        Command::Publish {
            file,
            title,
            platforms,
        } => commands::publish(&settings, &file, title, &platforms).await,
        Command::Cache {
            action: CacheAction::Clear { ids },
        } => commands::clear_cache(&settings, &ids).await,
        Command::Init => commands::init(args.config),
    }
}
