use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{ConfigCommand, OutputFormat, Session};
use config::Config;

#[derive(Parser)]
#[command(name = "grocr")]
#[command(version)]
#[command(about = "A shared, realtime grocery list", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Account email (overrides config)
    #[arg(long, global = true)]
    email: Option<String>,

    /// Account password (overrides config)
    #[arg(long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Signup,

    /// Sign in and show the resolved user
    Login,

    /// Show the shared list
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Add an item (replaces an item with the same name)
    Add {
        /// Item name
        name: String,
    },

    /// Flip an item between completed and not completed
    Toggle {
        /// Item name
        name: String,
    },

    /// Remove an item
    Remove {
        /// Item name
        name: String,
    },

    /// Go online and follow list and presence changes
    Watch,

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grocr=warn,grocr_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?.with_credentials(cli.email, cli.password);

    match cli.command {
        Some(Commands::Signup) => commands::signup(&config).await?,
        Some(Commands::Login) => commands::login(&config).await?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        Some(command) => {
            let session = Session::open(&config).await?;
            let result = match command {
                Commands::List { format } => commands::list(&session, &format).await,
                Commands::Add { name } => commands::add(&session, &name).await,
                Commands::Toggle { name } => commands::toggle(&session, &name).await,
                Commands::Remove { name } => commands::remove(&session, &name).await,
                Commands::Watch => commands::watch(&session).await,
                Commands::Signup | Commands::Login | Commands::Config(_) => Ok(()),
            };
            session.close();
            result?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
