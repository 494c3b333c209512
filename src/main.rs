use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use millwright::settings::Settings;
use millwright::workflow::server::ServerConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "millwright")]
#[command(version, about = "Maintenance ticket workflow service")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file (defaults to millwright.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the workflow database (overrides configuration)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the workflow server
    Serve {
        /// Port to serve on (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind on all interfaces with permissive CORS
        #[arg(long)]
        dev: bool,
    },
    /// Manage the contact directory
    Person {
        #[command(subcommand)]
        command: PersonCommands,
    },
    /// Manage approval grants
    Grant {
        #[command(subcommand)]
        command: GrantCommands,
    },
}

#[derive(Subcommand)]
pub enum PersonCommands {
    /// Add a person to the contact directory
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: Option<String>,
        /// LINE user id for push notifications
        #[arg(long)]
        line_id: Option<String>,
    },
    /// List the contact directory
    List,
}

#[derive(Subcommand)]
pub enum GrantCommands {
    /// Grant an approval level (1-4) to a person
    Add {
        #[arg(long)]
        person: i64,
        #[arg(long)]
        level: i64,
        #[arg(long)]
        plant: Option<String>,
        #[arg(long)]
        area: Option<String>,
        #[arg(long)]
        line: Option<String>,
        #[arg(long)]
        machine: Option<String>,
    },
    /// List grants, optionally for one person
    List {
        #[arg(long)]
        person: Option<i64>,
    },
    /// Deactivate a grant
    Revoke {
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("millwright={}", default_level))),
        )
        .init();

    let settings = Settings::load(cli.config.as_deref())?;
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| settings.server.db_path.clone());

    match cli.command {
        Commands::Serve { port, dev } => {
            let config = ServerConfig {
                port: port.unwrap_or(settings.server.port),
                db_path,
                dev_mode: dev || settings.server.dev_mode,
                notify: settings.notify.clone(),
            };
            cmd::serve(config).await
        }
        Commands::Person { command } => match command {
            PersonCommands::Add {
                name,
                email,
                line_id,
            } => cmd::person_add(&db_path, &name, email.as_deref(), line_id.as_deref()),
            PersonCommands::List => cmd::person_list(&db_path),
        },
        Commands::Grant { command } => match command {
            GrantCommands::Add {
                person,
                level,
                plant,
                area,
                line,
                machine,
            } => cmd::grant_add(
                &db_path,
                person,
                level,
                plant.as_deref(),
                area.as_deref(),
                line.as_deref(),
                machine.as_deref(),
            ),
            GrantCommands::List { person } => cmd::grant_list(&db_path, person),
            GrantCommands::Revoke { id } => cmd::grant_revoke(&db_path, id),
        },
    }
}
