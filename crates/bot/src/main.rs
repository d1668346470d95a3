use anyhow::Result;
use clap::{Parser, Subcommand};
use shared::CompanyId;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bot;
mod commands;
mod config;
mod confirm;
mod error;
mod link;
mod outbox;
mod roster;
mod router;
mod shutdown;
mod store;
mod supervisor;
mod templates;

use crate::bot::Bot;
use crate::config::Config;
use crate::link::WsConnector;
use crate::store::PasswordStore;
use crate::supervisor::SessionSupervisor;
use crate::templates::Templates;

#[derive(Parser)]
#[command(name = "pwbot")]
#[command(about = "Company password bot for OpenTTD servers")]
#[command(version = env!("PWBOT_VERSION"))]
struct Cli {
    /// Config file (overrides PWBOT_CONFIG and the default locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server host (overrides config)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Admin port (overrides config)
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the server and run the bot (default)
    Run,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect or edit stored company passwords
    Passwords {
        #[command(subcommand)]
        action: PasswordsAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show which config file is used
    Path,
}

#[derive(Subcommand)]
enum PasswordsAction {
    /// List companies with a stored password
    List,
    /// Forget the stored password of a company
    Forget {
        /// Company id as used on the wire (0-based)
        company: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pwbot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli {
        config: config_path,
        host,
        port,
        command,
    } = Cli::parse();

    let command = match command.unwrap_or(Commands::Run) {
        Commands::Config {
            action: ConfigAction::Path,
        } => return print_config_path(config_path.as_deref()),
        command => command,
    };

    let mut config = Config::load(config_path.as_deref())?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.admin_port = port;
    }

    match command {
        Commands::Run => run(config).await,
        Commands::Config { action } => handle_config_command(action, &config),
        Commands::Passwords { action } => handle_passwords_command(action, &config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let templates = Templates::load(&config.storage.messages_file).await;
    let store = PasswordStore::open(&config.storage.state_file).await;
    let bot = Bot::new(config.bot_settings(), templates, store);

    let url = config.url();
    tracing::info!(
        version = env!("PWBOT_VERSION"),
        url = %url,
        bot = %config.bot.name,
        "Starting pwbot"
    );

    let shutdown = shutdown::install_signal_handler();
    let mut supervisor =
        SessionSupervisor::new(WsConnector::new(url), bot, config.supervisor_settings());
    supervisor.run(shutdown).await?;
    tracing::debug!(state = ?supervisor.state(), "Supervisor stopped");
    Ok(())
}

fn handle_config_command(action: ConfigAction, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(&config.masked())?);
            println!("# bridge url: {}", config.url());
        }
        // Resolved before the config is loaded
        ConfigAction::Path => {}
    }
    Ok(())
}

fn print_config_path(explicit: Option<&Path>) -> Result<()> {
    match Config::resolve_path(explicit) {
        Some(path) => println!("{}", path.display()),
        None => println!(
            "No config file found. Create one at {}",
            Config::user_config_path()?.display()
        ),
    }
    Ok(())
}

async fn handle_passwords_command(action: PasswordsAction, config: &Config) -> Result<()> {
    let mut store = PasswordStore::load(&config.storage.state_file).await?;
    match action {
        PasswordsAction::List => {
            if store.is_empty() {
                println!("No stored passwords in {}", store.path().display());
            }
            for (company_id, _) in store.iter() {
                println!("company {} (#{}): ****", company_id, company_id.display_number());
            }
        }
        PasswordsAction::Forget { company } => {
            let company_id = CompanyId(company);
            if store.clear(company_id).await? {
                println!(
                    "Forgot password for company {} (#{})",
                    company_id,
                    company_id.display_number()
                );
            } else {
                println!("No password stored for company {}", company_id);
            }
        }
    }
    Ok(())
}
