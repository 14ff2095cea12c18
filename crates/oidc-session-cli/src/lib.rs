//! # oidc-session CLI
//!
//! Command-line driver for the `oidc-session` engine. Session state lives in a
//! durable file, so every command picks up where the previous one stopped.
//!
//! ## Usage
//!
//! ```bash
//! # Print the authorization URL
//! oidc-session-cli --config client.toml sign-in
//!
//! # Exchange the code from the redirect
//! oidc-session-cli --config client.toml sign-in --callback 'https://app.example/callback?code=...'
//!
//! # Print a valid access token, refreshing it when it is about to expire
//! oidc-session-cli token
//!
//! # Custom grant with placeholders
//! oidc-session-cli grant -p grant_type=urn:example:delegate -p 'subject_token={{token}}' --response
//! ```

pub mod cli;
pub mod commands;
pub mod error;
pub mod formatter;

use clap::Parser;
use oidc_session::{AuthClient, AuthConfig, RecordingNavigator, StorageKind};
use std::io::{self, IsTerminal};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use cli::{Cli, Commands, OutputFormat};
pub use error::{CliError, CliResult};
pub use formatter::Formatter;

/// Run the CLI application
///
/// Errors are rendered on stderr before they are returned.
pub async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let colored = !cli.no_color && io::stdout().is_terminal();
    let formatter = Formatter::new(cli.format, colored);

    let result = match init_logging(cli.log_level(), colored) {
        Ok(()) => execute(cli, &formatter).await,
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        formatter.display_error(e);
    }
    result
}

async fn execute(cli: Cli, formatter: &Formatter) -> CliResult<()> {
    let client = build_client(&cli)?;
    commands::execute(&client, cli.command, formatter).await
}

/// Load the configuration named on the command line and build a client with durable storage
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the state file cannot be opened.
pub fn build_client(cli: &Cli) -> CliResult<AuthClient> {
    let config = AuthConfig::from_file(&cli.config)?;
    let state = cli.state_file(config.storage_path.as_ref());
    debug!(config = %cli.config.display(), state = %state.display(), "Loading client");

    let config = config
        .with_storage(StorageKind::LocalStorage)
        .with_storage_path(state);
    // Redirect URLs are printed from the sign-in and sign-out outcomes
    let client = AuthClient::builder(config)
        .navigator(Arc::new(RecordingNavigator::new()))
        .build()?;
    Ok(client)
}

fn init_logging(level: &str, colored: bool) -> CliResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_ansi(colored))
        .try_init()
        .map_err(|e| CliError::Io(io::Error::other(e.to_string())))
}
