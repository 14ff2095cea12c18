//! CLI argument parsing

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Default location of the durable session file
pub const DEFAULT_STATE_FILE: &str = ".oidc-session.json";

/// Main CLI application structure
#[derive(Parser, Debug)]
#[command(
    name = "oidc-session-cli",
    version,
    about = "Sign in to an OpenID Connect provider and manage the resulting session",
    long_about = "Drives the authorization code flow (with PKCE) against an OpenID Connect provider.\n\
                  Session state is kept in a local file between invocations, so a sign-in is\n\
                  completed in two steps: `sign-in` prints the authorization URL, and\n\
                  `sign-in --callback <URL>` exchanges the code from the redirect.\n\n\
                  SECURITY WARNINGS:\n\
                  - The state file holds access and refresh tokens in plain text\n\
                  - Prefer OIDC_SESSION_CLIENT_SECRET over writing secrets into config files"
)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Client configuration file (toml, yaml or json)
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "OIDC_SESSION_CONFIG",
        default_value = "oidc-session.toml"
    )]
    pub config: PathBuf,

    /// Session state file; overrides `storage_path` from the configuration
    #[arg(long, global = true, env = "OIDC_SESSION_STATE")]
    pub state: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value = "human")]
    pub format: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Cli {
    /// State file to use when the configuration does not name one
    pub fn state_file(&self, configured: Option<&PathBuf>) -> PathBuf {
        self.state
            .clone()
            .or_else(|| configured.cloned())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
    }

    /// Tracing filter directive derived from `-v`
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a sign-in, or finish one with the redirect URL
    SignIn {
        /// Redirect URL received after authorizing, including its query
        #[arg(long)]
        callback: Option<String>,
    },

    /// Print a valid access token, refreshing it if needed
    Token,

    /// Show the signed-in user
    UserInfo,

    /// Clear the local session and print the end-session URL
    SignOut,

    /// Revoke the access token at the provider and clear the session
    Revoke,

    /// Show the provider endpoints in use
    Endpoints {
        /// Discover the endpoints now if none are stored
        #[arg(long)]
        discover: bool,
    },

    /// Send a custom grant to the token endpoint
    Grant(GrantArgs),

    /// Switch the session to another account
    SwitchAccount {
        /// Username to switch to
        username: String,

        /// User store domain of the target account
        #[arg(long, default_value = "PRIMARY")]
        userstore_domain: String,

        /// Tenant domain of the target account
        #[arg(long, default_value = "carbon.super")]
        tenant_domain: String,
    },
}

/// Custom grant options
#[derive(Args, Debug, Clone)]
pub struct GrantArgs {
    /// Form parameter as KEY=VALUE; values may use {{token}}, {{username}},
    /// {{scope}}, {{clientID}} and {{clientSecret}}
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE", required = true)]
    pub params: Vec<String>,

    /// Send the access token as a bearer credential
    #[arg(long)]
    pub attach_token: bool,

    /// The response is a token response that replaces the session
    #[arg(long)]
    pub returns_session: bool,

    /// Print the raw response
    #[arg(long)]
    pub response: bool,

    /// Fail unless a session exists
    #[arg(long)]
    pub require_session: bool,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable with colors
    Human,
    /// JSON output
    Json,
    /// Table format
    Table,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_params_are_collected() {
        let cli = Cli::try_parse_from([
            "oidc-session-cli",
            "grant",
            "-p",
            "grant_type=urn:example:delegate",
            "--param",
            "subject_token={{token}}",
            "--attach-token",
        ])
        .unwrap();

        let Commands::Grant(args) = cli.command else {
            panic!("expected grant");
        };
        assert_eq!(args.params.len(), 2);
        assert!(args.attach_token);
        assert!(!args.returns_session);
    }

    #[test]
    fn test_grant_requires_a_param() {
        assert!(Cli::try_parse_from(["oidc-session-cli", "grant"]).is_err());
    }

    #[test]
    fn test_verbosity_maps_to_level() {
        let cli = Cli::try_parse_from(["oidc-session-cli", "-vv", "token"]).unwrap();
        assert_eq!(cli.log_level(), "trace");
        let cli = Cli::try_parse_from(["oidc-session-cli", "token"]).unwrap();
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn test_state_file_precedence() {
        let cli = Cli::try_parse_from(["oidc-session-cli", "token"]).unwrap();
        assert_eq!(cli.state_file(None), PathBuf::from(DEFAULT_STATE_FILE));
        let configured = PathBuf::from("/var/lib/app/session.json");
        assert_eq!(cli.state_file(Some(&configured)), configured);

        let cli = Cli::try_parse_from(["oidc-session-cli", "--state", "s.json", "token"]).unwrap();
        assert_eq!(cli.state_file(Some(&configured)), PathBuf::from("s.json"));
    }

    #[test]
    fn test_switch_account_defaults() {
        let cli = Cli::try_parse_from(["oidc-session-cli", "switch-account", "bob"]).unwrap();
        let Commands::SwitchAccount {
            username,
            userstore_domain,
            tenant_domain,
        } = cli.command
        else {
            panic!("expected switch-account");
        };
        assert_eq!(username, "bob");
        assert_eq!(userstore_domain, "PRIMARY");
        assert_eq!(tenant_domain, "carbon.super");
    }
}
