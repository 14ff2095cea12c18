//! Rich output formatting for CLI

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};
use comfy_table::{Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use oidc_session::{Endpoint, GrantResponse, ProviderConfiguration, UserInfo};
use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::json;
use url::Url;

/// Format and display output based on format preference
pub struct Formatter {
    format: OutputFormat,
    colored: bool,
}

impl Formatter {
    #[must_use]
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    /// Display any serializable value
    pub fn display<T: Serialize + ?Sized>(&self, value: &T) -> CliResult<()> {
        let json = serde_json::to_string_pretty(value)?;
        println!("{json}");
        Ok(())
    }

    /// Display the signed-in user
    pub fn display_user(&self, user: &UserInfo) -> CliResult<()> {
        match self.format {
            OutputFormat::Human => {
                self.print_header(&format!("Signed in as {}", user.username));
                self.print_kv("Display name", &user.display_name);
                self.print_kv("Email", user.email.as_deref().unwrap_or("-"));
                self.print_kv("Scopes", &user.allowed_scopes);
                if let Some(endpoint) = &user.authorization_endpoint {
                    self.print_kv("Authorization endpoint", endpoint);
                }
                if let Some(iframe) = &user.oidc_session_iframe {
                    self.print_kv("Session iframe", iframe);
                }
                Ok(())
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .apply_modifier(UTF8_ROUND_CORNERS)
                    .set_header(vec!["Username", "Display Name", "Email", "Scopes"]);
                table.add_row(vec![
                    user.username.as_str(),
                    user.display_name.as_str(),
                    user.email.as_deref().unwrap_or("-"),
                    user.allowed_scopes.as_str(),
                ]);
                println!("{table}");
                Ok(())
            }
            OutputFormat::Json => self.display(user),
        }
    }

    /// Display provider endpoints
    pub fn display_endpoints(&self, provider: &ProviderConfiguration) -> CliResult<()> {
        match self.format {
            OutputFormat::Human => {
                self.print_header("Provider Endpoints");
                for endpoint in Endpoint::ALL {
                    self.print_kv(endpoint.as_str(), provider.get(endpoint).unwrap_or("-"));
                }
                self.print_footer(&format!(
                    "Issuer: {}  Client: {}",
                    provider.issuer, provider.client_id
                ));
                Ok(())
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .apply_modifier(UTF8_ROUND_CORNERS)
                    .set_header(vec!["Endpoint", "URL"]);

                for endpoint in Endpoint::ALL {
                    table.add_row(vec![endpoint.as_str(), provider.get(endpoint).unwrap_or("-")]);
                }
                table.add_row(vec!["issuer", provider.issuer.as_str()]);

                println!("{table}");
                Ok(())
            }
            OutputFormat::Json => self.display(provider),
        }
    }

    /// Display an access token
    pub fn display_token(&self, token: &str) -> CliResult<()> {
        match self.format {
            OutputFormat::Json => self.display(&json!({ "access_token": token })),
            // Bare token so the output can be captured by scripts
            _ => {
                println!("{token}");
                Ok(())
            }
        }
    }

    /// Display a URL the user has to open
    pub fn display_url(&self, label: &str, url: &Url) -> CliResult<()> {
        match self.format {
            OutputFormat::Json => self.display(&json!({ "action": label, "url": url.as_str() })),
            _ => {
                self.print_info(label);
                println!("{url}");
                Ok(())
            }
        }
    }

    /// Display a raw grant response
    pub fn display_response(&self, response: &GrantResponse) -> CliResult<()> {
        match self.format {
            OutputFormat::Human => {
                self.print_header(&format!("HTTP {}", response.status));
                for (name, value) in &response.headers {
                    self.print_kv(name, value);
                }
                println!();
                match response.json() {
                    Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
                    Err(_) => println!("{}", response.body),
                }
                Ok(())
            }
            _ => self.display(response),
        }
    }

    /// Display a success message
    pub fn display_success(&self, message: &str) {
        if self.format == OutputFormat::Json {
            println!("{}", json!({ "status": "ok", "message": message }));
        } else if self.colored {
            println!("{} {}", "✓".bright_green().bold(), message);
        } else {
            println!("✓ {message}");
        }
    }

    /// Display an informational message
    pub fn display_notice(&self, message: &str) {
        if self.format == OutputFormat::Json {
            println!("{}", json!({ "status": "empty", "message": message }));
        } else {
            self.print_info(message);
        }
    }

    /// Display error with rich formatting
    pub fn display_error(&self, error: &CliError) {
        if self.colored {
            eprintln!(
                "{} {}: {}",
                "Error".bright_red().bold(),
                format!("[{}]", error.category()).bright_black(),
                error
            );

            let suggestions = error.suggestions();
            if !suggestions.is_empty() {
                eprintln!("\n{}", "Suggestions:".bright_yellow().bold());
                for suggestion in suggestions {
                    eprintln!("  {} {}", "•".bright_blue(), suggestion);
                }
            }
        } else {
            eprintln!("Error [{}]: {error}", error.category());

            let suggestions = error.suggestions();
            if !suggestions.is_empty() {
                eprintln!("\nSuggestions:");
                for suggestion in suggestions {
                    eprintln!("  • {suggestion}");
                }
            }
        }
    }

    fn print_header(&self, text: &str) {
        if self.colored {
            println!("\n{}", text.bright_cyan().bold());
            println!("{}", "=".repeat(text.len()).bright_cyan());
        } else {
            println!("\n{text}");
            println!("{}", "=".repeat(text.len()));
        }
    }

    fn print_footer(&self, text: &str) {
        if self.colored {
            println!("\n{}", text.bright_black());
        } else {
            println!("\n{text}");
        }
    }

    fn print_info(&self, text: &str) {
        if self.colored {
            println!("{}", text.bright_blue());
        } else {
            println!("{text}");
        }
    }

    fn print_kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("  {}: {}", key.bright_green().bold(), value);
        } else {
            println!("  {key}: {value}");
        }
    }
}
