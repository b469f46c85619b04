use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::http_client::ClientSettings;

/// DéclaTogo command-line client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the REST API
    #[arg(short = 'u', long, env = "API_URL", default_value = "http://localhost:8000/api/")]
    pub api_url: String,

    /// Path to the SQLite credential database
    #[arg(short = 'd', long, env = "CREDENTIALS_DB")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "15")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Obtain tokens and load the profile
    Login {
        #[arg(long)]
        username: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account and log in
    Register {
        #[arg(long)]
        username: String,
        /// Prompted for (with confirmation) when omitted
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        telephone: Option<String>,
    },
    /// Drop the session and persisted tokens
    Logout,
    /// Show the current identity and role facts
    Whoami,
    /// Update profile fields, e.g. --field telephone=90123456
    UpdateProfile {
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    /// Authenticated GET of an API path, printed as JSON
    Get { path: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: Url,
    pub credentials_db: PathBuf,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
    pub log_json: bool,
}

impl Config {
    /// Build configuration with priority: CLI > ENV > defaults
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let api_url = Url::parse(&args.api_url)
            .with_context(|| format!("API_URL is not a valid URL: {}", args.api_url))?;

        let credentials_db = match args.db_file {
            Some(ref path) => expand_tilde(path),
            None => default_credentials_db()?,
        };

        Ok(Config {
            api_url,
            credentials_db,
            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            http_request_timeout: args.http_timeout,
            log_level: args.log_level.clone(),
            log_json: args.log_json,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.api_url.scheme(), "http" | "https") {
            anyhow::bail!("API_URL must use http or https: {}", self.api_url);
        }

        // Relative paths are joined onto the base, which only works with a trailing slash
        if !self.api_url.path().ends_with('/') {
            anyhow::bail!("API_URL must end with '/': {}", self.api_url);
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.api_url.clone(),
            connect_timeout: Duration::from_secs(self.http_connect_timeout),
            request_timeout: Duration::from_secs(self.http_request_timeout),
        }
    }
}

/// Default credential database under the user's data directory
fn default_credentials_db() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context(
        "Could not determine data directory (use -d or set CREDENTIALS_DB env var)",
    )?;
    Ok(data_dir.join("declatogo").join("credentials.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse a `key=value` profile field
fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}
