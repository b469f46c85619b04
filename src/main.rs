use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use serde_json::{Map, Value};
use std::sync::Arc;

use declatogo_client::auth::{LoginRequest, SqliteCredentialStore};
use declatogo_client::config::{CliArgs, Command, Config};
use declatogo_client::endpoints::NewUser;
use declatogo_client::session::{LogNavigator, SessionManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::from_args(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::debug!(
        api_url = %config.api_url,
        credentials_db = %config.credentials_db.display(),
        "Configuration loaded"
    );

    let store = Arc::new(SqliteCredentialStore::open(&config.credentials_db)?);
    let session = SessionManager::connect(&config.client_settings(), store, Arc::new(LogNavigator))?;

    run(&session, args.command).await
}

async fn run(session: &SessionManager, command: Command) -> Result<()> {
    match command {
        Command::Login { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password(false)?,
            };

            let destination = session
                .login(&LoginRequest { username, password })
                .await?;
            println!(
                "Logged in as {} ({})",
                display_name(session).await,
                session.role().await.as_str()
            );
            println!("Next: {}", destination.route_name());
        }

        Command::Register {
            username,
            password,
            email,
            first_name,
            last_name,
            telephone,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password(true)?,
            };

            let user = NewUser {
                username,
                password_confirm: password.clone(),
                password,
                email,
                first_name,
                last_name,
                telephone,
            };
            let destination = session.register(&user).await?;
            println!("Registered and logged in as {}", display_name(session).await);
            println!("Next: {}", destination.route_name());
        }

        Command::Logout => {
            session.logout().await;
            println!("Logged out");
        }

        Command::Whoami => match session.init().await? {
            Some(profile) => {
                println!("{}", serde_json::to_string_pretty(&profile)?);
                println!(
                    "authenticated={} admin={} staff={}",
                    session.is_authenticated().await,
                    session.is_admin().await,
                    session.is_staff().await
                );
            }
            None => println!("Not logged in"),
        },

        Command::UpdateProfile { fields } => {
            session.init().await?;
            let data: Map<String, Value> = fields
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect();
            let profile = session.update_profile(&Value::Object(data)).await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }

        Command::Get { path } => {
            let response = session
                .client()
                .get(&path)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))
                .with_context(|| format!("GET {} failed", path))?;
            println!("{}", serde_json::to_string_pretty(&response.body)?);
        }
    }

    Ok(())
}

fn prompt_password(confirm: bool) -> Result<String> {
    let prompt = Password::new().with_prompt("Password");
    let prompt = if confirm {
        prompt.with_confirmation("Confirm password", "Passwords do not match")
    } else {
        prompt
    };
    prompt.interact().context("Failed to read password")
}

async fn display_name(session: &SessionManager) -> String {
    session
        .profile()
        .await
        .map(|p| p.username)
        .unwrap_or_default()
}
