//! Sessionkeeper CLI - drive and inspect a client auth session.
//!
//! Each invocation restores the persisted session, runs one command against
//! it, and exits. Logs go to stderr (`RUST_LOG`) and, when
//! `SESSIONKEEPER_LOG_DIR` is set, to a daily rolling file.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use sessionkeeper_core::utils::{format_remaining, mask_token};
use sessionkeeper_core::{
    Config, Credentials, HttpAuthClient, Registration, SessionController, SessionError,
    SessionState, SystemClock, TokenStore,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directory for the optional rolling log file
const ENV_LOG_DIR: &str = "SESSIONKEEPER_LOG_DIR";

const LOG_FILE_PREFIX: &str = "sessionkeeper.log";

const USAGE: &str = "\
Usage: sessionkeeper <command>

Commands:
  status              Show the session phase and token timing
  login [username]    Log in (prompts for the password)
  register            Create an account and log in
  refresh             Refresh the current token
  logout              End the session
  whoami              Print the current user as JSON
  help                Show this message";

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the file writer and must outlive `main`'s work.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("status");
    if matches!(command, "help" | "-h" | "--help") {
        println!("{USAGE}");
        return Ok(());
    }

    let mut config = Config::load().context("Failed to load config")?;
    config.apply_env().context("Invalid environment override")?;

    let storage = config
        .storage_backend()
        .context("Failed to open token storage")?;
    let store = TokenStore::new(storage, Arc::new(SystemClock), config.store_settings());
    let client = HttpAuthClient::new(config.api_base_url.clone())?;
    let controller = SessionController::new(Arc::new(client), store);

    info!(api = %config.api_base_url, storage = ?config.storage, "Restoring session");
    if let Err(e) = controller.initialize().await {
        warn!(error = %e, "Session restore failed");
        if !matches!(command, "login" | "register") {
            eprintln!("{}", e.user_message());
        }
    }

    let result = run_command(&controller, &mut config, command, &args[1..]).await;
    controller.shutdown();
    result
}

async fn run_command(
    controller: &SessionController,
    config: &mut Config,
    command: &str,
    rest: &[String],
) -> Result<()> {
    match command {
        "status" => {
            print_status(controller);
            Ok(())
        }
        "login" => {
            let username = match rest.first() {
                Some(name) => name.clone(),
                None => prompt_username(config.last_username.as_deref())?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            let user = controller
                .login(&Credentials::new(username.clone(), password))
                .await
                .map_err(user_facing)?;

            remember_username(config, username);
            println!("Logged in as {}", user.username);
            Ok(())
        }
        "register" => {
            let username = prompt("Username: ")?;
            let email = prompt("Email: ")?;
            let password = rpassword::prompt_password("Password: ")?;
            let confirm = rpassword::prompt_password("Confirm password: ")?;
            if password != confirm {
                return Err(anyhow!("Passwords do not match"));
            }

            let registration = Registration {
                username: username.clone(),
                email,
                password,
                extra: Default::default(),
            };
            let user = controller
                .register(&registration)
                .await
                .map_err(user_facing)?;

            remember_username(config, username);
            println!("Registered and logged in as {}", user.username);
            Ok(())
        }
        "refresh" => {
            controller.refresh_token(false).await.map_err(user_facing)?;
            print_status(controller);
            Ok(())
        }
        "logout" => {
            let was_authenticated = controller.is_authenticated();
            controller.logout().await;
            if was_authenticated {
                println!("Logged out");
            } else {
                println!("No active session");
            }
            Ok(())
        }
        "whoami" => {
            let state = controller.state();
            let user = state.user.ok_or_else(|| anyhow!("Not logged in"))?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        }
        other => Err(anyhow!("Unknown command '{other}'\n\n{USAGE}")),
    }
}

fn print_status(controller: &SessionController) {
    let state: SessionState = controller.state();
    let report = controller.get_token_status();

    println!("Status:  {:?}", state.status());
    if let Some(user) = &state.user {
        println!("User:    {} ({})", user.username, user.id);
    }
    if let Some(token) = &state.token {
        println!("Token:   {}", mask_token(token));
    }
    println!("Token status: {}", report.message);
    if let Some(at) = controller.pending_refresh_at() {
        let wait = at - chrono::Utc::now();
        println!("Next refresh: {} (in {})", at.to_rfc3339(), format_remaining(wait));
    }
    if let Some(error) = &state.error {
        println!("Error:   {error}");
    }
}

fn user_facing(err: SessionError) -> anyhow::Error {
    anyhow!(err.user_message())
}

fn remember_username(config: &mut Config, username: String) {
    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;

    let mut value = String::new();
    io::stdin().read_line(&mut value)?;
    Ok(value.trim().to_string())
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    let username = match last {
        Some(last) => {
            let entered = prompt(&format!("Username [{last}]: "))?;
            if entered.is_empty() {
                last.to_string()
            } else {
                entered
            }
        }
        None => prompt("Username: ")?,
    };
    if username.is_empty() {
        return Err(anyhow!("Username required"));
    }
    Ok(username)
}
