use crate::cli::actions::Action;
use crate::config::{LocalizedMessage, ServerConfig};
use crate::gate::{Gate, MfaOutcome};
use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::info;

/// Run one authentication attempt end to end: begin, render, prompt,
/// complete.
/// # Errors
/// Returns an error on invalid configuration, a missing code, or a failed
/// validation.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Login {
        url,
        realm,
        user,
        otp,
        admin_user,
        admin_password,
        skip_tls_verify,
        messages,
        locale,
    } = action;

    log_startup(&url, &realm, &user, admin_user.as_deref(), admin_password.is_some(), skip_tls_verify);

    let mut config = ServerConfig::new(url, realm).with_skip_tls_verify(skip_tls_verify);
    if let (Some(admin_user), Some(admin_password)) = (admin_user, admin_password) {
        config = config.with_admin(admin_user, SecretString::from(admin_password));
    }
    if let Some(path) = messages {
        config = config.with_messages(load_messages(&path)?);
    }

    let gate = Gate::new(config)?;

    let session = gate.begin(&user).await;

    println!("{}", gate.welcome_text(&locale));
    if session.transaction_id.is_some() {
        println!("A challenge was sent to your enrolled device.");
    }
    if let Some(uri) = &session.enrollment_uri {
        println!("No token enrolled yet. Provision one from this URI:\n{uri}");
    }

    let code = match otp {
        Some(code) => code,
        None => prompt("One-time code: ")?,
    };

    match gate.complete(&session, &code).await? {
        MfaOutcome::Valid => {
            info!(subject = %session.subject_id, realm = %session.realm, "Authentication succeeded");
            println!("Authentication succeeded.");
            Ok(())
        }
        MfaOutcome::Invalid | MfaOutcome::TransportError => {
            bail!("{}", gate.error_text(&locale))
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read the one-time code")?;

    Ok(line.trim().to_string())
}

fn load_messages(path: &Path) -> Result<Vec<LocalizedMessage>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read messages file at {}", path.display()))?;

    serde_json::from_str(&raw)
        .with_context(|| format!("Malformed messages file at {}", path.display()))
}

fn log_startup(
    url: &str,
    realm: &str,
    user: &str,
    admin_user: Option<&str>,
    admin_password_set: bool,
    skip_tls_verify: bool,
) {
    info!(
        url,
        realm,
        user,
        admin_user = admin_user.unwrap_or("n/a"),
        admin_password_set,
        skip_tls_verify,
        "Startup configuration"
    );
}
