use crate::cli::actions::Action;
use anyhow::Result;
use std::path::PathBuf;

/// # Errors
/// Returns an error if a required argument is missing from `matches`.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let required = |name: &str| -> Result<String> {
        matches
            .get_one::<String>(name)
            .map(String::to_string)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{name}"))
    };

    Ok(Action::Login {
        url: required("url")?,
        realm: required("realm")?,
        user: required("user")?,
        otp: matches.get_one::<String>("otp").map(String::to_string),
        admin_user: matches
            .get_one::<String>("admin-user")
            .map(String::to_string),
        admin_password: matches
            .get_one::<String>("admin-password")
            .map(String::to_string),
        skip_tls_verify: matches.get_flag("skip-tls-verify"),
        messages: matches.get_one::<PathBuf>("messages").cloned(),
        locale: required("locale")?,
    })
}
