use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};
use std::path::PathBuf;

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("otpgate")
        .about("Second-factor (OTP) gateway for a privacyIDEA server")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("url")
                .long("url")
                .help("privacyIDEA base URL, example: https://pi.example.com")
                .env("OTPGATE_URL")
                .required(true),
        )
        .arg(
            Arg::new("realm")
                .long("realm")
                .help("privacyIDEA realm holding the user identities")
                .env("OTPGATE_REALM")
                .required(true),
        )
        .arg(
            Arg::new("user")
                .short('u')
                .long("user")
                .help("Subject to authenticate")
                .env("OTPGATE_USER")
                .required(true),
        )
        .arg(
            Arg::new("otp")
                .long("otp")
                .help("One-time code; prompted for interactively when omitted"),
        )
        .arg(
            Arg::new("admin-user")
                .long("admin-user")
                .help("Admin account for token lookup, challenge trigger and enrollment")
                .env("OTPGATE_ADMIN_USER"),
        )
        .arg(
            Arg::new("admin-password")
                .long("admin-password")
                .help("Admin password")
                .env("OTPGATE_ADMIN_PASSWORD")
                .requires("admin-user"),
        )
        .arg(
            Arg::new("skip-tls-verify")
                .long("skip-tls-verify")
                .help("Accept any server certificate (escape hatch for private CAs)")
                .env("OTPGATE_SKIP_TLS_VERIFY")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("messages")
                .long("messages")
                .help("JSON file with per-locale welcome/error texts")
                .env("OTPGATE_MESSAGES")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("locale")
                .long("locale")
                .help("Locale for the rendered texts")
                .env("OTPGATE_LOCALE")
                .default_value("en-US"),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("OTPGATE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
