use secrecy::SecretString;
use serde::Deserialize;

use crate::gate::GateError;
use crate::privacyidea;

pub const DEFAULT_LOCALE: &str = "en-US";
pub const DEFAULT_WELCOME: &str = "Please enter your one-time code.";
pub const DEFAULT_ERROR: &str = "Login failed. Please try again.";

/// Per-locale presentation texts, rendered by the host shim.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LocalizedMessage {
    pub locale: String,
    pub welcome: String,
    pub error: String,
}

/// Immutable privacyIDEA server configuration, assembled once per pipeline
/// activation by the host integration layer.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub url: String,
    pub realm: String,
    pub admin_user: Option<String>,
    pub admin_password: Option<SecretString>,
    /// Accept any server certificate. Escape hatch, not a default.
    pub skip_tls_verify: bool,
    pub messages: Vec<LocalizedMessage>,
}

impl ServerConfig {
    #[must_use]
    pub fn new(url: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            realm: realm.into(),
            admin_user: None,
            admin_password: None,
            skip_tls_verify: false,
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_admin(mut self, user: impl Into<String>, password: SecretString) -> Self {
        self.admin_user = Some(user.into());
        self.admin_password = Some(password);
        self
    }

    #[must_use]
    pub fn with_skip_tls_verify(mut self, skip: bool) -> Self {
        self.skip_tls_verify = skip;
        self
    }

    #[must_use]
    pub fn with_messages(mut self, messages: Vec<LocalizedMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Check the invariants the rest of the crate relies on.
    /// # Errors
    /// Returns `GateError::Config` if the URL or realm is empty, or the URL
    /// is not a usable http(s) endpoint.
    pub fn validate(&self) -> Result<(), GateError> {
        if self.url.trim().is_empty() {
            return Err(GateError::Config("server URL must not be empty".into()));
        }
        if self.realm.trim().is_empty() {
            return Err(GateError::Config("realm must not be empty".into()));
        }

        privacyidea::base_url(&self.url).map_err(|err| GateError::Config(err.to_string()))?;

        Ok(())
    }

    /// Admin credentials, when both halves are configured.
    #[must_use]
    pub fn admin_credentials(&self) -> Option<(&str, &SecretString)> {
        match (self.admin_user.as_deref(), self.admin_password.as_ref()) {
            (Some(user), Some(password)) if !user.is_empty() => Some((user, password)),
            _ => None,
        }
    }

    /// Presentation texts for `locale`, falling back to the English defaults
    /// for unknown locales. The match is case-insensitive.
    #[must_use]
    pub fn message_for(&self, locale: &str) -> LocalizedMessage {
        self.messages
            .iter()
            .find(|message| message.locale.eq_ignore_ascii_case(locale))
            .cloned()
            .unwrap_or_else(|| LocalizedMessage {
                locale: DEFAULT_LOCALE.to_string(),
                welcome: DEFAULT_WELCOME.to_string(),
                error: DEFAULT_ERROR.to_string(),
            })
    }
}
