//! The begin/complete session state machine between the host authentication
//! pipeline and the privacyIDEA server.
//!
//! [`Gate::begin`] decides whether the subject gets an out-of-band challenge
//! or a fresh enrollment and returns an immutable [`Session`] for the host to
//! carry; [`Gate::complete`] validates the submitted code against that
//! session. Remote failures degrade to "ask for the code and let validation
//! fail" instead of aborting the attempt.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::ServerConfig;
pub use crate::privacyidea::MfaOutcome;
use crate::privacyidea::{AppTokenKind, OtpProvider};

/// Contract violations surfaced to the host. Everything else is absorbed
/// into sentinel values and log records.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no one-time code was submitted")]
    InputMissing,
}

/// Per-attempt state carried between `begin` and `complete`.
///
/// A plain serializable value: `begin` and `complete` may run in different
/// processes behind a load balancer, so nothing about the attempt lives in
/// the [`Gate`] itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub subject_id: String,
    pub realm: String,
    /// Challenge transaction to validate against, when one was triggered.
    pub transaction_id: Option<String>,
    /// QR provisioning URI to render when the subject has no token yet.
    pub enrollment_uri: Option<String>,
}

impl Session {
    fn bare(subject_id: &str, realm: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            realm: realm.to_string(),
            transaction_id: None,
            enrollment_uri: None,
        }
    }
}

/// The two entry points the host pipeline consumes, plus the localized
/// text hooks for rendering the OTP form.
#[derive(Debug, Clone)]
pub struct Gate {
    config: ServerConfig,
    provider: OtpProvider,
}

impl Gate {
    /// Validate `config` and build the provider bound to its base URL.
    /// # Errors
    /// Returns `GateError::Config` for an unusable URL, empty realm, or a
    /// TLS backend that fails to initialize.
    pub fn new(config: ServerConfig) -> Result<Self, GateError> {
        config.validate()?;

        let provider = OtpProvider::new(&config.url, config.skip_tls_verify)
            .map_err(|err| GateError::Config(err.to_string()))?;

        Ok(Self { config, provider })
    }

    /// Start an authentication attempt for `subject`.
    ///
    /// Infallible: if the admin token cannot be acquired or any remote call
    /// fails, the session still carries the subject and realm and the host
    /// proceeds to ask for a code.
    #[instrument(skip(self))]
    pub async fn begin(&self, subject: &str) -> Session {
        let realm = &self.config.realm;
        let mut session = Session::bare(subject, realm);

        let Some((admin_user, admin_password)) = self.config.admin_credentials() else {
            debug!("No admin credentials configured; presenting the OTP form directly");
            return session;
        };

        let admin_token = self.provider.auth_token(admin_user, admin_password).await;
        if admin_token.is_empty() {
            debug!("No admin token acquired; presenting the OTP form directly");
            return session;
        }

        if self.provider.has_token(subject, realm, &admin_token).await {
            let transaction_id = self
                .provider
                .trigger_challenge(subject, realm, &admin_token)
                .await;
            // An empty id is valid: the enrolled token answers without a
            // challenge round (TOTP/HOTP).
            if transaction_id.is_empty() {
                debug!("No challenge transaction; token validates directly");
            } else {
                info!(transaction_id, "Challenge triggered");
                session.transaction_id = Some(transaction_id);
            }
        } else {
            let images = self
                .provider
                .enroll_app_token(subject, realm, &admin_token, AppTokenKind::Totp)
                .await;
            if let Some(uri) = images.get("googleurl") {
                info!("Enrolled a new token; presenting QR code");
                session.enrollment_uri = Some(uri.clone());
            }
        }

        session
    }

    /// Validate the submitted code for `session`.
    ///
    /// Transport exhaustion yields `MfaOutcome::Invalid`, never an error:
    /// a user sees a generic failed login on any server-side problem.
    /// # Errors
    /// Returns `GateError::InputMissing` when `code` is empty; no network
    /// call is made in that case.
    #[instrument(skip(self, code))]
    pub async fn complete(&self, session: &Session, code: &str) -> Result<MfaOutcome, GateError> {
        if code.is_empty() {
            return Err(GateError::InputMissing);
        }

        let outcome = self
            .provider
            .check_otp(
                &session.subject_id,
                code,
                &session.realm,
                session.transaction_id.as_deref(),
            )
            .await;

        Ok(match outcome {
            MfaOutcome::Valid => MfaOutcome::Valid,
            MfaOutcome::Invalid | MfaOutcome::TransportError => MfaOutcome::Invalid,
        })
    }

    /// Localized prompt for the OTP entry form.
    #[must_use]
    pub fn welcome_text(&self, locale: &str) -> String {
        self.config.message_for(locale).welcome
    }

    /// Localized generic failure text, the error-render hook for the host.
    #[must_use]
    pub fn error_text(&self, locale: &str) -> String {
        self.config.message_for(locale).error
    }

    #[must_use]
    pub fn realm(&self) -> &str {
        &self.config.realm
    }
}
