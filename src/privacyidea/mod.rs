pub mod response;

use anyhow::{anyhow, Result};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};
use tracing::{error, info_span, instrument, warn, Instrument};
use url::Url;

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Retry budget per remote operation: one initial attempt plus three retries.
const RETRY_ATTEMPTS: u32 = 4;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// The server returns transaction ids as a comma-joined list; only the first
/// 20 characters identify the challenge.
const TRANSACTION_ID_MAX: usize = 20;

/// Result of an OTP validation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaOutcome {
    Valid,
    Invalid,
    /// The server never produced a well-formed answer within the retry budget.
    TransportError,
}

impl MfaOutcome {
    #[must_use]
    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Enrollment types that render a QR provisioning image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppTokenKind {
    Totp,
    Hotp,
}

impl AppTokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Hotp => "hotp",
        }
    }
}

/// HTTP client for one privacyIDEA server.
///
/// Every operation absorbs remote failures into its sentinel value (empty
/// string, `false`, empty map) after the retry budget is spent; callers never
/// see a transport error except through [`MfaOutcome::TransportError`].
#[derive(Debug, Clone)]
pub struct OtpProvider {
    base_url: String,
    client: Client,
}

/// Normalize and validate the configured base URL.
/// # Errors
/// Returns an error if `url` cannot be parsed, has no host, or uses an unsupported scheme.
pub fn base_url(url: &str) -> Result<String> {
    let url = Url::parse(url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {scheme}")),
        },
    };

    Ok(format!("{scheme}://{host}:{port}"))
}

impl OtpProvider {
    /// Build a client for `url`.
    ///
    /// `accept_invalid_certs` is the configuration escape hatch for servers
    /// with private CAs; it disables certificate validation for every call.
    /// # Errors
    /// Returns an error if the URL is invalid or the TLS backend fails to initialize.
    pub fn new(url: &str, accept_invalid_certs: bool) -> Result<Self> {
        let base_url = base_url(url)?;

        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self { base_url, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Request an admin token for token-management calls.
    ///
    /// Returns an empty token on any failure; admin-scoped operations then
    /// fail remotely instead of aborting the attempt.
    #[instrument(skip(self, password))]
    pub async fn auth_token(&self, username: &str, password: &SecretString) -> String {
        let request = self
            .client
            .post(self.endpoint("/auth"))
            .form(&[("username", username), ("password", password.expose_secret())]);

        match self.send_with_retry("auth_token", request).await {
            Some(body) => response::field(&body, "token"),
            None => String::new(),
        }
    }

    /// Whether `user` already has an enrolled token in `realm`.
    #[instrument(skip(self, admin_token))]
    pub async fn has_token(&self, user: &str, realm: &str, admin_token: &str) -> bool {
        let request = self
            .client
            .get(self.endpoint("/token/"))
            .query(&[("user", user), ("realm", realm)])
            .header("Authorization", admin_token);

        match self.send_with_retry("has_token", request).await {
            Some(body) => !response::field(&body, "tokens").is_empty(),
            None => false,
        }
    }

    /// Trigger an out-of-band challenge (SMS, e-mail, push) for `user`.
    ///
    /// Returns the transaction id binding the challenge to the later
    /// validation call, truncated to its 20 significant characters. An empty
    /// id is valid and means the enrolled token needs no challenge (TOTP).
    #[instrument(skip(self, admin_token))]
    pub async fn trigger_challenge(&self, user: &str, realm: &str, admin_token: &str) -> String {
        let request = self
            .client
            .post(self.endpoint("/validate/triggerchallenge"))
            .form(&[("user", user), ("realm", realm)])
            .header("PI-Authorization", admin_token);

        match self.send_with_retry("trigger_challenge", request).await {
            Some(body) => response::field(&body, "transaction_ids")
                .chars()
                .take(TRANSACTION_ID_MAX)
                .collect(),
            None => String::new(),
        }
    }

    /// Validate `otp` for `user`, optionally bound to a challenge transaction.
    #[instrument(skip(self, otp))]
    pub async fn validate_otp(
        &self,
        user: &str,
        otp: &str,
        realm: &str,
        transaction_id: Option<&str>,
    ) -> MfaOutcome {
        let mut form: Vec<(&str, &str)> = vec![("user", user), ("pass", otp), ("realm", realm)];
        if let Some(id) = transaction_id.filter(|id| !id.is_empty()) {
            form.push(("transaction_id", id));
        }

        let request = self
            .client
            .post(self.endpoint("/validate/check"))
            .form(&form);

        match self.send_with_retry("validate_otp", request).await {
            Some(body) => {
                if response::field(&body, "status") == "true"
                    && response::field(&body, "value") == "true"
                {
                    MfaOutcome::Valid
                } else {
                    MfaOutcome::Invalid
                }
            }
            None => MfaOutcome::TransportError,
        }
    }

    /// Two-pass validation: first against the pending transaction, then once
    /// more without it, so a plain TOTP+PIN entry still succeeds while a
    /// challenge (SMS/e-mail) is open.
    #[instrument(skip(self, otp))]
    pub async fn check_otp(
        &self,
        user: &str,
        otp: &str,
        realm: &str,
        transaction_id: Option<&str>,
    ) -> MfaOutcome {
        let transaction_id = transaction_id.filter(|id| !id.is_empty());

        let first = self.validate_otp(user, otp, realm, transaction_id).await;
        match (first, transaction_id) {
            (MfaOutcome::Valid, _) | (_, None) => first,
            (_, Some(_)) => self.validate_otp(user, otp, realm, None).await,
        }
    }

    /// Enroll a generated TOTP/HOTP token for `user` and return the QR
    /// provisioning images keyed by token type (`googleurl`, `oathurl`, ...).
    #[instrument(skip(self, admin_token))]
    pub async fn enroll_app_token(
        &self,
        user: &str,
        realm: &str,
        admin_token: &str,
        kind: AppTokenKind,
    ) -> HashMap<String, String> {
        let request = self
            .client
            .post(self.endpoint("/token/init"))
            .form(&[
                ("genkey", "1"),
                ("type", kind.as_str()),
                ("user", user),
                ("realm", realm),
            ])
            .header("PI-Authorization", admin_token);

        match self.send_with_retry("enroll_app_token", request).await {
            Some(body) => response::images(&body),
            None => HashMap::new(),
        }
    }

    /// Enroll an SMS token delivering codes to `phone`.
    #[instrument(skip(self, admin_token))]
    pub async fn enroll_sms_token(
        &self,
        user: &str,
        realm: &str,
        phone: &str,
        admin_token: &str,
    ) -> bool {
        let request = self
            .client
            .post(self.endpoint("/token/init"))
            .form(&[
                ("genkey", "1"),
                ("type", "sms"),
                ("user", user),
                ("realm", realm),
                ("phone", phone),
            ])
            .header("PI-Authorization", admin_token);

        match self.send_with_retry("enroll_sms_token", request).await {
            Some(body) => {
                response::field(&body, "status") == "true"
                    && response::field(&body, "value") == "true"
            }
            None => false,
        }
    }

    /// Send `request`, retrying transport failures (connect errors, timeouts,
    /// non-2xx statuses, body-read errors) with a fixed delay. Returns the
    /// response body, or `None` once the budget is exhausted.
    async fn send_with_retry(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Option<String> {
        for attempt in 1..=RETRY_ATTEMPTS {
            let Some(request) = request.try_clone() else {
                // Form and query bodies always clone; anything else is a bug.
                error!(operation, "Request body cannot be replayed");
                return None;
            };

            let span = info_span!("privacyidea.request", operation, attempt);
            match send_once(request).instrument(span).await {
                Ok(body) => return Some(body),
                Err(err) => {
                    if attempt < RETRY_ATTEMPTS {
                        warn!(operation, attempt, error = %err, "Request failed, retrying");
                        sleep(RETRY_DELAY).await;
                    } else {
                        error!(operation, attempt, error = %err, "Request failed, retry budget exhausted");
                    }
                }
            }
        }

        None
    }
}

async fn send_once(request: RequestBuilder) -> Result<String> {
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("unexpected status {status}"));
    }

    Ok(response.text().await?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn provider(server: &MockServer) -> OtpProvider {
        OtpProvider::new(&server.uri(), false).unwrap()
    }

    // Base URL for a port nothing listens on; connections are refused.
    fn unreachable() -> OtpProvider {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        OtpProvider::new(&format!("http://127.0.0.1:{port}"), false).unwrap()
    }

    fn validate_body(status: bool, value: bool) -> serde_json::Value {
        json!({ "result": { "status": status, "value": value } })
    }

    #[test]
    fn base_url_normalizes_default_ports() {
        assert_eq!(
            base_url("https://pi.example.com").unwrap(),
            "https://pi.example.com:443"
        );
        assert_eq!(
            base_url("http://pi.example.com:8080").unwrap(),
            "http://pi.example.com:8080"
        );
        assert!(base_url("ftp://pi.example.com").is_err());
        assert!(base_url("not a url").is_err());
    }

    #[tokio::test]
    async fn auth_token_extracts_token() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(body_string_contains("username=admin"))
            .and(body_string_contains("password=hunter2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "value": { "token": "admin-token-1" } }
            })))
            .mount(&server)
            .await;

        let password = SecretString::from("hunter2".to_string());
        let token = provider(&server).auth_token("admin", &password).await;
        assert_eq!(token, "admin-token-1");
        Ok(())
    }

    #[tokio::test]
    async fn auth_token_missing_field_is_not_retried() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "status": true }
            })))
            .mount(&server)
            .await;

        let password = SecretString::from("hunter2".to_string());
        let token = provider(&server).auth_token("admin", &password).await;
        assert_eq!(token, "");

        // A well-formed response with a missing field is a protocol failure,
        // not a transport failure: exactly one request.
        let Some(requests) = server.received_requests().await else {
            bail!("wiremock request recording is disabled");
        };
        assert_eq!(requests.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_is_retried_until_success() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "after-retries"
            })))
            .mount(&server)
            .await;

        let password = SecretString::from("pw".to_string());
        let token = provider(&server).auth_token("admin", &password).await;
        assert_eq!(token, "after-retries");

        let Some(requests) = server.received_requests().await else {
            bail!("wiremock request recording is disabled");
        };
        assert_eq!(requests.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn retry_budget_is_four_attempts() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let password = SecretString::from("pw".to_string());
        let token = provider(&server).auth_token("admin", &password).await;
        assert_eq!(token, "");

        let Some(requests) = server.received_requests().await else {
            bail!("wiremock request recording is disabled");
        };
        assert_eq!(requests.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn has_token_sends_authorization_header() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/token/"))
            .and(query_param("user", "alice"))
            .and(query_param("realm", "corp"))
            .and(header("Authorization", "admin-token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "value": { "tokens": [{ "serial": "TOTP0001" }] } }
            })))
            .mount(&server)
            .await;

        assert!(
            provider(&server)
                .has_token("alice", "corp", "admin-token-1")
                .await
        );
        Ok(())
    }

    #[tokio::test]
    async fn has_token_empty_list_is_false() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "value": { "tokens": [] } }
            })))
            .mount(&server)
            .await;

        assert!(!provider(&server).has_token("bob", "corp", "t").await);
        Ok(())
    }

    #[tokio::test]
    async fn trigger_challenge_truncates_transaction_id() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/validate/triggerchallenge"))
            .and(header("PI-Authorization", "admin-token-1"))
            .and(body_string_contains("user=alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "detail": { "transaction_ids": "ABCDEFGHIJKLMNOPQRSTUVWXYZ" }
            })))
            .mount(&server)
            .await;

        let id = provider(&server)
            .trigger_challenge("alice", "corp", "admin-token-1")
            .await;
        assert_eq!(id, "ABCDEFGHIJKLMNOPQRST");
        assert_eq!(id.len(), 20);
        Ok(())
    }

    #[tokio::test]
    async fn validate_otp_requires_both_status_and_value() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        for (status, value, expected) in [
            (true, true, MfaOutcome::Valid),
            (true, false, MfaOutcome::Invalid),
            (false, true, MfaOutcome::Invalid),
            (false, false, MfaOutcome::Invalid),
        ] {
            let server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/validate/check"))
                .respond_with(ResponseTemplate::new(200).set_body_json(validate_body(status, value)))
                .mount(&server)
                .await;

            let outcome = provider(&server)
                .validate_otp("alice", "123456", "corp", None)
                .await;
            assert_eq!(outcome, expected, "status={status} value={value}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn validate_otp_missing_fields_is_invalid() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/validate/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "detail": {} })))
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .validate_otp("alice", "123456", "corp", None)
            .await;
        assert_eq!(outcome, MfaOutcome::Invalid);
        Ok(())
    }

    #[tokio::test]
    async fn validate_otp_unreachable_server_is_transport_error() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let outcome = unreachable()
            .validate_otp("alice", "123456", "corp", None)
            .await;
        assert_eq!(outcome, MfaOutcome::TransportError);
    }

    #[tokio::test]
    async fn check_otp_falls_back_to_transactionless_validation() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        // First pass, bound to the challenge transaction: rejected.
        Mock::given(method("POST"))
            .and(path("/validate/check"))
            .and(body_string_contains("transaction_id=TX123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(validate_body(true, false)))
            .mount(&server)
            .await;

        // Second pass without the transaction id: accepted.
        Mock::given(method("POST"))
            .and(path("/validate/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(validate_body(true, true)))
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .check_otp("alice", "123456", "corp", Some("TX123"))
            .await;
        assert_eq!(outcome, MfaOutcome::Valid);

        let Some(requests) = server.received_requests().await else {
            bail!("wiremock request recording is disabled");
        };
        assert_eq!(requests.len(), 2);
        let second = String::from_utf8(requests[1].body.clone())?;
        assert!(!second.contains("transaction_id"));
        Ok(())
    }

    #[tokio::test]
    async fn check_otp_without_transaction_validates_once() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/validate/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(validate_body(true, false)))
            .mount(&server)
            .await;

        let outcome = provider(&server).check_otp("alice", "1", "corp", None).await;
        assert_eq!(outcome, MfaOutcome::Invalid);

        let Some(requests) = server.received_requests().await else {
            bail!("wiremock request recording is disabled");
        };
        assert_eq!(requests.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn enroll_app_token_returns_images() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token/init"))
            .and(header("PI-Authorization", "admin-token-1"))
            .and(body_string_contains("genkey=1"))
            .and(body_string_contains("type=totp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "detail": { "googleurl": { "img": "data:image/png;base64,QR" } }
            })))
            .mount(&server)
            .await;

        let images = provider(&server)
            .enroll_app_token("alice", "corp", "admin-token-1", AppTokenKind::Totp)
            .await;
        assert_eq!(
            images.get("googleurl").map(String::as_str),
            Some("data:image/png;base64,QR")
        );
        Ok(())
    }

    #[tokio::test]
    async fn enroll_sms_token_reports_status() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token/init"))
            .and(body_string_contains("type=sms"))
            .and(body_string_contains("phone=%2B4912345"))
            .respond_with(ResponseTemplate::new(200).set_body_json(validate_body(true, true)))
            .mount(&server)
            .await;

        assert!(
            provider(&server)
                .enroll_sms_token("alice", "corp", "+4912345", "admin-token-1")
                .await
        );
        Ok(())
    }
}
