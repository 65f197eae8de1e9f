//! # otpgate
//!
//! `otpgate` mediates second-factor (OTP) authentication between an
//! identity-provider authentication pipeline and a privacyIDEA server.
//!
//! For a given subject it decides whether an enrolled token exists, triggers
//! an out-of-band challenge (SMS, e-mail, push) or enrolls a fresh TOTP token
//! with a QR provisioning URI, and later validates the submitted one-time
//! code, possibly across a multi-step challenge transaction.
//!
//! ## Layout
//!
//! - [`privacyidea`]: the HTTP client for the five remote operations and
//!   the JSON response reader. Remote failures are retried on transport
//!   errors and otherwise absorbed into sentinel values: a user only ever
//!   sees a generic failed login, never server-side detail.
//! - [`gate`]: the begin/complete session state machine consumed by the
//!   host pipeline, with [`gate::Session`] as the explicit value handed
//!   between the two phases (no instance state, safe across a server farm).
//! - [`config`]: the immutable server configuration, including the
//!   per-locale presentation texts.
//! - [`cli`]: a thin command-line host shim driving one attempt end to end.

pub mod cli;
pub mod config;
pub mod gate;
pub mod privacyidea;
