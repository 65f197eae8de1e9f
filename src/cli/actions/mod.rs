pub mod login;

use std::path::PathBuf;

#[derive(Debug)]
pub enum Action {
    Login {
        url: String,
        realm: String,
        user: String,
        otp: Option<String>,
        admin_user: Option<String>,
        admin_password: Option<String>,
        skip_tls_verify: bool,
        messages: Option<PathBuf>,
        locale: String,
    },
}
