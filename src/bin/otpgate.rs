use anyhow::Result;
use otpgate::cli::{actions, actions::Action, start, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Start the program
    let action = start()?;

    // Handle the action
    let result = match action {
        Action::Login { .. } => actions::login::handle(action).await,
    };

    telemetry::shutdown_tracer();

    result
}
