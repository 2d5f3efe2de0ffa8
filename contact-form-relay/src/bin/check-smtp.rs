//! Checks that the configured SMTP relay accepts a connection, and the login if one is
//! configured. Reads the same environment as the Lambda function.

use anyhow::Context;
use contact_form_relay::{
    config::Settings, relay::SmtpRelay, secrets::AwsSecretsManagerSecretRepository,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let settings = Settings::from_env().context("Invalid configuration")?;
    info!(
        host = %settings.smtp.host,
        port = settings.smtp.port,
        security = %settings.smtp.security,
        authenticated = settings.smtp.credentials.is_some(),
        "Checking SMTP relay"
    );

    let relay = SmtpRelay::<AwsSecretsManagerSecretRepository>::open(settings.smtp).await;
    relay
        .verify()
        .await
        .context("SMTP relay did not accept the connection")?;
    info!("SMTP relay is ready to send mail");
    Ok(())
}
