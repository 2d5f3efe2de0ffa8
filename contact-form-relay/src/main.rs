use contact_form_relay::{
    config::{DeploymentEnvironment, Settings},
    handler::ContactFormHandler,
    relay::SmtpRelay,
    secrets::AwsSecretsManagerSecretRepository,
};
use lambda_http::{run, service_fn, Error};
use tracing::{debug, error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let settings = Settings::from_env();
    let level = match &settings {
        Ok(settings) if settings.environment == DeploymentEnvironment::Development => Level::DEBUG,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .init();
    let settings = settings.inspect_err(|error| error!("Invalid configuration: {error}"))?;
    debug!(smtp = ?settings.smtp, mail = ?settings.mail, "Loaded settings");

    let relay = SmtpRelay::<AwsSecretsManagerSecretRepository>::open(settings.smtp.clone()).await;
    if settings.environment.exposes_error_details() {
        match relay.verify().await {
            Ok(()) => info!("SMTP relay is ready"),
            Err(error) => warn!("SMTP relay check failed, continuing anyway: {error}"),
        }
    }

    let handler = ContactFormHandler::from_settings(relay, &settings);
    run(service_fn(|event| handler.handle(event))).await
}
