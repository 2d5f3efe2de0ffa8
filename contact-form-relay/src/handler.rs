use crate::{
    compose::MessageComposer,
    config::{DeploymentEnvironment, Settings},
    cors::CorsPolicy,
    error::ContactFormError,
    relay::{dispatch, AcknowledgementOutcome, MessageId, Relay},
    response::{body_bytes, empty_response, json_response},
    submission::ContactFormSubmission,
};
use lambda_http::{
    http::{header::ORIGIN, Method, StatusCode},
    Body, Error, Request, RequestPayloadExt, Response,
};
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};

const SEND_EMAIL_PATH: &str = "/send-email";
const HEALTH_PATH: &str = "/health";

/// Matched on the path suffix so that an API Gateway stage prefix does not matter.
enum Route {
    SendEmail,
    Health,
    Unknown,
}

impl Route {
    fn of(path: &str) -> Self {
        let path = path.trim_end_matches('/');
        if path.ends_with(SEND_EMAIL_PATH) {
            Route::SendEmail
        } else if path.ends_with(HEALTH_PATH) {
            Route::Health
        } else {
            Route::Unknown
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailSent {
    success: bool,
    message: &'static str,
    message_id: MessageId,
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    message: &'static str,
    timestamp: String,
}

pub struct ContactFormHandler<RelayT: Relay> {
    relay: RelayT,
    composer: MessageComposer,
    cors: CorsPolicy,
    environment: DeploymentEnvironment,
}

impl<RelayT: Relay> ContactFormHandler<RelayT> {
    pub fn new(
        relay: RelayT,
        composer: MessageComposer,
        cors: CorsPolicy,
        environment: DeploymentEnvironment,
    ) -> Self {
        Self {
            relay,
            composer,
            cors,
            environment,
        }
    }

    pub fn from_settings(relay: RelayT, settings: &Settings) -> Self {
        Self::new(
            relay,
            MessageComposer::from_settings(&settings.mail),
            settings.cors.clone(),
            settings.environment,
        )
    }

    pub async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        let mut response = self.route(&event).await?;
        self.cors
            .apply(event.headers().get(ORIGIN), response.headers_mut());
        Ok(response)
    }

    async fn route(&self, event: &Request) -> Result<Response<Body>, Error> {
        match (Route::of(event.uri().path()), event.method()) {
            (_, &Method::OPTIONS) => empty_response(StatusCode::OK),
            (Route::SendEmail, &Method::POST) => match self.send_email(event).await {
                Ok(message_id) => json_response(
                    StatusCode::OK,
                    &EmailSent {
                        success: true,
                        message: "Email sent successfully",
                        message_id,
                    },
                ),
                Err(error) => self.error_response(error),
            },
            (Route::Health, &Method::GET) => json_response(
                StatusCode::OK,
                &HealthStatus {
                    status: "ok",
                    message: "Server is running",
                    timestamp: OffsetDateTime::now_utc().format(&Rfc3339)?,
                },
            ),
            (Route::SendEmail | Route::Health, _) => {
                self.error_response(ContactFormError::MethodNotAllowed)
            }
            (Route::Unknown, _) => self.error_response(ContactFormError::NotFound),
        }
    }

    async fn send_email(&self, event: &Request) -> Result<MessageId, ContactFormError> {
        let submission = parse_submission(event)?;
        let validated = submission.validate()?;
        let notification = self
            .composer
            .notification(&validated, OffsetDateTime::now_utc())?;
        let acknowledgement = self.composer.acknowledgement(&validated)?;

        let report = dispatch(&self.relay, notification, acknowledgement).await?;
        info!(message_id = %report.notification, "Sent contact form notification");
        match report.acknowledgement {
            AcknowledgementOutcome::Sent(message_id) => {
                info!(%message_id, "Sent acknowledgement to submitter");
            }
            AcknowledgementOutcome::Failed(error) => {
                warn!("{error}");
            }
        }
        Ok(report.notification)
    }

    fn error_response(&self, error: ContactFormError) -> Result<Response<Body>, Error> {
        error.log();
        error.into_response(self.environment)
    }
}

/// An empty body is read as a submission with every field missing, so that it is reported as a
/// validation failure.
fn parse_submission(event: &Request) -> Result<ContactFormSubmission, ContactFormError> {
    let body = body_bytes(event.body());
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ContactFormSubmission::default());
    }
    match event.payload() {
        Ok(Some(submission)) => Ok(submission),
        // No recognised content type; the site always posts JSON.
        Ok(None) => serde_json::from_slice(body)
            .map_err(|error| ContactFormError::MalformedPayload(error.to_string())),
        Err(error) => Err(ContactFormError::MalformedPayload(error.to_string())),
    }
}
