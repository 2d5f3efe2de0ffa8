use crate::{
    compose::ComposeError, config::DeploymentEnvironment, relay::RelayError,
    response::json_response, submission::SubmissionError,
};
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;
use tracing::{error, warn};

const DELIVERY_FAILURE_MESSAGE: &str = "Failed to send email. Please try again later.";

/// Everything that can stop a request from succeeding.
#[derive(Debug)]
pub enum ContactFormError {
    Submission(SubmissionError),
    MalformedPayload(String),
    MethodNotAllowed,
    NotFound,
    Compose(ComposeError),
    Relay(RelayError),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ContactFormError {
    pub fn status(&self) -> StatusCode {
        match self {
            ContactFormError::Submission(_) | ContactFormError::MalformedPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            ContactFormError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ContactFormError::NotFound => StatusCode::NOT_FOUND,
            ContactFormError::Compose(_) | ContactFormError::Relay(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn is_internal(&self) -> bool {
        self.status().is_server_error()
    }

    fn client_message(&self) -> &'static str {
        match self {
            ContactFormError::Submission(error) => error.client_message(),
            ContactFormError::MalformedPayload(_) => "Invalid request body",
            ContactFormError::MethodNotAllowed => "Method not allowed",
            ContactFormError::NotFound => "Not found",
            ContactFormError::Compose(_) | ContactFormError::Relay(_) => DELIVERY_FAILURE_MESSAGE,
        }
    }

    pub fn log(&self) {
        if self.is_internal() {
            error!("Internal error sending contact form email: {self}");
        } else {
            warn!("Client error sending contact form email: {self}");
        }
    }

    /// Internal detail is only attached to server errors, and only where the environment
    /// allows it.
    pub fn into_response(
        self,
        environment: DeploymentEnvironment,
    ) -> Result<Response<Body>, Error> {
        let details = (self.is_internal() && environment.exposes_error_details())
            .then(|| self.to_string());
        json_response(
            self.status(),
            &ErrorBody {
                success: false,
                error: self.client_message(),
                details,
            },
        )
    }
}

impl From<SubmissionError> for ContactFormError {
    fn from(error: SubmissionError) -> Self {
        ContactFormError::Submission(error)
    }
}

impl From<ComposeError> for ContactFormError {
    fn from(error: ComposeError) -> Self {
        ContactFormError::Compose(error)
    }
}

impl From<RelayError> for ContactFormError {
    fn from(error: RelayError) -> Self {
        ContactFormError::Relay(error)
    }
}

impl std::fmt::Display for ContactFormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactFormError::Submission(error) => write!(f, "{error}"),
            ContactFormError::MalformedPayload(description) => {
                write!(f, "Malformed request body: {description}")
            }
            ContactFormError::MethodNotAllowed => write!(f, "Method not allowed"),
            ContactFormError::NotFound => write!(f, "Not found"),
            ContactFormError::Compose(error) => write!(f, "{error}"),
            ContactFormError::Relay(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ContactFormError {}

#[cfg(test)]
mod tests {
    use super::ContactFormError;
    use crate::{
        config::DeploymentEnvironment, relay::RelayError, response::body_bytes,
        submission::SubmissionError,
    };
    use googletest::prelude::*;
    use serde_json::Value;

    fn body_of(error: ContactFormError, environment: DeploymentEnvironment) -> Value {
        let response = error.into_response(environment).unwrap();
        serde_json::from_slice(body_bytes(response.body())).unwrap()
    }

    fn relay_failure() -> ContactFormError {
        ContactFormError::Relay(RelayError::Transport {
            code: Some("421".into()),
            description: "Service not available".into(),
        })
    }

    #[test]
    fn maps_client_errors_to_400() -> Result<()> {
        verify_that!(
            ContactFormError::Submission(SubmissionError::InvalidEmail)
                .status()
                .as_u16(),
            eq(400)
        )?;
        verify_that!(
            ContactFormError::MalformedPayload("expected value".into())
                .status()
                .as_u16(),
            eq(400)
        )
    }

    #[test]
    fn maps_relay_errors_to_500() -> Result<()> {
        verify_that!(relay_failure().status().as_u16(), eq(500))
    }

    #[test]
    fn hides_details_in_production() -> Result<()> {
        let body = body_of(relay_failure(), DeploymentEnvironment::Production);

        verify_that!(body["success"], eq(false))?;
        verify_that!(
            body["error"],
            eq("Failed to send email. Please try again later.")
        )?;
        verify_that!(body.get("details"), none())
    }

    #[test]
    fn includes_details_in_development() -> Result<()> {
        let body = body_of(relay_failure(), DeploymentEnvironment::Development);

        verify_that!(
            body["details"].as_str(),
            some(contains_substring("Service not available"))
        )
    }

    #[test]
    fn never_includes_details_for_client_errors() -> Result<()> {
        let body = body_of(
            ContactFormError::MalformedPayload("expected value at line 1".into()),
            DeploymentEnvironment::Development,
        );

        verify_that!(body["error"], eq("Invalid request body"))?;
        verify_that!(body.get("details"), none())
    }
}
