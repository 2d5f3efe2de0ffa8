use lettre::Address;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Contact form payload as posted by the website. Every field is optional at this stage so that
/// missing input is reported as a validation failure rather than a parse failure.
#[derive(Deserialize, Debug, Default)]
pub struct ContactFormSubmission {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
}

impl ContactFormSubmission {
    pub fn validate(&self) -> Result<ValidatedSubmission<'_>, SubmissionError> {
        let name = required(&self.name, "name")?;
        let email = required(&self.email, "email")?;
        let message = required(&self.message, "message")?;

        if !email_pattern().is_match(email) {
            return Err(SubmissionError::InvalidEmail);
        }
        let Ok(email) = email.parse::<Address>() else {
            return Err(SubmissionError::InvalidEmail);
        };

        Ok(ValidatedSubmission {
            name,
            email,
            phone: self.phone.as_deref().filter(|phone| !phone.is_empty()),
            message,
        })
    }
}

fn required<'a>(
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, SubmissionError> {
    match value.as_deref() {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(SubmissionError::MissingField(field)),
    }
}

fn email_pattern() -> &'static Regex {
    static EMAIL_PATTERN: OnceLock<Regex> = OnceLock::new();
    EMAIL_PATTERN.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}

#[derive(Debug)]
pub struct ValidatedSubmission<'a> {
    pub name: &'a str,
    pub email: Address,
    pub phone: Option<&'a str>,
    pub message: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionError {
    MissingField(&'static str),
    InvalidEmail,
}

impl SubmissionError {
    /// Explanation suitable for showing to the person who filled in the form.
    pub fn client_message(&self) -> &'static str {
        match self {
            SubmissionError::MissingField(_) => {
                "Missing required fields: name, email, and message are required"
            }
            SubmissionError::InvalidEmail => "Invalid email address",
        }
    }
}

impl std::fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionError::MissingField(field) => write!(f, "Missing required field {field}"),
            SubmissionError::InvalidEmail => write!(f, "Invalid email address"),
        }
    }
}

impl std::error::Error for SubmissionError {}
