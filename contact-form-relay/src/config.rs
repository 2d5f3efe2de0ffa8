use crate::cors::{AllowedOrigins, CorsPolicy};
use lambda_http::http::HeaderValue;
use lettre::Address;
use std::{fmt::Display, str::FromStr, time::Duration};

const DEFAULT_SMTP_HOST: &str = "smtp.hostinger.com";
const DEFAULT_SMTP_PORT: u16 = 587;
const IMPLICIT_TLS_PORT: u16 = 465;
const DEFAULT_BUSINESS_ADDRESS: &str = "info@modernservices.org.uk";
const DEFAULT_CORS_ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-Requested-With";
const DEFAULT_CORS_MAX_AGE: u32 = 86400;

/// Everything the service reads from its environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub smtp: SmtpSettings,
    pub mail: MailSettings,
    pub cors: CorsPolicy,
    pub environment: DeploymentEnvironment,
}

impl Settings {
    pub fn from_env() -> Result<Self, EnvironmentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the settings from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EnvironmentError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match var("SMTP_PORT") {
            Some(value) => parse_variable("SMTP_PORT", value)?,
            None => DEFAULT_SMTP_PORT,
        };
        let security = match var("SMTP_SECURITY") {
            Some(value) => parse_variable("SMTP_SECURITY", value)?,
            None if port == IMPLICIT_TLS_PORT => SecurityMode::Tls,
            None => SecurityMode::StartTls,
        };
        let credentials = match (
            var("SMTP_CREDENTIALS_SECRET"),
            var("SMTP_USER"),
            var("SMTP_PASSWORD"),
        ) {
            (Some(secret_name), _, _) => Some(CredentialSource::Secret(secret_name)),
            (None, Some(username), Some(password)) => {
                Some(CredentialSource::Inline { username, password })
            }
            _ => None,
        };
        let timeout = match var("SMTP_TIMEOUT_SECS") {
            Some(value) => Some(Duration::from_secs(parse_variable(
                "SMTP_TIMEOUT_SECS",
                value,
            )?)),
            None => None,
        };
        let smtp = SmtpSettings {
            host: var("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.into()),
            port,
            security,
            credentials,
            timeout,
        };

        // The relay account usually doubles as the sender, as long as it is an actual address.
        let sender: Address = match var("SMTP_USER").and_then(|user| user.parse().ok()) {
            Some(user_address) if var("MAIL_FROM").is_none() => user_address,
            _ => parse_variable(
                "MAIL_FROM",
                var("MAIL_FROM").unwrap_or_else(|| DEFAULT_BUSINESS_ADDRESS.into()),
            )?,
        };
        let business_inbox: Address = parse_variable(
            "BUSINESS_INBOX",
            var("BUSINESS_INBOX").unwrap_or_else(|| DEFAULT_BUSINESS_ADDRESS.into()),
        )?;

        let allowed_origins = AllowedOrigins::parse(&var("CORS_ALLOWED_ORIGINS").unwrap_or_default());
        let allowed_headers = var("CORS_ALLOWED_HEADERS")
            .unwrap_or_else(|| DEFAULT_CORS_ALLOWED_HEADERS.into());
        let allowed_headers = HeaderValue::from_str(&allowed_headers).map_err(|_| {
            EnvironmentError::InvalidVariable {
                name: "CORS_ALLOWED_HEADERS",
                value: allowed_headers.clone(),
            }
        })?;
        let allow_credentials = match var("CORS_ALLOW_CREDENTIALS") {
            Some(value) => parse_variable("CORS_ALLOW_CREDENTIALS", value)?,
            None => true,
        };
        let max_age = match var("CORS_MAX_AGE") {
            Some(value) => parse_variable("CORS_MAX_AGE", value)?,
            None => DEFAULT_CORS_MAX_AGE,
        };

        let environment = match var("APP_ENVIRONMENT") {
            Some(value) => parse_variable("APP_ENVIRONMENT", value)?,
            None => DeploymentEnvironment::Production,
        };

        Ok(Self {
            smtp,
            mail: MailSettings {
                sender,
                business_inbox,
            },
            cors: CorsPolicy::new(allowed_origins, allowed_headers, allow_credentials, max_age),
            environment,
        })
    }
}

fn parse_variable<T: FromStr>(name: &'static str, value: String) -> Result<T, EnvironmentError> {
    value
        .trim()
        .parse()
        .map_err(|_| EnvironmentError::InvalidVariable { name, value })
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub security: SecurityMode,
    pub credentials: Option<CredentialSource>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// TLS from the first byte, usually on port 465.
    Tls,
    /// Plaintext connection upgraded with `STARTTLS`, which must succeed.
    StartTls,
    /// No encryption at all. Only suitable for local relays.
    None,
}

impl SecurityMode {
    pub fn is_encrypted(self) -> bool {
        !matches!(self, SecurityMode::None)
    }
}

impl FromStr for SecurityMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tls" | "ssl" | "smtps" => Ok(SecurityMode::Tls),
            "starttls" => Ok(SecurityMode::StartTls),
            "none" | "plain" => Ok(SecurityMode::None),
            _ => Err(()),
        }
    }
}

impl Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityMode::Tls => write!(f, "tls"),
            SecurityMode::StartTls => write!(f, "starttls"),
            SecurityMode::None => write!(f, "none"),
        }
    }
}

/// Where the relay login comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Inline { username: String, password: String },
    /// Name of an AWS Secrets Manager secret holding `SMTP_USERNAME` and `SMTP_PASSWORD`.
    Secret(String),
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Inline { username, .. } => f
                .debug_struct("Inline")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            CredentialSource::Secret(name) => f.debug_tuple("Secret").field(name).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailSettings {
    pub sender: Address,
    pub business_inbox: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEnvironment {
    Production,
    Development,
}

impl DeploymentEnvironment {
    /// Whether internal error detail may be returned to callers.
    pub fn exposes_error_details(self) -> bool {
        self == DeploymentEnvironment::Development
    }
}

impl FromStr for DeploymentEnvironment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(DeploymentEnvironment::Production),
            "development" | "dev" => Ok(DeploymentEnvironment::Development),
            _ => Err(()),
        }
    }
}

#[derive(Debug)]
pub enum EnvironmentError {
    MissingSecret(String),
    InvalidVariable { name: &'static str, value: String },
}

impl Display for EnvironmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvironmentError::MissingSecret(key) => write!(f, "Missing secret {key}"),
            EnvironmentError::InvalidVariable { name, value } => {
                write!(f, "Invalid value {value:?} for {name}")
            }
        }
    }
}

impl std::error::Error for EnvironmentError {}

#[cfg(test)]
mod tests {
    use super::{CredentialSource, DeploymentEnvironment, EnvironmentError, SecurityMode, Settings};
    use googletest::prelude::*;
    use std::{collections::HashMap, time::Duration};

    fn settings_from(vars: &[(&str, &str)]) -> std::result::Result<Settings, EnvironmentError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn uses_defaults_when_environment_is_empty() -> Result<()> {
        let settings = settings_from(&[]).unwrap();

        verify_that!(settings.smtp.host, eq("smtp.hostinger.com"))?;
        verify_that!(settings.smtp.port, eq(587))?;
        verify_that!(settings.smtp.security, eq(SecurityMode::StartTls))?;
        verify_that!(settings.smtp.credentials, none())?;
        verify_that!(settings.smtp.timeout, none())?;
        verify_that!(
            settings.mail.business_inbox.to_string(),
            eq("info@modernservices.org.uk")
        )?;
        verify_that!(settings.environment, eq(DeploymentEnvironment::Production))
    }

    #[test]
    fn infers_implicit_tls_from_port_465() -> Result<()> {
        let settings = settings_from(&[("SMTP_PORT", "465")]).unwrap();

        verify_that!(settings.smtp.security, eq(SecurityMode::Tls))
    }

    #[test]
    fn explicit_security_mode_wins_over_port() -> Result<()> {
        let settings = settings_from(&[("SMTP_PORT", "465"), ("SMTP_SECURITY", "none")]).unwrap();

        verify_that!(settings.smtp.security, eq(SecurityMode::None))
    }

    #[test]
    fn reads_inline_credentials_and_uses_user_as_sender() -> Result<()> {
        let settings = settings_from(&[
            ("SMTP_USER", "contact@example.com"),
            ("SMTP_PASSWORD", "hunter2"),
        ])
        .unwrap();

        verify_that!(
            settings.smtp.credentials,
            some(eq(CredentialSource::Inline {
                username: "contact@example.com".into(),
                password: "hunter2".into(),
            }))
        )?;
        verify_that!(settings.mail.sender.to_string(), eq("contact@example.com"))
    }

    #[test]
    fn secret_name_takes_precedence_over_inline_credentials() -> Result<()> {
        let settings = settings_from(&[
            ("SMTP_USER", "contact@example.com"),
            ("SMTP_PASSWORD", "hunter2"),
            ("SMTP_CREDENTIALS_SECRET", "smtp-credentials"),
        ])
        .unwrap();

        verify_that!(
            settings.smtp.credentials,
            some(eq(CredentialSource::Secret("smtp-credentials".into())))
        )
    }

    #[test]
    fn falls_back_to_business_address_when_user_is_not_an_address() -> Result<()> {
        let settings = settings_from(&[("SMTP_USER", "AKIAEXAMPLE")]).unwrap();

        verify_that!(
            settings.mail.sender.to_string(),
            eq("info@modernservices.org.uk")
        )
    }

    #[test]
    fn reads_timeout_in_seconds() -> Result<()> {
        let settings = settings_from(&[("SMTP_TIMEOUT_SECS", "15")]).unwrap();

        verify_that!(settings.smtp.timeout, some(eq(Duration::from_secs(15))))
    }

    #[test]
    fn rejects_unparseable_port() -> Result<()> {
        verify_that!(
            settings_from(&[("SMTP_PORT", "smtp")]),
            err(displays_as(contains_substring("SMTP_PORT")))
        )
    }

    #[test]
    fn rejects_unknown_environment() -> Result<()> {
        verify_that!(
            settings_from(&[("APP_ENVIRONMENT", "staging")]),
            err(displays_as(contains_substring("APP_ENVIRONMENT")))
        )
    }

    #[test]
    fn rejects_invalid_sender_address() -> Result<()> {
        verify_that!(
            settings_from(&[("MAIL_FROM", "not an address")]),
            err(displays_as(contains_substring("MAIL_FROM")))
        )
    }

    #[test]
    fn treats_blank_values_as_unset() -> Result<()> {
        let settings = settings_from(&[("SMTP_HOST", "  "), ("SMTP_PORT", "")]).unwrap();

        verify_that!(settings.smtp.host, eq("smtp.hostinger.com"))?;
        verify_that!(settings.smtp.port, eq(587))
    }

    #[test]
    fn debug_output_masks_password() -> Result<()> {
        let source = CredentialSource::Inline {
            username: "user".into(),
            password: "hunter2".into(),
        };

        verify_that!(format!("{source:?}"), not(contains_substring("hunter2")))
    }
}
