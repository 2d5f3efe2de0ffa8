use crate::{
    compose::OutboundMessage,
    config::{CredentialSource, SecurityMode, SmtpSettings},
    secrets::SecretRepository,
};
use async_once_cell::OnceCell;
use async_trait::async_trait;
use lettre::{
    message::MultiPart,
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Something that can deliver an [`OutboundMessage`].
#[async_trait]
pub trait Relay: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<MessageId, RelayError>;
}

/// The `Message-ID` header assigned to a message that the relay accepted.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn generate(sender_domain: &str) -> Self {
        Self(format!("<{}@{sender_domain}>", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize)]
struct SmtpCredentials {
    #[serde(rename = "SMTP_USERNAME")]
    username: String,
    #[serde(rename = "SMTP_PASSWORD")]
    password: String,
}

/// Delivers mail through an SMTP relay. The connection pool is set up on the first send and
/// reused afterwards.
pub struct SmtpRelay<SecretRepositoryT: SecretRepository> {
    settings: SmtpSettings,
    secrets_repository: SecretRepositoryT,
    mailer: OnceCell<AsyncSmtpTransport<Tokio1Executor>>,
}

impl<SecretRepositoryT: SecretRepository> SmtpRelay<SecretRepositoryT> {
    pub fn new(settings: SmtpSettings, secrets_repository: SecretRepositoryT) -> Self {
        Self {
            settings,
            secrets_repository,
            mailer: Default::default(),
        }
    }

    pub async fn open(settings: SmtpSettings) -> Self {
        Self::new(settings, SecretRepositoryT::open().await)
    }

    /// Connects to the relay, authenticating if credentials are configured, without sending
    /// anything.
    pub async fn verify(&self) -> Result<(), RelayError> {
        let mailer = self.mailer().await?;
        if mailer.test_connection().await? {
            info!(host = %self.settings.host, "SMTP relay accepted the connection");
            Ok(())
        } else {
            Err(RelayError::Transport {
                code: None,
                description: format!("{} did not accept the connection", self.settings.host),
            })
        }
    }

    async fn mailer(&self) -> Result<&AsyncSmtpTransport<Tokio1Executor>, RelayError> {
        self.mailer
            .get_or_try_init(self.initialise_mailer())
            .await
            .map_err(|error| RelayError::Unavailable(error.to_string()))
    }

    async fn initialise_mailer(
        &self,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, lambda_http::Error> {
        let SmtpSettings {
            host,
            port,
            security,
            credentials,
            timeout,
        } = &self.settings;
        info!(%host, port, %security, "Connecting to SMTP relay");
        let mut builder = match security {
            SecurityMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)?,
            SecurityMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?,
            SecurityMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        }
        .port(*port)
        .authentication(vec![Mechanism::Plain, Mechanism::Login]);
        if timeout.is_some() {
            builder = builder.timeout(*timeout);
        }

        // Credentials never travel over a plaintext connection. A relay that insists on
        // authentication will then refuse the message, which is the intended failure mode.
        match credentials {
            Some(source) if security.is_encrypted() => {
                builder = builder.credentials(self.fetch_credentials(source).await?);
            }
            Some(_) => {
                warn!("Not sending SMTP credentials over an unencrypted connection");
            }
            None => {}
        }

        Ok(builder.build())
    }

    async fn fetch_credentials(
        &self,
        source: &CredentialSource,
    ) -> Result<Credentials, lambda_http::Error> {
        match source {
            CredentialSource::Inline { username, password } => {
                Ok(Credentials::new(username.clone(), password.clone()))
            }
            CredentialSource::Secret(name) => {
                let SmtpCredentials { username, password } =
                    self.secrets_repository.get_secret(name).await?;
                Ok(Credentials::new(username, password))
            }
        }
    }
}

#[async_trait]
impl<SecretRepositoryT: SecretRepository> Relay for SmtpRelay<SecretRepositoryT> {
    async fn send(&self, message: OutboundMessage) -> Result<MessageId, RelayError> {
        let message_id = MessageId::generate(message.from.email.domain());
        let email = build_message(message, &message_id)?;
        let mailer = self.mailer().await?;
        let response = mailer.send(email).await?;
        debug!(%message_id, code = %response.code(), "SMTP relay accepted message");
        Ok(message_id)
    }
}

fn build_message(message: OutboundMessage, message_id: &MessageId) -> Result<Message, RelayError> {
    let mut builder = Message::builder()
        .message_id(Some(message_id.to_string()))
        .from(message.from)
        .to(message.to)
        .subject(message.subject);
    if let Some(reply_to) = message.reply_to {
        builder = builder.reply_to(reply_to);
    }
    builder
        .multipart(MultiPart::alternative_plain_html(
            message.text_body,
            message.html_body,
        ))
        .map_err(|error| RelayError::InvalidMessage(error.to_string()))
}

#[derive(Debug)]
pub enum RelayError {
    InvalidMessage(String),
    Unavailable(String),
    Transport {
        code: Option<String>,
        description: String,
    },
}

impl From<lettre::transport::smtp::Error> for RelayError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        RelayError::Transport {
            code: error.status().map(|code| code.to_string()),
            description: error.to_string(),
        }
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::InvalidMessage(description) => {
                write!(f, "Error building message: {description}")
            }
            RelayError::Unavailable(description) => {
                write!(f, "Unable to connect to SMTP server: {description}")
            }
            RelayError::Transport {
                code: Some(code),
                description,
            } => write!(f, "SMTP server replied {code}: {description}"),
            RelayError::Transport {
                code: None,
                description,
            } => write!(f, "Error sending message: {description}"),
        }
    }
}

impl std::error::Error for RelayError {}

/// The acknowledgement to the submitter could not be sent. Only ever logged.
#[derive(Debug)]
pub struct AcknowledgementSendError(pub RelayError);

impl std::fmt::Display for AcknowledgementSendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Acknowledgement not sent: {}", self.0)
    }
}

impl std::error::Error for AcknowledgementSendError {}

#[derive(Debug)]
pub enum AcknowledgementOutcome {
    Sent(MessageId),
    Failed(AcknowledgementSendError),
}

#[derive(Debug)]
pub struct DispatchReport {
    pub notification: MessageId,
    pub acknowledgement: AcknowledgementOutcome,
}

/// Sends the staff notification, then the acknowledgement. Only a failed notification is an
/// error; the acknowledgement is best-effort and is not attempted at all if the notification
/// failed.
pub async fn dispatch(
    relay: &impl Relay,
    notification: OutboundMessage,
    acknowledgement: OutboundMessage,
) -> Result<DispatchReport, RelayError> {
    let notification = relay.send(notification).await?;
    let acknowledgement = match relay.send(acknowledgement).await {
        Ok(message_id) => AcknowledgementOutcome::Sent(message_id),
        Err(error) => AcknowledgementOutcome::Failed(AcknowledgementSendError(error)),
    };
    Ok(DispatchReport {
        notification,
        acknowledgement,
    })
}
