use log::debug;
use mailin_embedded::{Handler, Server, SslConfig};
use std::{net::IpAddr, sync::OnceLock, time::Duration};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    time::timeout,
};

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

/// Any recipient address containing this marker is refused at `RCPT TO`.
pub const REJECTED_RECIPIENT_MARKER: &str = "rejected";

/// A message as accepted by the fake server.
#[derive(Debug, Clone)]
pub struct DeliveredMail {
    pub recipients: Vec<String>,
    pub content: String,
}

#[derive(Clone)]
struct SmtpHandler {
    recipients: Vec<String>,
    content: Vec<u8>,
    delivered: UnboundedSender<DeliveredMail>,
}

impl Handler for SmtpHandler {
    fn rcpt(&mut self, to: &str) -> mailin_embedded::Response {
        if to.contains(REJECTED_RECIPIENT_MARKER) {
            debug!("Rejecting recipient {to}");
            mailin_embedded::response::INTERNAL_ERROR
        } else {
            mailin_embedded::response::OK
        }
    }

    fn data_start(
        &mut self,
        _domain: &str,
        _from: &str,
        _is8bit: bool,
        to: &[String],
    ) -> mailin_embedded::Response {
        self.recipients = to.to_vec();
        self.content.clear();
        mailin_embedded::response::OK
    }

    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        debug!("Got data:\n{}", String::from_utf8_lossy(buf));
        self.content.extend(buf);
        Ok(())
    }

    fn data_end(&mut self) -> mailin_embedded::Response {
        let mail = DeliveredMail {
            recipients: std::mem::take(&mut self.recipients),
            content: String::from_utf8_lossy(&std::mem::take(&mut self.content)).into_owned(),
        };
        let _ = self.delivered.send(mail);
        mailin_embedded::response::OK
    }

    fn auth_plain(
        &mut self,
        authorization_id: &str,
        authentication_id: &str,
        _password: &str,
    ) -> mailin_embedded::Response {
        debug!("Got authentication data {authorization_id}, {authentication_id}");
        mailin_embedded::response::AUTH_OK
    }
}

/// Plaintext SMTP server on [`SMTP_PORT`] which records every message it accepts.
pub struct FakeSmtpServer(
    std::sync::Mutex<Option<Server<SmtpHandler>>>,
    tokio::sync::Mutex<UnboundedReceiver<DeliveredMail>>,
);

impl FakeSmtpServer {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded_channel();
        let handler = SmtpHandler {
            recipients: Vec::new(),
            content: Vec::new(),
            delivered: sender,
        };
        let mut server = Server::new(handler);
        server
            .with_name("modernservices.org.uk")
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_addr(format!("127.0.0.1:{SMTP_PORT}"))
            .unwrap();
        Self(
            std::sync::Mutex::new(Some(server)),
            tokio::sync::Mutex::new(receiver),
        )
    }

    /// Starts serving on a background thread. Calling it again is a no-op.
    pub fn start(&self) {
        let mut guard = self.0.lock().unwrap();
        if let Some(server) = guard.take() {
            std::thread::spawn(move || {
                let _ = server.serve();
            });
        }
    }

    /// Waits for the next accepted message. Returns `None` if the server has gone away.
    pub async fn next_mail(&self) -> Option<DeliveredMail> {
        self.1.lock().await.recv().await
    }

    /// Discards everything received so far, giving stragglers from a previous test a moment to
    /// arrive first.
    pub async fn flush(&self) {
        let mut receiver = self.1.lock().await;
        while let Ok(Some(_)) = timeout(Duration::from_millis(100), receiver.recv()).await {}
    }
}

impl Default for FakeSmtpServer {
    fn default() -> Self {
        Self::new()
    }
}

/// The one [`FakeSmtpServer`] of this process. Every test binding [`SMTP_PORT`] must go through
/// here, and should be `#[serial]`.
pub fn fake_smtp() -> &'static FakeSmtpServer {
    static FAKE_SMTP: OnceLock<FakeSmtpServer> = OnceLock::new();
    FAKE_SMTP.get_or_init(FakeSmtpServer::new)
}

#[derive(Clone)]
struct PoisonedSmtpHandler;

impl Handler for PoisonedSmtpHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }
}

/// Starts a server on [`POISONED_SMTP_PORT`] which fails every session.
pub fn start_poisoned_smtp_server() {
    static STARTED: std::sync::Once = std::sync::Once::new();
    STARTED.call_once(|| {
        let mut server = Server::new(PoisonedSmtpHandler);
        server
            .with_name("modernservices.org.uk")
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_addr(format!("127.0.0.1:{POISONED_SMTP_PORT}"))
            .unwrap();
        std::thread::spawn(move || {
            let _ = server.serve();
        });
    });
}
