//! Submits templated outreach email through a configured SMTP relay.

use crate::config::SmtpSettings;
use crate::error::Result;
use crate::ledger::MailSender;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::response::Response;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Process-lifetime SMTP client. The transport pools its connections, so one
/// `SmtpMailer` serves every dispatch batch; the sender identity is the SMTP
/// username.
#[derive(Clone)]
pub(crate) struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: String,
}

impl SmtpMailer {
    /// Builds a transport for the relay: implicit TLS when the port is 465,
    /// STARTTLS on everything else.
    pub(crate) fn new(settings: &SmtpSettings) -> Result<Self> {
        let credentials = Credentials::new(settings.user.clone(), settings.password.clone());
        let builder = if settings.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
        };
        let transport = builder
            .port(settings.port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            sender: settings.user.clone(),
        })
    }

    /// Submits one HTML message. Transport and auth errors propagate to the
    /// caller; there is no retry.
    pub(crate) async fn send_outreach(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<Response> {
        let message = Message::builder()
            .from(self.sender.parse::<Mailbox>()?)
            .to(to.parse::<Mailbox>()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())?;

        tracing::debug!(target: "mailer", "Submitting message to {}", to);
        let response = self.transport.send(message).await?;
        tracing::info!(target: "mailer",
            "Accepted for {}: {} {}",
            to,
            response.code(),
            response.message().collect::<Vec<&str>>().join(" ")
        );
        Ok(response)
    }
}

impl MailSender for SmtpMailer {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        self.send_outreach(to, subject, html).await.map(|_| ())
    }
}
