use crate::config::Config;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        PoolConfig,
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

const MAX_POOL_CONNECTIONS: u32 = 5;

/// Pooled connection to the outbound SMTP relay, shared across requests.
pub struct MailRelay {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl MailRelay {
    pub fn connect(config: &Config) -> Result<Self, MailRelayError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::from_url(&config.smtp_url)
            .map_err(MailRelayError::Connection)?
            .authentication(vec![Mechanism::Plain])
            .pool_config(PoolConfig::new().max_size(MAX_POOL_CONNECTIONS));

        // Sending credentials over a non-TLS connection is risky, so we only set the
        // credentials when the connection URL is over TLS. If the environment is
        // misconfigured so that the credentials are not sent, the connection will be
        // rejected. This is better than a security breach.
        if config.smtp_url.starts_with("smtps://") {
            let Some((username, password)) = config.smtp_credentials.clone() else {
                return Err(MailRelayError::MissingCredentials);
            };
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from: config.mail_from.clone(),
            to: config.mail_to.clone(),
        })
    }

    /// Relays one submission. No retries; the SMTP error detail is preserved in
    /// the returned error for server-side logging.
    pub async fn send(
        &self,
        reply_to: Mailbox,
        subject: &str,
        html_body: String,
    ) -> Result<(), MailRelayError> {
        let email = Message::builder()
            .from(self.from.clone())
            .reply_to(reply_to)
            .to(self.to.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body)
            .map_err(MailRelayError::Build)?;
        let response = self
            .transport
            .send(email)
            .await
            .map_err(MailRelayError::Smtp)?;
        info!("Contact message relayed, relay answered {}", response.code());
        Ok(())
    }

    /// Connection check backing the health endpoint and the startup readiness
    /// log.
    pub async fn verify(&self) -> Result<(), MailRelayError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(MailRelayError::NoConnection),
            Err(error) => Err(MailRelayError::Smtp(error)),
        }
    }
}

#[derive(Debug)]
pub enum MailRelayError {
    Connection(lettre::transport::smtp::Error),
    MissingCredentials,
    Build(lettre::error::Error),
    Smtp(lettre::transport::smtp::Error),
    NoConnection,
}

impl std::fmt::Display for MailRelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailRelayError::Connection(error) => {
                write!(f, "Invalid SMTP relay configuration: {error}")
            }
            MailRelayError::MissingCredentials => {
                write!(f, "SMTP credentials required for a TLS relay URL")
            }
            MailRelayError::Build(error) => write!(f, "Error building message: {error}"),
            MailRelayError::Smtp(error) => write!(f, "SMTP relay error: {error}"),
            MailRelayError::NoConnection => write!(f, "SMTP relay connection test failed"),
        }
    }
}

impl std::error::Error for MailRelayError {}
