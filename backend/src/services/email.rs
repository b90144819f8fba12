use crate::config::SmtpConfig;
use async_trait::async_trait;
use docuflow_shared::ResolvedRecipient;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid mailbox '{0}'")]
    Address(String),
    #[error("could not build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

impl NotifyError {
    /// Addressing and message errors will fail the same way next time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_permanent(),
            Self::Address(_) | Self::Message(_) => false,
        }
    }
}

/// A rendered notification for a list of resolved recipients.
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipients: Vec<ResolvedRecipient>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl EmailNotifier {
    pub fn new(smtp_config: &SmtpConfig) -> Self {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
            .port(smtp_config.port)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(smtp_config.timeout_secs)));

        if !smtp_config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                smtp_config.username.clone(),
                smtp_config.password.clone(),
            ));
        }

        EmailNotifier {
            transport: builder.build(),
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        }
    }

    fn mailbox(recipient: &ResolvedRecipient) -> Result<Mailbox, NotifyError> {
        let raw = match recipient.display_name() {
            Some(name) => format!("{} <{}>", name, recipient.email),
            None => recipient.email.clone(),
        };
        raw.parse::<Mailbox>()
            .map_err(|_| NotifyError::Address(recipient.email.clone()))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|_| NotifyError::Address(self.from_email.clone()))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(notification.subject.as_str())
            .header(ContentType::TEXT_PLAIN);

        for recipient in &notification.recipients {
            builder = builder.to(Self::mailbox(recipient)?);
        }

        let message = builder.body(notification.body.clone())?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Notification sent to {} recipients", notification.recipients.len());
                Ok(())
            }
            Err(e) => {
                error!("Failed to send notification: {}", e);
                Err(NotifyError::Transport(e))
            }
        }
    }
}
