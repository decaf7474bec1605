//! Outbound mail.
//!
//! The mailer is built once at startup by [`connect`] and handed to
//! handlers through `AppState`. A server without SMTP settings, or whose
//! relay fails verification, runs with no mailer and skips sending.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Message build error: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

pub type SharedMailer = Arc<dyn Mailer>;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig, host: &str) -> Result<Self, MailError> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: config.from.parse()?,
        })
    }

    async fn verify(&self) -> Result<bool, MailError> {
        Ok(self.transport.test_connection().await?)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html)?;

        self.transport.send(message).await?;
        Ok(())
    }
}

/// Construct and verify the SMTP mailer. `None` means mail is disabled.
pub async fn connect(config: &MailConfig) -> Option<SharedMailer> {
    let Some(host) = config.smtp_host.as_deref() else {
        tracing::warn!("No SMTP host configured; outbound mail disabled");
        return None;
    };

    let mailer = match SmtpMailer::new(config, host) {
        Ok(mailer) => mailer,
        Err(e) => {
            tracing::warn!("Mail transport setup failed: {}; outbound mail disabled", e);
            return None;
        }
    };

    match mailer.verify().await {
        Ok(true) => {
            tracing::info!("SMTP relay {} verified", host);
            Some(Arc::new(mailer))
        }
        Ok(false) => {
            tracing::warn!("SMTP relay {} rejected the connection test; outbound mail disabled", host);
            None
        }
        Err(e) => {
            tracing::warn!("SMTP relay {} unreachable: {}; outbound mail disabled", host, e);
            None
        }
    }
}

/// Send if a mailer exists. Failures are logged, never returned.
pub async fn deliver(mailer: Option<&SharedMailer>, email: Email) {
    let Some(mailer) = mailer else {
        tracing::debug!("Mail disabled; dropping '{}' to {}", email.subject, email.to);
        return;
    };

    let to = email.to.clone();
    if let Err(e) = mailer.send(email).await {
        tracing::warn!("Failed to send mail to {}: {}", to, e);
    }
}

pub fn welcome_email(to: &str, username: &str, site_url: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Welcome to TechVerse Connect!".to_string(),
        html: format!(
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h1>Welcome to TechVerse Connect!</h1>
  <h2>Hello {username}!</h2>
  <p>We're thrilled to have you join our tech community.</p>
  <ul>
    <li>Create your first tech post</li>
    <li>Join technology communities</li>
    <li>Explore the latest tech news</li>
  </ul>
  <p><a href="{site_url}/dashboard">Get Started</a></p>
  <p>Happy coding!<br>The TechVerse Connect Team</p>
</div>"#
        ),
    }
}

pub fn password_reset_email(to: &str, username: &str, site_url: &str, token: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Reset your TechVerse Connect password".to_string(),
        html: format!(
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2>Hello {username},</h2>
  <p>Someone asked to reset the password for your account.</p>
  <p><a href="{site_url}/reset-password?token={token}">Choose a new password</a></p>
  <p>The link expires in one hour. If you did not ask for this, ignore this email.</p>
</div>"#
        ),
    }
}
