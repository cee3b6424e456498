use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

/// Outbound mail seam. Delivery is best effort; callers log failures and
/// carry on.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_welcome_email(&self, to_email: &str, name: Option<&str>)
        -> Result<(), anyhow::Error>;

    /// Deliver the single-use token that proves ownership of `to_email`.
    async fn send_verification_email(
        &self,
        to_email: &str,
        name: Option<&str>,
        token: &str,
    ) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct SmtpMailSender {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpMailSender {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", config.host, e))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "SMTP mail sender initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }

    async fn deliver(
        &self,
        to_email: &str,
        subject: &str,
        body: String,
    ) -> Result<(), anyhow::Error> {
        let email = Message::builder()
            .from(self.from_email.parse()?)
            .to(to_email.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        // SMTP transport is blocking.
        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| anyhow::anyhow!("Mail task failed: {}", e))?
            .map_err(|e| anyhow::anyhow!("Failed to send email: {}", e))?;
        Ok(())
    }
}

fn greeting(name: Option<&str>) -> String {
    name.map_or_else(|| "Hello,".to_string(), |n| format!("Hello {},", n))
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send_welcome_email(
        &self,
        to_email: &str,
        name: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        self.deliver(
            to_email,
            "Your account is ready",
            format!(
                "{}\n\nYour email address is verified. You can now sign in.",
                greeting(name)
            ),
        )
        .await?;

        tracing::info!(to = %to_email, "Welcome email sent");
        Ok(())
    }

    async fn send_verification_email(
        &self,
        to_email: &str,
        name: Option<&str>,
        token: &str,
    ) -> Result<(), anyhow::Error> {
        self.deliver(
            to_email,
            "Verify your email address",
            format!(
                "{}\n\nUse this code to verify your email address:\n\n{}\n\n\
                 The code expires in 24 hours.",
                greeting(name),
                token
            ),
        )
        .await?;

        tracing::info!(to = %to_email, "Verification email sent");
        Ok(())
    }
}

/// Used when no SMTP relay is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailSender;

#[async_trait]
impl MailSender for LogMailSender {
    async fn send_welcome_email(
        &self,
        to_email: &str,
        _name: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        tracing::info!(to = %to_email, "SMTP not configured; skipping welcome email");
        Ok(())
    }

    async fn send_verification_email(
        &self,
        to_email: &str,
        _name: Option<&str>,
        _token: &str,
    ) -> Result<(), anyhow::Error> {
        tracing::info!(to = %to_email, "SMTP not configured; skipping verification email");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMail {
    Welcome { to: String },
    Verification { to: String, token: String },
}

/// Records messages instead of sending.
#[derive(Default)]
pub struct MockMailSender {
    pub sent: Mutex<Vec<SentMail>>,
}

impl MockMailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn welcome_recipients(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SentMail::Welcome { to } => Some(to),
                SentMail::Verification { .. } => None,
            })
            .collect()
    }

    /// Most recent verification token mailed to `to_email`.
    pub fn verification_token(&self, to_email: &str) -> Option<String> {
        self.sent().into_iter().rev().find_map(|m| match m {
            SentMail::Verification { to, token } if to == to_email => Some(token),
            _ => None,
        })
    }

    fn record(&self, mail: SentMail) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {}", e))?
            .push(mail);
        Ok(())
    }
}

#[async_trait]
impl MailSender for MockMailSender {
    async fn send_welcome_email(
        &self,
        to_email: &str,
        _name: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        self.record(SentMail::Welcome {
            to: to_email.to_string(),
        })
    }

    async fn send_verification_email(
        &self,
        to_email: &str,
        _name: Option<&str>,
        token: &str,
    ) -> Result<(), anyhow::Error> {
        self.record(SentMail::Verification {
            to: to_email.to_string(),
            token: token.to_string(),
        })
    }
}
