mod smtp;
mod templates;

pub use smtp::SmtpMailer;
pub use templates::{EmailTemplate, RenderedEmail};

use async_trait::async_trait;

/// Transactional emails the application sends.
#[derive(Debug, Clone, PartialEq)]
pub enum EmailMessage {
    Welcome {
        email: String,
        name: String,
        intro: String,
    },
    NewsDigest {
        email: String,
        date: String,
        news_content: String,
    },
}

impl EmailMessage {
    pub fn recipient(&self) -> &str {
        match self {
            EmailMessage::Welcome { email, .. } | EmailMessage::NewsDigest { email, .. } => email,
        }
    }
}

/// What happened to a dispatched email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No transport is configured, so the email was dropped.
    Skipped,
}

/// Trait for outbound mail transports.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &RenderedEmail) -> Result<(), NotificationError>;
    fn name(&self) -> &str;
}

/// Errors from the notification system.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("SMTP error: {0}")]
    Smtp(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Configuration for the notification service.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub app_name: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_tls: SmtpTls,
}

#[derive(Debug, Clone, Default)]
pub enum SmtpTls {
    #[default]
    StartTls,
    Tls,
    None,
}

impl NotificationConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let smtp_tls = match std::env::var("SMTP_TLS").unwrap_or_default().as_str() {
            "tls" => SmtpTls::Tls,
            "none" => SmtpTls::None,
            _ => SmtpTls::StartTls,
        };

        Self {
            app_name: std::env::var("APP_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "TickerWatch".to_string()),
            smtp_host: std::env::var("SMTP_HOST").ok().filter(|s| !s.is_empty()),
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(587),
            smtp_username: std::env::var("SMTP_USERNAME")
                .ok()
                .filter(|s| !s.is_empty()),
            smtp_password: std::env::var("SMTP_PASSWORD")
                .ok()
                .filter(|s| !s.is_empty()),
            smtp_from: std::env::var("SMTP_FROM_ADDRESS")
                .ok()
                .filter(|s| !s.is_empty()),
            smtp_tls,
        }
    }
}

/// Renders transactional emails and hands them to every configured transport.
pub struct NotificationService {
    channels: Vec<Box<dyn Mailer>>,
    app_name: String,
}

impl NotificationService {
    pub fn new(config: &NotificationConfig) -> Self {
        let mut channels: Vec<Box<dyn Mailer>> = Vec::new();

        if config.smtp_host.is_some() && config.smtp_from.is_some() {
            match SmtpMailer::new(config) {
                Ok(mailer) => {
                    tracing::info!("Email delivery enabled (SMTP)");
                    channels.push(Box::new(mailer));
                }
                Err(e) => {
                    tracing::warn!("Failed to initialize SMTP mailer: {}", e);
                }
            }
        }

        if channels.is_empty() {
            tracing::info!("No mail transport configured (set SMTP_HOST and SMTP_FROM_ADDRESS)");
        }

        Self {
            channels,
            app_name: config.app_name.clone(),
        }
    }

    /// Build a service around a single transport.
    pub fn with_mailer(app_name: impl Into<String>, mailer: Box<dyn Mailer>) -> Self {
        Self {
            channels: vec![mailer],
            app_name: app_name.into(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub async fn send_welcome_email(
        &self,
        email: &str,
        name: &str,
        intro: &str,
    ) -> Result<Delivery, NotificationError> {
        self.dispatch(&EmailMessage::Welcome {
            email: email.to_string(),
            name: name.to_string(),
            intro: intro.to_string(),
        })
        .await
    }

    pub async fn send_news_summary_email(
        &self,
        email: &str,
        date: &str,
        news_content: &str,
    ) -> Result<Delivery, NotificationError> {
        self.dispatch(&EmailMessage::NewsDigest {
            email: email.to_string(),
            date: date.to_string(),
            news_content: news_content.to_string(),
        })
        .await
    }

    /// Render and send through every transport. The first transport error is returned.
    pub async fn dispatch(&self, message: &EmailMessage) -> Result<Delivery, NotificationError> {
        if self.channels.is_empty() {
            tracing::warn!(
                "Dropping email to {}: no mail transport configured",
                message.recipient()
            );
            return Ok(Delivery::Skipped);
        }

        let rendered = EmailTemplate::render(message, &self.app_name);

        for channel in &self.channels {
            match channel.send(&rendered).await {
                Ok(()) => tracing::debug!("Sent '{}' via {}", rendered.subject, channel.name()),
                Err(e) => {
                    tracing::warn!(
                        "Failed to send email to {} via {}: {}",
                        rendered.to,
                        channel.name(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        Ok(Delivery::Sent)
    }
}
