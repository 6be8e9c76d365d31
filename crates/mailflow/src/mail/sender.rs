//! Outbound mail collaborator.
//!
//! The dispatcher only needs "deliver this one message or fail"; `SmtpSender`
//! does it over SMTP with lettre, `LogSender` just records the call.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use crate::error::{MailError, MailResult};

/// One fully rendered message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub reply_to: Option<String>,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> MailResult<()>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// false for local catchers like Mailpit.
    pub use_tls: bool,
}

pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpSender {
    pub fn new(cfg: &SmtpConfig) -> MailResult<Self> {
        let mut builder = if cfg.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
                .map_err(|e| MailError::Config(format!("smtp relay {}: {e}", cfg.host)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
        }
        .port(cfg.port);

        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            host: cfg.host.clone(),
        })
    }

    fn build_message(mail: &OutgoingMail) -> MailResult<Message> {
        let from: Mailbox = mail.from.parse()?;
        let to: Mailbox = mail.to.parse()?;

        let mut builder = Message::builder().from(from).to(to).subject(&mail.subject);
        if let Some(reply_to) = &mail.reply_to {
            builder = builder.reply_to(reply_to.parse()?);
        }

        Ok(builder
            .header(ContentType::TEXT_HTML)
            .body(mail.html.clone())?)
    }
}

#[async_trait]
impl MailSender for SmtpSender {
    async fn send(&self, mail: &OutgoingMail) -> MailResult<()> {
        debug!(to = %mail.to, host = %self.host, "sending via smtp");

        let message = Self::build_message(mail)?;
        let response = self.transport.send(message).await?;

        debug!(
            to = %mail.to,
            code = %response.code(),
            "smtp accepted message"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

/// Accepts everything. For local runs without a mail server.
#[derive(Debug, Clone, Default)]
pub struct LogSender;

#[async_trait]
impl MailSender for LogSender {
    async fn send(&self, mail: &OutgoingMail) -> MailResult<()> {
        info!(
            from = %mail.from,
            to = %mail.to,
            subject = %mail.subject,
            html_bytes = mail.html.len(),
            "mail (log sender)"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// `"Name <addr>"`, or the bare address when there is no display name.
pub fn format_mailbox(display_name: &str, address: &str) -> String {
    let name = display_name.trim().replace(['"', '<', '>'], "");
    if name.is_empty() {
        address.to_string()
    } else {
        format!("\"{name}\" <{address}>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail() -> OutgoingMail {
        OutgoingMail {
            from: format_mailbox("Acme Events", "noreply@acme.test"),
            to: "a@x.com".into(),
            subject: "Hi".into(),
            html: "<p>hi</p>".into(),
            reply_to: Some("help@acme.test".into()),
        }
    }

    #[test]
    fn mailbox_formatting() {
        assert_eq!(format_mailbox("", "a@b.c"), "a@b.c");
        assert_eq!(format_mailbox("A <B>", "a@b.c"), "\"A B\" <a@b.c>");
    }

    #[test]
    fn builds_html_message() {
        let msg = SmtpSender::build_message(&mail()).unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("Reply-To: help@acme.test"));
        assert!(raw.contains("Content-Type: text/html"));
    }

    #[test]
    fn bad_recipient_is_a_send_error() {
        let mut m = mail();
        m.to = "nope".into();
        assert!(matches!(SmtpSender::build_message(&m), Err(MailError::Send(_))));
    }

    #[tokio::test]
    async fn log_sender_accepts() {
        LogSender.send(&mail()).await.unwrap();
    }
}
