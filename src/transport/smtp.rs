//! SMTP delivery via lettre (blocking; run under `spawn_blocking`).

use std::time::{Duration, Instant};

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use uuid::Uuid;

use super::{FailureKind, OutgoingMail, SendResult, classify_smtp_code};
use crate::error::TransportError;
use crate::model::Account;

/// Port that speaks TLS from the first byte; everything else uses STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Connection settings for one sending mailbox.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub display_name: String,
    pub timeout: Duration,
}

impl SmtpSettings {
    pub fn from_account(account: &Account, timeout: Duration) -> Self {
        Self {
            host: account.smtp_host.clone(),
            port: account.smtp_port,
            username: account.email.clone(),
            password: account.password.clone(),
            display_name: account.sender_name(),
            timeout,
        }
    }

    fn check_credentials(&self) -> Result<(), TransportError> {
        if self.host.trim().is_empty() || self.password.expose_secret().is_empty() {
            return Err(TransportError::MissingCredentials(self.username.clone()));
        }
        Ok(())
    }
}

/// `<uuid@domain>` using the sender's domain.
pub fn new_message_id(from: &str) -> String {
    let domain = from.rsplit_once('@').map_or("localhost", |(_, d)| d);
    format!("<{}@{domain}>", Uuid::new_v4())
}

fn parse_address(address: &str) -> Result<Address, TransportError> {
    address
        .trim()
        .parse::<Address>()
        .map_err(|e| TransportError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn mailbox(name: &str, address: &str) -> Result<Mailbox, TransportError> {
    let name = (!name.trim().is_empty()).then(|| name.trim().to_string());
    Ok(Mailbox::new(name, parse_address(address)?))
}

/// Build the plain-text message with the given `Message-ID`.
pub fn build_message(
    settings: &SmtpSettings,
    mail: &OutgoingMail,
    message_id: &str,
) -> Result<Message, TransportError> {
    let mut builder = Message::builder()
        .from(mailbox(&settings.display_name, &settings.username)?)
        .to(mailbox(&mail.to_name, &mail.to)?)
        .subject(mail.subject.as_str())
        .message_id(Some(message_id.to_string()))
        .header(ContentType::TEXT_PLAIN);

    if let Some(thread) = &mail.thread {
        builder = builder
            .in_reply_to(thread.in_reply_to.clone())
            .references(thread.references.clone());
    }

    builder
        .body(mail.body.clone())
        .map_err(|e| TransportError::Build(e.to_string()))
}

fn build_transport(settings: &SmtpSettings) -> Result<SmtpTransport, lettre::transport::smtp::Error> {
    let builder = if settings.port == IMPLICIT_TLS_PORT {
        SmtpTransport::relay(&settings.host)?
    } else {
        SmtpTransport::starttls_relay(&settings.host)?
    };
    let creds = Credentials::new(
        settings.username.clone(),
        settings.password.expose_secret().to_string(),
    );
    Ok(builder
        .port(settings.port)
        .credentials(creds)
        .timeout(Some(settings.timeout))
        .build())
}

/// Map a lettre error to a failure class and, when the server answered,
/// its reply code. Errors without a server reply (refused connection, TLS,
/// timeouts) are transient.
fn classify_error(err: &lettre::transport::smtp::Error) -> (FailureKind, Option<u16>) {
    let code = err
        .status()
        .and_then(|c| c.to_string().parse::<u16>().ok());
    match code {
        Some(code) => (classify_smtp_code(code), Some(code)),
        None => (FailureKind::SoftBounce, None),
    }
}

/// Send one message. Never fails: every problem becomes a failed result.
pub fn send_blocking(settings: &SmtpSettings, mail: &OutgoingMail) -> SendResult {
    let start = Instant::now();

    if let Err(e) = settings.check_credentials() {
        return SendResult::failed(FailureKind::Other, e.to_string(), start.elapsed());
    }

    let message_id = new_message_id(&settings.username);
    let message = match build_message(settings, mail, &message_id) {
        Ok(m) => m,
        Err(e) => return SendResult::failed(FailureKind::Other, e.to_string(), start.elapsed()),
    };

    let transport = match build_transport(settings) {
        Ok(t) => t,
        Err(e) => {
            let (kind, _) = classify_error(&e);
            return SendResult::failed(kind, format!("SMTP relay error: {e}"), start.elapsed());
        }
    };

    match transport.send(&message) {
        Ok(_) => {
            info!(from = %settings.username, to = %mail.to, "Email sent");
            SendResult::delivered(message_id, start.elapsed())
        }
        Err(e) => {
            let (kind, code) = classify_error(&e);
            let message = match kind {
                FailureKind::AuthFailure => format!("Authentication failed: {e}"),
                _ => format!("SMTP send failed: {e}"),
            };
            debug!(from = %settings.username, to = %mail.to, ?kind, "SMTP send failed");
            let result = SendResult::failed(kind, message, start.elapsed());
            match code {
                Some(code) => result.with_code(code),
                None => result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ThreadHeaders;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            username: "jane.doe@example.com".into(),
            password: SecretString::from("pw".to_string()),
            display_name: "Jane Doe".into(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn message_id_uses_sender_domain() {
        let id = new_message_id("jane@example.com");
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
    }

    #[test]
    fn threaded_message_carries_reply_headers() {
        let mail = OutgoingMail::new("bob@example.org", "Re: Hello", "Thanks!")
            .with_to_name("Bob")
            .in_thread(ThreadHeaders::reply_to("<orig@example.org>"));
        let msg = build_message(&settings(), &mail, "<new@example.com>").unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("In-Reply-To: <orig@example.org>"));
        assert!(raw.contains("References: <orig@example.org>"));
        assert!(raw.contains("Message-ID: <new@example.com>"));
        assert!(raw.contains("Jane Doe"));
    }

    #[test]
    fn invalid_recipient_is_rejected_before_connecting() {
        let mail = OutgoingMail::new("not-an-address", "Hi", "Body");
        let result = send_blocking(&settings(), &mail);
        assert!(!result.success);
        assert_eq!(result.failure, FailureKind::Other);
    }

    #[test]
    fn missing_password_fails_without_network() {
        let mut s = settings();
        s.password = SecretString::from(String::new());
        let result = send_blocking(&s, &OutgoingMail::new("bob@example.org", "Hi", "Body"));
        assert!(!result.success);
        assert!(result.error.contains("Missing credentials"));
    }
}
