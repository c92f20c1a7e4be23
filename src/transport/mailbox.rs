//! Per-account SMTP + IMAP transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use super::imap::{self, ImapSettings};
use super::smtp::{self, SmtpSettings};
use super::{FailureKind, FetchedMessage, MailTransport, OutgoingMail, SendResult, TransportFactory};
use crate::error::TransportError;
use crate::model::Account;

/// Default connect/operate timeout per call.
pub const DEFAULT_MAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Real mailbox transport. Each call opens a fresh connection on the
/// blocking pool, bounded by `timeout`.
pub struct MailboxTransport {
    smtp: SmtpSettings,
    imap: ImapSettings,
    timeout: Duration,
}

impl MailboxTransport {
    pub fn new(account: &Account, timeout: Duration) -> Self {
        Self {
            smtp: SmtpSettings::from_account(account, timeout),
            imap: ImapSettings::from_account(account, timeout),
            timeout,
        }
    }

    /// Outer bound: connection timeout plus the operation itself.
    fn call_budget(&self) -> Duration {
        self.timeout * 2
    }

    /// A send that outlived its budget is a soft bounce.
    fn send_timed_out(&self, start: Instant) -> SendResult {
        let err = TransportError::Timeout(self.call_budget());
        warn!(account = %self.smtp.username, "SMTP send failed: {err}");
        SendResult::failed(FailureKind::SoftBounce, err.to_string(), start.elapsed())
    }
}

#[async_trait]
impl MailTransport for MailboxTransport {
    async fn send(&self, mail: &OutgoingMail) -> SendResult {
        let start = Instant::now();
        let settings = self.smtp.clone();
        let mail = mail.clone();
        let task = tokio::task::spawn_blocking(move || smtp::send_blocking(&settings, &mail));

        match tokio::time::timeout(self.call_budget(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(account = %self.smtp.username, "SMTP task failed: {e}");
                SendResult::failed(FailureKind::Other, format!("SMTP task failed: {e}"), start.elapsed())
            }
            Err(_) => self.send_timed_out(start),
        }
    }

    async fn fetch_unseen(&self) -> Vec<FetchedMessage> {
        let settings = self.imap.clone();
        let task = tokio::task::spawn_blocking(move || imap::fetch_unseen_blocking(&settings));

        match tokio::time::timeout(self.call_budget(), task).await {
            Ok(Ok(Ok(messages))) => messages,
            Ok(Ok(Err(e))) => {
                warn!(account = %self.imap.username, "IMAP fetch failed: {e}");
                Vec::new()
            }
            Ok(Err(e)) => {
                warn!(account = %self.imap.username, "IMAP task failed: {e}");
                Vec::new()
            }
            Err(_) => {
                let err = TransportError::Timeout(self.call_budget());
                warn!(account = %self.imap.username, "IMAP fetch failed: {err}");
                Vec::new()
            }
        }
    }
}

/// Builds a [`MailboxTransport`] per account.
#[derive(Debug, Clone)]
pub struct MailboxTransportFactory {
    timeout: Duration,
}

impl MailboxTransportFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for MailboxTransportFactory {
    fn default() -> Self {
        Self::new(DEFAULT_MAIL_TIMEOUT)
    }
}

impl TransportFactory for MailboxTransportFactory {
    fn for_account(&self, account: &Account) -> Arc<dyn MailTransport> {
        Arc::new(MailboxTransport::new(account, self.timeout))
    }
}
