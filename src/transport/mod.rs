//! Mail transport — the boundary between the cycles and SMTP/IMAP.
//!
//! A [`MailTransport`] never returns an error: delivery problems come back
//! as a failed [`SendResult`] and fetch problems as an empty list.

pub mod imap;
pub mod mailbox;
pub mod smtp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::Account;

pub use mailbox::{MailboxTransport, MailboxTransportFactory};

/// Classification of a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    None,
    SoftBounce,
    HardBounce,
    AuthFailure,
    Other,
}

/// Classify an SMTP reply code.
pub fn classify_smtp_code(code: u16) -> FailureKind {
    match code {
        530 | 534 | 535 => FailureKind::AuthFailure,
        550..=555 => FailureKind::HardBounce,
        421 | 450 | 451 | 452 => FailureKind::SoftBounce,
        _ => FailureKind::Other,
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SendResult {
    pub success: bool,
    /// Assigned `Message-ID`, angle brackets included.
    pub message_id: String,
    pub failure: FailureKind,
    pub code: Option<u16>,
    pub error: String,
    pub duration: Duration,
}

impl SendResult {
    pub fn delivered(message_id: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: true,
            message_id: message_id.into(),
            failure: FailureKind::None,
            code: None,
            error: String::new(),
            duration,
        }
    }

    pub fn failed(failure: FailureKind, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            message_id: String::new(),
            failure,
            code: None,
            error: error.into(),
            duration,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }
}

/// `In-Reply-To` / `References` for a threaded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHeaders {
    pub in_reply_to: String,
    pub references: String,
}

impl ThreadHeaders {
    /// Headers replying directly to `message_id`.
    pub fn reply_to(message_id: impl Into<String>) -> Self {
        let id = message_id.into();
        Self {
            references: id.clone(),
            in_reply_to: id,
        }
    }
}

/// A plain-text message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub to_name: String,
    pub subject: String,
    pub body: String,
    pub thread: Option<ThreadHeaders>,
}

impl OutgoingMail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            to_name: String::new(),
            subject: subject.into(),
            body: body.into(),
            thread: None,
        }
    }

    pub fn with_to_name(mut self, name: impl Into<String>) -> Self {
        self.to_name = name.into();
        self
    }

    pub fn in_thread(mut self, thread: ThreadHeaders) -> Self {
        self.thread = Some(thread);
        self
    }
}

/// An unseen inbound message, as returned by [`MailTransport::fetch_unseen`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub message_id: String,
    pub subject: String,
    /// Lower-cased sender address.
    pub from_address: String,
    pub from_name: String,
    /// Plain-text body, capped at [`SNIPPET_LIMIT`] characters.
    pub snippet: String,
    pub date: Option<DateTime<Utc>>,
}

/// Maximum body snippet length kept per fetched message.
pub const SNIPPET_LIMIT: usize = 2000;

/// Send and receive for one mailbox.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> SendResult;

    /// Unseen inbox messages. Returned messages are marked seen; any
    /// failure yields an empty list.
    async fn fetch_unseen(&self) -> Vec<FetchedMessage>;
}

/// Builds the transport for an account.
pub trait TransportFactory: Send + Sync {
    fn for_account(&self, account: &Account) -> Arc<dyn MailTransport>;
}
