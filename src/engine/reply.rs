//! Inbound reply cycle.
//!
//! Scans each active account's unseen mail and answers a random share of
//! it. Replies are threaded onto the original message and never count
//! against the outbound daily quota.

use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, error, info};

use super::{Collaborators, SharedRng, excerpt};
use crate::content::{ContentRequest, quote_excerpt};
use crate::error::Error;
use crate::events::EventKind;
use crate::model::Account;
use crate::transport::{FetchedMessage, MailTransport, OutgoingMail, ThreadHeaders};

/// Default share of eligible messages that get a reply.
pub const DEFAULT_REPLY_RATE: f64 = 0.40;

/// Chance that an admitted reply quotes the original.
const QUOTE_PROBABILITY: f64 = 0.5;

/// Snippet length handed to the content generator.
const CONTEXT_SNIPPET_CHARS: usize = 300;

/// Subjects that are never answered (matched case-insensitively).
const SUBJECT_DENYLIST: &[&str] = &[
    "unsubscribe",
    "no-reply",
    "noreply",
    "bounce",
    "auto-reply",
    "out of office",
    "vacation",
    "delivery failure",
];

/// Whether a subject looks like system or automated mail.
pub fn is_denylisted(subject: &str) -> bool {
    let subject = subject.to_lowercase();
    SUBJECT_DENYLIST.iter().any(|kw| subject.contains(kw))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyReport {
    pub accounts: usize,
    pub fetched: usize,
    pub filtered: usize,
    pub replied: usize,
    pub failed: usize,
}

pub struct ReplyCycle {
    deps: Collaborators,
    reply_rate: f64,
    rng: SharedRng,
}

impl ReplyCycle {
    pub fn new(deps: Collaborators) -> Self {
        Self {
            deps,
            reply_rate: DEFAULT_REPLY_RATE,
            rng: SharedRng::from_entropy(),
        }
    }

    /// Reply admission probability, clamped to `[0, 1]`.
    pub fn with_reply_rate(mut self, rate: f64) -> Self {
        self.reply_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = SharedRng::seeded(rng);
        self
    }

    pub fn reply_rate(&self) -> f64 {
        self.reply_rate
    }

    /// One pass. Fails only when the account list cannot be loaded.
    pub async fn run(&self) -> Result<ReplyReport, Error> {
        let accounts = self.deps.accounts.active().await?;
        let mut report = ReplyReport {
            accounts: accounts.len(),
            ..ReplyReport::default()
        };

        for account in &accounts {
            self.process_account(account, &mut report).await;
        }

        debug!(
            accounts = report.accounts,
            fetched = report.fetched,
            replied = report.replied,
            failed = report.failed,
            "Reply cycle complete"
        );
        Ok(report)
    }

    async fn process_account(&self, account: &Account, report: &mut ReplyReport) {
        let transport = self.deps.transports.for_account(account);
        let messages = transport.fetch_unseen().await;
        report.fetched += messages.len();

        for message in &messages {
            if !self.should_reply(message) {
                report.filtered += 1;
                continue;
            }
            if self.send_reply(account, transport.as_ref(), message).await {
                report.replied += 1;
            } else {
                report.failed += 1;
            }
        }
    }

    /// Denylisted subjects are rejected without a draw; everything else
    /// is admitted with probability `reply_rate`.
    fn should_reply(&self, message: &FetchedMessage) -> bool {
        if message.from_address.is_empty() || is_denylisted(&message.subject) {
            return false;
        }
        self.rng.with(|rng| rng.r#gen::<f64>() < self.reply_rate)
    }

    async fn send_reply(
        &self,
        account: &Account,
        transport: &dyn MailTransport,
        message: &FetchedMessage,
    ) -> bool {
        let id = account.id();
        let recipient_name = if message.from_name.trim().is_empty() {
            message.from_address.split('@').next().unwrap_or_default().to_string()
        } else {
            message.from_name.clone()
        };

        let request = ContentRequest::reply(
            account.sender_name(),
            recipient_name.as_str(),
            message.subject.as_str(),
            excerpt(&message.snippet, CONTEXT_SNIPPET_CHARS),
        );
        let (content, quote) = self.rng.with(|rng| {
            let content = self.deps.content.generate(&request, rng);
            // Independent of the admission draw.
            let quote = !message.snippet.trim().is_empty() && rng.gen_bool(QUOTE_PROBABILITY);
            (content, quote)
        });

        let mut body = content.body;
        if quote && let Some(quoted) = quote_excerpt(&message.snippet) {
            body.push_str("\n\n");
            body.push_str(&quoted);
        }

        let mut mail = OutgoingMail::new(&message.from_address, &content.subject, body)
            .with_to_name(recipient_name);
        if !message.message_id.is_empty() {
            mail = mail.in_thread(ThreadHeaders::reply_to(&message.message_id));
        }

        let result = transport.send(&mail).await;
        if result.success {
            info!(account = %id, to = %message.from_address, "Reply sent");
            self.deps
                .activity
                .reply(id, &message.from_address, &content.subject)
                .await;
            self.deps.events.emit(
                EventKind::Reply,
                id,
                format!(
                    "Replied to {} | {}",
                    message.from_address,
                    excerpt(&content.subject, 40)
                ),
            );
            true
        } else {
            error!(account = %id, to = %message.from_address, "Reply failed: {}", result.error);
            self.deps
                .activity
                .error(
                    id,
                    &message.from_address,
                    &format!("Reply failed to {}: {}", message.from_address, result.error),
                )
                .await;
            self.deps.events.emit(
                EventKind::Error,
                id,
                format!("Reply failed: {}", excerpt(&result.error, 60)),
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use rand::SeedableRng;
    use tokio::sync::mpsc;

    use crate::activity::ActivityLogger;
    use crate::content::TemplateGenerator;
    use crate::events::{EventSink, WarmupEvent};
    use crate::model::ActivityKind;
    use crate::store::{AccountStore, ActivityLog, MemoryStore};
    use crate::transport::{FailureKind, SendResult, TransportFactory};

    #[derive(Default)]
    struct Inbox {
        unseen: Mutex<Vec<FetchedMessage>>,
        sent: Mutex<Vec<OutgoingMail>>,
        fail_sends: bool,
    }

    #[async_trait]
    impl MailTransport for Inbox {
        async fn send(&self, mail: &OutgoingMail) -> SendResult {
            self.sent.lock().unwrap().push(mail.clone());
            if self.fail_sends {
                SendResult::failed(FailureKind::SoftBounce, "421 busy", Duration::ZERO)
            } else {
                SendResult::delivered("<r@x.com>", Duration::ZERO)
            }
        }

        async fn fetch_unseen(&self) -> Vec<FetchedMessage> {
            std::mem::take(&mut *self.unseen.lock().unwrap())
        }
    }

    struct Factory(Arc<Inbox>);

    impl TransportFactory for Factory {
        fn for_account(&self, _account: &Account) -> Arc<dyn MailTransport> {
            self.0.clone()
        }
    }

    fn message(subject: &str, snippet: &str) -> FetchedMessage {
        FetchedMessage {
            message_id: "<orig@y.com>".into(),
            subject: subject.into(),
            from_address: "bob@y.com".into(),
            from_name: "Bob Smith".into(),
            snippet: snippet.into(),
            date: None,
        }
    }

    async fn setup(
        inbox: Inbox,
        rate: f64,
        seed: u64,
    ) -> (Arc<MemoryStore>, Arc<Inbox>, mpsc::Receiver<WarmupEvent>, ReplyCycle) {
        let store = Arc::new(MemoryStore::new());
        AccountStore::add(&*store, Account::new("jane@x.com", "pw")).await.unwrap();
        let inbox = Arc::new(inbox);
        let (sink, rx) = EventSink::channel(64);
        let deps = Collaborators {
            accounts: store.clone(),
            recipients: store.clone(),
            activity: ActivityLogger::new(store.clone()),
            events: sink,
            transports: Arc::new(Factory(inbox.clone())),
            content: Arc::new(TemplateGenerator::new()),
        };
        let cycle = ReplyCycle::new(deps)
            .with_reply_rate(rate)
            .with_rng(StdRng::seed_from_u64(seed));
        (store, inbox, rx, cycle)
    }

    #[test]
    fn denylist_is_case_insensitive() {
        assert!(is_denylisted("RE: please unsubscribe"));
        assert!(is_denylisted("Out Of Office: back Monday"));
        assert!(is_denylisted("Delivery Failure notice"));
        assert!(!is_denylisted("Lunch next week?"));
    }

    #[tokio::test]
    async fn denylisted_subject_never_answered_even_at_full_rate() {
        for seed in 0..10 {
            let inbox = Inbox::default();
            inbox
                .unseen
                .lock()
                .unwrap()
                .push(message("RE: please unsubscribe", "stop"));
            let (_store, inbox, _rx, cycle) = setup(inbox, 1.0, seed).await;

            let report = cycle.run().await.unwrap();
            assert_eq!(report.filtered, 1);
            assert!(inbox.sent.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn full_rate_replies_threaded_without_touching_quota() {
        let inbox = Inbox::default();
        inbox
            .unseen
            .lock()
            .unwrap()
            .push(message("Project update", "line one\nline two"));
        let (store, inbox, mut rx, cycle) = setup(inbox, 1.0, 3).await;

        let report = cycle.run().await.unwrap();
        assert_eq!(report.replied, 1);

        let sent = inbox.sent.lock().unwrap().clone();
        assert_eq!(sent[0].to, "bob@y.com");
        assert_eq!(sent[0].subject, "Re: Project update");
        let thread = sent[0].thread.clone().unwrap();
        assert_eq!(thread.in_reply_to, "<orig@y.com>");

        let acct = store.find("jane@x.com").await.unwrap().unwrap();
        assert_eq!(acct.sent_today, 0);

        let rows = store.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, ActivityKind::Reply);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Reply);

        // Fetched messages are consumed.
        assert_eq!(cycle.run().await.unwrap().fetched, 0);
    }

    #[tokio::test]
    async fn zero_rate_never_replies() {
        let inbox = Inbox::default();
        for i in 0..20 {
            inbox
                .unseen
                .lock()
                .unwrap()
                .push(message(&format!("Hello {i}"), "hi"));
        }
        let (_store, inbox, _rx, cycle) = setup(inbox, 0.0, 5).await;
        let report = cycle.run().await.unwrap();
        assert_eq!(report.filtered, 20);
        assert!(inbox.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn quoting_happens_on_some_replies_only() {
        let inbox = Inbox::default();
        for i in 0..40 {
            inbox
                .unseen
                .lock()
                .unwrap()
                .push(message(&format!("Topic {i}"), "first\nsecond"));
        }
        let (_store, inbox, _rx, cycle) = setup(inbox, 1.0, 17).await;
        cycle.run().await.unwrap();

        let sent = inbox.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 40);
        let quoted = sent.iter().filter(|m| m.body.contains("> first")).count();
        assert!(quoted > 0 && quoted < 40, "quoted {quoted} of 40");
    }

    #[tokio::test]
    async fn failed_reply_logs_error() {
        let inbox = Inbox {
            fail_sends: true,
            ..Inbox::default()
        };
        inbox.unseen.lock().unwrap().push(message("Hello", ""));
        let (store, _inbox, mut rx, cycle) = setup(inbox, 1.0, 1).await;

        let report = cycle.run().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(store.recent(1).await.unwrap()[0].kind, ActivityKind::Error);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Error);
    }

    #[test]
    fn reply_rate_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        let (sink, _rx) = EventSink::channel(1);
        let deps = Collaborators {
            accounts: store.clone(),
            recipients: store.clone(),
            activity: ActivityLogger::new(store.clone()),
            events: sink,
            transports: Arc::new(Factory(Arc::new(Inbox::default()))),
            content: Arc::new(TemplateGenerator::new()),
        };
        assert_eq!(ReplyCycle::new(deps.clone()).with_reply_rate(1.7).reply_rate(), 1.0);
        assert_eq!(ReplyCycle::new(deps).with_reply_rate(-0.2).reply_rate(), 0.0);
    }
}
