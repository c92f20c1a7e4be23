//! Outbound warm-up cycle.
//!
//! One pass over every active account, at most one send each. Gates run in
//! a fixed order (working hours, quota, interval, recipient) and a failed
//! gate skips the account without logging anything.

use chrono::{DateTime, Local, Utc};
use rand::rngs::StdRng;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use super::{Collaborators, SharedRng, excerpt};
use crate::content::ContentRequest;
use crate::error::Error;
use crate::events::EventKind;
use crate::model::{Account, ActivityKind, Recipient};
use crate::ramp::{self, Gate, GateSnapshot};
use crate::transport::{FailureKind, OutgoingMail, SendResult};

/// Default bounce-rate pause threshold.
pub const DEFAULT_BOUNCE_THRESHOLD: f64 = 0.05;

/// Trailing window for the bounce-rate check.
const BOUNCE_WINDOW_HOURS: u32 = 24;

/// Per-pass counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub accounts: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

enum Outcome {
    Skipped,
    Sent,
    Failed,
}

pub struct WarmupCycle {
    deps: Collaborators,
    bounce_threshold: f64,
    rng: SharedRng,
}

impl WarmupCycle {
    pub fn new(deps: Collaborators) -> Self {
        Self {
            deps,
            bounce_threshold: DEFAULT_BOUNCE_THRESHOLD,
            rng: SharedRng::from_entropy(),
        }
    }

    pub fn with_bounce_threshold(mut self, threshold: f64) -> Self {
        self.bounce_threshold = threshold;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = SharedRng::seeded(rng);
        self
    }

    pub async fn run(&self) -> Result<CycleReport, Error> {
        self.run_at(Local::now()).await
    }

    /// One pass as of `now`. Fails only when the account list cannot be loaded.
    pub async fn run_at(&self, now: DateTime<Local>) -> Result<CycleReport, Error> {
        let accounts = self.deps.accounts.active().await?;
        let mut report = CycleReport {
            accounts: accounts.len(),
            ..CycleReport::default()
        };

        for account in &accounts {
            match self.process_account(account, now).await {
                Ok(Outcome::Skipped) => report.skipped += 1,
                Ok(Outcome::Sent) => report.sent += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Err(e) => {
                    error!(account = %account.email, "Warm-up failed for account: {e}");
                    self.deps.events.emit(
                        EventKind::Error,
                        account.id(),
                        format!("Unexpected error: {e}"),
                    );
                    report.errors += 1;
                }
            }
        }

        debug!(
            accounts = report.accounts,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "Warm-up cycle complete"
        );
        Ok(report)
    }

    async fn process_account(
        &self,
        account: &Account,
        now: DateTime<Local>,
    ) -> Result<Outcome, Error> {
        let now_utc = now.with_timezone(&Utc);
        let gate = self.rng.with(|rng| {
            ramp::evaluate_gates(GateSnapshot::from(account), now.time(), now_utc, rng)
        });
        if gate != Gate::Open {
            trace!(account = %account.email, ?gate, "Skipping account");
            return Ok(Outcome::Skipped);
        }

        let Some(recipient) = self.deps.recipients.least_used(&account.email).await? else {
            warn!(account = %account.email, "No recipients available");
            self.deps
                .events
                .emit(EventKind::Warning, account.id(), "No recipients configured");
            return Ok(Outcome::Skipped);
        };

        let request = ContentRequest::fresh(account.sender_name(), recipient.greeting_name());
        let content = self
            .rng
            .with(|rng| self.deps.content.generate(&request, rng));

        let mail = OutgoingMail::new(&recipient.email, &content.subject, &content.body)
            .with_to_name(&recipient.name);
        let transport = self.deps.transports.for_account(account);
        let result = transport.send(&mail).await;

        // Rotation counts every attempt, delivered or not.
        if let Err(e) = self.deps.recipients.record_use(&recipient.email).await {
            warn!(recipient = %recipient.email, "Failed to record recipient use: {e}");
        }

        if result.success {
            self.on_success(account, &recipient, &content.subject, &result, now_utc)
                .await;
            Ok(Outcome::Sent)
        } else {
            self.on_failure(account, &recipient, &result).await?;
            Ok(Outcome::Failed)
        }
    }

    async fn on_success(
        &self,
        account: &Account,
        recipient: &Recipient,
        subject: &str,
        result: &SendResult,
        now: DateTime<Utc>,
    ) {
        let id = account.id();
        let (tx, rx) = oneshot::channel();
        let written = self
            .deps
            .accounts
            .modify(
                id,
                Box::new(move |a| {
                    let _ = tx.send(a.record_send(now));
                }),
            )
            .await;

        match written {
            Ok(updated) => {
                if let Ok(Some((from, to))) = rx.await {
                    info!(account = %id, from, to, "Stage advanced");
                    self.deps.activity.stage_advance(id, from, to).await;
                    self.deps.events.emit(
                        EventKind::StageAdvance,
                        id,
                        format!(
                            "Promoted to Stage {to}! Daily limit now {}",
                            updated.daily_limit
                        ),
                    );
                }
            }
            Err(e) => error!(account = %id, "Failed to update account after send: {e}"),
        }

        self.deps
            .activity
            .send(id, &recipient.email, subject, &result.message_id)
            .await;
        self.deps.events.emit(
            EventKind::Send,
            id,
            format!("Sent to {} | {}", recipient.email, excerpt(subject, 40)),
        );
    }

    async fn on_failure(
        &self,
        account: &Account,
        recipient: &Recipient,
        result: &SendResult,
    ) -> Result<(), Error> {
        let id = account.id();
        let detail = if result.error.is_empty() {
            "Unknown SMTP error"
        } else {
            result.error.as_str()
        };

        match result.failure {
            FailureKind::AuthFailure => {
                warn!(account = %id, "Authentication failed, marking account as error");
                self.deps
                    .activity
                    .error(id, &recipient.email, &format!("Auth failure: {detail}"))
                    .await;
                self.deps.accounts.mark_error(id, "Authentication failed").await?;
                self.deps.events.emit(
                    EventKind::Error,
                    id,
                    "Authentication failed, check credentials",
                );
            }
            FailureKind::HardBounce => {
                self.deps.activity.bounce(id, &recipient.email, detail).await;
                if let Err(e) = self.deps.recipients.deactivate(&recipient.email).await {
                    warn!(recipient = %recipient.email, "Failed to deactivate recipient: {e}");
                }

                let log = self.deps.activity.log();
                let bounces = log
                    .count_in_window(id, ActivityKind::Bounce, BOUNCE_WINDOW_HOURS)
                    .await?;
                let sends = log
                    .count_in_window(id, ActivityKind::Send, BOUNCE_WINDOW_HOURS)
                    .await?;

                if ramp::bounce_rate_exceeded(sends, bounces, self.bounce_threshold) {
                    warn!(account = %id, sends, bounces, "Bounce rate exceeded, pausing account");
                    self.deps
                        .accounts
                        .pause(id, "Auto-paused: bounce rate exceeded threshold")
                        .await?;
                    self.deps.activity.pause(id, "Bounce rate too high").await;
                    self.deps.events.emit(
                        EventKind::Pause,
                        id,
                        format!(
                            "Auto-paused: bounce rate exceeded {:.0}%",
                            self.bounce_threshold * 100.0
                        ),
                    );
                } else {
                    self.deps.events.emit(
                        EventKind::Bounce,
                        id,
                        format!("Hard bounce from {}", recipient.email),
                    );
                }
            }
            FailureKind::SoftBounce => {
                self.deps
                    .activity
                    .error(id, &recipient.email, &format!("Soft bounce: {detail}"))
                    .await;
                self.deps.events.emit(
                    EventKind::Error,
                    id,
                    format!("Soft bounce: {}", excerpt(detail, 60)),
                );
            }
            FailureKind::Other | FailureKind::None => {
                self.deps.activity.error(id, &recipient.email, detail).await;
                self.deps
                    .events
                    .emit(EventKind::Error, id, excerpt(detail, 80));
            }
        }
        Ok(())
    }
}
