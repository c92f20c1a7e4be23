//! Activity logger — typed, best-effort writes to the durable activity log.
//!
//! Orchestration code never fails because an audit row could not be
//! written. Every call reports what happened as a [`Recorded`] value and
//! the caller is free to ignore it.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::warn;

use crate::model::{ActivityKind, ActivityRecord};
use crate::store::ActivityLog;

/// Account id used for rows that are not tied to one mailbox.
pub const SYSTEM_ACCOUNT: &str = "system";

static CREDENTIAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(password|passwd|pass|pwd)\s*[=:]\s*\S+")
        .expect("credential pattern is a valid regex")
});

/// Strip `password=...`-style fragments from free text.
pub fn redact(text: &str) -> String {
    CREDENTIAL_PATTERN.replace_all(text, "$1=***").into_owned()
}

/// Outcome of a best-effort log write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Written,
    Dropped,
}

impl Recorded {
    pub fn is_written(self) -> bool {
        self == Self::Written
    }
}

/// Typed facade over an [`ActivityLog`].
#[derive(Clone)]
pub struct ActivityLogger {
    log: Arc<dyn ActivityLog>,
}

impl ActivityLogger {
    pub fn new(log: Arc<dyn ActivityLog>) -> Self {
        Self { log }
    }

    /// The underlying log, for reads.
    pub fn log(&self) -> &Arc<dyn ActivityLog> {
        &self.log
    }

    /// Append a record; failures are logged and reported as `Dropped`.
    pub async fn record(&self, record: ActivityRecord) -> Recorded {
        let account = record.account.clone();
        let kind = record.kind;
        match self.log.append(record).await {
            Ok(()) => Recorded::Written,
            Err(e) => {
                warn!(account = %account, kind = kind.as_str(), "Failed to write activity row: {e}");
                Recorded::Dropped
            }
        }
    }

    pub async fn send(
        &self,
        account: &str,
        recipient: &str,
        subject: &str,
        message_id: &str,
    ) -> Recorded {
        self.record(
            ActivityRecord::now(account, ActivityKind::Send)
                .with_recipient(recipient)
                .with_subject(subject)
                .with_details(format!("Message-ID: {message_id}")),
        )
        .await
    }

    pub async fn reply(&self, account: &str, recipient: &str, subject: &str) -> Recorded {
        self.record(
            ActivityRecord::now(account, ActivityKind::Reply)
                .with_recipient(recipient)
                .with_subject(subject),
        )
        .await
    }

    pub async fn bounce(&self, account: &str, recipient: &str, details: &str) -> Recorded {
        self.record(
            ActivityRecord::now(account, ActivityKind::Bounce)
                .with_recipient(recipient)
                .with_details(redact(details)),
        )
        .await
    }

    /// ERROR row; `details` is scrubbed of credentials first.
    pub async fn error(&self, account: &str, recipient: &str, details: &str) -> Recorded {
        self.record(
            ActivityRecord::now(account, ActivityKind::Error)
                .with_recipient(recipient)
                .with_details(redact(details)),
        )
        .await
    }

    pub async fn pause(&self, account: &str, reason: &str) -> Recorded {
        self.record(ActivityRecord::now(account, ActivityKind::Pause).with_details(reason))
            .await
    }

    pub async fn resume(&self, account: &str) -> Recorded {
        self.record(
            ActivityRecord::now(account, ActivityKind::Resume).with_details("Resumed manually"),
        )
        .await
    }

    pub async fn stage_advance(&self, account: &str, from: u8, to: u8) -> Recorded {
        self.record(
            ActivityRecord::now(account, ActivityKind::Stage)
                .with_details(format!("Stage {from} -> {to}")),
        )
        .await
    }

    pub async fn reset(&self, accounts: usize) -> Recorded {
        self.record(
            ActivityRecord::now(SYSTEM_ACCOUNT, ActivityKind::Reset)
                .with_details(format!("Daily counters reset for {accounts} accounts")),
        )
        .await
    }

    pub async fn info(&self, account: &str, details: &str) -> Recorded {
        self.record(ActivityRecord::now(account, ActivityKind::Info).with_details(details))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;
    use crate::model::DailyTotals;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct BrokenLog;

    #[async_trait]
    impl ActivityLog for BrokenLog {
        async fn append(&self, _record: ActivityRecord) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk full".into()))
        }
        async fn recent(&self, _n: usize) -> Result<Vec<ActivityRecord>, DatabaseError> {
            Ok(Vec::new())
        }
        async fn count_in_window(
            &self,
            _account: &str,
            _kind: ActivityKind,
            _hours: u32,
        ) -> Result<u64, DatabaseError> {
            Ok(0)
        }
        async fn daily_totals(&self) -> Result<DailyTotals, DatabaseError> {
            Ok(DailyTotals::default())
        }
    }

    #[test]
    fn redacts_credential_fragments() {
        assert_eq!(
            redact("login failed password=hunter2 for user"),
            "login failed password=*** for user"
        );
        assert_eq!(redact("PWD: abc123"), "PWD=***");
        assert_eq!(redact("535 auth rejected"), "535 auth rejected");
    }

    #[tokio::test]
    async fn failing_log_reports_dropped() {
        let logger = ActivityLogger::new(Arc::new(BrokenLog));
        assert_eq!(logger.info("a@x.com", "hello").await, Recorded::Dropped);
    }

    #[tokio::test]
    async fn error_rows_are_redacted() {
        let store = Arc::new(MemoryStore::new());
        let logger = ActivityLogger::new(store.clone());
        assert!(logger.error("a@x.com", "", "bad pass=secret").await.is_written());

        let rows = store.recent(1).await.unwrap();
        assert_eq!(rows[0].kind, ActivityKind::Error);
        assert_eq!(rows[0].details, "bad pass=***");
    }

    #[tokio::test]
    async fn reset_row_is_attributed_to_system() {
        let store = Arc::new(MemoryStore::new());
        let logger = ActivityLogger::new(store.clone());
        logger.reset(3).await;
        let rows = store.recent(1).await.unwrap();
        assert_eq!(rows[0].account, SYSTEM_ACCOUNT);
        assert_eq!(rows[0].kind, ActivityKind::Reset);
    }
}
