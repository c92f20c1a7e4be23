//! In-memory store — one `RwLock` per table.

use async_trait::async_trait;
use chrono::{Duration, Local, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::DatabaseError;
use crate::model::{Account, ActivityKind, ActivityRecord, DailyTotals, Recipient};
use crate::ramp;
use crate::store::traits::{AccountEdit, AccountStore, ActivityLog, RecipientPool};

/// Process-local implementation of all three store traits.
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<Vec<Account>>,
    recipients: RwLock<Vec<Recipient>>,
    log: RwLock<Vec<ActivityRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn all(&self) -> Result<Vec<Account>, DatabaseError> {
        Ok(self.accounts.read().await.clone())
    }

    async fn find(&self, id: &str) -> Result<Option<Account>, DatabaseError> {
        Ok(self
            .accounts
            .read()
            .await
            .iter()
            .find(|a| a.email == id)
            .cloned())
    }

    async fn add(&self, account: Account) -> Result<(), DatabaseError> {
        let mut accounts = self.accounts.write().await;
        if accounts.iter().any(|a| a.email == account.email) {
            return Err(DatabaseError::duplicate("account", &account.email));
        }
        debug!(account = %account.email, "Account added");
        accounts.push(account);
        Ok(())
    }

    async fn update(&self, account: Account) -> Result<(), DatabaseError> {
        let mut accounts = self.accounts.write().await;
        let slot = accounts
            .iter_mut()
            .find(|a| a.email == account.email)
            .ok_or_else(|| DatabaseError::not_found("account", &account.email))?;
        *slot = account;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let mut accounts = self.accounts.write().await;
        let before = accounts.len();
        accounts.retain(|a| a.email != id);
        Ok(accounts.len() != before)
    }

    async fn modify(&self, id: &str, edit: AccountEdit) -> Result<Account, DatabaseError> {
        let mut accounts = self.accounts.write().await;
        let slot = accounts
            .iter_mut()
            .find(|a| a.email == id)
            .ok_or_else(|| DatabaseError::not_found("account", id))?;
        edit(slot);
        // The id is the key; an edit must not move the record.
        slot.email = id.to_string();
        Ok(slot.clone())
    }

    async fn reset_daily_counts(&self) -> Result<usize, DatabaseError> {
        let mut accounts = self.accounts.write().await;
        for account in accounts.iter_mut() {
            account.sent_today = 0;
            account.daily_limit = ramp::daily_limit(account.stage);
        }
        Ok(accounts.len())
    }
}

#[async_trait]
impl RecipientPool for MemoryStore {
    async fn all(&self) -> Result<Vec<Recipient>, DatabaseError> {
        Ok(self.recipients.read().await.clone())
    }

    async fn record_use(&self, id: &str) -> Result<(), DatabaseError> {
        let mut recipients = self.recipients.write().await;
        let r = recipients
            .iter_mut()
            .find(|r| r.email == id)
            .ok_or_else(|| DatabaseError::not_found("recipient", id))?;
        r.use_count += 1;
        r.last_used_at = Some(Utc::now());
        Ok(())
    }

    async fn deactivate(&self, id: &str) -> Result<(), DatabaseError> {
        let mut recipients = self.recipients.write().await;
        let r = recipients
            .iter_mut()
            .find(|r| r.email == id)
            .ok_or_else(|| DatabaseError::not_found("recipient", id))?;
        r.active = false;
        Ok(())
    }

    async fn add(&self, recipient: Recipient) -> Result<bool, DatabaseError> {
        let mut recipients = self.recipients.write().await;
        if recipients.iter().any(|r| r.email == recipient.email) {
            return Ok(false);
        }
        recipients.push(recipient);
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let mut recipients = self.recipients.write().await;
        let before = recipients.len();
        recipients.retain(|r| r.email != id);
        Ok(recipients.len() != before)
    }
}

#[async_trait]
impl ActivityLog for MemoryStore {
    async fn append(&self, record: ActivityRecord) -> Result<(), DatabaseError> {
        self.log.write().await.push(record);
        Ok(())
    }

    async fn recent(&self, n: usize) -> Result<Vec<ActivityRecord>, DatabaseError> {
        let log = self.log.read().await;
        let start = log.len().saturating_sub(n);
        Ok(log[start..].to_vec())
    }

    async fn count_in_window(
        &self,
        account: &str,
        kind: ActivityKind,
        hours: u32,
    ) -> Result<u64, DatabaseError> {
        let cutoff = Utc::now() - Duration::hours(i64::from(hours));
        let count = self
            .log
            .read()
            .await
            .iter()
            .filter(|r| r.account == account && r.kind == kind && r.timestamp >= cutoff)
            .count();
        Ok(count as u64)
    }

    async fn daily_totals(&self) -> Result<DailyTotals, DatabaseError> {
        let today = Local::now().date_naive();
        let mut totals = DailyTotals::default();
        for record in self.log.read().await.iter() {
            if record.timestamp.with_timezone(&Local).date_naive() == today {
                totals.tally(record.kind);
            }
        }
        Ok(totals)
    }
}
