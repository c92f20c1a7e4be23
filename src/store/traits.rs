//! Store traits — async interfaces for accounts, recipients and the activity log.
//!
//! Each implementation owns its own synchronization, scoped to one logical
//! table, so concurrently running cycles can share a store safely. Every
//! mutation is an atomic read-modify-write on a single record (or, for the
//! daily reset, on the accounts table).

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::model::{Account, ActivityKind, ActivityRecord, DailyTotals, Recipient};

/// In-place edit applied by [`AccountStore::modify`] under the table lock.
pub type AccountEdit = Box<dyn FnOnce(&mut Account) + Send>;

/// Persistent set of sending accounts, keyed by address.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// All accounts, in insertion order.
    async fn all(&self) -> Result<Vec<Account>, DatabaseError>;

    /// Accounts whose status is `active`, in insertion order.
    async fn active(&self) -> Result<Vec<Account>, DatabaseError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(Account::is_active)
            .collect())
    }

    async fn find(&self, id: &str) -> Result<Option<Account>, DatabaseError>;

    /// Insert a new account. Fails with `Duplicate` if the id exists.
    async fn add(&self, account: Account) -> Result<(), DatabaseError>;

    /// Replace an existing account. Fails with `NotFound` if absent.
    async fn update(&self, account: Account) -> Result<(), DatabaseError>;

    /// Remove an account. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Apply `edit` to the current record and persist it in one step.
    /// Returns the record as written.
    async fn modify(&self, id: &str, edit: AccountEdit) -> Result<Account, DatabaseError>;

    /// Set status to paused with `reason`.
    async fn pause(&self, id: &str, reason: &str) -> Result<Account, DatabaseError> {
        let reason = reason.to_string();
        self.modify(
            id,
            Box::new(move |a| {
                a.status = crate::model::AccountStatus::Paused;
                a.pause_reason = reason;
            }),
        )
        .await
    }

    /// Set status back to active and clear the reason.
    async fn resume(&self, id: &str) -> Result<Account, DatabaseError> {
        self.modify(
            id,
            Box::new(|a| {
                a.status = crate::model::AccountStatus::Active;
                a.pause_reason.clear();
            }),
        )
        .await
    }

    /// Set status to error with `reason`.
    async fn mark_error(&self, id: &str, reason: &str) -> Result<Account, DatabaseError> {
        let reason = reason.to_string();
        self.modify(
            id,
            Box::new(move |a| {
                a.status = crate::model::AccountStatus::Error;
                a.pause_reason = reason;
            }),
        )
        .await
    }

    /// Set the stage and recompute the daily limit from it.
    async fn update_stage(&self, id: &str, stage: u8) -> Result<Account, DatabaseError> {
        self.modify(
            id,
            Box::new(move |a| {
                a.stage = stage;
                a.daily_limit = crate::ramp::daily_limit(stage);
            }),
        )
        .await
    }

    /// Zero every account's daily counter and recompute its limit from its
    /// current stage. Returns the number of accounts touched.
    async fn reset_daily_counts(&self) -> Result<usize, DatabaseError>;
}

/// Pool of warm-up recipients with usage-based rotation.
#[async_trait]
pub trait RecipientPool: Send + Sync {
    async fn all(&self) -> Result<Vec<Recipient>, DatabaseError>;

    async fn active(&self) -> Result<Vec<Recipient>, DatabaseError> {
        Ok(self.all().await?.into_iter().filter(|r| r.active).collect())
    }

    /// Least-used active recipient other than `exclude`; see
    /// [`crate::model::least_used`] for ordering and fallback.
    async fn least_used(&self, exclude: &str) -> Result<Option<Recipient>, DatabaseError> {
        let active = self.active().await?;
        Ok(crate::model::least_used(&active, exclude).cloned())
    }

    /// Increment the usage counter and stamp the last-used time.
    async fn record_use(&self, id: &str) -> Result<(), DatabaseError>;

    /// Soft-delete: mark inactive. Never reversed by the engine.
    async fn deactivate(&self, id: &str) -> Result<(), DatabaseError>;

    /// Insert a recipient. Returns `false` if the address already exists.
    async fn add(&self, recipient: Recipient) -> Result<bool, DatabaseError>;

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError>;
}

/// Append-only activity log.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append(&self, record: ActivityRecord) -> Result<(), DatabaseError>;

    /// The newest `n` rows, oldest first.
    async fn recent(&self, n: usize) -> Result<Vec<ActivityRecord>, DatabaseError>;

    /// Rows of `kind` for `account` in the trailing `hours`.
    async fn count_in_window(
        &self,
        account: &str,
        kind: ActivityKind,
        hours: u32,
    ) -> Result<u64, DatabaseError>;

    /// Totals for the current local day.
    async fn daily_totals(&self) -> Result<DailyTotals, DatabaseError>;
}
