//! libSQL backend — durable implementation of the store traits.
//!
//! One shared connection; read-modify-write operations are serialized by a
//! per-table async mutex so the outbound and reply cycles can share the
//! backend without clobbering each other's writes.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveTime, SecondsFormat, TimeZone, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::model::{
    Account, AccountStatus, ActivityKind, ActivityRecord, DailyTotals, Recipient, WorkingHours,
};
use crate::ramp;
use crate::store::migrations;
use crate::store::traits::{AccountEdit, AccountStore, ActivityLog, RecipientPool};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    accounts_lock: Mutex<()>,
    recipients_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            accounts_lock: Mutex::new(()),
            recipients_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn load_account(&self, id: &str) -> Result<Option<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find account: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_account(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find account: {e}"))),
        }
    }

    async fn write_account(&self, account: &Account) -> Result<u64, DatabaseError> {
        self.conn()
            .execute(
                "UPDATE accounts SET display_name = ?2, password = ?3, smtp_host = ?4,
                    smtp_port = ?5, imap_host = ?6, imap_port = ?7, stage = ?8,
                    daily_limit = ?9, sent_today = ?10, last_sent_at = ?11, status = ?12,
                    pause_reason = ?13, work_start = ?14, work_end = ?15
                 WHERE email = ?1",
                params![
                    account.email.as_str(),
                    account.display_name.as_str(),
                    account.password.expose_secret(),
                    account.smtp_host.as_str(),
                    i64::from(account.smtp_port),
                    account.imap_host.as_str(),
                    i64::from(account.imap_port),
                    i64::from(account.stage),
                    i64::from(account.daily_limit),
                    i64::from(account.sent_today),
                    opt_ts(account.last_sent_at),
                    account.status.as_str(),
                    account.pause_reason.as_str(),
                    account.working_hours.start_str(),
                    account.working_hours.end_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update account: {e}")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

const ACCOUNT_COLUMNS: &str = "email, display_name, password, smtp_host, smtp_port, imap_host, \
    imap_port, stage, daily_limit, sent_today, last_sent_at, status, pause_reason, work_start, \
    work_end, created_at";

const RECIPIENT_COLUMNS: &str = "email, name, domain, active, use_count, last_used_at";

const ACTIVITY_COLUMNS: &str = "timestamp, account, kind, recipient, subject, details";

/// Canonical timestamp format: fixed-width UTC so text comparison orders correctly.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_ts(ts: Option<DateTime<Utc>>) -> libsql::Value {
    match ts {
        Some(ts) => libsql::Value::Text(fmt_ts(ts)),
        None => libsql::Value::Null,
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.filter(|s| !s.is_empty()).map(|s| parse_datetime(&s))
}

fn row_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Serialization(format!("row parse: {e}"))
}

/// Column order matches ACCOUNT_COLUMNS.
fn row_to_account(row: &libsql::Row) -> Result<Account, DatabaseError> {
    let email: String = row.get(0).map_err(row_err)?;
    let status_str: String = row.get(11).map_err(row_err)?;
    let work_start: String = row.get(13).map_err(row_err)?;
    let work_end: String = row.get(14).map_err(row_err)?;
    let created_str: String = row.get(15).map_err(row_err)?;

    let status = status_str.parse().unwrap_or_else(|e| {
        warn!(account = %email, "{e}; treating as paused");
        AccountStatus::Paused
    });
    let working_hours = WorkingHours::parse(&work_start, &work_end).unwrap_or_else(|e| {
        warn!(account = %email, "{e}; using default window");
        WorkingHours::default()
    });

    Ok(Account {
        display_name: row.get(1).map_err(row_err)?,
        password: SecretString::from(row.get::<String>(2).map_err(row_err)?),
        smtp_host: row.get(3).map_err(row_err)?,
        smtp_port: row.get::<i64>(4).map_err(row_err)? as u16,
        imap_host: row.get(5).map_err(row_err)?,
        imap_port: row.get::<i64>(6).map_err(row_err)? as u16,
        stage: row.get::<i64>(7).map_err(row_err)?.clamp(1, i64::from(ramp::MAX_STAGE)) as u8,
        daily_limit: row.get::<i64>(8).map_err(row_err)?.max(0) as u32,
        sent_today: row.get::<i64>(9).map_err(row_err)?.max(0) as u32,
        last_sent_at: parse_optional_datetime(row.get(10).ok()),
        status,
        pause_reason: row.get(12).map_err(row_err)?,
        working_hours,
        created_at: parse_datetime(&created_str),
        email,
    })
}

/// Column order matches RECIPIENT_COLUMNS.
fn row_to_recipient(row: &libsql::Row) -> Result<Recipient, DatabaseError> {
    Ok(Recipient {
        email: row.get(0).map_err(row_err)?,
        name: row.get(1).map_err(row_err)?,
        domain: row.get(2).map_err(row_err)?,
        active: row.get::<i64>(3).map_err(row_err)? != 0,
        use_count: row.get::<i64>(4).map_err(row_err)?.max(0) as u64,
        last_used_at: parse_optional_datetime(row.get(5).ok()),
    })
}

/// Column order matches ACTIVITY_COLUMNS.
fn row_to_activity(row: &libsql::Row) -> Result<ActivityRecord, DatabaseError> {
    let ts: String = row.get(0).map_err(row_err)?;
    let kind: String = row.get(2).map_err(row_err)?;
    Ok(ActivityRecord {
        timestamp: parse_datetime(&ts),
        account: row.get(1).map_err(row_err)?,
        kind: kind.parse().map_err(DatabaseError::Serialization)?,
        recipient: row.get(3).map_err(row_err)?,
        subject: row.get(4).map_err(row_err)?,
        details: row.get(5).map_err(row_err)?,
    })
}

/// UTC bounds of the current local day.
fn local_day_bounds() -> (DateTime<Utc>, DateTime<Utc>) {
    let today = Local::now().date_naive();
    let midnight = today.and_time(NaiveTime::MIN);
    let start = Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc());
    (start, start + Duration::days(1))
}

// ── Accounts ────────────────────────────────────────────────────────

#[async_trait]
impl AccountStore for LibSqlBackend {
    async fn all(&self) -> Result<Vec<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY rowid"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list accounts: {e}")))?;

        let mut accounts = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => accounts.push(row_to_account(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list accounts: {e}"))),
            }
        }
        Ok(accounts)
    }

    async fn find(&self, id: &str) -> Result<Option<Account>, DatabaseError> {
        self.load_account(id).await
    }

    async fn add(&self, account: Account) -> Result<(), DatabaseError> {
        let _guard = self.accounts_lock.lock().await;
        if self.load_account(&account.email).await?.is_some() {
            return Err(DatabaseError::duplicate("account", &account.email));
        }
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO accounts ({ACCOUNT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    account.email.as_str(),
                    account.display_name.as_str(),
                    account.password.expose_secret(),
                    account.smtp_host.as_str(),
                    i64::from(account.smtp_port),
                    account.imap_host.as_str(),
                    i64::from(account.imap_port),
                    i64::from(account.stage),
                    i64::from(account.daily_limit),
                    i64::from(account.sent_today),
                    opt_ts(account.last_sent_at),
                    account.status.as_str(),
                    account.pause_reason.as_str(),
                    account.working_hours.start_str(),
                    account.working_hours.end_str(),
                    fmt_ts(account.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert account: {e}")))?;

        debug!(account = %account.email, "Account inserted");
        Ok(())
    }

    async fn update(&self, account: Account) -> Result<(), DatabaseError> {
        let _guard = self.accounts_lock.lock().await;
        if self.write_account(&account).await? == 0 {
            return Err(DatabaseError::not_found("account", &account.email));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.accounts_lock.lock().await;
        let n = self
            .conn()
            .execute("DELETE FROM accounts WHERE email = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete account: {e}")))?;
        Ok(n > 0)
    }

    async fn modify(&self, id: &str, edit: AccountEdit) -> Result<Account, DatabaseError> {
        let _guard = self.accounts_lock.lock().await;
        let mut account = self
            .load_account(id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("account", id))?;
        edit(&mut account);
        // The id is the key; an edit must not move the row.
        account.email = id.to_string();
        self.write_account(&account).await?;
        Ok(account)
    }

    async fn reset_daily_counts(&self) -> Result<usize, DatabaseError> {
        let _guard = self.accounts_lock.lock().await;
        let accounts = AccountStore::all(self).await?;

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("begin reset: {e}")))?;
        for account in &accounts {
            tx.execute(
                "UPDATE accounts SET sent_today = 0, daily_limit = ?2 WHERE email = ?1",
                params![account.email.as_str(), i64::from(ramp::daily_limit(account.stage))],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reset account: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("commit reset: {e}")))?;

        Ok(accounts.len())
    }
}

// ── Recipients ──────────────────────────────────────────────────────

#[async_trait]
impl RecipientPool for LibSqlBackend {
    async fn all(&self) -> Result<Vec<Recipient>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RECIPIENT_COLUMNS} FROM recipients ORDER BY rowid"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list recipients: {e}")))?;

        let mut recipients = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => recipients.push(row_to_recipient(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list recipients: {e}"))),
            }
        }
        Ok(recipients)
    }

    async fn record_use(&self, id: &str) -> Result<(), DatabaseError> {
        let _guard = self.recipients_lock.lock().await;
        let n = self
            .conn()
            .execute(
                "UPDATE recipients SET use_count = use_count + 1, last_used_at = ?2 WHERE email = ?1",
                params![id, fmt_ts(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_use: {e}")))?;
        if n == 0 {
            return Err(DatabaseError::not_found("recipient", id));
        }
        Ok(())
    }

    async fn deactivate(&self, id: &str) -> Result<(), DatabaseError> {
        let _guard = self.recipients_lock.lock().await;
        let n = self
            .conn()
            .execute("UPDATE recipients SET active = 0 WHERE email = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("deactivate: {e}")))?;
        if n == 0 {
            return Err(DatabaseError::not_found("recipient", id));
        }
        Ok(())
    }

    async fn add(&self, recipient: Recipient) -> Result<bool, DatabaseError> {
        let _guard = self.recipients_lock.lock().await;
        let n = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO recipients ({RECIPIENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    recipient.email.as_str(),
                    recipient.name.as_str(),
                    recipient.domain.as_str(),
                    i64::from(recipient.active),
                    recipient.use_count as i64,
                    opt_ts(recipient.last_used_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert recipient: {e}")))?;
        Ok(n > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.recipients_lock.lock().await;
        let n = self
            .conn()
            .execute("DELETE FROM recipients WHERE email = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete recipient: {e}")))?;
        Ok(n > 0)
    }
}

// ── Activity log ────────────────────────────────────────────────────

#[async_trait]
impl ActivityLog for LibSqlBackend {
    async fn append(&self, record: ActivityRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO activity_log ({ACTIVITY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    fmt_ts(record.timestamp),
                    record.account,
                    record.kind.as_str(),
                    record.recipient,
                    record.subject,
                    record.details,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append activity: {e}")))?;
        Ok(())
    }

    async fn recent(&self, n: usize) -> Result<Vec<ActivityRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACTIVITY_COLUMNS} FROM
                        (SELECT id, {ACTIVITY_COLUMNS} FROM activity_log ORDER BY id DESC LIMIT ?1)
                     ORDER BY id ASC"
                ),
                params![n as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent activity: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_activity(&row) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping activity row: {e}"),
            }
        }
        Ok(records)
    }

    async fn count_in_window(
        &self,
        account: &str,
        kind: ActivityKind,
        hours: u32,
    ) -> Result<u64, DatabaseError> {
        let cutoff = Utc::now() - Duration::hours(i64::from(hours));
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM activity_log
                 WHERE account = ?1 AND kind = ?2 AND timestamp >= ?3",
                params![account, kind.as_str(), fmt_ts(cutoff)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_in_window: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(row_err)?.max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_in_window: {e}"))),
        }
    }

    async fn daily_totals(&self) -> Result<DailyTotals, DatabaseError> {
        let (start, end) = local_day_bounds();
        let mut rows = self
            .conn()
            .query(
                "SELECT kind, COUNT(*) FROM activity_log
                 WHERE timestamp >= ?1 AND timestamp < ?2 GROUP BY kind",
                params![fmt_ts(start), fmt_ts(end)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("daily_totals: {e}")))?;

        let mut totals = DailyTotals::default();
        while let Ok(Some(row)) = rows.next().await {
            let kind: String = row.get(0).map_err(row_err)?;
            let count = row.get::<i64>(1).map_err(row_err)?.max(0) as u64;
            match kind.parse::<ActivityKind>() {
                Ok(ActivityKind::Send) => totals.sends = count,
                Ok(ActivityKind::Reply) => totals.replies = count,
                Ok(ActivityKind::Error) => totals.errors = count,
                Ok(ActivityKind::Bounce) => totals.bounces = count,
                _ => {}
            }
        }
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_and_reset_serialize() {
        crate::store::contention::sends_racing_a_reset(Arc::new(test_db().await)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_record_use_counts_every_call() {
        crate::store::contention::uses_are_never_lost(Arc::new(test_db().await)).await;
    }

    #[tokio::test]
    async fn account_round_trip() {
        let db = test_db().await;
        let mut acct = Account::new("jane@x.com", "s3cret")
            .with_display_name("Jane")
            .with_working_hours(WorkingHours::parse("22:00", "06:00").unwrap());
        acct.last_sent_at = Some(Utc::now());
        AccountStore::add(&db, acct.clone()).await.unwrap();

        let loaded = db.find("jane@x.com").await.unwrap().unwrap();
        assert_eq!(loaded.display_name, "Jane");
        assert_eq!(loaded.password.expose_secret(), "s3cret");
        assert_eq!(loaded.working_hours, acct.working_hours);
        assert_eq!(loaded.stage, 1);
        assert_eq!(loaded.daily_limit, 5);
        assert!(loaded.last_sent_at.is_some());
        assert_eq!(loaded.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn duplicate_and_missing_accounts() {
        let db = test_db().await;
        AccountStore::add(&db, Account::new("a@x.com", "pw")).await.unwrap();
        assert!(matches!(
            AccountStore::add(&db, Account::new("a@x.com", "pw")).await,
            Err(DatabaseError::Duplicate { .. })
        ));
        assert!(matches!(
            db.update(Account::new("b@x.com", "pw")).await,
            Err(DatabaseError::NotFound { .. })
        ));
        assert!(matches!(
            db.pause("b@x.com", "x").await,
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn status_helpers_and_active_listing() {
        let db = test_db().await;
        AccountStore::add(&db, Account::new("a@x.com", "pw")).await.unwrap();
        AccountStore::add(&db, Account::new("b@x.com", "pw")).await.unwrap();
        AccountStore::add(&db, Account::new("c@x.com", "pw")).await.unwrap();

        db.pause("a@x.com", "bounce rate").await.unwrap();
        db.mark_error("c@x.com", "Authentication failed").await.unwrap();

        let active = AccountStore::active(&db).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].email, "b@x.com");

        let c = db.find("c@x.com").await.unwrap().unwrap();
        assert_eq!(c.status, AccountStatus::Error);
        assert_eq!(c.pause_reason, "Authentication failed");

        db.resume("a@x.com").await.unwrap();
        assert_eq!(AccountStore::active(&db).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stage_update_and_daily_reset() {
        let db = test_db().await;
        AccountStore::add(&db, Account::new("a@x.com", "pw")).await.unwrap();
        db.modify("a@x.com", Box::new(|a| a.sent_today = 5)).await.unwrap();
        let acct = db.update_stage("a@x.com", 2).await.unwrap();
        assert_eq!(acct.daily_limit, 15);

        db.modify("a@x.com", Box::new(|a| a.stage = 3)).await.unwrap();
        assert_eq!(db.reset_daily_counts().await.unwrap(), 1);
        let acct = db.find("a@x.com").await.unwrap().unwrap();
        assert_eq!(acct.sent_today, 0);
        assert_eq!(acct.daily_limit, 25);
    }

    #[tokio::test]
    async fn recipients_rotate_and_deactivate() {
        let db = test_db().await;
        assert!(RecipientPool::add(&db, Recipient::new("r1@x.com")).await.unwrap());
        assert!(RecipientPool::add(&db, Recipient::new("r2@x.com")).await.unwrap());
        assert!(!RecipientPool::add(&db, Recipient::new("r1@x.com")).await.unwrap());

        let first = db.least_used("").await.unwrap().unwrap();
        db.record_use(&first.email).await.unwrap();
        let second = db.least_used("").await.unwrap().unwrap();
        assert_ne!(first.email, second.email);

        db.deactivate("r2@x.com").await.unwrap();
        let pick = db.least_used("").await.unwrap().unwrap();
        assert_eq!(pick.email, "r1@x.com");
        assert!(matches!(
            db.record_use("nobody@x.com").await,
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn activity_window_and_totals() {
        let db = test_db().await;
        let mut old = ActivityRecord::now("a@x.com", ActivityKind::Send);
        old.timestamp = Utc::now() - Duration::hours(48);
        db.append(old).await.unwrap();
        db.append(ActivityRecord::now("a@x.com", ActivityKind::Send)).await.unwrap();
        db.append(ActivityRecord::now("a@x.com", ActivityKind::Bounce)).await.unwrap();
        db.append(ActivityRecord::now("b@x.com", ActivityKind::Reply)).await.unwrap();

        assert_eq!(db.count_in_window("a@x.com", ActivityKind::Send, 24).await.unwrap(), 1);
        assert_eq!(db.count_in_window("a@x.com", ActivityKind::Bounce, 24).await.unwrap(), 1);

        let totals = db.daily_totals().await.unwrap();
        assert_eq!(totals.sends, 1);
        assert_eq!(totals.bounces, 1);
        assert_eq!(totals.replies, 1);

        let recent = db.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, ActivityKind::Bounce);
        assert_eq!(recent[1].kind, ActivityKind::Reply);
    }

    #[tokio::test]
    async fn file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warmup.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            AccountStore::add(&db, Account::new("a@x.com", "pw")).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.find("a@x.com").await.unwrap().is_some());
    }
}
