//! Core record types: accounts, recipients, activity rows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::ramp;

/// Lifecycle status of a sending account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Paused,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local time-of-day window during which an account may send.
///
/// A window whose start is after its end wraps past midnight
/// (e.g. 22:00-06:00). A window whose start equals its end is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkingHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse a window from two `HH:MM` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        Ok(Self {
            start: parse_hhmm(start)?,
            end: parse_hhmm(end)?,
        })
    }

    pub fn start_str(&self) -> String {
        self.start.format("%H:%M").to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format("%H:%M").to_string()
    }
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl fmt::Display for WorkingHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_str(), self.end_str())
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|e| format!("invalid time '{s}': {e}"))
}

/// A mailbox being warmed up.
///
/// The address doubles as the account id.
#[derive(Debug, Clone)]
pub struct Account {
    pub email: String,
    pub display_name: String,
    pub password: SecretString,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub imap_host: String,
    pub imap_port: u16,
    pub stage: u8,
    pub daily_limit: u32,
    pub sent_today: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    pub pause_reason: String,
    pub working_hours: WorkingHours,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a fresh stage-1 account with default hosts and window.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: String::new(),
            password: SecretString::from(password.into()),
            smtp_host: "smtp.zoho.in".to_string(),
            smtp_port: 587,
            imap_host: "imap.zoho.in".to_string(),
            imap_port: 993,
            stage: 1,
            daily_limit: ramp::daily_limit(1),
            sent_today: 0,
            last_sent_at: None,
            status: AccountStatus::Active,
            pause_reason: String::new(),
            working_hours: WorkingHours::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_working_hours(mut self, hours: WorkingHours) -> Self {
        self.working_hours = hours;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_smtp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.smtp_host = host.into();
        self.smtp_port = port;
        self
    }

    pub fn with_imap(mut self, host: impl Into<String>, port: u16) -> Self {
        self.imap_host = host.into();
        self.imap_port = port;
        self
    }

    pub fn id(&self) -> &str {
        &self.email
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Name used in greetings and sign-offs: the configured display name, or
    /// the local part of the address title-cased (`jane.doe` -> `Jane Doe`).
    pub fn sender_name(&self) -> String {
        if !self.display_name.trim().is_empty() {
            return self.display_name.trim().to_string();
        }
        name_from_address(&self.email)
    }

    /// Apply a successful send at `at`: bump the quota counter, stamp the
    /// send time, and promote the stage when today's quota has been reached.
    ///
    /// Returns `Some((old, new))` when the stage changed.
    pub fn record_send(&mut self, at: DateTime<Utc>) -> Option<(u8, u8)> {
        self.sent_today += 1;
        self.last_sent_at = Some(at);
        if self.sent_today >= self.daily_limit && self.stage < ramp::MAX_STAGE {
            let old = self.stage;
            self.stage = ramp::next_stage(old);
            self.daily_limit = ramp::daily_limit(self.stage);
            return Some((old, self.stage));
        }
        None
    }
}

/// Derive a display name from an address local part.
pub fn name_from_address(address: &str) -> String {
    let local = address.split('@').next().unwrap_or(address);
    local
        .split(['.', '_', '-'])
        .filter(|p| !p.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// A warm-up target address in the rotation pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub use_count: u64,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Recipient {
    pub fn new(email: impl Into<String>) -> Self {
        let email = email.into();
        let domain = email.split('@').nth(1).unwrap_or_default().to_string();
        Self {
            email,
            name: String::new(),
            domain,
            active: true,
            use_count: 0,
            last_used_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Greeting name: the configured name, else the address local part.
    pub fn greeting_name(&self) -> String {
        if self.name.trim().is_empty() {
            self.email.split('@').next().unwrap_or_default().to_string()
        } else {
            self.name.clone()
        }
    }
}

/// Pick the least-used active recipient, skipping `exclude`.
///
/// Ties break on ascending last-used time, never-used first. When the
/// exclusion leaves nothing, the exclusion is dropped.
pub fn least_used<'a>(pool: &'a [Recipient], exclude: &str) -> Option<&'a Recipient> {
    let pick = |skip: Option<&str>| {
        pool.iter()
            .filter(|r| r.active)
            .filter(|r| skip.is_none_or(|e| !r.email.eq_ignore_ascii_case(e)))
            .min_by(|a, b| {
                a.use_count
                    .cmp(&b.use_count)
                    .then_with(|| a.last_used_at.cmp(&b.last_used_at))
            })
    };
    pick(Some(exclude)).or_else(|| pick(None))
}

/// Kind of an activity log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityKind {
    Send,
    Reply,
    Bounce,
    Error,
    Pause,
    Resume,
    Stage,
    Reset,
    Info,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "SEND",
            Self::Reply => "REPLY",
            Self::Bounce => "BOUNCE",
            Self::Error => "ERROR",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::Stage => "STAGE",
            Self::Reset => "RESET",
            Self::Info => "INFO",
        }
    }
}

impl FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SEND" => Ok(Self::Send),
            "REPLY" => Ok(Self::Reply),
            "BOUNCE" => Ok(Self::Bounce),
            "ERROR" => Ok(Self::Error),
            "PAUSE" => Ok(Self::Pause),
            "RESUME" => Ok(Self::Resume),
            "STAGE" => Ok(Self::Stage),
            "RESET" => Ok(Self::Reset),
            "INFO" => Ok(Self::Info),
            other => Err(format!("unknown activity kind: {other}")),
        }
    }
}

/// One immutable row of the activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub account: String,
    pub kind: ActivityKind,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub details: String,
}

impl ActivityRecord {
    pub fn now(account: impl Into<String>, kind: ActivityKind) -> Self {
        Self {
            timestamp: Utc::now(),
            account: account.into(),
            kind,
            recipient: String::new(),
            subject: String::new(),
            details: String::new(),
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// Per-kind totals for the current local day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotals {
    pub sends: u64,
    pub replies: u64,
    pub errors: u64,
    pub bounces: u64,
}

impl DailyTotals {
    /// Count one row into the matching bucket; other kinds are ignored.
    pub fn tally(&mut self, kind: ActivityKind) {
        match kind {
            ActivityKind::Send => self.sends += 1,
            ActivityKind::Reply => self.replies += 1,
            ActivityKind::Error => self.errors += 1,
            ActivityKind::Bounce => self.bounces += 1,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn name_from_dotted_address() {
        assert_eq!(name_from_address("jane.doe@example.com"), "Jane Doe");
        assert_eq!(name_from_address("SALES@example.com"), "Sales");
        assert_eq!(name_from_address("first_last-x@x.io"), "First Last X");
    }

    #[test]
    fn sender_name_prefers_display_name() {
        let acct = Account::new("jane.doe@example.com", "pw").with_display_name("Jane D.");
        assert_eq!(acct.sender_name(), "Jane D.");
    }

    #[test]
    fn working_hours_parse_and_display() {
        let wh = WorkingHours::parse("22:00", "06:30").unwrap();
        assert_eq!(wh.to_string(), "22:00-06:30");
        assert!(WorkingHours::parse("25:00", "06:00").is_err());
    }

    #[test]
    fn record_send_promotes_at_limit() {
        let mut acct = Account::new("a@x.com", "pw");
        acct.sent_today = 4;
        let promoted = acct.record_send(Utc::now());
        assert_eq!(promoted, Some((1, 2)));
        assert_eq!(acct.sent_today, 5);
        assert_eq!(acct.daily_limit, 15);
        assert!(acct.last_sent_at.is_some());
    }

    #[test]
    fn record_send_below_limit_keeps_stage() {
        let mut acct = Account::new("a@x.com", "pw");
        assert_eq!(acct.record_send(Utc::now()), None);
        assert_eq!(acct.stage, 1);
        assert_eq!(acct.sent_today, 1);
    }

    #[test]
    fn record_send_never_promotes_past_final_stage() {
        let mut acct = Account::new("a@x.com", "pw");
        acct.stage = 4;
        acct.daily_limit = 40;
        acct.sent_today = 39;
        assert_eq!(acct.record_send(Utc::now()), None);
        assert_eq!(acct.stage, 4);
    }

    #[test]
    fn least_used_orders_by_count_then_last_used() {
        let now = Utc::now();
        let mut a = Recipient::new("a@x.com");
        a.use_count = 2;
        let mut b = Recipient::new("b@x.com");
        b.use_count = 1;
        b.last_used_at = Some(now);
        let mut c = Recipient::new("c@x.com");
        c.use_count = 1;
        c.last_used_at = Some(now - Duration::hours(1));
        let pool = vec![a, b, c];
        assert_eq!(least_used(&pool, "").unwrap().email, "c@x.com");
    }

    #[test]
    fn least_used_never_used_sorts_first() {
        let mut a = Recipient::new("a@x.com");
        a.last_used_at = Some(Utc::now());
        let b = Recipient::new("b@x.com");
        let pool = vec![a, b];
        assert_eq!(least_used(&pool, "").unwrap().email, "b@x.com");
    }

    #[test]
    fn least_used_excludes_sender_then_falls_back() {
        let pool = vec![Recipient::new("me@x.com"), Recipient::new("you@x.com")];
        assert_eq!(least_used(&pool, "me@x.com").unwrap().email, "you@x.com");

        let only_me = vec![Recipient::new("me@x.com")];
        assert_eq!(least_used(&only_me, "me@x.com").unwrap().email, "me@x.com");
    }

    #[test]
    fn least_used_skips_inactive() {
        let mut dead = Recipient::new("dead@x.com");
        dead.active = false;
        let mut live = Recipient::new("live@x.com");
        live.use_count = 10;
        let pool = vec![dead.clone(), live];
        assert_eq!(least_used(&pool, "").unwrap().email, "live@x.com");
        assert!(least_used(&[dead], "").is_none());
    }

    #[test]
    fn activity_kind_round_trips_through_str() {
        for kind in [ActivityKind::Send, ActivityKind::Stage, ActivityKind::Info] {
            assert_eq!(kind.as_str().parse::<ActivityKind>().unwrap(), kind);
        }
        assert!("NOPE".parse::<ActivityKind>().is_err());
    }

    #[test]
    fn daily_totals_tally_ignores_other_kinds() {
        let mut totals = DailyTotals::default();
        totals.tally(ActivityKind::Send);
        totals.tally(ActivityKind::Send);
        totals.tally(ActivityKind::Bounce);
        totals.tally(ActivityKind::Stage);
        assert_eq!(totals.sends, 2);
        assert_eq!(totals.bounces, 1);
        assert_eq!(totals.replies, 0);
    }
}
