//! Stage-based ramp policy.
//!
//! Pure decision functions: daily quotas, send pacing, working-hour checks
//! and the bounce safety threshold. Nothing here performs I/O; randomness is
//! always drawn from a caller-supplied `Rng`.

use std::time::Duration;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use rand::Rng;

use crate::model::WorkingHours;

/// Highest warm-up stage.
pub const MAX_STAGE: u8 = 4;

/// Global reply delay range, in seconds (5 to 45 minutes).
pub const REPLY_DELAY_RANGE: (u64, u64) = (300, 2700);

/// Daily send limit for a stage. Unknown stages get the stage-1 limit.
pub fn daily_limit(stage: u8) -> u32 {
    match stage {
        2 => 15,
        3 => 25,
        4 => 40,
        _ => 5,
    }
}

/// Next stage, capped at [`MAX_STAGE`].
pub fn next_stage(stage: u8) -> u8 {
    stage.saturating_add(1).min(MAX_STAGE)
}

/// Send interval bounds `(low, high)` in seconds. Wide and slow at stage 1,
/// tighter at later stages.
pub fn send_interval(stage: u8) -> (u64, u64) {
    match stage {
        2 => (900, 5400),
        3 => (600, 3600),
        4 => (300, 2400),
        _ => (1800, 10800),
    }
}

/// Whether `now` falls inside `[start, end)`.
///
/// Overnight windows (start after end) wrap past midnight. A window with
/// equal bounds is empty and never open.
pub fn within_working_hours(window: &WorkingHours, now: NaiveTime) -> bool {
    let t = now.num_seconds_from_midnight();
    let start = window.start.num_seconds_from_midnight();
    let end = window.end.num_seconds_from_midnight();
    if start <= end {
        start <= t && t < end
    } else {
        t >= start || t < end
    }
}

/// Random delay between sends for `stage`: a uniform draw from the stage
/// interval plus Gaussian jitter (sd = 5% of the interval width), clamped
/// to at least half the interval's low bound.
pub fn send_delay<R: Rng + ?Sized>(stage: u8, rng: &mut R) -> Duration {
    let (low, high) = send_interval(stage);
    let base = rng.gen_range(low as f64..=high as f64);
    let jitter = gaussian(rng) * (high - low) as f64 * 0.05;
    let floor = (low / 2) as f64;
    Duration::from_secs((base + jitter).max(floor) as u64)
}

/// Random reply delay in the global range. Informational only.
pub fn reply_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
    let (low, high) = REPLY_DELAY_RANGE;
    Duration::from_secs(rng.gen_range(low..=high))
}

/// `used < limit`.
pub fn quota_ok(used: u32, limit: u32) -> bool {
    used < limit
}

/// Whether enough time has passed since the last send.
///
/// Draws a fresh [`send_delay`] on every call, so the threshold moves from
/// one evaluation to the next.
pub fn due_to_send<R: Rng + ?Sized>(
    last_sent_at: Option<DateTime<Utc>>,
    stage: u8,
    now: DateTime<Utc>,
    rng: &mut R,
) -> bool {
    let Some(last) = last_sent_at else {
        return true;
    };
    let delay = send_delay(stage, rng);
    let elapsed = now.signed_duration_since(last);
    match elapsed.to_std() {
        Ok(elapsed) => elapsed >= delay,
        // last send is in the future (clock skew)
        Err(_) => false,
    }
}

/// `bounced / sent > threshold`; never true with zero sends.
pub fn bounce_rate_exceeded(sent: u64, bounced: u64, threshold: f64) -> bool {
    if sent == 0 {
        return false;
    }
    (bounced as f64 / sent as f64) > threshold
}

/// Standard normal sample via Box-Muller.
fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.r#gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Value snapshot of the fields the send gates look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateSnapshot {
    pub stage: u8,
    pub sent_today: u32,
    pub daily_limit: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub working_hours: WorkingHours,
}

impl From<&crate::model::Account> for GateSnapshot {
    fn from(account: &crate::model::Account) -> Self {
        Self {
            stage: account.stage,
            sent_today: account.sent_today,
            daily_limit: account.daily_limit,
            last_sent_at: account.last_sent_at,
            working_hours: account.working_hours,
        }
    }
}

/// Outcome of the time/quota/interval gates, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    OutsideWorkingHours,
    QuotaExhausted,
    NotDue,
    Open,
}

/// Evaluate the first three send gates, stopping at the first that fails.
pub fn evaluate_gates<R: Rng + ?Sized>(
    snapshot: GateSnapshot,
    local_time: NaiveTime,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Gate {
    if !within_working_hours(&snapshot.working_hours, local_time) {
        return Gate::OutsideWorkingHours;
    }
    if !quota_ok(snapshot.sent_today, snapshot.daily_limit) {
        return Gate::QuotaExhausted;
    }
    if !due_to_send(snapshot.last_sent_at, snapshot.stage, now, rng) {
        return Gate::NotDue;
    }
    Gate::Open
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: &str, end: &str) -> WorkingHours {
        WorkingHours::parse(start, end).unwrap()
    }

    #[test]
    fn daily_limit_table() {
        assert_eq!(daily_limit(1), 5);
        assert_eq!(daily_limit(2), 15);
        assert_eq!(daily_limit(3), 25);
        assert_eq!(daily_limit(4), 40);
        assert_eq!(daily_limit(0), 5);
        assert_eq!(daily_limit(9), 5);
    }

    #[test]
    fn next_stage_caps_at_four() {
        assert_eq!(next_stage(1), 2);
        assert_eq!(next_stage(3), 4);
        assert_eq!(next_stage(4), 4);
        assert_eq!(next_stage(u8::MAX), 4);
    }

    #[test]
    fn day_window() {
        let w = window("08:00", "20:00");
        assert!(within_working_hours(&w, t(9, 0)));
        assert!(within_working_hours(&w, t(8, 0)));
        assert!(!within_working_hours(&w, t(20, 0)));
        assert!(!within_working_hours(&w, t(21, 0)));
    }

    #[test]
    fn overnight_window() {
        let w = window("22:00", "06:00");
        assert!(within_working_hours(&w, t(23, 30)));
        assert!(within_working_hours(&w, t(2, 0)));
        assert!(!within_working_hours(&w, t(12, 0)));
        assert!(!within_working_hours(&w, t(6, 0)));
    }

    #[test]
    fn equal_bounds_are_never_open() {
        let w = window("08:00", "08:00");
        assert!(!within_working_hours(&w, t(12, 0)));
        assert!(!within_working_hours(&w, t(8, 0)));
        assert!(!within_working_hours(&w, t(7, 59)));

        let midnight = window("00:00", "00:00");
        assert!(!within_working_hours(&midnight, t(0, 0)));
        assert!(!within_working_hours(&midnight, t(13, 37)));
    }

    #[test]
    fn send_delay_respects_floor_and_rough_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for stage in 1..=4 {
            let (low, high) = send_interval(stage);
            for _ in 0..500 {
                let d = send_delay(stage, &mut rng).as_secs();
                assert!(d >= low / 2, "stage {stage}: {d} below floor");
                // jitter sd is 5% of width; 8 sd is far beyond any seeded draw
                assert!(d <= high + (high - low) * 40 / 100, "stage {stage}: {d} too high");
            }
        }
    }

    #[test]
    fn reply_delay_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let d = reply_delay(&mut rng).as_secs();
            assert!((300..=2700).contains(&d));
        }
    }

    #[test]
    fn quota_ok_is_strict() {
        assert!(quota_ok(4, 5));
        assert!(!quota_ok(5, 5));
        assert!(!quota_ok(6, 5));
    }

    #[test]
    fn due_without_prior_send() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(due_to_send(None, 1, Utc::now(), &mut rng));
    }

    #[test]
    fn due_after_long_gap_not_due_right_after() {
        let mut rng = StdRng::seed_from_u64(3);
        let now = Utc::now();
        // Stage 1 tops out around 3h plus jitter.
        assert!(due_to_send(Some(now - ChronoDuration::hours(6)), 1, now, &mut rng));
        // Stage 4 floor is 150s.
        assert!(!due_to_send(Some(now - ChronoDuration::seconds(10)), 4, now, &mut rng));
        assert!(!due_to_send(Some(now + ChronoDuration::minutes(5)), 4, now, &mut rng));
    }

    #[test]
    fn bounce_threshold() {
        assert!(!bounce_rate_exceeded(0, 0, 0.05));
        assert!(!bounce_rate_exceeded(0, 7, 0.05));
        assert!(bounce_rate_exceeded(20, 2, 0.05));
        assert!(!bounce_rate_exceeded(100, 5, 0.05));
        assert!(bounce_rate_exceeded(100, 6, 0.05));
    }

    #[test]
    fn gates_short_circuit_in_order() {
        let mut rng = StdRng::seed_from_u64(11);
        let now = Utc::now();
        let snap = GateSnapshot {
            stage: 1,
            sent_today: 5,
            daily_limit: 5,
            last_sent_at: None,
            working_hours: window("08:00", "20:00"),
        };
        assert_eq!(
            evaluate_gates(snap, t(21, 0), now, &mut rng),
            Gate::OutsideWorkingHours
        );
        assert_eq!(evaluate_gates(snap, t(9, 0), now, &mut rng), Gate::QuotaExhausted);

        let fresh = GateSnapshot {
            sent_today: 1,
            last_sent_at: Some(now),
            ..snap
        };
        assert_eq!(evaluate_gates(fresh, t(9, 0), now, &mut rng), Gate::NotDue);

        let ready = GateSnapshot {
            sent_today: 0,
            ..snap
        };
        assert_eq!(evaluate_gates(ready, t(9, 0), now, &mut rng), Gate::Open);
    }
}
