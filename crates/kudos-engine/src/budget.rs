//! Issuance caps per time window.
//!
//! Provides configurable point caps per window (daily/weekly/monthly) and
//! pure decision functions over ledger history. Windows start at a fixed
//! reset hour (UTC), so "today" for a cap is the business day, not the
//! calendar day.

use crate::error::{EngineError, Result};
use crate::ledger::{EntrySource, LedgerEntry};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Cap window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Daily,
    Weekly,
    Monthly,
}

impl WindowKind {
    pub const ALL: [WindowKind; 3] = [WindowKind::Daily, WindowKind::Weekly, WindowKind::Monthly];
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

/// Day boundary shared by caps and streaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResetClock {
    /// Hour of day (UTC, 0-23) at which a new business day starts
    pub reset_hour: u32,
}

impl ResetClock {
    pub fn new(reset_hour: u32) -> Self {
        Self { reset_hour }
    }

    /// Business day `ts` belongs to
    pub fn business_day(&self, ts: DateTime<Utc>) -> NaiveDate {
        (ts - Duration::hours(self.reset_hour as i64)).date_naive()
    }

    /// Instant a business day starts
    pub fn day_start(&self, day: NaiveDate) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(self.reset_hour, 0, 0).unwrap_or(NaiveTime::MIN);
        Utc.from_utc_datetime(&day.and_time(time))
    }

    /// Start of the window containing `now`
    pub fn window_start(&self, now: DateTime<Utc>, kind: WindowKind) -> DateTime<Utc> {
        let today = self.business_day(now);
        let first_day = match kind {
            WindowKind::Daily => today,
            WindowKind::Weekly => today - Duration::days(today.weekday().num_days_from_monday() as i64),
            WindowKind::Monthly => today.with_day(1).unwrap_or(today),
        };
        self.day_start(first_day)
    }
}

/// One window's cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapRule {
    pub enabled: bool,
    pub limit: u64,
}

impl CapRule {
    pub fn enabled(limit: u64) -> Self {
        Self { enabled: true, limit }
    }

    pub fn disabled(limit: u64) -> Self {
        Self { enabled: false, limit }
    }
}

/// Cap configuration.
///
/// Defaults:
/// - daily: 1000 points, enabled
/// - weekly: 5000 points, disabled
/// - monthly: 20000 points, disabled
/// - reset at 00:00 UTC
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuanceCaps {
    pub daily: CapRule,
    pub weekly: CapRule,
    pub monthly: CapRule,
    pub reset_hour: u32,
}

impl Default for IssuanceCaps {
    fn default() -> Self {
        Self {
            daily: CapRule::enabled(1_000),
            weekly: CapRule::disabled(5_000),
            monthly: CapRule::disabled(20_000),
            reset_hour: 0,
        }
    }
}

impl IssuanceCaps {
    /// Every cap switched off
    pub fn unlimited() -> Self {
        Self {
            daily: CapRule::disabled(0),
            weekly: CapRule::disabled(0),
            monthly: CapRule::disabled(0),
            reset_hour: 0,
        }
    }

    pub fn get(&self, kind: WindowKind) -> CapRule {
        match kind {
            WindowKind::Daily => self.daily,
            WindowKind::Weekly => self.weekly,
            WindowKind::Monthly => self.monthly,
        }
    }

    pub fn clock(&self) -> ResetClock {
        ResetClock::new(self.reset_hour)
    }

    pub fn any_enabled(&self) -> bool {
        WindowKind::ALL.iter().any(|k| self.get(*k).enabled)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reset_hour >= 24 {
            return Err(EngineError::Config(format!(
                "caps.reset_hour must be 0-23, got {}",
                self.reset_hour
            )));
        }
        for kind in WindowKind::ALL {
            let rule = self.get(kind);
            if rule.enabled && rule.limit == 0 {
                return Err(EngineError::Config(format!("caps.{} limit must be positive", kind)));
            }
        }
        Ok(())
    }
}

/// Cap decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    Allowed,
    Rejected {
        window: WindowKind,
        cap: u64,
        issued: u64,
        proposed: u64,
    },
}

impl BudgetDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Rejected {
                window,
                cap,
                issued,
                proposed,
            } => Err(EngineError::CapExceeded {
                window: window.to_string(),
                cap,
                issued,
                proposed,
            }),
        }
    }
}

/// Sources that draw down issuance caps
pub fn counts_toward_cap(entry: &LedgerEntry) -> bool {
    matches!(entry.source, EntrySource::RewardPayout | EntrySource::StreakBonus)
}

/// Pure function: capped points issued in the window containing `now`.
pub fn issued_in_window<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    kind: WindowKind,
    clock: ResetClock,
    now: DateTime<Utc>,
) -> u64 {
    let start = clock.window_start(now, kind);
    entries
        .into_iter()
        .filter(|e| counts_toward_cap(e) && e.timestamp >= start && e.timestamp <= now)
        .map(|e| e.issued_points())
        .sum()
}

/// Pure function: check one window. A disabled cap always allows.
///
/// `entries` is the ledger of a participant, or the concatenated ledgers of
/// a pool when the cap is shared.
pub fn check_and_reserve<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    caps: &IssuanceCaps,
    kind: WindowKind,
    proposed: u64,
    now: DateTime<Utc>,
) -> BudgetDecision {
    let rule = caps.get(kind);
    if !rule.enabled {
        return BudgetDecision::Allowed;
    }
    let issued = issued_in_window(entries, kind, caps.clock(), now);
    if issued.saturating_add(proposed) > rule.limit {
        BudgetDecision::Rejected {
            window: kind,
            cap: rule.limit,
            issued,
            proposed,
        }
    } else {
        BudgetDecision::Allowed
    }
}

/// Pure function: check every window, daily first.
pub fn check_all(
    entries: &[&LedgerEntry],
    caps: &IssuanceCaps,
    proposed: u64,
    now: DateTime<Utc>,
) -> BudgetDecision {
    for kind in WindowKind::ALL {
        let decision = check_and_reserve(entries.iter().copied(), caps, kind, proposed, now);
        if !decision.is_allowed() {
            return decision;
        }
    }
    BudgetDecision::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_business_day_respects_reset_hour() {
        let clock = ResetClock::new(6);
        assert_eq!(
            clock.business_day(at(2026, 10, 16, 5)),
            NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
        );
        assert_eq!(
            clock.business_day(at(2026, 10, 16, 6)),
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
        );
    }

    #[test]
    fn test_window_starts() {
        let clock = ResetClock::new(6);
        // 2026-10-16 is a Friday
        let now = at(2026, 10, 16, 12);
        assert_eq!(clock.window_start(now, WindowKind::Daily), at(2026, 10, 16, 6));
        assert_eq!(clock.window_start(now, WindowKind::Weekly), at(2026, 10, 12, 6));
        assert_eq!(clock.window_start(now, WindowKind::Monthly), at(2026, 10, 1, 6));
    }

    #[test]
    fn test_disabled_cap_allows() {
        let caps = IssuanceCaps::unlimited();
        let decision = check_and_reserve(std::iter::empty::<&LedgerEntry>(), &caps, WindowKind::Daily, 1_000_000, Utc::now());
        assert_eq!(decision, BudgetDecision::Allowed);
    }

    #[test]
    fn test_validate_reset_hour() {
        let caps = IssuanceCaps {
            reset_hour: 24,
            ..Default::default()
        };
        assert!(caps.validate().is_err());
        assert!(IssuanceCaps::default().validate().is_ok());
    }
}
