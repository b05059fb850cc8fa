use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime};

use crate::CertificateMaterial;

/// Renew once this many days (or fewer) are left.
pub const RENEW_DAYS_BEFORE: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Valid,
    MustRenew(RenewReason),
}

impl Decision {
    pub fn must_renew(&self) -> bool {
        matches!(self, Decision::MustRenew(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewReason {
    Missing,
    Expiring,
    DomainMismatch,
    EnvironmentMismatch,
}

/// How the days left before expiry are counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainingDays {
    /// Whole days between now and `notAfter`.
    #[default]
    DayCount,
    /// Calendar months and leftover days, counted as `months * 30 + days`.
    CalendarMonths,
}

impl RemainingDays {
    pub fn days_left(&self, now: OffsetDateTime, not_after: OffsetDateTime) -> i64 {
        match self {
            RemainingDays::DayCount => (not_after - now).whole_days(),
            RemainingDays::CalendarMonths => calendar_days_left(now, not_after),
        }
    }
}

/// Decide whether `material` can keep serving `domain` in the configured environment.
pub fn evaluate(
    material: Option<&CertificateMaterial>,
    domain: &str,
    staging: bool,
    policy: RemainingDays,
) -> Decision {
    evaluate_at(material, domain, staging, policy, OffsetDateTime::now_utc())
}

pub fn evaluate_at(
    material: Option<&CertificateMaterial>,
    domain: &str,
    staging: bool,
    policy: RemainingDays,
    now: OffsetDateTime,
) -> Decision {
    let Some(material) = material else {
        return Decision::MustRenew(RenewReason::Missing);
    };
    if policy.days_left(now, material.not_after()) <= RENEW_DAYS_BEFORE {
        return Decision::MustRenew(RenewReason::Expiring);
    }
    let mut decision = Decision::Valid;
    if material.common_name() != domain {
        decision = Decision::MustRenew(RenewReason::DomainMismatch);
    }
    if material.is_staging() != staging {
        decision = Decision::MustRenew(RenewReason::EnvironmentMismatch);
    }
    decision
}

fn calendar_days_left(now: OffsetDateTime, not_after: OffsetDateTime) -> i64 {
    if not_after <= now {
        return (not_after - now).whole_days();
    }
    let mut months = (not_after.year() - now.year()) * 12
        + (not_after.month() as i32 - now.month() as i32);
    let Some(mut anchor) = add_months(now, months) else {
        return (not_after - now).whole_days();
    };
    if anchor > not_after {
        months -= 1;
        match add_months(now, months) {
            Some(earlier) => anchor = earlier,
            None => return (not_after - now).whole_days(),
        }
    }
    i64::from(months) * 30 + (not_after - anchor).whole_days()
}

/// Shift by whole calendar months, clamping the day to the target month's length.
fn add_months(t: OffsetDateTime, months: i32) -> Option<OffsetDateTime> {
    let index = t.year() * 12 + (t.month() as i32 - 1) + months;
    let year = index.div_euclid(12);
    let month = Month::January.nth_next(index.rem_euclid(12) as u8);
    let day = t.day().min(month.length(year));
    let date = Date::from_calendar_date(year, month, day).ok()?;
    Some(t.replace_date(date))
}
