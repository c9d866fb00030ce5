//! Validity-policy engine.
//!
//! Decides whether a token may be used at a given local wall-clock instant,
//! and validates policy definitions before they are persisted. Nothing here
//! performs I/O; callers hand in a snapshot of the token and its windows.
//!
//! Every boundary comparison is strict: an instant that lands exactly on a
//! start or end bound is outside the window.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::models::token::TokenAuthInfo;
use crate::models::validity::{
    parse_date, parse_time_of_day, parse_weekday, weekday_index, DailyHours, PolicyType,
    ValidityError, ValidityPolicyPayload, ValidityWindow,
};

/// Why a known token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Expired,
    OutsideValidityWindow,
}

/// Full decision for one token at `now`: absolute expiry first, then the
/// validity windows when the token has them enabled.
pub fn evaluate(
    now: DateTime<Utc>,
    tz: FixedOffset,
    info: &TokenAuthInfo,
) -> Result<(), Denial> {
    let token = &info.token;
    if token.is_expired_at(now) {
        return Err(Denial::Expired);
    }
    if !token.enable_validity_policy {
        return Ok(());
    }
    let Some(policy_type) = token.policy_type else {
        return Err(Denial::OutsideValidityWindow);
    };
    let local = now.with_timezone(&tz).naive_local();
    if authorize(local, policy_type, &info.windows) {
        Ok(())
    } else {
        Err(Denial::OutsideValidityWindow)
    }
}

/// `true` when any window of `policy_type` accepts `now`.
///
/// Windows of another type are ignored; they can only exist if the token's
/// type changed without its policy set being replaced.
pub fn authorize(now: NaiveDateTime, policy_type: PolicyType, windows: &[ValidityWindow]) -> bool {
    windows
        .iter()
        .filter(|w| w.policy_type() == policy_type)
        .any(|w| window_matches(now, w))
}

fn window_matches(now: NaiveDateTime, window: &ValidityWindow) -> bool {
    match window {
        ValidityWindow::Daily(hours) => within_hours(now.time(), hours),
        ValidityWindow::Weekly {
            start_day,
            end_day,
            hours,
        } => {
            // flat range: MONDAY(1) ..= SUNDAY(7), never wraps
            let today = weekday_index(now.weekday());
            if today < weekday_index(*start_day) || today > weekday_index(*end_day) {
                return false;
            }
            hours.as_ref().map_or(true, |h| within_hours(now.time(), h))
        }
        ValidityWindow::DateRange { start, end } => {
            now > start.and_time(NaiveTime::MIN) && now < end.and_time(NaiveTime::MIN)
        }
    }
}

fn within_hours(now: NaiveTime, hours: &DailyHours) -> bool {
    // stored bounds carry whole seconds only
    let now = now.with_nanosecond(0).unwrap_or(now);
    now > hours.start && now < hours.end
}

// ── Validation ───────────────────────────────────────────────

/// Validate every policy of a create/update request and parse it into a
/// window. The first violation wins; nothing is returned partially.
pub fn check_validity_policy(
    policy_type: PolicyType,
    policies: &[ValidityPolicyPayload],
) -> Result<Vec<ValidityWindow>, ValidityError> {
    policies
        .iter()
        .map(|p| match policy_type {
            PolicyType::Daily => check_daily(p),
            PolicyType::Weekly => check_weekly(p),
            PolicyType::DateRange => check_date_range(p),
        })
        .collect()
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn check_hours(start: &str, end: &str) -> Result<DailyHours, ValidityError> {
    let start = parse_time_of_day(start).ok_or(ValidityError::InvalidStartTime)?;
    let end = parse_time_of_day(end).ok_or(ValidityError::InvalidEndTime)?;
    if start >= end {
        return Err(ValidityError::TimeOrder);
    }
    Ok(DailyHours { start, end })
}

fn check_daily(p: &ValidityPolicyPayload) -> Result<ValidityWindow, ValidityError> {
    match (present(&p.start_time), present(&p.end_time)) {
        (Some(start), Some(end)) => Ok(ValidityWindow::Daily(check_hours(start, end)?)),
        _ => Err(ValidityError::TimeRequired),
    }
}

fn check_weekly(p: &ValidityPolicyPayload) -> Result<ValidityWindow, ValidityError> {
    let (Some(start_day), Some(end_day)) = (present(&p.start_day), present(&p.end_day)) else {
        return Err(ValidityError::DayRequired);
    };
    let start_day = parse_weekday(start_day).ok_or(ValidityError::InvalidStartDay)?;
    let end_day = parse_weekday(end_day).ok_or(ValidityError::InvalidEndDay)?;
    if weekday_index(start_day) > weekday_index(end_day) {
        return Err(ValidityError::DayOrder);
    }
    let hours = match (present(&p.start_time), present(&p.end_time)) {
        (None, None) => None,
        (Some(start), Some(end)) => Some(check_hours(start, end)?),
        _ => return Err(ValidityError::TimeRequired),
    };
    Ok(ValidityWindow::Weekly {
        start_day,
        end_day,
        hours,
    })
}

fn check_date_range(p: &ValidityPolicyPayload) -> Result<ValidityWindow, ValidityError> {
    let (Some(start), Some(end)) = (present(&p.start_date), present(&p.end_date)) else {
        return Err(ValidityError::DateRequired);
    };
    let start = parse_date(start).ok_or(ValidityError::InvalidStartDate)?;
    let end = parse_date(end).ok_or(ValidityError::InvalidEndDate)?;
    if start >= end {
        return Err(ValidityError::DateOrder);
    }
    Ok(ValidityWindow::DateRange { start, end })
}
