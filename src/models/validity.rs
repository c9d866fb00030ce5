use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// `HH:MM:SS`, e.g. `08:00:00`.
pub const TIME_OF_DAY_FORMAT: &str = "%H:%M:%S";
/// `YYYY-MM-DD`, e.g. `2025-01-31`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ── Policy Type ──────────────────────────────────────────────

/// Which kind of time window a token's validity policies describe.
///
/// All policies attached to one token share the token's selected type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyType {
    Daily,
    Weekly,
    DateRange,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::Daily => "DAILY",
            PolicyType::Weekly => "WEEKLY",
            PolicyType::DateRange => "DATERANGE",
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyType {
    type Err = ValidityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAILY" => Ok(PolicyType::Daily),
            "WEEKLY" => Ok(PolicyType::Weekly),
            "DATERANGE" => Ok(PolicyType::DateRange),
            _ => Err(ValidityError::InvalidPolicyType),
        }
    }
}

// ── Weekdays ─────────────────────────────────────────────────

const WEEKDAY_NAMES: [(&str, Weekday); 7] = [
    ("MONDAY", Weekday::Mon),
    ("TUESDAY", Weekday::Tue),
    ("WEDNESDAY", Weekday::Wed),
    ("THURSDAY", Weekday::Thu),
    ("FRIDAY", Weekday::Fri),
    ("SATURDAY", Weekday::Sat),
    ("SUNDAY", Weekday::Sun),
];

/// Parse an upper-case weekday name (`MONDAY` … `SUNDAY`).
pub fn parse_weekday(name: &str) -> Option<Weekday> {
    WEEKDAY_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, day)| *day)
}

pub fn weekday_name(day: Weekday) -> &'static str {
    WEEKDAY_NAMES[day.num_days_from_monday() as usize].0
}

/// Monday = 1 … Sunday = 7.
pub fn weekday_index(day: Weekday) -> u32 {
    day.number_from_monday()
}

pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_OF_DAY_FORMAT).ok()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

// ── Window ───────────────────────────────────────────────────

/// Bounds within a single day. Both ends are exclusive at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// One time window a token may be used in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidityWindow {
    Daily(DailyHours),
    Weekly {
        start_day: Weekday,
        end_day: Weekday,
        hours: Option<DailyHours>,
    },
    DateRange {
        start: NaiveDate,
        end: NaiveDate,
    },
}

/// Flattened representation used by storage rows and wire payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowColumns {
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub start_day: Option<&'static str>,
    pub end_day: Option<&'static str>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ValidityWindow {
    pub fn policy_type(&self) -> PolicyType {
        match self {
            ValidityWindow::Daily(_) => PolicyType::Daily,
            ValidityWindow::Weekly { .. } => PolicyType::Weekly,
            ValidityWindow::DateRange { .. } => PolicyType::DateRange,
        }
    }

    pub fn columns(&self) -> WindowColumns {
        match self {
            ValidityWindow::Daily(hours) => WindowColumns {
                start_time: Some(hours.start),
                end_time: Some(hours.end),
                ..Default::default()
            },
            ValidityWindow::Weekly {
                start_day,
                end_day,
                hours,
            } => WindowColumns {
                start_time: hours.map(|h| h.start),
                end_time: hours.map(|h| h.end),
                start_day: Some(weekday_name(*start_day)),
                end_day: Some(weekday_name(*end_day)),
                ..Default::default()
            },
            ValidityWindow::DateRange { start, end } => WindowColumns {
                start_date: Some(*start),
                end_date: Some(*end),
                ..Default::default()
            },
        }
    }

    /// Rebuild a window from stored columns. Fails when the columns of the
    /// declared type are missing, so a half-written row never evaluates.
    pub fn from_columns(
        policy_type: PolicyType,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
        start_day: Option<&str>,
        end_day: Option<&str>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Self, ValidityError> {
        match policy_type {
            PolicyType::Daily => match (start_time, end_time) {
                (Some(start), Some(end)) => Ok(ValidityWindow::Daily(DailyHours { start, end })),
                _ => Err(ValidityError::TimeRequired),
            },
            PolicyType::Weekly => {
                let start_day = start_day
                    .filter(|d| !d.is_empty())
                    .ok_or(ValidityError::DayRequired)?;
                let end_day = end_day
                    .filter(|d| !d.is_empty())
                    .ok_or(ValidityError::DayRequired)?;
                let hours = match (start_time, end_time) {
                    (Some(start), Some(end)) => Some(DailyHours { start, end }),
                    _ => None,
                };
                Ok(ValidityWindow::Weekly {
                    start_day: parse_weekday(start_day).ok_or(ValidityError::InvalidStartDay)?,
                    end_day: parse_weekday(end_day).ok_or(ValidityError::InvalidEndDay)?,
                    hours,
                })
            }
            PolicyType::DateRange => match (start_date, end_date) {
                (Some(start), Some(end)) => Ok(ValidityWindow::DateRange { start, end }),
                _ => Err(ValidityError::DateRequired),
            },
        }
    }
}

// ── Records ──────────────────────────────────────────────────

/// A persisted validity policy attached to one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityPolicy {
    pub id: i64,
    pub token_id: Uuid,
    pub workspace_id: String,
    pub window: ValidityWindow,
}

impl ValidityPolicy {
    pub fn policy_type(&self) -> PolicyType {
        self.window.policy_type()
    }
}

/// A policy waiting to be written in a batch with its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewValidityPolicy {
    pub token_id: Uuid,
    pub workspace_id: String,
    pub window: ValidityWindow,
}

/// Policy fields as they travel over HTTP and inside exported token files.
///
/// Every field is an optional string; [`crate::middleware::validity::check_validity_policy`]
/// turns a list of these into [`ValidityWindow`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidityPolicyPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_type: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub start_day: Option<String>,
    pub end_day: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ValidityPolicyPayload {
    pub fn daily(start: &str, end: &str) -> Self {
        Self {
            start_time: Some(start.to_string()),
            end_time: Some(end.to_string()),
            ..Default::default()
        }
    }

    pub fn weekly(start_day: &str, end_day: &str) -> Self {
        Self {
            start_day: Some(start_day.to_string()),
            end_day: Some(end_day.to_string()),
            ..Default::default()
        }
    }

    pub fn date_range(start: &str, end: &str) -> Self {
        Self {
            start_date: Some(start.to_string()),
            end_date: Some(end.to_string()),
            ..Default::default()
        }
    }

    pub fn with_hours(mut self, start: &str, end: &str) -> Self {
        self.start_time = Some(start.to_string());
        self.end_time = Some(end.to_string());
        self
    }
}

impl From<&ValidityPolicy> for ValidityPolicyPayload {
    fn from(policy: &ValidityPolicy) -> Self {
        let cols = policy.window.columns();
        Self {
            id: Some(policy.id),
            token_id: Some(policy.token_id.to_string()),
            policy_type: Some(policy.policy_type().to_string()),
            start_time: cols
                .start_time
                .map(|t| t.format(TIME_OF_DAY_FORMAT).to_string()),
            end_time: cols.end_time.map(|t| t.format(TIME_OF_DAY_FORMAT).to_string()),
            start_day: cols.start_day.map(String::from),
            end_day: cols.end_day.map(String::from),
            start_date: cols.start_date.map(|d| d.format(DATE_FORMAT).to_string()),
            end_date: cols.end_date.map(|d| d.format(DATE_FORMAT).to_string()),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────

/// A policy definition that must not be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidityError {
    #[error("policyType is invalid.")]
    InvalidPolicyType,
    #[error("startTime and endTime is required.")]
    TimeRequired,
    #[error("startTime is invalid.")]
    InvalidStartTime,
    #[error("endTime is invalid.")]
    InvalidEndTime,
    #[error("startTime must be before endTime.")]
    TimeOrder,
    #[error("startDay and endDay is required.")]
    DayRequired,
    #[error("startDay is invalid.")]
    InvalidStartDay,
    #[error("endDay is invalid.")]
    InvalidEndDay,
    #[error("startDay must not be after endDay.")]
    DayOrder,
    #[error("startDate and endDate is required.")]
    DateRequired,
    #[error("startDate is invalid.")]
    InvalidStartDate,
    #[error("endDate is invalid.")]
    InvalidEndDate,
    #[error("startDate must be before endDate.")]
    DateOrder,
}
