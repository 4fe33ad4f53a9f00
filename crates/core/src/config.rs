//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! while a submission is being assembled, which can lead to inconsistent behaviour in
//! multi-threaded runtimes and test harnesses.

use crate::constants::{CANONICAL_DATETIME_FORMAT, DEFAULT_FORM_NAMESPACE};
use crate::{CoreError, CoreResult};
use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    form_namespace: String,
    utc_offset: FixedOffset,
    default_encounter_role: Option<String>,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    pub fn new(
        form_namespace: String,
        utc_offset: FixedOffset,
        default_encounter_role: Option<String>,
    ) -> CoreResult<Self> {
        if form_namespace.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "form_namespace cannot be empty".into(),
            ));
        }

        Ok(Self {
            form_namespace,
            utc_offset,
            default_encounter_role: default_encounter_role.filter(|r| !r.trim().is_empty()),
        })
    }

    pub fn form_namespace(&self) -> &str {
        &self.form_namespace
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub fn default_encounter_role(&self) -> Option<&str> {
        self.default_encounter_role.as_deref()
    }

    /// Render `instant` as a canonical date-time in the configured offset.
    pub fn canonical_datetime<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> String {
        instant
            .with_timezone(&self.utc_offset)
            .format(CANONICAL_DATETIME_FORMAT)
            .to_string()
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            form_namespace: DEFAULT_FORM_NAMESPACE.into(),
            utc_offset: utc(),
            default_encounter_role: None,
        }
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

/// Parse the rendering offset from an optional string value.
///
/// Accepts `Z`, `+03:00`, `-0500` and `+03`. If `value` is `None` or empty/whitespace,
/// returns UTC.
pub fn utc_offset_from_env_value(value: Option<String>) -> CoreResult<FixedOffset> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let Some(value) = value else {
        return Ok(utc());
    };
    if value.eq_ignore_ascii_case("z") {
        return Ok(utc());
    }

    let invalid = || CoreError::InvalidInput(format!("invalid UTC offset: '{value}'"));

    let (sign, rest) = match value.as_bytes().first() {
        Some(b'+') => (1, &value[1..]),
        Some(b'-') => (-1, &value[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let (hours, minutes) = match digits.len() {
        2 => (&digits[..2], "0"),
        4 => (&digits[..2], &digits[2..]),
        _ => return Err(invalid()),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Parse the form namespace from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_FORM_NAMESPACE`].
pub fn form_namespace_from_env_value(value: Option<String>) -> CoreResult<String> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    match value {
        None => Ok(DEFAULT_FORM_NAMESPACE.into()),
        Some(ns) if ns.chars().any(char::is_whitespace) => Err(CoreError::InvalidInput(
            format!("form namespace must not contain whitespace: '{ns}'"),
        )),
        Some(ns) => Ok(ns),
    }
}
