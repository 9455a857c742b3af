use crate::error::CoreError;
use chrono_tz::Tz;
use std::str::FromStr;

/// Validate an IANA timezone name.
///
/// The timezone field on a rule is best-effort display metadata; occurrence
/// arithmetic is local-wall-clock and never converts between zones.
pub fn validate_timezone(timezone: &str) -> Result<(), CoreError> {
    Tz::from_str(timezone)
        .map(|_| ())
        .map_err(|_| CoreError::InvalidTimezone(timezone.to_string()))
}
