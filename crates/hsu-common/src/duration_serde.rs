//! Serde helpers for human readable durations in configuration files.
//!
//! Accepts `"500ms"`, `"30s"`, `"5m"` and `"1h"`. Serializes to the largest
//! unit that represents the value exactly.
//!
//! ```
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Options {
//!     #[serde(with = "hsu_common::duration_serde")]
//!     interval: Duration,
//! }
//!
//! let options: Options = serde_json::from_str(r#"{"interval": "5m"}"#).unwrap();
//! assert_eq!(options.interval, Duration::from_secs(300));
//! ```

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Parses `"500ms"`, `"30s"`, `"5m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("Invalid duration: {}", s);

    // Check for "ms" BEFORE "s" since "ms" ends with 's'
    if let Some(num) = s.strip_suffix("ms") {
        let millis: u64 = num.trim().parse().map_err(|_| invalid())?;
        Ok(Duration::from_millis(millis))
    } else if let Some(num) = s.strip_suffix('s') {
        let secs: u64 = num.trim().parse().map_err(|_| invalid())?;
        Ok(Duration::from_secs(secs))
    } else if let Some(num) = s.strip_suffix('m') {
        let mins: u64 = num.trim().parse().map_err(|_| invalid())?;
        mins.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid)
    } else if let Some(num) = s.strip_suffix('h') {
        let hours: u64 = num.trim().parse().map_err(|_| invalid())?;
        hours.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid)
    } else {
        Err(format!("Duration must end with 'ms', 's', 'm' or 'h': {}", s))
    }
}

/// Formats a duration the way [`parse_duration`] reads it.
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() != 0 || duration.as_secs() == 0 {
        return format!("{}ms", duration.as_millis());
    }
    let secs = duration.as_secs();
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
