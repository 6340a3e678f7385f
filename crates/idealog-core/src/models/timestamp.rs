//! Timestamp normalization
//!
//! The canonical time representation is Unix milliseconds (`i64`). Records
//! that arrive from the remote store or from older local data may carry a
//! structured `{seconds, nanoseconds}` object or an ISO-8601 string instead;
//! [`RawTimestamp::normalize`] folds all of them into milliseconds.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};

/// A timestamp in any of the representations we accept at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Canonical Unix milliseconds
    Millis(i64),
    /// Remote structured timestamp
    Structured {
        /// Whole seconds since the epoch
        seconds: i64,
        /// Sub-second part
        #[serde(default, alias = "nanos")]
        nanoseconds: i64,
    },
    /// Textual date (ISO-8601 / RFC 3339, or a bare date)
    Text(String),
}

impl RawTimestamp {
    /// Convert to canonical milliseconds.
    ///
    /// Returns `None` when the value cannot be interpreted as an instant.
    /// Normalizing an already canonical value returns it unchanged.
    pub fn normalize(&self) -> Option<i64> {
        match self {
            Self::Millis(millis) => Some(*millis),
            Self::Structured {
                seconds,
                nanoseconds,
            } => seconds
                .checked_mul(1000)?
                .checked_add(nanoseconds / 1_000_000),
            Self::Text(text) => parse_text_timestamp(text),
        }
    }

    /// Convert to canonical milliseconds, falling back to the epoch.
    pub fn normalize_or_epoch(&self) -> i64 {
        self.normalize().unwrap_or_else(|| {
            tracing::warn!("Unparseable timestamp {:?}; using epoch", self);
            0
        })
    }

    /// Read a raw timestamp out of a `SQLite` column value.
    pub fn from_value_ref(value: ValueRef<'_>) -> Option<Self> {
        match value {
            ValueRef::Integer(millis) => Some(Self::Millis(millis)),
            #[allow(clippy::cast_possible_truncation)]
            ValueRef::Real(millis) => Some(Self::Millis(millis as i64)),
            ValueRef::Text(bytes) => Some(Self::Text(String::from_utf8_lossy(bytes).into_owned())),
            ValueRef::Null | ValueRef::Blob(_) => None,
        }
    }

    /// Whether the value is already in canonical form.
    pub const fn is_canonical(&self) -> bool {
        matches!(self, Self::Millis(_))
    }
}

impl From<i64> for RawTimestamp {
    fn from(millis: i64) -> Self {
        Self::Millis(millis)
    }
}

/// Parse a textual timestamp into Unix milliseconds.
///
/// Accepts numeric strings, serialized structured timestamps, RFC 3339,
/// naive ISO date-times (treated as UTC) and bare `YYYY-MM-DD` dates.
pub fn parse_text_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(millis) = text.parse::<i64>() {
        return Some(millis);
    }

    if text.starts_with('{') {
        return match serde_json::from_str::<RawTimestamp>(text).ok()? {
            RawTimestamp::Text(_) => None,
            structured => structured.normalize(),
        };
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp_millis());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp_millis())
}
