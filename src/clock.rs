//! Time helpers. Everything inside the engine is Unix milliseconds; chrono is
//! only used at the edges (parsing wire strings, formatting, calendar years).

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc};

use crate::limits::DAY_MS;
use crate::model::{Ms, Span};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

pub fn offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

/// Local midnight (in the business offset) at or before `ms`.
pub fn day_start(ms: Ms, utc_offset_minutes: i32) -> Ms {
    let shift = utc_offset_minutes as Ms * 60_000;
    let local = ms.saturating_add(shift);
    local.saturating_sub(local.rem_euclid(DAY_MS)).saturating_sub(shift)
}

/// Widen a span to whole local days: `[start of first day, start of the day after the last)`.
pub fn widen_to_days(span: &Span, utc_offset_minutes: i32) -> Span {
    Span::new(
        day_start(span.start, utc_offset_minutes),
        day_start(span.end, utc_offset_minutes).saturating_add(DAY_MS),
    )
}

/// Whole days covered by a span, never less than one.
pub fn day_count(span: &Span) -> u32 {
    let days = span.duration_ms() / DAY_MS;
    days.clamp(1, u32::MAX as Ms) as u32
}

pub fn year_of(ms: Ms, utc_offset_minutes: i32) -> i32 {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&offset(utc_offset_minutes)).year())
        .unwrap_or(1970)
}

/// Parse a wire timestamp. Accepts RFC 3339, naive date-times and plain dates
/// (interpreted in the business offset), or raw Unix milliseconds.
pub fn parse_instant(input: &str, utc_offset_minutes: i32) -> Option<Ms> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    let off = offset(utc_offset_minutes);
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return off.from_local_datetime(&naive).single().map(|d| d.timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return off.from_local_datetime(&naive).single().map(|d| d.timestamp_millis());
    }
    s.parse::<Ms>().ok()
}

pub fn format_instant(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Wall-clock rendering in the business offset, for human-facing text.
pub fn format_local(ms: Ms, utc_offset_minutes: i32) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&offset(utc_offset_minutes)).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Serde adapter: RFC 3339 strings for human-readable formats (JSON),
/// plain integers for binary ones (the WAL).
pub mod serde_ms {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_instant, parse_instant};
    use crate::model::Ms;

    pub fn serialize<S: Serializer>(ms: &Ms, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&format_instant(*ms))
        } else {
            serializer.serialize_i64(*ms)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Ms, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(MsVisitor)
        } else {
            Ms::deserialize(deserializer)
        }
    }

    struct MsVisitor;

    impl Visitor<'_> for MsVisitor {
        type Value = Ms;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a timestamp string or unix milliseconds")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Ms, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Ms, E> {
            Ms::try_from(v).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Ms, E> {
            parse_instant(v, 0).ok_or_else(|| E::custom(format!("invalid timestamp: {v}")))
        }
    }
}

pub mod serde_ms_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::model::Ms;

    struct Repr(Ms);

    impl Serialize for Repr {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            super::serde_ms::serialize(&self.0, serializer)
        }
    }

    impl<'de> Deserialize<'de> for Repr {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            super::serde_ms::deserialize(deserializer).map(Repr)
        }
    }

    pub fn serialize<S: Serializer>(ms: &Option<Ms>, serializer: S) -> Result<S::Ok, S::Error> {
        ms.map(Repr).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Ms>, D::Error> {
        Ok(Option::<Repr>::deserialize(deserializer)?.map(|r| r.0))
    }
}
