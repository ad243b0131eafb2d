use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const ACCEPTED_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// An instant carried as text on the wire.
///
/// Zone-less values are taken as UTC, values with an offset are normalized to UTC.
/// The canonical text form sorts lexicographically in time order.
///
/// # Example
///
/// ```
/// use auction::utils::timestamp::BidTimestamp;
///
/// let timestamp: BidTimestamp = "2024-01-01 00:05:00".parse().unwrap();
/// assert_eq!(timestamp.to_string(), "2024-01-01T00:05:00");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BidTimestamp(NaiveDateTime);

impl BidTimestamp {
    pub fn now() -> Self {
        BidTimestamp(Utc::now().naive_utc())
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    pub fn as_micros(&self) -> i64 {
        self.0.and_utc().timestamp_micros()
    }
}

impl From<NaiveDateTime> for BidTimestamp {
    fn from(value: NaiveDateTime) -> Self {
        BidTimestamp(value)
    }
}

impl FromStr for BidTimestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut last_error = None;
        for format in ACCEPTED_FORMATS {
            match NaiveDateTime::parse_from_str(s, format) {
                Ok(value) => return Ok(BidTimestamp(value)),
                Err(error) => last_error = Some(error),
            }
        }

        match DateTime::parse_from_rfc3339(s) {
            Ok(value) => Ok(BidTimestamp(value.with_timezone(&Utc).naive_utc())),
            Err(error) => Err(last_error.unwrap_or(error)),
        }
    }
}

impl Display for BidTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(CANONICAL_FORMAT))
    }
}

impl Serialize for BidTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

struct BidTimestampVisitor;

impl Visitor<'_> for BidTimestampVisitor {
    type Value = BidTimestamp;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("an ISO 8601 timestamp")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        value.parse().map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for BidTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(BidTimestampVisitor)
    }
}
