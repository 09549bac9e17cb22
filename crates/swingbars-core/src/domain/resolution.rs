use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::{Duration, Time};

use crate::domain::UtcDateTime;
use crate::InvalidRangeError;

/// Bar resolution supported by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Resolution {
    Daily,
    Minute,
}

impl Resolution {
    pub const ALL: [Resolution; 2] = [Resolution::Daily, Resolution::Minute];

    /// Short code used in table names and on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "1d",
            Self::Minute => "1m",
        }
    }

    /// Distance between two consecutive aligned timestamps.
    pub const fn step(self) -> Duration {
        match self {
            Self::Daily => Duration::DAY,
            Self::Minute => Duration::MINUTE,
        }
    }

    /// Floor `ts` to the start of its bar period (midnight UTC or whole minute).
    pub fn align(self, ts: UtcDateTime) -> UtcDateTime {
        let inner = ts.into_inner();
        let aligned = match self {
            Self::Daily => inner.replace_time(Time::MIDNIGHT),
            Self::Minute => {
                let time = inner.time();
                let floored = Time::from_hms(time.hour(), time.minute(), 0).unwrap_or(Time::MIDNIGHT);
                inner.replace_time(floored)
            }
        };
        UtcDateTime::from_offset_datetime(aligned).unwrap_or(ts)
    }

    pub fn is_aligned(self, ts: UtcDateTime) -> bool {
        self.align(ts) == ts
    }

    /// Timeframe parameter of the Alpaca market-data API.
    pub const fn alpaca_timeframe(self) -> &'static str {
        match self {
            Self::Daily => "1Day",
            Self::Minute => "1Min",
        }
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = InvalidRangeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1d" | "d" | "day" | "daily" => Ok(Self::Daily),
            "1m" | "1min" | "min" | "minute" => Ok(Self::Minute),
            _ => Err(InvalidRangeError::UnsupportedResolution {
                value: value.to_owned(),
            }),
        }
    }
}

impl Serialize for Resolution {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
