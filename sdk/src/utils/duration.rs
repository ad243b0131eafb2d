use humantime::format_duration;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
    time::Duration,
};

/// Human-readable duration used throughout the configuration (`"500ms"`, `"5s"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuctionDuration {
    duration: Duration,
}

impl AuctionDuration {
    pub const fn new(duration: Duration) -> AuctionDuration {
        AuctionDuration { duration }
    }

    pub const fn from_millis(millis: u64) -> AuctionDuration {
        AuctionDuration {
            duration: Duration::from_millis(millis),
        }
    }

    pub fn as_human_time_string(&self) -> String {
        format!("{}", format_duration(self.duration))
    }

    pub fn as_millis(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    pub fn get_duration(&self) -> Duration {
        self.duration
    }

    pub fn is_zero(&self) -> bool {
        self.duration.is_zero()
    }

    /// Scales the duration by `factor`, capped at `max`.
    pub fn scale_capped(&self, factor: f64, max: AuctionDuration) -> AuctionDuration {
        let scaled = self.duration.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= max.duration.as_secs_f64() {
            return max;
        }

        AuctionDuration {
            duration: Duration::from_secs_f64(scaled.max(0.0)),
        }
    }
}

impl FromStr for AuctionDuration {
    type Err = humantime::DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = &s.to_lowercase();
        if s == "0" || s == "none" || s == "disabled" {
            Ok(AuctionDuration {
                duration: Duration::ZERO,
            })
        } else {
            Ok(AuctionDuration {
                duration: humantime::parse_duration(s)?,
            })
        }
    }
}

impl From<Duration> for AuctionDuration {
    fn from(duration: Duration) -> Self {
        AuctionDuration { duration }
    }
}

impl Default for AuctionDuration {
    fn default() -> Self {
        AuctionDuration {
            duration: Duration::ZERO,
        }
    }
}

impl Display for AuctionDuration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_human_time_string())
    }
}
