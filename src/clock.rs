//! Wall-clock time in a configured zone, with the same fallback chain the
//! original agent uses when the requested zone can't be loaded.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// A resolved timezone, with a human-readable name of what was actually used.
#[derive(Debug, Clone)]
pub struct Clock {
    tz: ResolvedTz,
}

#[derive(Debug, Clone)]
enum ResolvedTz {
    Named(Tz, String),
    FixedOffsetSeconds(i32, String),
    SystemLocal(String),
}

impl Clock {
    /// Resolve `tz_name` via: named IANA zone, then (if it's the well-known
    /// "Asia/Seoul" name) a hardcoded +09:00 offset, then the system's
    /// local timezone, then UTC.
    pub fn new(tz_name: &str) -> Self {
        if let Ok(tz) = tz_name.parse::<Tz>() {
            return Self {
                tz: ResolvedTz::Named(tz, tz_name.to_string()),
            };
        }
        if tz_name == "Asia/Seoul" {
            return Self {
                tz: ResolvedTz::FixedOffsetSeconds(9 * 3600, "Asia/Seoul (UTC+9)".to_string()),
            };
        }
        Self {
            tz: ResolvedTz::SystemLocal("system local".to_string()),
        }
    }

    /// Name of the zone actually in effect (may differ from the requested one).
    pub fn actual_name(&self) -> &str {
        match &self.tz {
            ResolvedTz::Named(_, name) => name,
            ResolvedTz::FixedOffsetSeconds(_, name) => name,
            ResolvedTz::SystemLocal(name) => name,
        }
    }

    /// Current time in the configured zone.
    pub fn now_local(&self) -> DateTime<chrono::FixedOffset> {
        match &self.tz {
            ResolvedTz::Named(tz, _) => Utc::now().with_timezone(tz).fixed_offset(),
            ResolvedTz::FixedOffsetSeconds(secs, _) => {
                let offset = chrono::FixedOffset::east_opt(*secs).unwrap();
                Utc::now().with_timezone(&offset)
            }
            ResolvedTz::SystemLocal(_) => {
                let local = chrono::Local::now();
                Utc::now().with_timezone(local.offset())
            }
        }
    }

    /// Current UTC time.
    pub fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Truncate seconds/microseconds and convert a local instant to UTC.
    pub fn to_utc_minute(&self, local: DateTime<chrono::FixedOffset>) -> DateTime<Utc> {
        floor_to_minute(local).with_timezone(&Utc)
    }
}

/// Zero seconds and nanoseconds, keeping the same offset/zone.
pub fn floor_to_minute<Tzv: TimeZone>(dt: DateTime<Tzv>) -> DateTime<Tzv> {
    use chrono::Timelike;
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_zone_resolves() {
        let clock = Clock::new("America/New_York");
        assert_eq!(clock.actual_name(), "America/New_York");
    }

    #[test]
    fn asia_seoul_resolves_as_a_named_iana_zone() {
        // chrono-tz ships Asia/Seoul, so this takes the named-zone path, not
        // the hardcoded +09:00 fallback (which exists for environments
        // where the tz database is unavailable).
        let clock = Clock::new("Asia/Seoul");
        assert_eq!(clock.actual_name(), "Asia/Seoul");
    }

    #[test]
    fn unresolvable_zone_falls_back_to_system_local() {
        let clock = Clock::new("Not/A_Real_Zone");
        assert_eq!(clock.actual_name(), "system local");
    }

    #[test]
    fn floor_to_minute_zeroes_seconds() {
        let now = Utc::now();
        let floored = floor_to_minute(now);
        assert_eq!(floored.format("%S").to_string(), "00");
    }
}
