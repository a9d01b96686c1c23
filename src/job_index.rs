//! In-memory minute-of-day → jobs map, and next-fire lookup.
//!
//! Guarded by a `parking_lot::RwLock`, matching the teacher's concurrency
//! style for shared in-process state: readers take a snapshot of the
//! minute-bucket list before iterating, writers replace the whole map.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Timelike};
use parking_lot::RwLock;

use crate::types::Job;

type MinuteKey = (u32, u32);

/// Thread-safe (hour, minute) → jobs index, reloaded wholesale from the
/// store's enabled-jobs query.
#[derive(Default)]
pub struct JobIndex {
    map: RwLock<HashMap<MinuteKey, Vec<Arc<Job>>>>,
}

impl JobIndex {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the map atomically from a freshly-fetched list of enabled jobs.
    pub fn reload(&self, jobs: Vec<Job>) {
        let mut mp: HashMap<MinuteKey, Vec<Arc<Job>>> = HashMap::new();
        for job in jobs {
            let job = Arc::new(job);
            for sched in job.schedule_entries() {
                match sched.hour {
                    None => {
                        for h in 0..24u32 {
                            mp.entry((h, sched.minute)).or_default().push(job.clone());
                        }
                    }
                    Some(h) => {
                        mp.entry((h, sched.minute)).or_default().push(job.clone());
                    }
                }
            }
        }
        *self.map.write() = mp;
    }

    /// Snapshot of the jobs due at `(hour, minute)`. May be empty.
    pub fn list_for(&self, hour: u32, minute: u32) -> Vec<Arc<Job>> {
        self.map
            .read()
            .get(&(hour, minute))
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of (job, schedule-entry) pairs currently indexed.
    pub fn total_schedules(&self) -> usize {
        self.map.read().values().map(|v| v.len()).sum()
    }

    /// The smallest `(h, m)` strictly after `from`'s `(hour, minute)`,
    /// wrapping to the next day if none remain today. Returns `None` iff
    /// the index is empty. The returned instant has seconds/micros zeroed.
    pub fn next_fire_after(&self, from: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let map = self.map.read();
        if map.is_empty() {
            return None;
        }
        let cur_hour = from.hour();
        let cur_minute = from.minute();

        let mut keys: Vec<MinuteKey> = map.keys().copied().collect();
        keys.sort_unstable();

        if let Some(&(h, m)) = keys
            .iter()
            .find(|&&(h, m)| (h, m) > (cur_hour, cur_minute))
        {
            return Some(zero_to(from, h, m));
        }

        let &(h, m) = keys.first().unwrap();
        Some(zero_to(from, h, m) + Duration::days(1))
    }
}

fn zero_to(base: DateTime<FixedOffset>, hour: u32, minute: u32) -> DateTime<FixedOffset> {
    base.with_hour(hour)
        .and_then(|d| d.with_minute(minute))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Schedule;
    use chrono::TimeZone;

    fn job(id: &str, schedules: Vec<Schedule>) -> Job {
        Job {
            job_id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            schedules: Some(schedules),
            hour: None,
            minute: 0,
            actions: None,
            method: String::new(),
            url: None,
            headers: Default::default(),
            params: Default::default(),
            body: None,
            timeout_sec: None,
            retry: None,
            use_curl: false,
            use_cloudscraper: false,
        }
    }

    fn local(h: u32, m: u32) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(0).unwrap();
        offset
            .with_ymd_and_hms(2026, 7, 27, h, m, 0)
            .unwrap()
    }

    #[test]
    fn null_hour_expands_to_24_entries() {
        let index = JobIndex::new();
        index.reload(vec![job("j1", vec![Schedule { hour: None, minute: 15 }])]);
        for h in 0..24 {
            assert_eq!(index.list_for(h, 15).len(), 1, "hour {h}");
        }
        assert_eq!(index.list_for(0, 16).len(), 0);
    }

    #[test]
    fn job_with_no_schedule_defaults_to_every_hour_minute_zero() {
        let index = JobIndex::new();
        let mut j = job("j1", vec![]);
        j.schedules = None;
        index.reload(vec![j]);
        for h in 0..24 {
            assert_eq!(index.list_for(h, 0).len(), 1);
        }
    }

    #[test]
    fn list_for_returns_exactly_matching_jobs() {
        let index = JobIndex::new();
        index.reload(vec![
            job("j1", vec![Schedule { hour: Some(10), minute: 0 }]),
            job("j2", vec![Schedule { hour: Some(11), minute: 0 }]),
        ]);
        assert_eq!(index.list_for(10, 0).len(), 1);
        assert_eq!(index.list_for(11, 0).len(), 1);
        assert_eq!(index.list_for(12, 0).len(), 0);
    }

    #[test]
    fn next_fire_after_is_strictly_greater_and_minimal() {
        let index = JobIndex::new();
        index.reload(vec![job(
            "j1",
            vec![Schedule {
                hour: None,
                minute: 15,
            }],
        )]);
        let next = index.next_fire_after(local(8, 16)).unwrap();
        assert_eq!((next.hour(), next.minute()), (9, 15));
        assert!(next > local(8, 16));
    }

    #[test]
    fn next_fire_after_wraps_to_next_day() {
        let index = JobIndex::new();
        index.reload(vec![job(
            "j1",
            vec![Schedule {
                hour: Some(5),
                minute: 0,
            }],
        )]);
        let next = index.next_fire_after(local(23, 0)).unwrap();
        assert_eq!((next.hour(), next.minute()), (5, 0));
        assert!(next > local(23, 0));
    }

    #[test]
    fn empty_index_returns_none() {
        let index = JobIndex::new();
        assert!(index.next_fire_after(local(0, 0)).is_none());
    }
}
