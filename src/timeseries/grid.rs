//! Output time grid generation and timestep policy resolution.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::obs::{GridMode, Settings};

/// Generate the fixed grid `starttime..=endtime` at `timestep` minutes,
/// aligned to timestep multiples since midnight UTC. A zero timestep
/// produces an empty grid (the "all data times" mode carries no grid).
#[must_use]
pub fn generate(starttime: DateTime<Utc>, endtime: DateTime<Utc>, timestep: u32) -> Vec<DateTime<Utc>> {
    if timestep == 0 || starttime > endtime {
        return Vec::new();
    }

    let step = i64::from(timestep) * 60;
    let midnight = starttime
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc();
    let offset = (starttime - midnight).num_seconds();
    let first = if offset % step == 0 {
        starttime
    } else {
        starttime + Duration::seconds(step - offset % step)
    };

    let mut times = Vec::new();
    let mut t = first;
    while t <= endtime {
        times.push(t);
        t += Duration::seconds(step);
    }
    times
}

/// Resolve the valid output timesteps for each station under the four
/// policies: latest, all data times, requested+data, listed only.
#[must_use]
pub fn valid_timesteps_per_station(
    station_times: &BTreeMap<i32, BTreeSet<DateTime<Utc>>>,
    settings: &Settings,
) -> BTreeMap<i32, BTreeSet<DateTime<Utc>>> {
    let mut result = BTreeMap::new();

    if settings.latest {
        for (fmisid, times) in station_times {
            if let Some(last) = times.iter().next_back() {
                result.insert(*fmisid, BTreeSet::from([*last]));
            }
        }
        return result;
    }

    match settings.grid_mode {
        GridMode::DataTimes => {
            for (fmisid, times) in station_times {
                result.insert(*fmisid, times.clone());
            }
        }
        GridMode::DataAndFixedTimes => {
            // Every station gets the union of all data times and the grid
            let mut union: BTreeSet<DateTime<Utc>> = station_times
                .values()
                .flat_map(|times| times.iter().copied())
                .collect();
            union.extend(generate(settings.starttime, settings.endtime, settings.timestep));
            for fmisid in station_times.keys() {
                result.insert(*fmisid, union.clone());
            }
        }
        GridMode::FixedTimes => {
            let grid: BTreeSet<DateTime<Utc>> =
                generate(settings.starttime, settings.endtime, settings.timestep)
                    .into_iter()
                    .collect();
            for fmisid in station_times.keys() {
                result.insert(*fmisid, grid.clone());
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn grid_aligns_to_step_multiples() {
        let times = generate(t(0, 7), t(1, 0), 10);
        assert_eq!(times.first(), Some(&t(0, 10)));
        assert_eq!(times.last(), Some(&t(1, 0)));
        assert_eq!(times.len(), 6);
    }

    #[test]
    fn aligned_start_is_kept() {
        let times = generate(t(0, 30), t(1, 30), 30);
        assert_eq!(times, vec![t(0, 30), t(1, 0), t(1, 30)]);
    }

    #[test]
    fn zero_timestep_is_empty() {
        assert!(generate(t(0, 0), t(6, 0), 0).is_empty());
    }

    #[test]
    fn latest_policy_keeps_only_newest() {
        let mut station_times = BTreeMap::new();
        station_times.insert(100, BTreeSet::from([t(0, 0), t(1, 0), t(2, 0)]));

        let mut settings = Settings::default();
        settings.latest = true;

        let result = valid_timesteps_per_station(&station_times, &settings);
        assert_eq!(result[&100], BTreeSet::from([t(2, 0)]));
    }

    #[test]
    fn union_policy_is_shared_by_stations() {
        let mut station_times = BTreeMap::new();
        station_times.insert(100, BTreeSet::from([t(0, 5)]));
        station_times.insert(200, BTreeSet::from([t(0, 25)]));

        let mut settings = Settings::default();
        settings.starttime = t(0, 0);
        settings.endtime = t(0, 30);
        settings.timestep = 30;
        settings.grid_mode = GridMode::DataAndFixedTimes;

        let result = valid_timesteps_per_station(&station_times, &settings);
        let expected = BTreeSet::from([t(0, 0), t(0, 5), t(0, 25), t(0, 30)]);
        assert_eq!(result[&100], expected);
        assert_eq!(result[&200], expected);
    }
}
