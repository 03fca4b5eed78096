//! Special (synthesized) parameters: station identity, time columns and
//! the derived weather quantities.

use chrono::{DateTime, Utc};
use std::str::FromStr;

use crate::obs::Settings;
use crate::stations::QueryStation;
use crate::timeseries::Value;
use crate::timeseries::derived::solar_elevation;

/// Names resolvable without a measurand lookup, plus the derived
/// specials whose inputs the planner adds to the fetch.
const SPECIAL_NAMES: &[&str] = &[
    "latitude",
    "lat",
    "longitude",
    "lon",
    "elevation",
    "station_elevation",
    "windcompass8",
    "windcompass16",
    "windcompass32",
    "feelslike",
    "smartsymbol",
    "fmisid",
    "wmo",
    "lpnn",
    "rwsid",
    "wsi",
    "name",
    "stationname",
    "station_name",
    "region",
    "country",
    "iso2",
    "tz",
    "localtime",
    "utctime",
    "time",
    "isotime",
    "epochtime",
    "origintime",
    "sunrise",
    "sunset",
    "sunelevation",
    "distance",
    "direction",
    "sensor_no",
    "place",
    "stationlatitude",
    "stationlat",
    "stationlongitude",
    "stationlon",
    "model",
    "modtime",
    "timestring",
];

#[must_use]
pub fn is_special(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SPECIAL_NAMES.contains(&name.as_str())
        || is_data_source_field(&name)
        || is_data_quality_field(&name)
}

#[must_use]
pub fn is_data_source_field(name: &str) -> bool {
    name.contains("_data_source_sensornumber_")
}

#[must_use]
pub fn is_data_quality_field(name: &str) -> bool {
    name.len() > 3 && (name.starts_with("qc_") || name.contains("_data_quality_sensornumber_"))
}

/// Specials whose value at any grid point is defined independently of
/// observation availability. Gap filling evaluates these instead of
/// emitting a missing value.
#[must_use]
pub fn is_continuous(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "fmisid"
            | "wmo"
            | "lpnn"
            | "rwsid"
            | "wsi"
            | "name"
            | "stationname"
            | "station_name"
            | "region"
            | "country"
            | "iso2"
            | "tz"
            | "localtime"
            | "utctime"
            | "time"
            | "isotime"
            | "epochtime"
            | "origintime"
            | "sunrise"
            | "sunset"
            | "sunelevation"
            | "distance"
            | "direction"
            | "sensor_no"
            | "place"
            | "stationlatitude"
            | "stationlat"
            | "stationlongitude"
            | "stationlon"
            | "station_elevation"
            | "model"
            | "modtime"
            | "timestring"
    )
}

/// Station-identity columns that must never go missing mid-series; gap
/// filling carries the previous value forward for these.
#[must_use]
pub fn is_not_null(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "fmisid" | "wmo" | "lpnn" | "rwsid" | "wsi" | "name" | "stationname" | "station_name"
            | "region" | "country" | "iso2" | "tz" | "place"
    )
}

/// Derived specials computed from measurand inputs rather than station
/// metadata; the planner must fetch their inputs.
#[must_use]
pub fn is_derived(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("windcompass") || name == "feelslike" || name == "smartsymbol"
}

fn local_time_text(t: DateTime<Utc>, station: &QueryStation, settings: &Settings) -> String {
    let zone_name = if settings.timezone == "localtime" {
        station.station.timezone.as_str()
    } else {
        settings.timezone.as_str()
    };
    match chrono_tz::Tz::from_str(zone_name) {
        Ok(tz) => t.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string(),
        Err(_) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

/// Sunrise or sunset instant for the observation day, by scanning the
/// solar elevation sign change at minute resolution.
fn sun_crossing(t: DateTime<Utc>, lat: f64, lon: f64, rising: bool) -> Option<DateTime<Utc>> {
    let midnight = t.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
    let mut previous = solar_elevation(midnight, lat, lon);
    for minute in 1..=(24 * 60) {
        let instant = midnight + chrono::Duration::minutes(minute);
        let current = solar_elevation(instant, lat, lon);
        let crossed = if rising {
            previous < 0.0 && current >= 0.0
        } else {
            previous >= 0.0 && current < 0.0
        };
        if crossed {
            return Some(instant);
        }
        previous = current;
    }
    None
}

/// Evaluate a continuous special for one station at one timestep.
/// Unknown names yield `Value::None`.
#[must_use]
pub fn special_value(
    name: &str,
    station: &QueryStation,
    settings: &Settings,
    obstime: DateTime<Utc>,
) -> Value {
    let s = &station.station;
    match name.to_ascii_lowercase().as_str() {
        "fmisid" => Value::Int(i64::from(s.fmisid)),
        "wmo" => s.wmo.map_or(Value::None, |v| Value::Int(i64::from(v))),
        "lpnn" => s.lpnn.map_or(Value::None, |v| Value::Int(i64::from(v))),
        "rwsid" => s.rwsid.map_or(Value::None, |v| Value::Int(i64::from(v))),
        "wsi" => s.wsi.clone().map_or(Value::None, Value::Text),
        "name" | "stationname" | "station_name" => Value::Text(s.formal_name.clone()),
        "region" => Value::Text(s.region.clone()),
        "country" => Value::Text(s.country.clone()),
        "iso2" => Value::Text(s.iso2.clone()),
        "tz" => {
            if settings.timezone == "localtime" {
                Value::Text(s.timezone.clone())
            } else {
                Value::Text(settings.timezone.clone())
            }
        }
        "place" => Value::Text(station.tag.clone()),
        "stationlatitude" | "stationlat" => Value::Double(s.latitude),
        "stationlongitude" | "stationlon" => Value::Double(s.longitude),
        "station_elevation" => Value::Double(s.elevation),
        "distance" => station
            .distance_km
            .map_or(Value::None, |d| Value::Text(format!("{d:.1}"))),
        "direction" => station
            .direction_deg
            .map_or(Value::None, |d| Value::Text(format!("{d:.1}"))),
        "sensor_no" => Value::Int(1),
        "localtime" | "time" => Value::Text(local_time_text(obstime, station, settings)),
        "utctime" => Value::Text(obstime.format("%Y-%m-%d %H:%M:%S").to_string()),
        "isotime" => Value::Text(obstime.to_rfc3339()),
        "epochtime" => Value::Int(obstime.timestamp()),
        "origintime" => Value::Time(Utc::now()),
        "sunelevation" => Value::Double(solar_elevation(obstime, s.latitude, s.longitude)),
        "sunrise" => sun_crossing(obstime, s.latitude, s.longitude, true)
            .map_or(Value::None, Value::Time),
        "sunset" => sun_crossing(obstime, s.latitude, s.longitude, false)
            .map_or(Value::None, Value::Time),
        "model" => Value::Text(settings.stationtype.clone()),
        "modtime" | "timestring" => Value::Text(String::new()),
        _ => Value::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn station() -> QueryStation {
        QueryStation::plain(crate::stations::Station {
            fmisid: 100971,
            wmo: Some(2978),
            lpnn: Some(304),
            rwsid: None,
            wsi: None,
            station_type: "AWS".to_string(),
            longitude: 24.944,
            latitude: 60.175,
            elevation: 4.0,
            formal_name: "Helsinki Kaisaniemi".to_string(),
            timezone: "Europe/Helsinki".to_string(),
            country: "Finland".to_string(),
            iso2: "FI".to_string(),
            region: "Helsinki".to_string(),
            station_start: Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).unwrap(),
            station_end: Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap(),
            groups: vec!["AWS".to_string()],
        })
    }

    #[test]
    fn classifies_names() {
        assert!(is_special("fmisid"));
        assert!(is_special("WindCompass8"));
        assert!(is_special("t2m_data_source_sensornumber_1"));
        assert!(is_special("qc_t2m"));
        assert!(!is_special("t2m"));
        assert!(is_continuous("name"));
        assert!(!is_continuous("feelslike"));
        assert!(is_not_null("fmisid"));
        assert!(!is_not_null("sunrise"));
        assert!(is_derived("smartsymbol"));
    }

    #[test]
    fn identity_values() {
        let st = station();
        let settings = Settings::default();
        let t = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(special_value("fmisid", &st, &settings, t), Value::Int(100971));
        assert_eq!(
            special_value("name", &st, &settings, t),
            Value::Text("Helsinki Kaisaniemi".to_string())
        );
        assert_eq!(
            special_value("tz", &st, &settings, t),
            Value::Text("Europe/Helsinki".to_string())
        );
        assert_eq!(special_value("epochtime", &st, &settings, t), Value::Int(t.timestamp()));
    }

    #[test]
    fn sunrise_before_sunset_in_summer() {
        let st = station();
        let settings = Settings::default();
        let t = Utc.with_ymd_and_hms(2026, 4, 15, 12, 0, 0).unwrap();
        let sunrise = special_value("sunrise", &st, &settings, t);
        let sunset = special_value("sunset", &st, &settings, t);
        match (sunrise, sunset) {
            (Value::Time(up), Value::Time(down)) => assert!(up < down),
            other => panic!("expected times, got {other:?}"),
        }
    }
}
