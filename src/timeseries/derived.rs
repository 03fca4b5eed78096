//! Derived parameters: wind compass names, apparent temperature and the
//! weather symbol. All pure functions of their measurand inputs plus, for
//! the symbol, location and time for the day/night decision.

use chrono::{DateTime, Datelike, Timelike, Utc};

const COMPASS8: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

const COMPASS16: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

const COMPASS32: [&str; 32] = [
    "N", "NbE", "NNE", "NEbN", "NE", "NEbE", "ENE", "EbN", "E", "EbS", "ESE", "SEbE", "SE", "SEbS",
    "SSE", "SbE", "S", "SbW", "SSW", "SWbS", "SW", "SWbW", "WSW", "WbS", "W", "WbN", "WNW", "NWbW",
    "NW", "NWbN", "NNW", "NbW",
];

#[must_use]
pub fn wind_compass8(direction: f64) -> &'static str {
    let i = ((direction + 22.5) / 45.0) as usize % 8;
    COMPASS8[i]
}

#[must_use]
pub fn wind_compass16(direction: f64) -> &'static str {
    let i = ((direction + 11.25) / 22.5) as usize % 16;
    COMPASS16[i]
}

#[must_use]
pub fn wind_compass32(direction: f64) -> &'static str {
    let i = ((direction + 5.625) / 11.25) as usize % 32;
    COMPASS32[i]
}

/// Summer simmer index with a 50 % reference humidity. Takes effect only
/// above 14.5 degrees.
fn summer_simmer(rh: f64, temperature: f64) -> f64 {
    const SIMMER_LIMIT: f64 = 14.5;
    if temperature <= SIMMER_LIMIT {
        return temperature;
    }

    let rh_ref = 50.0 / 100.0;
    let r = rh / 100.0;

    (1.8 * temperature - 0.55 * (1.0 - r) * (1.8 * temperature - 26.0)
        - 0.55 * (1.0 - rh_ref) * 26.0)
        / (1.8 * (1.0 - 0.55 * (1.0 - rh_ref)))
}

/// Apparent temperature: wind chill and summer heat combined. Radiation
/// is ignored here since it is measured by dedicated stations only.
///
/// `wind` m/s, `rh` percent, `temperature` Celsius.
#[must_use]
pub fn feels_like(wind: f64, rh: f64, temperature: f64) -> f64 {
    // Wind chill portion, tuned so the two scales match at 0 degrees
    const A: f64 = 15.0;
    const T0: f64 = 37.0;

    let chill = A + (1.0 - A / T0) * temperature + A / T0 * (wind + 1.0).powf(0.16) * (temperature - T0);
    let heat = summer_simmer(rh, temperature);

    temperature + (chill - temperature) + (heat - temperature)
}

/// Solar elevation angle in degrees, NOAA approximation. Good to a
/// fraction of a degree, which is plenty for a day/night decision.
#[must_use]
pub fn solar_elevation(time: DateTime<Utc>, latitude: f64, longitude: f64) -> f64 {
    let day_of_year = f64::from(time.ordinal());
    let hour = f64::from(time.hour()) + f64::from(time.minute()) / 60.0;

    // Fractional year in radians
    let gamma = 2.0 * std::f64::consts::PI / 365.0 * (day_of_year - 1.0 + (hour - 12.0) / 24.0);

    // Equation of time (minutes) and solar declination (radians)
    let eqtime = 229.18
        * (0.000075 + 0.001868 * gamma.cos()
            - 0.032077 * gamma.sin()
            - 0.014615 * (2.0 * gamma).cos()
            - 0.040849 * (2.0 * gamma).sin());
    let decl = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
        - 0.006758 * (2.0 * gamma).cos()
        + 0.000907 * (2.0 * gamma).sin()
        - 0.002697 * (3.0 * gamma).cos()
        + 0.00148 * (3.0 * gamma).sin();

    let time_offset = eqtime + 4.0 * longitude;
    let true_solar_time = hour * 60.0 + time_offset;
    let hour_angle = (true_solar_time / 4.0 - 180.0).to_radians();

    let lat = latitude.to_radians();
    let cos_zenith = lat.sin() * decl.sin() + lat.cos() * decl.cos() * hour_angle.cos();
    90.0 - cos_zenith.clamp(-1.0, 1.0).acos().to_degrees()
}

// Symbol codes; night adds 100.
const CLEAR: i64 = 1;
const MOSTLY_CLEAR: i64 = 2;
const PARTLY_CLOUDY: i64 = 4;
const MOSTLY_CLOUDY: i64 = 6;
const OVERCAST: i64 = 7;
const FOG: i64 = 9;
const DRIZZLE: i64 = 11;
const FREEZING_DRIZZLE: i64 = 14;
const FREEZING_RAIN: i64 = 17;
const ISOLATED_SHOWERS: i64 = 21;
const SCATTERED_SHOWERS: i64 = 24;
const SHOWERS: i64 = 27;
const LIGHT_RAIN: i64 = 31;
const MODERATE_RAIN: i64 = 34;
const HEAVY_RAIN: i64 = 37;
const LIGHT_SLEET: i64 = 41;
const MODERATE_SLEET: i64 = 44;
const HEAVY_SLEET: i64 = 47;
const LIGHT_SNOW: i64 = 51;
const MODERATE_SNOW: i64 = 54;
const HEAVY_SNOW: i64 = 57;
const ISOLATED_SNOW_SHOWERS: i64 = 61;
const SCATTERED_SNOW_SHOWERS: i64 = 64;
const SNOW_SHOWERS: i64 = 67;
const ISOLATED_THUNDER: i64 = 71;
const SCATTERED_THUNDER: i64 = 74;
const THUNDER: i64 = 77;

fn cloud_symbol(octas: i64) -> i64 {
    match octas {
        0 | 1 => CLEAR,
        2 => MOSTLY_CLEAR,
        3..=5 => PARTLY_CLOUDY,
        6 | 7 => MOSTLY_CLOUDY,
        _ => OVERCAST,
    }
}

/// Present-weather symbol from the wawa code (WMO table 4680), total
/// cloud cover (percent) and temperature; +100 when the sun is below the
/// horizon at the observation instant.
#[must_use]
pub fn smart_symbol(
    wawa: i32,
    total_cloud_cover: i32,
    temperature: f64,
    time: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
) -> Option<i64> {
    let octas = (f64::from(total_cloud_cover) / 12.5).round() as i64;
    let octas = octas.clamp(0, 8);

    let day_symbol = match wawa {
        30..=34 => FOG,
        40..=42 => {
            // Unclassified precipitation: phase decided by temperature
            if temperature < 0.0 {
                match wawa {
                    41 => MODERATE_SNOW,
                    42 => HEAVY_SNOW,
                    _ => LIGHT_SNOW,
                }
            } else {
                match wawa {
                    41 => MODERATE_RAIN,
                    42 => HEAVY_RAIN,
                    _ => LIGHT_RAIN,
                }
            }
        }
        50..=53 => DRIZZLE,
        54..=56 => FREEZING_DRIZZLE,
        57 | 58 => DRIZZLE,
        60 | 61 => LIGHT_RAIN,
        62 => MODERATE_RAIN,
        63 => HEAVY_RAIN,
        64..=66 => FREEZING_RAIN,
        67 => LIGHT_SLEET,
        68 => MODERATE_SLEET,
        69 => HEAVY_SLEET,
        70 | 71 | 76..=78 => LIGHT_SNOW,
        72 => MODERATE_SNOW,
        73..=75 => HEAVY_SNOW,
        80 => ISOLATED_SHOWERS,
        81 => SCATTERED_SHOWERS,
        82..=84 => SHOWERS,
        85 => ISOLATED_SNOW_SHOWERS,
        86 => SCATTERED_SNOW_SHOWERS,
        87 => SNOW_SHOWERS,
        89 => SHOWERS,
        90 | 91 => ISOLATED_THUNDER,
        92 | 93 => SCATTERED_THUNDER,
        94..=96 => THUNDER,
        0..=29 => cloud_symbol(octas),
        _ => return None,
    };

    let night = solar_elevation(time, latitude, longitude) < 0.0;
    Some(if night { day_symbol + 100 } else { day_symbol })
}
