//! Station snapshot persistence. The format follows the file extension:
//! `.bin` MessagePack, `.txt` JSON, `.xml` XML. Writes land in a sibling
//! temp file first and are renamed into place so readers never see a
//! torn file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Station, StationInfo};
use crate::error::{ObsError, ObsResult};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "stations")]
struct StationsDoc {
    #[serde(rename = "station", default)]
    station: Vec<Station>,
}

fn serialization_error(path: &Path, detail: impl ToString) -> ObsError {
    ObsError::Serialization {
        path: path.display().to_string(),
        detail: detail.to_string(),
    }
}

/// Load a snapshot. A missing or empty file installs an empty registry
/// with a warning; an unreadable one is a hard error so startup fails
/// loudly instead of serving with no stations.
pub fn load(path: &Path) -> ObsResult<StationInfo> {
    let metadata = std::fs::metadata(path);
    let missing = metadata.as_ref().map(|m| m.len() == 0).unwrap_or(true);
    if missing {
        tracing::warn!(path = %path.display(), "Station file missing or empty, starting with an empty registry");
        return Ok(StationInfo::new(Vec::new()));
    }

    let stations = match extension(path)? {
        Format::Bin => {
            let bytes = std::fs::read(path).map_err(|e| serialization_error(path, e))?;
            rmp_serde::from_slice::<Vec<Station>>(&bytes)
                .map_err(|e| serialization_error(path, e))?
        }
        Format::Txt => {
            let text = std::fs::read_to_string(path).map_err(|e| serialization_error(path, e))?;
            serde_json::from_str::<Vec<Station>>(&text)
                .map_err(|e| serialization_error(path, e))?
        }
        Format::Xml => {
            let text = std::fs::read_to_string(path).map_err(|e| serialization_error(path, e))?;
            quick_xml::de::from_str::<StationsDoc>(&text)
                .map_err(|e| serialization_error(path, e))?
                .station
        }
    };

    tracing::info!(path = %path.display(), count = stations.len(), "Loaded station snapshot");
    Ok(StationInfo::new(stations))
}

/// Persist a snapshot next to `path` and rename it into place.
pub fn save(path: &Path, stations: &[Station]) -> ObsResult<()> {
    let bytes = match extension(path)? {
        Format::Bin => {
            rmp_serde::to_vec(&stations).map_err(|e| serialization_error(path, e))?
        }
        Format::Txt => serde_json::to_vec_pretty(&stations)
            .map_err(|e| serialization_error(path, e))?,
        Format::Xml => {
            let doc = StationsDoc {
                station: stations.to_vec(),
            };
            quick_xml::se::to_string(&doc)
                .map_err(|e| serialization_error(path, e))?
                .into_bytes()
        }
    };

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, bytes).map_err(|e| serialization_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| serialization_error(path, e))?;
    tracing::info!(path = %path.display(), count = stations.len(), "Wrote station snapshot");
    Ok(())
}

enum Format {
    Bin,
    Txt,
    Xml,
}

fn extension(path: &Path) -> ObsResult<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("bin") => Ok(Format::Bin),
        Some("txt") => Ok(Format::Txt),
        Some("xml") => Ok(Format::Xml),
        other => Err(ObsError::Serialization {
            path: path.display().to_string(),
            detail: format!("unsupported station file extension {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn stations() -> Vec<Station> {
        vec![Station {
            fmisid: 100971,
            wmo: Some(2978),
            lpnn: Some(304),
            rwsid: None,
            wsi: Some("0-246-0-100971".to_string()),
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
        }]
    }

    #[test]
    fn round_trips_all_formats() {
        let dir = std::env::temp_dir();
        for name in ["stations_test.bin", "stations_test.txt", "stations_test.xml"] {
            let path = dir.join(name);
            save(&path, &stations()).unwrap();
            let info = load(&path).unwrap();
            assert_eq!(info.len(), 1, "format {name}");
            assert_eq!(info.stations()[0].formal_name, "Helsinki Kaisaniemi");
            std::fs::remove_file(&path).ok();
        }
    }

    #[test]
    fn missing_file_yields_empty_registry() {
        let path = std::env::temp_dir().join("no_such_stations.bin");
        let info = load(&path).unwrap();
        assert!(info.is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let path = std::env::temp_dir().join("corrupt_stations.txt");
        std::fs::write(&path, "not json at all").unwrap();
        assert!(load(&path).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let path = std::path::Path::new("/tmp/stations.dat");
        assert!(save(path, &stations()).is_err());
    }
}
