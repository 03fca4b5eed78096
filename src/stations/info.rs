//! Immutable station registry snapshot with identifier indexes and a
//! spatial search tree. A reload builds a whole new snapshot and swaps
//! it in atomically; readers keep using the one they loaded.

use chrono::{DateTime, Utc};
use geo::{Contains, Geometry, Point};
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use std::collections::{BTreeSet, HashMap};
use wkt::TryFromWkt;

use super::{QueryStation, Station, haversine_distance_m, initial_bearing_deg};
use crate::error::{ObsError, ObsResult};
use crate::obs::settings::BoundingBox;
use crate::obs::TaggedFmisid;

/// Meters per degree of latitude, used only to bound tree queries; the
/// exact filter is always the great-circle distance.
const METERS_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, Clone)]
struct StationPoint {
    lon: f64,
    lat: f64,
    index: usize,
}

impl RTreeObject for StationPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lon, self.lat])
    }
}

impl PointDistance for StationPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.lon - point[0];
        let dy = self.lat - point[1];
        dx * dx + dy * dy
    }
}

pub struct StationInfo {
    stations: Vec<Station>,
    fmisid_index: HashMap<i32, Vec<usize>>,
    wmo_index: HashMap<i32, Vec<usize>>,
    lpnn_index: HashMap<i32, Vec<usize>>,
    rwsid_index: HashMap<i32, Vec<usize>>,
    group_members: HashMap<String, BTreeSet<usize>>,
    tree: RTree<StationPoint>,
}

impl StationInfo {
    #[must_use]
    pub fn new(stations: Vec<Station>) -> Self {
        let mut fmisid_index: HashMap<i32, Vec<usize>> = HashMap::new();
        let mut wmo_index: HashMap<i32, Vec<usize>> = HashMap::new();
        let mut lpnn_index: HashMap<i32, Vec<usize>> = HashMap::new();
        let mut rwsid_index: HashMap<i32, Vec<usize>> = HashMap::new();
        let mut group_members: HashMap<String, BTreeSet<usize>> = HashMap::new();

        let mut points = Vec::with_capacity(stations.len());
        for (index, station) in stations.iter().enumerate() {
            fmisid_index.entry(station.fmisid).or_default().push(index);
            if let Some(wmo) = station.wmo {
                wmo_index.entry(wmo).or_default().push(index);
            }
            if let Some(lpnn) = station.lpnn {
                lpnn_index.entry(lpnn).or_default().push(index);
            }
            if let Some(rwsid) = station.rwsid {
                rwsid_index.entry(rwsid).or_default().push(index);
            }
            for group in station.group_codes() {
                group_members
                    .entry(group.to_string())
                    .or_default()
                    .insert(index);
            }
            points.push(StationPoint {
                lon: station.longitude,
                lat: station.latitude,
                index,
            });
        }

        Self {
            stations,
            fmisid_index,
            wmo_index,
            lpnn_index,
            rwsid_index,
            group_members,
            tree: RTree::bulk_load(points),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    #[must_use]
    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    fn matches_groups(&self, index: usize, groups: &BTreeSet<String>) -> bool {
        if groups.is_empty() {
            return true;
        }
        self.stations[index]
            .group_codes()
            .iter()
            .any(|g| groups.contains(*g))
    }

    /// True when some record of the station belongs to one of the groups
    /// (any group when the set is empty).
    #[must_use]
    pub fn belongs_to_group(&self, fmisid: i32, groups: &BTreeSet<String>) -> bool {
        self.fmisid_index
            .get(&fmisid)
            .is_some_and(|indexes| indexes.iter().any(|i| self.matches_groups(*i, groups)))
    }

    /// The record of `fmisid` whose validity interval covers `t`.
    pub fn get_station(
        &self,
        fmisid: i32,
        groups: &BTreeSet<String>,
        t: DateTime<Utc>,
    ) -> ObsResult<&Station> {
        self.fmisid_index
            .get(&fmisid)
            .into_iter()
            .flatten()
            .filter(|i| self.matches_groups(**i, groups))
            .map(|i| &self.stations[*i])
            .find(|s| s.is_active_at(t))
            .ok_or_else(|| ObsError::StationNotFound {
                fmisid,
                groups: groups.iter().cloned().collect(),
            })
    }

    /// Nearest stations to a point, great-circle, deterministically
    /// ordered. All stations tied at the k-th distance take part in the
    /// secondary (name, fmisid) sort before the list is cut to `count`.
    #[must_use]
    pub fn find_nearest_stations(
        &self,
        longitude: f64,
        latitude: f64,
        max_distance_m: f64,
        count: usize,
        groups: &BTreeSet<String>,
        starttime: DateTime<Utc>,
        endtime: DateTime<Utc>,
    ) -> Vec<QueryStation> {
        if count == 0 || max_distance_m <= 0.0 {
            return Vec::new();
        }

        let lat_margin = max_distance_m / METERS_PER_DEGREE;
        let cos_lat = latitude.to_radians().cos().abs().max(0.01);
        let lon_margin = lat_margin / cos_lat;
        let envelope = AABB::from_corners(
            [longitude - lon_margin, latitude - lat_margin],
            [longitude + lon_margin, latitude + lat_margin],
        );

        let mut candidates: Vec<(f64, usize)> = self
            .tree
            .locate_in_envelope(&envelope)
            .filter(|p| self.matches_groups(p.index, groups))
            .filter(|p| self.stations[p.index].is_active_during(starttime, endtime))
            .filter_map(|p| {
                let d = haversine_distance_m(longitude, latitude, p.lon, p.lat);
                (d <= max_distance_m).then_some((d, p.index))
            })
            .collect();

        // Distance first, then name and id so that ties are stable
        // regardless of tree insertion order.
        candidates.sort_by(|(da, ia), (db, ib)| {
            da.partial_cmp(db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.stations[*ia].formal_name.cmp(&self.stations[*ib].formal_name))
                .then_with(|| self.stations[*ia].fmisid.cmp(&self.stations[*ib].fmisid))
        });

        let mut seen = BTreeSet::new();
        let mut result = Vec::new();
        for (distance, index) in candidates {
            let station = &self.stations[index];
            if !seen.insert(station.fmisid) {
                continue;
            }
            result.push(QueryStation {
                tag: station.fmisid.to_string(),
                distance_km: Some(distance / 1000.0),
                direction_deg: Some(initial_bearing_deg(
                    longitude,
                    latitude,
                    station.longitude,
                    station.latitude,
                )),
                requested_lon: Some(longitude),
                requested_lat: Some(latitude),
                station: station.clone(),
            });
            if result.len() == count {
                break;
            }
        }
        result
    }

    /// Resolve tagged fmisids into station records overlapping the
    /// request interval. Misses are skipped, not errors.
    #[must_use]
    pub fn find_fmisid_stations(
        &self,
        tagged: &[TaggedFmisid],
        groups: &BTreeSet<String>,
        starttime: DateTime<Utc>,
        endtime: DateTime<Utc>,
    ) -> Vec<QueryStation> {
        let mut result = Vec::new();
        for item in tagged {
            let found = self
                .fmisid_index
                .get(&item.fmisid)
                .into_iter()
                .flatten()
                .filter(|i| self.matches_groups(**i, groups))
                .map(|i| &self.stations[*i])
                .find(|s| s.is_active_during(starttime, endtime));
            if let Some(station) = found {
                result.push(QueryStation {
                    station: station.clone(),
                    tag: item.tag.clone(),
                    distance_km: None,
                    direction_deg: None,
                    requested_lon: None,
                    requested_lat: None,
                });
            }
        }
        result
    }

    fn translate_index(
        index: &HashMap<i32, Vec<usize>>,
        stations: &[Station],
        ids: &[i32],
        t: DateTime<Utc>,
    ) -> Vec<TaggedFmisid> {
        let mut result = Vec::new();
        for id in ids {
            let found = index
                .get(id)
                .into_iter()
                .flatten()
                .map(|i| &stations[*i])
                .find(|s| s.is_active_at(t));
            if let Some(station) = found {
                result.push(TaggedFmisid::new(id.to_string(), station.fmisid));
            }
        }
        result
    }

    #[must_use]
    pub fn translate_wmo_to_fmisid(&self, wmos: &[i32], t: DateTime<Utc>) -> Vec<TaggedFmisid> {
        Self::translate_index(&self.wmo_index, &self.stations, wmos, t)
    }

    #[must_use]
    pub fn translate_lpnn_to_fmisid(&self, lpnns: &[i32], t: DateTime<Utc>) -> Vec<TaggedFmisid> {
        Self::translate_index(&self.lpnn_index, &self.stations, lpnns, t)
    }

    #[must_use]
    pub fn translate_rwsid_to_fmisid(&self, rwsids: &[i32], t: DateTime<Utc>) -> Vec<TaggedFmisid> {
        Self::translate_index(&self.rwsid_index, &self.stations, rwsids, t)
    }

    /// All stations of the given groups active during the interval.
    #[must_use]
    pub fn find_stations_in_group(
        &self,
        groups: &BTreeSet<String>,
        starttime: DateTime<Utc>,
        endtime: DateTime<Utc>,
    ) -> Vec<&Station> {
        let mut indexes: BTreeSet<usize> = BTreeSet::new();
        if groups.is_empty() {
            indexes.extend(0..self.stations.len());
        } else {
            for group in groups {
                if let Some(members) = self.group_members.get(group) {
                    indexes.extend(members.iter().copied());
                }
            }
        }
        indexes
            .into_iter()
            .map(|i| &self.stations[i])
            .filter(|s| s.is_active_during(starttime, endtime))
            .collect()
    }

    /// Stations inside a lon/lat box; `min_lon > max_lon` wraps across
    /// the antimeridian.
    #[must_use]
    pub fn find_stations_inside_box(
        &self,
        bbox: &BoundingBox,
        groups: &BTreeSet<String>,
        starttime: DateTime<Utc>,
        endtime: DateTime<Utc>,
    ) -> Vec<&Station> {
        let envelopes = if bbox.min_lon <= bbox.max_lon {
            vec![AABB::from_corners(
                [bbox.min_lon, bbox.min_lat],
                [bbox.max_lon, bbox.max_lat],
            )]
        } else {
            vec![
                AABB::from_corners([bbox.min_lon, bbox.min_lat], [180.0, bbox.max_lat]),
                AABB::from_corners([-180.0, bbox.min_lat], [bbox.max_lon, bbox.max_lat]),
            ]
        };

        let mut indexes = BTreeSet::new();
        for envelope in &envelopes {
            for point in self.tree.locate_in_envelope(envelope) {
                if self.matches_groups(point.index, groups)
                    && self.stations[point.index].is_active_during(starttime, endtime)
                {
                    indexes.insert(point.index);
                }
            }
        }
        indexes.into_iter().map(|i| &self.stations[i]).collect()
    }

    /// Stations inside a WKT polygon or multipolygon.
    pub fn find_stations_inside_area(
        &self,
        wkt_text: &str,
        groups: &BTreeSet<String>,
        starttime: DateTime<Utc>,
        endtime: DateTime<Utc>,
    ) -> ObsResult<Vec<&Station>> {
        let geometry = Geometry::<f64>::try_from_wkt_str(wkt_text)
            .map_err(|e| ObsError::BadRequest(format!("invalid WKT area: {e}")))?;

        let contains = |lon: f64, lat: f64| -> bool {
            let point = Point::new(lon, lat);
            match &geometry {
                Geometry::Polygon(poly) => poly.contains(&point),
                Geometry::MultiPolygon(multi) => multi.contains(&point),
                _ => false,
            }
        };

        if !matches!(
            geometry,
            Geometry::Polygon(_) | Geometry::MultiPolygon(_)
        ) {
            return Err(ObsError::BadRequest(
                "WKT area must be a POLYGON or MULTIPOLYGON".to_string(),
            ));
        }

        Ok(self
            .stations
            .iter()
            .enumerate()
            .filter(|(i, s)| {
                self.matches_groups(*i, groups)
                    && s.is_active_during(starttime, endtime)
                    && contains(s.longitude, s.latitude)
            })
            .map(|(_, s)| s)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn station(fmisid: i32, name: &str, lon: f64, lat: f64, group: &str) -> Station {
        Station {
            fmisid,
            wmo: Some(fmisid + 20000),
            lpnn: None,
            rwsid: None,
            wsi: None,
            station_type: group.to_string(),
            longitude: lon,
            latitude: lat,
            elevation: 10.0,
            formal_name: name.to_string(),
            timezone: "Europe/Helsinki".to_string(),
            country: "Finland".to_string(),
            iso2: "FI".to_string(),
            region: String::new(),
            station_start: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            station_end: Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap(),
            groups: vec![group.to_string()],
        }
    }

    fn interval() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn nearest_search_orders_ties_by_name() {
        // Three stations at identical coordinates, one slightly away
        let info = StationInfo::new(vec![
            station(3, "Charlie", 24.94, 60.17, "AWS"),
            station(1, "Alpha", 24.94, 60.17, "AWS"),
            station(2, "Bravo", 24.94, 60.17, "AWS"),
            station(4, "Delta", 24.99, 60.21, "AWS"),
        ]);
        let (start, end) = interval();
        let found =
            info.find_nearest_stations(24.945, 60.175, 50_000.0, 2, &BTreeSet::new(), start, end);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].station.formal_name, "Alpha");
        assert_eq!(found[1].station.formal_name, "Bravo");
    }

    #[test]
    fn nearest_search_respects_group_filter() {
        let info = StationInfo::new(vec![
            station(1, "Road", 24.94, 60.17, "RWS"),
            station(2, "Weather", 24.94, 60.17, "AWS"),
        ]);
        let (start, end) = interval();
        let groups = BTreeSet::from(["AWS".to_string()]);
        let found = info.find_nearest_stations(24.94, 60.17, 50_000.0, 5, &groups, start, end);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].station.fmisid, 2);
    }

    #[test]
    fn nearest_search_attaches_distance() {
        let info = StationInfo::new(vec![station(1, "A", 25.0, 60.0, "AWS")]);
        let (start, end) = interval();
        let found =
            info.find_nearest_stations(25.0, 60.0, 50_000.0, 1, &BTreeSet::new(), start, end);
        assert!(found[0].distance_km.unwrap() < 0.01);
    }

    #[test]
    fn get_station_honors_validity() {
        let mut old = station(1, "Old", 24.0, 60.0, "AWS");
        old.station_end = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        let info = StationInfo::new(vec![old]);
        let groups = BTreeSet::new();
        let inside = Utc.with_ymd_and_hms(2005, 1, 1, 0, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(info.get_station(1, &groups, inside).is_ok());
        assert!(matches!(
            info.get_station(1, &groups, outside),
            Err(ObsError::StationNotFound { .. })
        ));
    }

    #[test]
    fn belongs_to_group_implies_get_station() {
        let info = StationInfo::new(vec![station(7, "A", 24.0, 60.0, "AWS")]);
        let groups = BTreeSet::from(["AWS".to_string()]);
        assert!(info.belongs_to_group(7, &groups));
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(info.get_station(7, &groups, t).is_ok());
    }

    #[test]
    fn translate_wmo() {
        let info = StationInfo::new(vec![station(5, "A", 24.0, 60.0, "AWS")]);
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let translated = info.translate_wmo_to_fmisid(&[20005, 99999], t);
        assert_eq!(translated.len(), 1);
        assert_eq!(translated[0].fmisid, 5);
        assert_eq!(translated[0].tag, "20005");
    }

    #[test]
    fn box_search_wraps_antimeridian() {
        let info = StationInfo::new(vec![
            station(1, "West", 179.5, 0.0, "AWS"),
            station(2, "East", -179.5, 0.0, "AWS"),
            station(3, "Helsinki", 24.9, 60.2, "AWS"),
        ]);
        let (start, end) = interval();
        let bbox = BoundingBox {
            min_lon: 179.0,
            min_lat: -1.0,
            max_lon: -179.0,
            max_lat: 1.0,
        };
        let found = info.find_stations_inside_box(&bbox, &BTreeSet::new(), start, end);
        let ids: Vec<i32> = found.iter().map(|s| s.fmisid).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn area_search_with_wkt_polygon() {
        let info = StationInfo::new(vec![
            station(1, "Inside", 24.9, 60.2, "AWS"),
            station(2, "Outside", 30.0, 65.0, "AWS"),
        ]);
        let (start, end) = interval();
        let wkt = "POLYGON((24 59, 26 59, 26 61, 24 61, 24 59))";
        let found = info
            .find_stations_inside_area(wkt, &BTreeSet::new(), start, end)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].fmisid, 1);
    }
}
