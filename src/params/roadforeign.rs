//! Stable integer ids for the string-named columns of the wide/QC
//! tables. Road and foreign producers reuse measurand numbers between
//! unrelated quantities, so the cache assigns its own running numbers
//! and this bimap translates both ways.

use std::collections::BTreeMap;

pub const MISSING_STRING: &str = "MISSING";
pub const MISSING_INTEGER: i32 = 9999;

#[derive(Debug, Clone)]
pub struct RoadAndForeignIds {
    name_to_id: BTreeMap<&'static str, i32>,
    id_to_name: BTreeMap<i32, &'static str>,
}

const FOREIGN_NAMES: &[(&str, i32)] = &[
    ("CH", 120),
    ("CHL1", 132),
    ("CHL2", 133),
    ("CHL3", 134),
    ("CHL4", 135),
    ("CN", 119),
    ("CNH", 175),
    ("CNL1", 121),
    ("CNL2", 122),
    ("CNL3", 123),
    ("CNL4", 124),
    ("CTCH", 125),
    ("CTCL", 126),
    ("CTCM", 127),
    ("E", 148),
    ("NET", 613),
    ("P0", 38),
    ("Pa", 39),
    ("PR_12H", 63),
    ("PR_1H", 61),
    ("PR_24H", 64),
    ("PR_6H", 62),
    ("PSEA", 37),
    ("RH", 29),
    ("SD", 84),
    ("SUNDUR", 100),
    ("TA", 1),
    ("TAMAX12H", 21),
    ("TAMAX24H", 25),
    ("TAMIN12H", 22),
    ("TAMIN24H", 26),
    ("TD", 32),
    ("VV", 54),
    ("WD", 44),
    ("WG", 47),
    ("WS", 41),
    ("WW", 56),
];

const ROAD_NAMES: &[(&str, i32)] = &[
    ("AKKUJ", 186),
    ("AVIKA", 191),
    ("DILMA", 9),
    ("DIPAINE", 40),
    ("DTIEL", 10),
    ("ILMA", 1001),
    ("IPAINE", 1038),
    ("JAATJ", 90),
    ("JAATP", 8),
    ("KASTEP", 1032),
    ("KELI", 86),
    ("KELI2", 193),
    ("KITKA", 195),
    ("KOSM", 202),
    ("KOSTE", 1029),
    ("KPERO", 201),
    ("KTUULI", 1041),
    ("LI", 198),
    ("LS", 197),
    ("LUNTA", 1084),
    ("LW", 196),
    ("MAAL", 6),
    ("MTUULI", 1047),
    ("PSING", 89),
    ("RINT", 67),
    ("RST", 81),
    ("RSUM", 203),
    ("RSUM1H", 1061),
    ("SADE", 150),
    ("SADEON", 69),
    ("SJOHT", 88),
    ("STILA", 80),
    ("STST", 138),
    ("SUOM", 204),
    ("SUOV", 205),
    ("TIE", 5),
    ("TSUUNT", 1044),
    ("TURL", 206),
    ("VARO", 87),
    ("VARO3", 194),
    ("VIRTA", 192),
    ("VIS", 1054),
    ("VSAA", 199),
];

impl Default for RoadAndForeignIds {
    fn default() -> Self {
        Self::new()
    }
}

impl RoadAndForeignIds {
    #[must_use]
    pub fn new() -> Self {
        let mut name_to_id = BTreeMap::new();
        let mut id_to_name = BTreeMap::new();
        for (name, id) in FOREIGN_NAMES.iter().chain(ROAD_NAMES) {
            name_to_id.insert(*name, *id);
            id_to_name.insert(*id, *name);
        }
        Self {
            name_to_id,
            id_to_name,
        }
    }

    /// Column name to cache id; unknown names map to the missing marker.
    #[must_use]
    pub fn string_to_integer(&self, name: &str) -> i32 {
        let upper = name.to_ascii_uppercase();
        self.name_to_id
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&upper))
            .map_or(MISSING_INTEGER, |(_, v)| *v)
    }

    /// Cache id back to the column name used in backend SQL.
    #[must_use]
    pub fn integer_to_string(&self, id: i32) -> &'static str {
        self.id_to_name.get(&id).copied().unwrap_or(MISSING_STRING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_names() {
        let ids = RoadAndForeignIds::new();
        let id = ids.string_to_integer("ILMA");
        assert_ne!(id, MISSING_INTEGER);
        assert_eq!(ids.integer_to_string(id), "ILMA");
    }

    #[test]
    fn lookup_ignores_case() {
        let ids = RoadAndForeignIds::new();
        assert_eq!(ids.string_to_integer("ta"), ids.string_to_integer("TA"));
    }

    #[test]
    fn unknown_names_are_missing() {
        let ids = RoadAndForeignIds::new();
        assert_eq!(ids.string_to_integer("NO_SUCH"), MISSING_INTEGER);
        assert_eq!(ids.integer_to_string(-42), MISSING_STRING);
    }

    #[test]
    fn no_duplicate_ids() {
        let ids = RoadAndForeignIds::new();
        assert_eq!(ids.name_to_id.len(), ids.id_to_name.len());
    }

    #[test]
    fn every_road_column_resolves() {
        let ids = RoadAndForeignIds::new();
        for (name, expected) in ROAD_NAMES {
            let id = ids.string_to_integer(name);
            assert_eq!(id, *expected, "{name}");
            assert_ne!(id, MISSING_INTEGER, "{name}");
            assert_eq!(ids.integer_to_string(id), *name);
        }
    }
}
