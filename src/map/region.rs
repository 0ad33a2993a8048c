use serde::Serialize;

use super::geo_bounds::GeoBounds;

pub const DEFAULT_STATE: &str = "Madhya Pradesh";

// Central India, used for states the gazetteer does not know.
const DEFAULT_EXTENT: (f64, f64, f64, f64) = (21.0, 77.0, 24.0, 81.0);

struct StateEntry {
    name: &'static str,
    code: &'static str,
    extent: (f64, f64, f64, f64), // south, west, north, east
    districts: &'static [(&'static str, (f64, f64, f64, f64))],
}

const GAZETTEER: &[StateEntry] = &[
    StateEntry {
        name: "Madhya Pradesh",
        code: "MP",
        extent: (21.07, 74.03, 26.87, 82.82),
        districts: &[
            ("Balaghat", (21.31, 79.52, 22.41, 81.05)),
            ("Mandla", (22.02, 79.96, 23.22, 81.47)),
            ("Dindori", (22.39, 80.62, 23.35, 81.79)),
            ("Betul", (21.37, 77.33, 22.41, 78.55)),
        ],
    },
    StateEntry {
        name: "Odisha",
        code: "OD",
        extent: (17.78, 81.38, 22.57, 87.49),
        districts: &[
            ("Puri", (19.70, 85.40, 20.20, 86.30)),
            ("Mayurbhanj", (21.28, 85.68, 22.57, 87.18)),
            ("Koraput", (18.23, 82.09, 19.28, 83.38)),
            ("Kandhamal", (19.57, 83.55, 20.58, 84.80)),
        ],
    },
    StateEntry {
        name: "Telangana",
        code: "TS",
        extent: (15.83, 77.23, 19.92, 81.31),
        districts: &[
            ("Khammam", (16.94, 79.88, 17.88, 81.02)),
            ("Adilabad", (18.92, 78.03, 19.92, 79.60)),
            ("Mulugu", (17.82, 79.78, 18.72, 80.88)),
        ],
    },
    StateEntry {
        name: "Tripura",
        code: "TR",
        extent: (22.94, 91.15, 24.53, 92.34),
        districts: &[
            ("Dhalai", (23.49, 91.71, 24.24, 92.20)),
            ("West Tripura", (23.62, 91.15, 24.09, 91.58)),
            ("Gomati", (23.22, 91.32, 23.72, 91.89)),
        ],
    },
];

/// A `(state, district)` pair resolved to a map extent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub state: String,
    pub district: Option<String>,
    pub bounds: GeoBounds,
    /// Whether the names matched the gazetteer.
    pub known: bool,
    #[serde(skip)]
    code: String,
}

impl Region {
    /// Resolves free-text query parameters. Blank or absent values fall back to defaults.
    pub fn resolve(state: Option<&str>, district: Option<&str>) -> Region {
        let state = state.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(DEFAULT_STATE);
        let district = district.map(str::trim).filter(|d| !d.is_empty());

        let Some(entry) = GAZETTEER.iter().find(|e| e.name.eq_ignore_ascii_case(state)) else {
            let bounds = extent_bounds(DEFAULT_EXTENT);
            let bounds = match district {
                Some(d) => pick_cell(&bounds, d),
                None => bounds,
            };
            return Region {
                state: state.to_string(),
                district: district.map(str::to_string),
                bounds,
                known: false,
                code: initials(state),
            };
        };

        let state_bounds = extent_bounds(entry.extent);
        match district {
            None => Region {
                state: entry.name.to_string(),
                district: None,
                bounds: state_bounds,
                known: true,
                code: entry.code.to_string(),
            },
            Some(d) => match entry.districts.iter().find(|(name, _)| name.eq_ignore_ascii_case(d)) {
                Some((name, extent)) => Region {
                    state: entry.name.to_string(),
                    district: Some(name.to_string()),
                    bounds: extent_bounds(*extent),
                    known: true,
                    code: entry.code.to_string(),
                },
                None => Region {
                    state: entry.name.to_string(),
                    district: Some(d.to_string()),
                    bounds: pick_cell(&state_bounds, d),
                    known: false,
                    code: entry.code.to_string(),
                },
            },
        }
    }

    /// Bounds of the whole state, used when a district-level region needs its parent.
    pub fn state_region(&self) -> Region {
        Region::resolve(Some(&self.state), None)
    }

    /// Known district names of the state, in gazetteer order.
    pub fn known_districts(&self) -> Vec<&'static str> {
        GAZETTEER
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(&self.state))
            .map(|e| e.districts.iter().map(|(name, _)| *name).collect())
            .unwrap_or_default()
    }

    /// Cache key fragment, e.g. `odisha_puri` or `odisha_all`.
    pub fn key(&self) -> String {
        let district = self.district.as_deref().unwrap_or("all");
        format!("{}_{}", slug(&self.state), slug(district))
    }

    /// Short prefix for generated identifiers, e.g. `OD-PUR`.
    pub fn id_prefix(&self) -> String {
        let district = self
            .district
            .as_deref()
            .map(|d| d.chars().filter(|c| c.is_ascii_alphabetic()).take(3).collect::<String>())
            .unwrap_or_else(|| "ALL".to_string());
        format!("{}-{}", self.code, district.to_ascii_uppercase())
    }

    pub fn seed(&self) -> u64 {
        stable_hash(&self.key())
    }
}

fn extent_bounds((south, west, north, east): (f64, f64, f64, f64)) -> GeoBounds {
    GeoBounds::from_extent(south, west, north, east)
}

/// Picks one cell of a 4x4 grid over `bounds`, stable for a given name.
fn pick_cell(bounds: &GeoBounds, name: &str) -> GeoBounds {
    let cells = bounds.grid(4, 4);
    let index = (stable_hash(&name.to_lowercase()) % cells.len() as u64) as usize;
    cells[index]
}

fn initials(name: &str) -> String {
    let code: String = name
        .split_whitespace()
        .filter_map(|w| w.chars().next())
        .filter(|c| c.is_ascii_alphabetic())
        .take(2)
        .collect();
    if code.is_empty() {
        "XX".to_string()
    } else {
        code.to_ascii_uppercase()
    }
}

/// Lowercases and collapses whitespace runs to `-`.
pub fn slug(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join("-").to_lowercase()
}

/// FNV-1a, stable across builds and platforms.
pub fn stable_hash(value: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in value.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Contains;

    #[test]
    fn resolves_known_district_case_insensitively() {
        let region = Region::resolve(Some(" odisha "), Some("PURI"));
        assert_eq!(region.state, "Odisha");
        assert_eq!(region.district.as_deref(), Some("Puri"));
        assert!(region.known);
        assert_eq!(region.key(), "odisha_puri");
        assert_eq!(region.id_prefix(), "OD-PUR");
    }

    #[test]
    fn absent_parameters_default_to_state() {
        let region = Region::resolve(None, Some("   "));
        assert_eq!(region.state, DEFAULT_STATE);
        assert_eq!(region.district, None);
        assert_eq!(region.key(), "madhya-pradesh_all");
    }

    #[test]
    fn unknown_district_stays_inside_its_state() {
        let region = Region::resolve(Some("Telangana"), Some("Nowhere Nagar"));
        assert!(!region.known);
        assert_eq!(region.district.as_deref(), Some("Nowhere Nagar"));
        let state = region.state_region().bounds.to_polygon();
        assert!(state.contains(&region.bounds.to_polygon()));
        let again = Region::resolve(Some("telangana"), Some("nowhere nagar"));
        assert_eq!(again.bounds, region.bounds);
    }

    #[test]
    fn unknown_state_keeps_label() {
        let region = Region::resolve(Some("Jharkhand"), None);
        assert_eq!(region.state, "Jharkhand");
        assert!(!region.known);
        assert_eq!(region.id_prefix(), "J-ALL");
    }

    #[test]
    fn stable_hash_is_fnv1a() {
        assert_eq!(stable_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(stable_hash("a"), 0xaf63_dc4c_8601_ec8c);
    }
}
