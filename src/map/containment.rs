//! Click-to-count: which claims fall inside a clicked boundary.
//!
//! The scan is linear over the claim set. Claim counts per state are small and
//! the scan only runs on user interaction, so no index is kept.

use geo::{Contains, Distance, Euclidean, Intersects};
use geo_types::{Geometry, Point};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::feature::{AtlasFeature, ClaimStatus, ClaimType};

/// Matches listed in a popup before the "showing N of M" note takes over.
pub const POPUP_LIMIT: usize = 10;

/// Roughly 0.5 km at Indian latitudes.
pub const DEFAULT_BUFFER_DEG: f64 = 0.0045;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Points inside, areas intersecting.
    Containment,
    /// Clicked feature is a line; claims within the buffer distance match.
    LineBuffer,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClaimSummary {
    pub claim_id: String,
    pub claimant: String,
    pub village: String,
    pub status: ClaimStatus,
    pub claim_type: ClaimType,
    pub area_ha: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ContainmentSummary {
    pub boundary_name: String,
    pub method: MatchMethod,
    pub total: usize,
    pub shown: Vec<ClaimSummary>,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Popup {
    pub title: String,
    pub lines: Vec<String>,
    pub footer: String,
}

impl ContainmentSummary {
    pub fn to_popup(&self) -> Popup {
        let lines = if self.shown.is_empty() {
            vec!["No claims found inside this boundary".to_string()]
        } else {
            self.shown
                .iter()
                .map(|c| {
                    format!(
                        "{} · {} · {} {} · {:.2} ha",
                        c.claim_id,
                        c.claimant,
                        c.claim_type.as_str(),
                        c.status.as_str(),
                        c.area_ha
                    )
                })
                .collect()
        };
        Popup {
            title: self.boundary_name.clone(),
            lines,
            footer: self.note.clone(),
        }
    }
}

/// Collects the claims inside `boundary` and summarises the first [`POPUP_LIMIT`].
///
/// Polygonal boundaries use point-in-polygon for point claims and intersection for
/// area claims. Line boundaries have no interior, so claims within `buffer_deg`
/// of the line count instead.
pub fn claims_within(
    boundary_name: &str,
    boundary: &Geometry<f64>,
    claims: &[AtlasFeature],
    buffer_deg: f64,
) -> ContainmentSummary {
    let lines = linear_parts(boundary);
    let method = if lines.is_empty() {
        MatchMethod::Containment
    } else {
        MatchMethod::LineBuffer
    };

    let matches: Vec<&AtlasFeature> = claims
        .par_iter()
        .filter(|feature| feature.as_claim().is_some())
        .filter(|feature| match method {
            MatchMethod::Containment => inside(boundary, &feature.geometry),
            MatchMethod::LineBuffer => lines
                .iter()
                .any(|line| Euclidean::distance(&feature.geometry, line) <= buffer_deg),
        })
        .collect();

    let total = matches.len();
    let shown: Vec<ClaimSummary> = matches
        .iter()
        .take(POPUP_LIMIT)
        .filter_map(|f| f.as_claim())
        .map(|c| ClaimSummary {
            claim_id: c.claim_id.clone(),
            claimant: c.claimant.clone(),
            village: c.village.clone(),
            status: c.status,
            claim_type: c.claim_type,
            area_ha: c.area_ha,
        })
        .collect();

    let noun = if total == 1 { "claim" } else { "claims" };
    let note = format!("Showing {} of {} {}", shown.len(), total, noun);
    log::debug!(
        "{} of {} claims matched boundary {:?} ({:?})",
        total,
        claims.len(),
        boundary_name,
        method
    );

    ContainmentSummary {
        boundary_name: boundary_name.to_string(),
        method,
        total,
        shown,
        note,
    }
}

fn inside(boundary: &Geometry<f64>, claim: &Geometry<f64>) -> bool {
    match claim {
        Geometry::Point(point) => contains_point(boundary, point),
        Geometry::MultiPoint(points) => points.iter().any(|p| contains_point(boundary, p)),
        other => boundary.intersects(other),
    }
}

fn contains_point(boundary: &Geometry<f64>, point: &Point<f64>) -> bool {
    match boundary {
        Geometry::Polygon(polygon) => polygon.contains(point),
        Geometry::MultiPolygon(polygons) => polygons.contains(point),
        Geometry::Rect(rect) => rect.contains(point),
        Geometry::Triangle(triangle) => triangle.contains(point),
        Geometry::GeometryCollection(collection) => {
            collection.iter().any(|g| contains_point(g, point))
        }
        _ => false,
    }
}

/// Each line of a linear boundary as its own geometry; empty for anything with an interior.
fn linear_parts(boundary: &Geometry<f64>) -> Vec<Geometry<f64>> {
    match boundary {
        Geometry::LineString(line) => vec![Geometry::LineString(line.clone())],
        Geometry::MultiLineString(lines) => {
            lines.iter().cloned().map(Geometry::LineString).collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::feature::{ClaimProperties, FeatureProperties};
    use geo_types::{line_string, point, polygon};

    fn claim(id: usize, geometry: Geometry<f64>) -> AtlasFeature {
        AtlasFeature::new(
            format!("claim-{id}"),
            geometry,
            FeatureProperties::Claim(ClaimProperties {
                claim_id: format!("FRA-OD-PUR-{id:04}"),
                claimant: format!("Claimant {id}"),
                village: "Satapada".into(),
                state: "Odisha".into(),
                district: "Puri".into(),
                status: ClaimStatus::Submitted,
                claim_type: ClaimType::IFR,
                area_ha: 1.0,
                osm_id: None,
            }),
        )
    }

    fn square() -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ])
    }

    #[test]
    fn points_inside_polygon_match() {
        let claims = vec![
            claim(1, Geometry::Point(point!(x: 0.5, y: 0.5))),
            claim(2, Geometry::Point(point!(x: 1.5, y: 0.5))),
        ];
        let summary = claims_within("Puri", &square(), &claims, DEFAULT_BUFFER_DEG);
        assert_eq!(summary.method, MatchMethod::Containment);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.shown[0].claim_id, "FRA-OD-PUR-0001");
    }

    #[test]
    fn area_claims_use_intersection() {
        let straddling = Geometry::Polygon(polygon![
            (x: 0.9, y: 0.9),
            (x: 1.2, y: 0.9),
            (x: 1.2, y: 1.2),
            (x: 0.9, y: 0.9),
        ]);
        let outside = Geometry::Polygon(polygon![
            (x: 2.0, y: 2.0),
            (x: 3.0, y: 2.0),
            (x: 3.0, y: 3.0),
            (x: 2.0, y: 2.0),
        ]);
        let claims = vec![claim(1, straddling), claim(2, outside)];
        let summary = claims_within("Puri", &square(), &claims, DEFAULT_BUFFER_DEG);
        assert_eq!(summary.total, 1);
    }

    #[test]
    fn line_boundary_uses_buffer() {
        let line = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]);
        let claims = vec![
            claim(1, Geometry::Point(point!(x: 0.5, y: 0.003))),
            claim(2, Geometry::Point(point!(x: 0.5, y: 0.1))),
            claim(
                3,
                Geometry::Polygon(polygon![
                    (x: 0.2, y: 0.002),
                    (x: 0.3, y: 0.002),
                    (x: 0.3, y: 0.01),
                    (x: 0.2, y: 0.002),
                ]),
            ),
        ];
        let summary = claims_within("Coastline", &line, &claims, DEFAULT_BUFFER_DEG);
        assert_eq!(summary.method, MatchMethod::LineBuffer);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.shown[0].claimant, "Claimant 1");
        assert_eq!(summary.shown[1].claimant, "Claimant 3");
    }

    #[test]
    fn popup_lists_first_ten_in_order() {
        let claims: Vec<AtlasFeature> = (1..=23)
            .map(|i| claim(i, Geometry::Point(point!(x: 0.01 * i as f64, y: 0.5))))
            .collect();
        let summary = claims_within("Puri", &square(), &claims, DEFAULT_BUFFER_DEG);
        assert_eq!(summary.total, 23);
        assert_eq!(summary.shown.len(), POPUP_LIMIT);
        assert_eq!(summary.note, "Showing 10 of 23 claims");
        let ids: Vec<&str> = summary.shown.iter().map(|c| c.claim_id.as_str()).collect();
        assert_eq!(ids.first(), Some(&"FRA-OD-PUR-0001"));
        assert_eq!(ids.last(), Some(&"FRA-OD-PUR-0010"));

        let popup = summary.to_popup();
        assert_eq!(popup.title, "Puri");
        assert_eq!(popup.lines.len(), 10);
        assert_eq!(popup.footer, "Showing 10 of 23 claims");
    }

    #[test]
    fn empty_result_still_renders() {
        let summary = claims_within("Puri", &square(), &[], DEFAULT_BUFFER_DEG);
        assert_eq!(summary.note, "Showing 0 of 0 claims");
        assert_eq!(
            summary.to_popup().lines,
            vec!["No claims found inside this boundary".to_string()]
        );
    }
}
