use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use geo::{ChamberlainDuquetteArea, Contains};
use geo_types::{Coord, Geometry, LineString, MultiLineString, MultiPolygon, Point, Polygon};
use serde::Deserialize;

use super::retry::BackoffPolicy;
use crate::atlas::fallback::claimant_for;
use crate::map::feature::{
    AdminLevel, AtlasFeature, BoundaryProperties, ClaimProperties, ClaimStatus, ClaimType,
    FeatureProperties,
};
use crate::map::geo_bounds::GeoBounds;
use crate::map::region::Region;

pub const DEFAULT_ENDPOINT: &str = "https://overpass-api.de/api/interpreter";

/// Tag keys tried, in order, for a feature's display name.
const NAME_KEYS: &[&str] = &["name:en", "name", "official_name", "alt_name"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream answered HTTP {0}")]
    Status(u16),
    #[error("upstream still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream did not answer in time")]
    Timeout,
    #[error("upstream payload could not be decoded: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, UpstreamError::Status(429))
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_decode() {
            UpstreamError::Decode(err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

/// Anything that can answer an Overpass QL query.
pub trait UpstreamSource: Send + Sync {
    fn query<'a>(
        &'a self,
        query: &'a str,
    ) -> BoxFuture<'a, Result<OverpassResponse, UpstreamError>>;
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OverpassResponse {
    /// Missing on some error payloads; treated as no data.
    #[serde(default)]
    pub elements: Vec<OverpassElement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl From<LatLon> for Coord<f64> {
    fn from(p: LatLon) -> Self {
        Coord { x: p.lon, y: p.lat }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverpassMember {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    #[serde(rename = "ref")]
    pub reference: u64,
    #[serde(default)]
    pub role: String,
    /// Nodes clipped out of the query area come back as `null`.
    #[serde(default)]
    pub geometry: Vec<Option<LatLon>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverpassElement {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub id: u64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub geometry: Vec<Option<LatLon>>,
    #[serde(default)]
    pub members: Vec<OverpassMember>,
}

impl OverpassElement {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Display name, normalised once here so nothing downstream guesses keys.
    pub fn display_name(&self) -> Option<String> {
        NAME_KEYS
            .iter()
            .find_map(|key| self.tag(key))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    pub fn admin_level(&self) -> Option<AdminLevel> {
        self.tag("admin_level")?.trim().parse::<u8>().ok().and_then(AdminLevel::from_osm)
    }

    pub fn to_geometry(&self) -> Option<Geometry<f64>> {
        match self.kind {
            ElementKind::Node => Some(Geometry::Point(Point::new(self.lon?, self.lat?))),
            ElementKind::Way => way_geometry(coords(&self.geometry)),
            ElementKind::Relation => relation_geometry(&self.members),
        }
    }
}

fn coords(points: &[Option<LatLon>]) -> Vec<Coord<f64>> {
    points.iter().flatten().map(|p| Coord::from(*p)).collect()
}

fn is_ring(coords: &[Coord<f64>]) -> bool {
    coords.len() >= 4 && coords.first() == coords.last()
}

fn way_geometry(coords: Vec<Coord<f64>>) -> Option<Geometry<f64>> {
    if is_ring(&coords) {
        Some(Geometry::Polygon(Polygon::new(LineString::new(coords), vec![])))
    } else if coords.len() >= 2 {
        Some(Geometry::LineString(LineString::new(coords)))
    } else {
        None
    }
}

/// Joins member ways end to end. Returns closed rings and whatever could not be closed.
pub fn stitch_rings(
    segments: Vec<Vec<Coord<f64>>>,
) -> (Vec<LineString<f64>>, Vec<LineString<f64>>) {
    let mut pool: Vec<Vec<Coord<f64>>> = segments.into_iter().filter(|s| s.len() >= 2).collect();
    let mut closed = Vec::new();
    let mut open = Vec::new();

    while let Some(mut current) = pool.pop() {
        while !is_ring(&current) {
            let Some(&tail) = current.last() else { break };
            let Some(index) = pool
                .iter()
                .position(|s| s.first() == Some(&tail) || s.last() == Some(&tail))
            else {
                break;
            };
            let mut next = pool.swap_remove(index);
            if next.first() != Some(&tail) {
                next.reverse();
            }
            current.extend(next.into_iter().skip(1));
        }
        if is_ring(&current) {
            closed.push(LineString::new(current));
        } else {
            open.push(LineString::new(current));
        }
    }
    (closed, open)
}

fn relation_geometry(members: &[OverpassMember]) -> Option<Geometry<f64>> {
    let ways = members.iter().filter(|m| m.kind == ElementKind::Way);
    let (outer, inner): (Vec<&OverpassMember>, Vec<&OverpassMember>) =
        ways.partition(|m| m.role != "inner");

    let (outer_rings, outer_open) =
        stitch_rings(outer.iter().map(|m| coords(&m.geometry)).collect());
    if outer_rings.is_empty() && outer_open.is_empty() {
        return None;
    }
    if !outer_open.is_empty() {
        // Boundary could not be closed, most often because the query area clipped it.
        let mut lines = outer_rings;
        lines.extend(outer_open);
        return Some(Geometry::MultiLineString(MultiLineString::new(lines)));
    }

    let (inner_rings, _) = stitch_rings(inner.iter().map(|m| coords(&m.geometry)).collect());
    let mut polygons: Vec<Polygon<f64>> =
        outer_rings.into_iter().map(|ring| Polygon::new(ring, vec![])).collect();
    for hole in inner_rings {
        let Some(first) = hole.0.first().copied() else { continue };
        if let Some(owner) = polygons.iter_mut().find(|p| p.contains(&Point::from(first))) {
            owner.interiors_push(hole);
        }
    }

    if polygons.len() == 1 {
        polygons.pop().map(Geometry::Polygon)
    } else {
        Some(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
    }
}

/// Administrative boundaries at state, district and tehsil level.
pub fn boundaries_query(bounds: &GeoBounds) -> String {
    let levels: Vec<String> = AdminLevel::ALL.iter().map(|l| l.osm_level().to_string()).collect();
    format!(
        "[out:json][timeout:25];\
         (relation[\"boundary\"=\"administrative\"][\"admin_level\"~\"^({levels})$\"]({bbox}););\
         out geom;",
        levels = levels.join("|"),
        bbox = bounds.to_overpass()
    )
}

/// Forest land that FRA claims are filed over.
pub fn forest_query(bounds: &GeoBounds) -> String {
    format!(
        "[out:json][timeout:25];\
         (way[\"landuse\"=\"forest\"]({bbox});\
         way[\"natural\"=\"wood\"]({bbox});\
         relation[\"boundary\"=\"protected_area\"]({bbox}););\
         out geom;",
        bbox = bounds.to_overpass()
    )
}

pub fn to_boundaries(response: &OverpassResponse, region: &Region) -> Vec<AtlasFeature> {
    response
        .elements
        .iter()
        .filter(|el| el.tag("boundary") == Some("administrative"))
        .filter_map(|el| {
            let level = el.admin_level()?;
            let geometry = el.to_geometry()?;
            let name = el.display_name().unwrap_or_else(|| format!("Unnamed boundary {}", el.id));
            let district = match level {
                AdminLevel::State => None,
                AdminLevel::District => Some(name.clone()),
                AdminLevel::Tehsil => region.district.clone(),
            };
            Some(AtlasFeature::new(
                format!("osm-{}", el.id),
                geometry,
                FeatureProperties::Boundary(BoundaryProperties {
                    name,
                    admin_level: level,
                    state: region.state.clone(),
                    district,
                    osm_id: Some(el.id),
                }),
            ))
        })
        .collect()
}

/// Turns forest polygons into claim parcels. Open ways are skipped.
pub fn to_claims(response: &OverpassResponse, region: &Region) -> Vec<AtlasFeature> {
    let prefix = region.id_prefix();
    response
        .elements
        .iter()
        .filter(|el| el.tag("boundary") != Some("administrative"))
        .filter_map(|el| {
            let geometry = el.to_geometry()?;
            let area_m2 = match &geometry {
                Geometry::Polygon(p) => p.chamberlain_duquette_unsigned_area(),
                Geometry::MultiPolygon(mp) => mp.chamberlain_duquette_unsigned_area(),
                _ => return None,
            };
            let claim_type = if el.tag("boundary") == Some("protected_area") {
                ClaimType::CFR
            } else if el.tag("landuse") == Some("forest") {
                ClaimType::CR
            } else {
                ClaimType::IFR
            };
            let village = el
                .tag("addr:village")
                .map(str::to_string)
                .or_else(|| el.display_name())
                .unwrap_or_else(|| "Unnamed village".to_string());
            let person = el.tag("operator").unwrap_or("Forest dweller household");
            Some(AtlasFeature::new(
                format!("osm-{}", el.id),
                geometry,
                FeatureProperties::Claim(ClaimProperties {
                    claim_id: format!("FRA-{prefix}-OSM{}", el.id),
                    claimant: claimant_for(claim_type, person, &village),
                    village,
                    state: region.state.clone(),
                    district: region.district.clone().unwrap_or_else(|| "Unassigned".to_string()),
                    status: ClaimStatus::ALL[(el.id % 3) as usize],
                    claim_type,
                    area_ha: (area_m2 / 100.0).round() / 100.0,
                    osm_id: Some(el.id),
                }),
            ))
        })
        .collect()
}

/// Overpass interpreter client with 429 backoff.
#[derive(Debug, Clone)]
pub struct OverpassClient {
    client: reqwest::Client,
    endpoint: String,
    backoff: BackoffPolicy,
}

impl OverpassClient {
    pub fn new(
        endpoint: impl Into<String>,
        request_timeout: Duration,
        backoff: BackoffPolicy,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("vanmitra/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            backoff,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One POST to the interpreter, no retries.
    async fn fetch_once(&self, query: &str) -> Result<OverpassResponse, UpstreamError> {
        let response = self.client.post(&self.endpoint).form(&[("data", query)]).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

impl UpstreamSource for OverpassClient {
    fn query<'a>(
        &'a self,
        query: &'a str,
    ) -> BoxFuture<'a, Result<OverpassResponse, UpstreamError>> {
        Box::pin(async move {
            self.backoff
                .run(|attempt| {
                    log::debug!("querying {} (attempt {})", self.endpoint, attempt + 1);
                    self.fetch_once(query)
                })
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use axum::{http::StatusCode, routing::post, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ll(lat: f64, lon: f64) -> Option<LatLon> {
        Some(LatLon { lat, lon })
    }

    const SAMPLE: &str = r#"{
        "version": 0.6,
        "elements": [
            {
                "type": "relation", "id": 1984002,
                "tags": {
                    "boundary": "administrative", "admin_level": "5",
                    "name": "ପୁରୀ", "name:en": "Puri"
                },
                "members": [
                    {"type": "way", "ref": 1, "role": "outer", "geometry": [
                        {"lat": 19.7, "lon": 85.4}, {"lat": 19.7, "lon": 86.3}
                    ]},
                    {"type": "way", "ref": 2, "role": "outer", "geometry": [
                        {"lat": 20.2, "lon": 86.3}, {"lat": 19.7, "lon": 86.3}
                    ]},
                    {"type": "way", "ref": 3, "role": "outer", "geometry": [
                        {"lat": 20.2, "lon": 86.3}, {"lat": 20.2, "lon": 85.4},
                        {"lat": 19.7, "lon": 85.4}
                    ]},
                    {"type": "node", "ref": 9, "role": "admin_centre"}
                ]
            },
            {
                "type": "relation", "id": 77,
                "tags": {"boundary": "administrative", "admin_level": "8", "name": "Ward 7"},
                "members": []
            },
            {
                "type": "way", "id": 5150,
                "tags": {"landuse": "forest", "name": "Balukhand"},
                "geometry": [
                    {"lat": 19.80, "lon": 85.90}, {"lat": 19.80, "lon": 85.91},
                    {"lat": 19.81, "lon": 85.91}, {"lat": 19.80, "lon": 85.90}
                ]
            },
            {
                "type": "way", "id": 5151,
                "tags": {"natural": "wood"},
                "geometry": [{"lat": 19.80, "lon": 85.90}, null, {"lat": 19.81, "lon": 85.95}]
            }
        ]
    }"#;

    #[test]
    fn parses_and_converts_boundaries() {
        let response: OverpassResponse = serde_json::from_str(SAMPLE).unwrap();
        let region = Region::resolve(Some("Odisha"), Some("Puri"));
        let features = to_boundaries(&response, &region);
        assert_eq!(features.len(), 1);

        let puri = &features[0];
        let props = puri.as_boundary().unwrap();
        assert_eq!(props.name, "Puri");
        assert_eq!(props.admin_level, AdminLevel::District);
        assert_eq!(props.osm_id, Some(1984002));
        match &puri.geometry {
            Geometry::Polygon(p) => assert_eq!(p.exterior().0.len(), 5),
            other => panic!("expected a stitched polygon, got {other:?}"),
        }
    }

    #[test]
    fn converts_forest_polygons_to_claims() {
        let response: OverpassResponse = serde_json::from_str(SAMPLE).unwrap();
        let region = Region::resolve(Some("Odisha"), Some("Puri"));
        let claims = to_claims(&response, &region);
        assert_eq!(claims.len(), 1, "open ways and boundaries without area are skipped");

        let claim = claims[0].as_claim().unwrap();
        assert_eq!(claim.claim_id, "FRA-OD-PUR-OSM5150");
        assert_eq!(claim.claim_type, ClaimType::CR);
        assert_eq!(claim.claimant, "Gram Sabha, Balukhand");
        assert_eq!(claim.status, ClaimStatus::ALL[(5150 % 3) as usize]);
        // Half of a 0.01° square near 20°N is a little under 60 ha.
        assert!(claim.area_ha > 50.0 && claim.area_ha < 65.0, "{}", claim.area_ha);
    }

    #[test]
    fn missing_elements_means_no_data() {
        let response: OverpassResponse =
            serde_json::from_str(r#"{"remark": "runtime error"}"#).unwrap();
        assert!(response.elements.is_empty());
    }

    #[test]
    fn unclosed_relation_becomes_lines() {
        let members = vec![OverpassMember {
            kind: ElementKind::Way,
            reference: 1,
            role: "outer".into(),
            geometry: vec![ll(19.7, 85.4), ll(19.7, 86.3), ll(20.2, 86.3)],
        }];
        match relation_geometry(&members) {
            Some(Geometry::MultiLineString(lines)) => assert_eq!(lines.0.len(), 1),
            other => panic!("expected lines, got {other:?}"),
        }
    }

    #[test]
    fn inner_ring_becomes_hole() {
        let members = vec![
            OverpassMember {
                kind: ElementKind::Way,
                reference: 1,
                role: "outer".into(),
                geometry: vec![
                    ll(0.0, 0.0),
                    ll(0.0, 10.0),
                    ll(10.0, 10.0),
                    ll(10.0, 0.0),
                    ll(0.0, 0.0),
                ],
            },
            OverpassMember {
                kind: ElementKind::Way,
                reference: 2,
                role: "inner".into(),
                geometry: vec![ll(4.0, 4.0), ll(4.0, 6.0), ll(6.0, 6.0), ll(4.0, 4.0)],
            },
        ];
        match relation_geometry(&members) {
            Some(Geometry::Polygon(p)) => assert_eq!(p.interiors().len(), 1),
            other => panic!("expected polygon with hole, got {other:?}"),
        }
    }

    #[test]
    fn stitch_reverses_segments_as_needed() {
        let c = |x: f64, y: f64| Coord { x, y };
        let (closed, open) = stitch_rings(vec![
            vec![c(0.0, 0.0), c(1.0, 0.0)],
            vec![c(1.0, 1.0), c(1.0, 0.0)],
            vec![c(1.0, 1.0), c(0.0, 0.0)],
        ]);
        assert_eq!(closed.len(), 1);
        assert!(open.is_empty());
        assert_eq!(closed[0].0.len(), 4);
    }

    #[test]
    fn queries_use_overpass_bbox_order() {
        let bounds = GeoBounds::new(19.7, 85.4, 20.2, 86.3).unwrap();
        let query = boundaries_query(&bounds);
        assert!(query.starts_with("[out:json]"));
        assert!(query.contains(r#"["admin_level"~"^(4|5|6)$"]"#));
        assert!(query.contains("(19.70000,85.40000,20.20000,86.30000)"));
        assert!(query.ends_with("out geom;"));
        assert_eq!(forest_query(&bounds).matches("19.70000,85.40000").count(), 3);
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api/interpreter")
    }

    #[tokio::test]
    async fn client_retries_rate_limit_over_http() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/api/interpreter",
            post(move |body: String| {
                let counter = Arc::clone(&counter);
                async move {
                    assert!(body.starts_with("data="));
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        (StatusCode::TOO_MANY_REQUESTS, String::new())
                    } else {
                        (StatusCode::OK, SAMPLE.to_string())
                    }
                }
            }),
        );
        let endpoint = serve(app).await;
        let backoff = BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(5),
        };
        let client = OverpassClient::new(endpoint, Duration::from_secs(5), backoff).unwrap();

        let response = client.query("[out:json];out;").await.unwrap();
        assert_eq!(response.elements.len(), 4);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_reports_server_errors() {
        let app = Router::new()
            .route("/api/interpreter", post(|| async { StatusCode::GATEWAY_TIMEOUT }));
        let endpoint = serve(app).await;
        let backoff = BackoffPolicy::default();
        let client = OverpassClient::new(endpoint, Duration::from_secs(5), backoff).unwrap();
        assert_eq!(client.query("x").await, Err(UpstreamError::Status(504)));
    }

    #[test]
    fn lat_lon_maps_to_x_y() {
        let c = Coord::from(LatLon { lat: 19.8, lon: 85.8 });
        assert_relative_eq!(c.x, 85.8);
        assert_relative_eq!(c.y, 19.8);
    }
}
