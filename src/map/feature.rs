use std::collections::BTreeMap;
use std::fmt;

use geo_types::Geometry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::region::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Granted,
    Submitted,
    Pending,
}

impl ClaimStatus {
    pub const ALL: [ClaimStatus; 3] =
        [ClaimStatus::Granted, ClaimStatus::Submitted, ClaimStatus::Pending];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Granted => "granted",
            ClaimStatus::Submitted => "submitted",
            ClaimStatus::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum ClaimType {
    /// Individual forest right.
    IFR,
    /// Community right.
    CR,
    /// Community forest resource right.
    CFR,
}

impl ClaimType {
    pub const ALL: [ClaimType; 3] = [ClaimType::IFR, ClaimType::CR, ClaimType::CFR];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimType::IFR => "IFR",
            ClaimType::CR => "CR",
            ClaimType::CFR => "CFR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminLevel {
    State,
    District,
    Tehsil,
}

impl AdminLevel {
    pub const ALL: [AdminLevel; 3] = [AdminLevel::State, AdminLevel::District, AdminLevel::Tehsil];

    /// OSM `admin_level` used for this tier in India.
    pub fn osm_level(&self) -> u8 {
        match self {
            AdminLevel::State => 4,
            AdminLevel::District => 5,
            AdminLevel::Tehsil => 6,
        }
    }

    pub fn from_osm(level: u8) -> Option<AdminLevel> {
        AdminLevel::ALL.into_iter().find(|l| l.osm_level() == level)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdminLevel::State => "state",
            AdminLevel::District => "district",
            AdminLevel::Tehsil => "tehsil",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    WaterBody,
    AgriculturalLand,
    ForestCover,
    Homestead,
}

impl AssetType {
    pub const ALL: [AssetType; 4] = [
        AssetType::WaterBody,
        AssetType::AgriculturalLand,
        AssetType::ForestCover,
        AssetType::Homestead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::WaterBody => "water_body",
            AssetType::AgriculturalLand => "agricultural_land",
            AssetType::ForestCover => "forest_cover",
            AssetType::Homestead => "homestead",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClaimProperties {
    pub claim_id: String,
    pub claimant: String,
    pub village: String,
    pub state: String,
    pub district: String,
    pub status: ClaimStatus,
    pub claim_type: ClaimType,
    pub area_ha: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osm_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BoundaryProperties {
    pub name: String,
    pub admin_level: AdminLevel,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osm_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AssetProperties {
    pub name: String,
    pub asset_type: AssetType,
    pub village: String,
    pub state: String,
    pub district: String,
    pub area_ha: f64,
}

/// Properties of a feature, one shape per feature kind.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureProperties {
    Claim(ClaimProperties),
    Boundary(BoundaryProperties),
    Asset(AssetProperties),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtlasFeature {
    pub id: String,
    pub geometry: Geometry<f64>,
    pub properties: FeatureProperties,
}

impl AtlasFeature {
    pub fn new(
        id: impl Into<String>,
        geometry: Geometry<f64>,
        properties: FeatureProperties,
    ) -> Self {
        Self {
            id: id.into(),
            geometry,
            properties,
        }
    }

    pub fn name(&self) -> &str {
        match &self.properties {
            FeatureProperties::Claim(claim) => &claim.claim_id,
            FeatureProperties::Boundary(boundary) => &boundary.name,
            FeatureProperties::Asset(asset) => &asset.name,
        }
    }

    pub fn as_claim(&self) -> Option<&ClaimProperties> {
        match &self.properties {
            FeatureProperties::Claim(claim) => Some(claim),
            _ => None,
        }
    }

    pub fn as_boundary(&self) -> Option<&BoundaryProperties> {
        match &self.properties {
            FeatureProperties::Boundary(boundary) => Some(boundary),
            _ => None,
        }
    }

    pub fn as_asset(&self) -> Option<&AssetProperties> {
        match &self.properties {
            FeatureProperties::Asset(asset) => Some(asset),
            _ => None,
        }
    }

    /// True for line and multi-line geometries, which have no interior.
    pub fn is_linear(&self) -> bool {
        matches!(self.geometry, Geometry::LineString(_) | Geometry::MultiLineString(_))
    }

    pub fn to_geojson(&self) -> geojson::Feature {
        let properties = match serde_json::to_value(&self.properties) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        };
        geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&self.geometry))),
            id: Some(geojson::feature::Id::String(self.id.clone())),
            properties,
            foreign_members: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeatureError {
    #[error("feature has no geometry")]
    MissingGeometry,
    #[error("unsupported geometry: {0}")]
    Geometry(String),
    #[error("unrecognised properties: {0}")]
    Properties(String),
    #[error("feature collection has no metadata")]
    MissingMetadata,
}

impl TryFrom<geojson::Feature> for AtlasFeature {
    type Error = FeatureError;

    fn try_from(feature: geojson::Feature) -> Result<Self, Self::Error> {
        let geometry = feature.geometry.ok_or(FeatureError::MissingGeometry)?;
        let geometry = Geometry::<f64>::try_from(geometry)
            .map_err(|e| FeatureError::Geometry(e.to_string()))?;
        let properties = Value::Object(feature.properties.unwrap_or_default());
        let properties: FeatureProperties = serde_json::from_value(properties)
            .map_err(|e| FeatureError::Properties(e.to_string()))?;
        let id = match feature.id {
            Some(geojson::feature::Id::String(id)) => id,
            Some(geojson::feature::Id::Number(id)) => id.to_string(),
            None => String::new(),
        };
        Ok(AtlasFeature {
            id,
            geometry,
            properties,
        })
    }
}

/// Provenance of a collection, serialized as a human readable label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum DataSource {
    #[serde(rename = "OpenStreetMap Overpass API")]
    Overpass,
    #[serde(rename = "Fast Mock Administrative Data")]
    FastMock,
    #[serde(rename = "Realistic Fallback Data")]
    RealisticFallback,
    #[serde(rename = "Synthetic Asset Inventory")]
    AssetInventory,
}

impl DataSource {
    pub fn label(&self) -> &'static str {
        match self {
            DataSource::Overpass => "OpenStreetMap Overpass API",
            DataSource::FastMock => "Fast Mock Administrative Data",
            DataSource::RealisticFallback => "Realistic Fallback Data",
            DataSource::AssetInventory => "Synthetic Asset Inventory",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CollectionMetadata {
    pub source: DataSource,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    pub bbox: String,
    pub total_features: usize,
    #[serde(default)]
    pub summary: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cached: bool,
    /// Unix milliseconds at which the response was served.
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtlasCollection {
    pub features: Vec<AtlasFeature>,
    pub metadata: CollectionMetadata,
}

impl AtlasCollection {
    pub fn new(features: Vec<AtlasFeature>, source: DataSource, region: &Region) -> Self {
        let summary = summarize(&features);
        Self {
            metadata: CollectionMetadata {
                source,
                state: region.state.clone(),
                district: region.district.clone(),
                bbox: region.bounds.to_string(),
                total_features: features.len(),
                summary,
                error: None,
                cached: false,
                timestamp: 0,
            },
            features,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.metadata.error = Some(error.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn claims(&self) -> impl Iterator<Item = (&AtlasFeature, &ClaimProperties)> {
        self.features.iter().filter_map(|f| f.as_claim().map(|c| (f, c)))
    }

    /// Keeps claims matching the filter and refreshes the counts. Other kinds are untouched.
    pub fn retain_claims(&mut self, filter: &ClaimFilter) {
        self.features.retain(|f| match f.as_claim() {
            Some(claim) => filter.matches(claim),
            None => true,
        });
        self.metadata.total_features = self.features.len();
        self.metadata.summary = summarize(&self.features);
    }

    pub fn to_geojson(&self) -> geojson::FeatureCollection {
        let mut foreign_members = Map::new();
        if let Ok(metadata) = serde_json::to_value(&self.metadata) {
            foreign_members.insert("metadata".to_string(), metadata);
        }
        geojson::FeatureCollection {
            bbox: None,
            features: self.features.iter().map(AtlasFeature::to_geojson).collect(),
            foreign_members: Some(foreign_members),
        }
    }
}

impl TryFrom<geojson::FeatureCollection> for AtlasCollection {
    type Error = FeatureError;

    fn try_from(collection: geojson::FeatureCollection) -> Result<Self, Self::Error> {
        let metadata = collection
            .foreign_members
            .and_then(|mut members| members.remove("metadata"))
            .ok_or(FeatureError::MissingMetadata)?;
        let metadata: CollectionMetadata =
            serde_json::from_value(metadata).map_err(|e| FeatureError::Properties(e.to_string()))?;
        let features = collection
            .features
            .into_iter()
            .map(AtlasFeature::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AtlasCollection { features, metadata })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClaimFilter {
    pub status: Option<ClaimStatus>,
    pub claim_type: Option<ClaimType>,
}

impl ClaimFilter {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.claim_type.is_none()
    }

    pub fn matches(&self, claim: &ClaimProperties) -> bool {
        self.status.map_or(true, |s| s == claim.status)
            && self.claim_type.map_or(true, |t| t == claim.claim_type)
    }
}

fn summarize(features: &[AtlasFeature]) -> BTreeMap<String, usize> {
    let mut summary = BTreeMap::new();
    for feature in features {
        let keys: Vec<String> = match &feature.properties {
            FeatureProperties::Claim(claim) => vec![
                format!("status:{}", claim.status.as_str()),
                format!("type:{}", claim.claim_type.as_str()),
            ],
            FeatureProperties::Boundary(boundary) => {
                vec![format!("level:{}", boundary.admin_level.as_str())]
            }
            FeatureProperties::Asset(asset) => vec![format!("asset:{}", asset.asset_type.as_str())],
        };
        for key in keys {
            *summary.entry(key).or_insert(0) += 1;
        }
    }
    summary
}
