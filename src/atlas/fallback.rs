//! Synthetic stand-in data for when the upstream is slow or unavailable.
//!
//! Everything here is a pure function of the region, so the same request
//! always yields the same features.

use fastrand::Rng;
use geo_types::{Geometry, Point, Polygon};

use crate::map::feature::{
    AdminLevel, AssetProperties, AssetType, AtlasCollection, AtlasFeature, BoundaryProperties,
    ClaimProperties, ClaimStatus, ClaimType, DataSource, FeatureProperties,
};
use crate::map::geo_bounds::{jittered_ring, GeoBounds};
use crate::map::region::{slug, Region};

pub const CLAIM_COUNT: usize = 24;
pub const ASSET_COUNT: usize = 16;

const VILLAGES: &[&str] = &[
    "Kendumundi", "Baliguda", "Jamuguda", "Bhimpur", "Kanha", "Garhi", "Pipariya", "Tamnar",
    "Kusumi", "Ambagaon", "Dongarpur", "Sitapali",
];

const CLAIMANTS: &[&str] = &[
    "Sunita Majhi", "Ramesh Gond", "Lakshmi Soren", "Bhagwan Baiga", "Kamala Munda",
    "Sukra Oraon", "Gita Bhil", "Mangal Korku", "Durga Hembram", "Birsa Kol",
];

fn range(rng: &mut Rng, low: f64, high: f64) -> f64 {
    low + (high - low) * rng.f64()
}

fn pick<'a>(rng: &mut Rng, items: &[&'a str]) -> &'a str {
    items[rng.usize(..items.len())]
}

fn jittered_polygon(bounds: &GeoBounds, rng: &mut Rng) -> Polygon<f64> {
    let offsets: Vec<f64> = (0..8).map(|_| rng.f64()).collect();
    Polygon::new(jittered_ring(bounds, |i| offsets[i]), vec![])
}

fn district_name(region: &Region, index: usize) -> String {
    let known = region.known_districts();
    match known.get(index) {
        Some(name) => name.to_string(),
        None => format!("{} District {}", region.state, index + 1),
    }
}

/// State outline, a 3x3 grid of districts, and 2x2 tehsils in the focus district.
pub fn boundaries(region: &Region, source: DataSource) -> AtlasCollection {
    let mut rng = Rng::with_seed(region.seed() ^ 0xb0);
    let state = region.state_region();
    let state_slug = slug(&region.state);
    let mut features = Vec::with_capacity(14);

    features.push(AtlasFeature::new(
        format!("state-{state_slug}"),
        Geometry::Polygon(jittered_polygon(&state.bounds.inset(0.01), &mut rng)),
        FeatureProperties::Boundary(BoundaryProperties {
            name: region.state.clone(),
            admin_level: AdminLevel::State,
            state: region.state.clone(),
            district: None,
            osm_id: None,
        }),
    ));

    for (i, cell) in state.bounds.grid(3, 3).iter().enumerate() {
        let name = district_name(region, i);
        features.push(AtlasFeature::new(
            format!("district-{state_slug}-{}", i + 1),
            Geometry::Polygon(jittered_polygon(&cell.inset(0.02), &mut rng)),
            FeatureProperties::Boundary(BoundaryProperties {
                name: name.clone(),
                admin_level: AdminLevel::District,
                state: region.state.clone(),
                district: Some(name),
                osm_id: None,
            }),
        ));
    }

    let focus = region.district.clone().unwrap_or_else(|| district_name(region, 0));
    let focus_bounds = if region.district.is_some() {
        region.bounds
    } else {
        state.bounds.grid(3, 3)[0]
    };
    for (i, cell) in focus_bounds.grid(2, 2).iter().enumerate() {
        features.push(AtlasFeature::new(
            format!("tehsil-{}-{}", slug(&focus), i + 1),
            Geometry::Polygon(jittered_polygon(&cell.inset(0.05), &mut rng)),
            FeatureProperties::Boundary(BoundaryProperties {
                name: format!("{focus} Tehsil {}", i + 1),
                admin_level: AdminLevel::Tehsil,
                state: region.state.clone(),
                district: Some(focus.clone()),
                osm_id: None,
            }),
        ));
    }

    AtlasCollection::new(features, source, region)
}

/// Typical claimed area in hectares for a claim type.
pub fn area_range(claim_type: ClaimType) -> (f64, f64) {
    match claim_type {
        ClaimType::IFR => (0.5, 4.0),
        ClaimType::CR => (10.0, 60.0),
        ClaimType::CFR => (50.0, 300.0),
    }
}

/// Claimant for community claims is the village assembly, not a person.
pub fn claimant_for(claim_type: ClaimType, person: &str, village: &str) -> String {
    match claim_type {
        ClaimType::IFR => person.to_string(),
        ClaimType::CR | ClaimType::CFR => format!("Gram Sabha, {village}"),
    }
}

/// [`CLAIM_COUNT`] small claim parcels spread over the region.
pub fn claims(region: &Region, source: DataSource) -> AtlasCollection {
    let mut rng = Rng::with_seed(region.seed() ^ 0xc1);
    let prefix = region.id_prefix();
    let cells = region.bounds.inset(0.05).grid(6, 4);
    let known = region.known_districts();

    let features = cells
        .iter()
        .take(CLAIM_COUNT)
        .enumerate()
        .map(|(i, cell)| {
            let status = ClaimStatus::ALL[i % 3];
            let claim_type = ClaimType::ALL[(i / 3) % 3];
            let village = pick(&mut rng, VILLAGES);
            let person = pick(&mut rng, CLAIMANTS);
            let (low, high) = area_range(claim_type);
            let area_ha = (range(&mut rng, low, high) * 100.0).round() / 100.0;

            // Parcel occupies a third of its cell, placed somewhere inside it.
            let parcel = cell.inset(0.33);
            let (h, w) = parcel.size();
            let dx = range(&mut rng, -0.2, 0.2) * w;
            let dy = range(&mut rng, -0.2, 0.2) * h;
            let shifted = GeoBounds::from_extent(
                parcel.south() + dy,
                parcel.west() + dx,
                parcel.north() + dy,
                parcel.east() + dx,
            );

            let district = region
                .district
                .clone()
                .or_else(|| known.get(i % known.len().max(1)).map(|d| d.to_string()))
                .unwrap_or_else(|| "Unassigned".to_string());

            AtlasFeature::new(
                format!("claim-{}", i + 1),
                Geometry::Polygon(jittered_polygon(&shifted, &mut rng)),
                FeatureProperties::Claim(ClaimProperties {
                    claim_id: format!("FRA-{prefix}-{:04}", i + 1),
                    claimant: claimant_for(claim_type, person, village),
                    village: village.to_string(),
                    state: region.state.clone(),
                    district,
                    status,
                    claim_type,
                    area_ha,
                    osm_id: None,
                }),
            )
        })
        .collect();

    AtlasCollection::new(features, source, region)
}

/// [`ASSET_COUNT`] village assets, four of each type.
pub fn assets(region: &Region) -> AtlasCollection {
    let mut rng = Rng::with_seed(region.seed() ^ 0xa5);
    let inner = region.bounds.inset(0.05);
    let district = region.district.clone().unwrap_or_else(|| district_name(region, 0));

    let features = (0..ASSET_COUNT)
        .map(|i| {
            let asset_type = AssetType::ALL[i % AssetType::ALL.len()];
            let c = inner.lerp(rng.f64(), rng.f64());
            let village = pick(&mut rng, VILLAGES);
            let (label, low, high) = match asset_type {
                AssetType::WaterBody => ("Pond", 0.2, 5.0),
                AssetType::AgriculturalLand => ("Farmland", 1.0, 20.0),
                AssetType::ForestCover => ("Forest patch", 5.0, 80.0),
                AssetType::Homestead => ("Homestead", 0.05, 0.5),
            };
            AtlasFeature::new(
                format!("asset-{}", i + 1),
                Geometry::Point(Point::from(c)),
                FeatureProperties::Asset(AssetProperties {
                    name: format!("{label} {}", i / AssetType::ALL.len() + 1),
                    asset_type,
                    village: village.to_string(),
                    state: region.state.clone(),
                    district: district.clone(),
                    area_ha: (range(&mut rng, low, high) * 100.0).round() / 100.0,
                }),
            )
        })
        .collect();

    AtlasCollection::new(features, DataSource::AssetInventory, region)
}
