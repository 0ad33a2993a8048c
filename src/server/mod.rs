//! HTTP surface over [`AtlasService`].

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use geo_types::Geometry;
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::atlas::service::AtlasService;
use crate::map::feature::{AtlasCollection, ClaimFilter, ClaimStatus, ClaimType};
use crate::map::region::Region;

pub const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";

pub fn router(service: Arc<AtlasService>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/atlas/boundaries", get(boundaries))
        .route("/api/atlas/fra", get(fra))
        .route("/api/atlas/assets", get(assets))
        .route("/api/atlas/claims/within", post(claims_within))
        .with_state(service)
        .layer(CorsLayer::permissive())
}

/// `?state=&district=`
#[derive(Debug, Default, Deserialize)]
pub struct RegionQuery {
    pub state: Option<String>,
    pub district: Option<String>,
}

impl RegionQuery {
    fn region(&self) -> Region {
        Region::resolve(self.state.as_deref(), self.district.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FraQuery {
    pub state: Option<String>,
    pub district: Option<String>,
    pub status: Option<ClaimStatus>,
    pub claim_type: Option<ClaimType>,
}

#[derive(Debug, Deserialize)]
pub struct WithinRequest {
    pub state: Option<String>,
    pub district: Option<String>,
    pub boundary: geojson::Feature,
}

fn geojson_response(collection: &AtlasCollection) -> Response {
    match serde_json::to_string(&collection.to_geojson()) {
        Ok(body) => ([(header::CONTENT_TYPE, GEOJSON_CONTENT_TYPE)], body).into_response(),
        Err(err) => {
            log::error!("failed to encode collection: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn boundaries(
    State(service): State<Arc<AtlasService>>,
    Query(query): Query<RegionQuery>,
) -> Response {
    let collection = service.boundaries(&query.region()).await;
    geojson_response(&collection)
}

async fn fra(State(service): State<Arc<AtlasService>>, Query(query): Query<FraQuery>) -> Response {
    let region = Region::resolve(query.state.as_deref(), query.district.as_deref());
    let filter = ClaimFilter {
        status: query.status,
        claim_type: query.claim_type,
    };
    let collection = service.fra(&region, &filter).await;
    geojson_response(&collection)
}

async fn assets(
    State(service): State<Arc<AtlasService>>,
    Query(query): Query<RegionQuery>,
) -> Response {
    let collection = service.assets(&query.region()).await;
    geojson_response(&collection)
}

async fn claims_within(
    State(service): State<Arc<AtlasService>>,
    Json(request): Json<WithinRequest>,
) -> Response {
    let name = request
        .boundary
        .property("name")
        .and_then(|v| v.as_str())
        .unwrap_or("Selected boundary")
        .to_string();
    let Some(geometry) = request.boundary.geometry else {
        return (StatusCode::UNPROCESSABLE_ENTITY, "boundary feature has no geometry")
            .into_response();
    };
    let geometry = match Geometry::<f64>::try_from(geometry) {
        Ok(geometry) => geometry,
        Err(err) => return (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()).into_response(),
    };

    let region = Region::resolve(request.state.as_deref(), request.district.as_deref());
    Json(service.claims_within(&region, &name, &geometry).await).into_response()
}
