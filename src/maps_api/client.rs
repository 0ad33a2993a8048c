use futures::future::BoxFuture;
use geo_types::Geometry;
use serde_json::json;

use crate::map::containment::ContainmentSummary;
use crate::map::feature::{AtlasCollection, ClaimFilter, FeatureError};
use crate::map::layers::{LayerDataSource, LayerError, LayerKind};
use crate::map::region::Region;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered HTTP {0}")]
    Status(u16),
    #[error("response is not valid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error(transparent)]
    Feature(#[from] FeatureError),
}

/// Reads atlas layers from a running server.
#[derive(Debug, Clone)]
pub struct AtlasClient {
    client: reqwest::Client,
    base_url: String,
}

impl AtlasClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn region_params(region: &Region) -> Vec<(&'static str, String)> {
        let mut params = vec![("state", region.state.clone())];
        if let Some(district) = &region.district {
            params.push(("district", district.clone()));
        }
        params
    }

    async fn get_collection(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<AtlasCollection, ClientError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        let collection: geojson::FeatureCollection = body.parse::<geojson::GeoJson>()?.try_into()?;
        Ok(AtlasCollection::try_from(collection)?)
    }

    pub async fn boundaries(&self, region: &Region) -> Result<AtlasCollection, ClientError> {
        self.get_collection("/api/atlas/boundaries", &Self::region_params(region)).await
    }

    pub async fn fra(
        &self,
        region: &Region,
        filter: &ClaimFilter,
    ) -> Result<AtlasCollection, ClientError> {
        let mut params = Self::region_params(region);
        if let Some(status) = filter.status {
            params.push(("status", status.as_str().to_string()));
        }
        if let Some(claim_type) = filter.claim_type {
            params.push(("claim_type", claim_type.as_str().to_string()));
        }
        self.get_collection("/api/atlas/fra", &params).await
    }

    pub async fn assets(&self, region: &Region) -> Result<AtlasCollection, ClientError> {
        self.get_collection("/api/atlas/assets", &Self::region_params(region)).await
    }

    pub async fn claims_within(
        &self,
        region: &Region,
        name: &str,
        boundary: &Geometry<f64>,
    ) -> Result<ContainmentSummary, ClientError> {
        let body = json!({
            "state": region.state,
            "district": region.district,
            "boundary": {
                "type": "Feature",
                "geometry": geojson::Geometry::new(geojson::Value::from(boundary)),
                "properties": {"name": name},
            },
        });
        let response = self
            .client
            .post(format!("{}/api/atlas/claims/within", self.base_url))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

impl LayerDataSource for AtlasClient {
    fn load<'a>(
        &'a self,
        kind: LayerKind,
        region: &'a Region,
    ) -> BoxFuture<'a, Result<AtlasCollection, LayerError>> {
        Box::pin(async move {
            let result = match kind {
                LayerKind::Boundaries => self.boundaries(region).await,
                LayerKind::Claims => self.fra(region, &ClaimFilter::default()).await,
                LayerKind::Assets => self.assets(region).await,
            };
            result.map_err(|err| LayerError::Load {
                kind,
                message: err.to_string(),
            })
        })
    }
}
