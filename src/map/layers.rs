use std::collections::BTreeSet;

use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};

use super::containment::{claims_within, Popup};
use super::feature::{AdminLevel, AssetType, AtlasCollection, AtlasFeature, ClaimStatus, DataSource};
use super::region::Region;

const HIGHLIGHT_SOURCE: &str = "boundaries-highlight";
const HIGHLIGHT_LAYER: &str = "boundaries-highlight-line";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Boundaries,
    Claims,
    Assets,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Boundaries => "boundaries",
            LayerKind::Claims => "claims",
            LayerKind::Assets => "assets",
        }
    }

    /// Sources this layer installs. Boundaries get one source per admin level.
    pub fn source_ids(&self) -> Vec<String> {
        match self {
            LayerKind::Boundaries => AdminLevel::ALL.iter().map(boundary_source_id).collect(),
            LayerKind::Claims => vec!["claims".to_string()],
            LayerKind::Assets => vec!["assets".to_string()],
        }
    }

    /// Styled layers this layer installs, in draw order.
    pub fn layer_specs(&self) -> Vec<LayerSpec> {
        match self {
            LayerKind::Boundaries => AdminLevel::ALL
                .iter()
                .map(|level| {
                    let (color, width, dashed) = match level {
                        AdminLevel::State => ("#1e3a8a", 3.0, false),
                        AdminLevel::District => ("#2563eb", 2.0, false),
                        AdminLevel::Tehsil => ("#60a5fa", 1.0, true),
                    };
                    LayerSpec {
                        id: format!("{}-line", boundary_source_id(level)),
                        source: boundary_source_id(level),
                        style: LayerStyle::Line { color, width, dashed },
                    }
                })
                .collect(),
            LayerKind::Claims => vec![
                LayerSpec {
                    id: "claims-fill".to_string(),
                    source: "claims".to_string(),
                    style: LayerStyle::Fill {
                        color: Paint::ByStatus,
                        opacity: 0.45,
                    },
                },
                LayerSpec {
                    id: "claims-outline".to_string(),
                    source: "claims".to_string(),
                    style: LayerStyle::Line {
                        color: "#14532d",
                        width: 1.0,
                        dashed: false,
                    },
                },
            ],
            LayerKind::Assets => vec![LayerSpec {
                id: "assets-circle".to_string(),
                source: "assets".to_string(),
                style: LayerStyle::Circle {
                    color: Paint::ByAssetType,
                    radius: 5.0,
                },
            }],
        }
    }

    pub fn layer_ids(&self) -> Vec<String> {
        self.layer_specs().into_iter().map(|spec| spec.id).collect()
    }
}

fn boundary_source_id(level: &AdminLevel) -> String {
    format!("boundaries-{}", level.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Paint {
    Solid(&'static str),
    ByStatus,
    ByAssetType,
}

impl Paint {
    /// Colour for one feature, the way a data-driven paint expression would pick it.
    pub fn resolve(&self, feature: &AtlasFeature) -> &'static str {
        match self {
            Paint::Solid(color) => color,
            Paint::ByStatus => match feature.as_claim().map(|c| c.status) {
                Some(ClaimStatus::Granted) => "#16a34a",
                Some(ClaimStatus::Submitted) => "#f59e0b",
                Some(ClaimStatus::Pending) => "#dc2626",
                None => "#6b7280",
            },
            Paint::ByAssetType => match feature.as_asset().map(|a| a.asset_type) {
                Some(AssetType::WaterBody) => "#0ea5e9",
                Some(AssetType::AgriculturalLand) => "#eab308",
                Some(AssetType::ForestCover) => "#15803d",
                Some(AssetType::Homestead) => "#a16207",
                None => "#6b7280",
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerStyle {
    Fill { color: Paint, opacity: f32 },
    Line { color: &'static str, width: f32, dashed: bool },
    Circle { color: Paint, radius: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub id: String,
    pub source: String,
    pub style: LayerStyle,
}

/// The drawing surface the reconciler keeps in sync.
pub trait MapRenderer {
    fn add_source(&mut self, id: &str, data: &AtlasCollection);
    fn remove_source(&mut self, id: &str);
    fn add_layer(&mut self, layer: LayerSpec);
    fn remove_layer(&mut self, id: &str);
    fn has_source(&self, id: &str) -> bool;
    fn has_layer(&self, id: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayerError {
    #[error("failed to load {kind:?} layer: {message}")]
    Load { kind: LayerKind, message: String },
    #[error("boundaries layer is not active")]
    BoundariesInactive,
    #[error("no selection has been applied yet")]
    NoSelection,
}

/// Where layer data comes from: the in-process service or the HTTP API.
pub trait LayerDataSource: Send + Sync {
    fn load<'a>(
        &'a self,
        kind: LayerKind,
        region: &'a Region,
    ) -> BoxFuture<'a, Result<AtlasCollection, LayerError>>;
}

/// Desired map state: a region and the layers shown over it.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSelection {
    pub region: Region,
    pub enabled: BTreeSet<LayerKind>,
}

impl LayerSelection {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            enabled: BTreeSet::new(),
        }
    }

    pub fn with(mut self, kind: LayerKind) -> Self {
        self.enabled.insert(kind);
        self
    }

    pub fn without(mut self, kind: LayerKind) -> Self {
        self.enabled.remove(&kind);
        self
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ReconcileReport {
    pub added: Vec<LayerKind>,
    pub removed: Vec<LayerKind>,
    pub unchanged: Vec<LayerKind>,
    pub failed: Vec<LayerError>,
    /// Sources of the newly added layers, synthetic ones included.
    pub provenance: Vec<(LayerKind, DataSource)>,
}

/// Keeps a [`MapRenderer`] in step with successive [`LayerSelection`]s.
///
/// The reconciler diffs against what it actually installed, not against the
/// previous request, so a layer whose fetch failed is retried on the next pass.
#[derive(Debug, Default)]
pub struct LayerReconciler {
    region: Option<Region>,
    active: BTreeSet<LayerKind>,
    highlighted: Option<String>,
}

impl LayerReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.highlighted.as_deref()
    }

    pub async fn reconcile<R, S>(
        &mut self,
        desired: &LayerSelection,
        renderer: &mut R,
        source: &S,
    ) -> ReconcileReport
    where
        R: MapRenderer,
        S: LayerDataSource + ?Sized,
    {
        let mut report = ReconcileReport::default();
        let region_changed = self.region.as_ref() != Some(&desired.region);

        let stale: Vec<LayerKind> = self
            .active
            .iter()
            .filter(|kind| region_changed || !desired.enabled.contains(kind))
            .copied()
            .collect();
        for kind in stale {
            self.uninstall(kind, renderer);
            report.removed.push(kind);
        }
        self.region = Some(desired.region.clone());

        let mut pending = Vec::new();
        for kind in &desired.enabled {
            if self.active.contains(kind) {
                report.unchanged.push(*kind);
            } else {
                pending.push(*kind);
            }
        }

        let loads = pending.iter().map(|kind| source.load(*kind, &desired.region));
        let results = join_all(loads).await;

        for (kind, result) in pending.into_iter().zip(results) {
            match result {
                Ok(data) => {
                    self.install(kind, &data, renderer);
                    report.provenance.push((kind, data.metadata.source));
                    report.added.push(kind);
                }
                Err(err) => {
                    log::warn!("leaving {} layer off: {}", kind.as_str(), err);
                    report.failed.push(err);
                }
            }
        }

        log::debug!(
            "reconciled layers: +{:?} -{:?} ={:?} failed={}",
            report.added,
            report.removed,
            report.unchanged,
            report.failed.len()
        );
        report
    }

    /// Counts claims inside a clicked boundary and highlights it.
    pub async fn handle_boundary_click<R, S>(
        &mut self,
        clicked: &AtlasFeature,
        renderer: &mut R,
        source: &S,
        buffer_deg: f64,
    ) -> Result<Popup, LayerError>
    where
        R: MapRenderer,
        S: LayerDataSource + ?Sized,
    {
        if !self.active.contains(&LayerKind::Boundaries) {
            return Err(LayerError::BoundariesInactive);
        }
        let region = self.region.as_ref().ok_or(LayerError::NoSelection)?.state_region();
        let claims = source.load(LayerKind::Claims, &region).await?;

        let summary =
            claims_within(clicked.name(), &clicked.geometry, &claims.features, buffer_deg);

        self.clear_highlight(renderer);
        let overlay = AtlasCollection {
            features: vec![clicked.clone()],
            metadata: claims.metadata.clone(),
        };
        renderer.add_source(HIGHLIGHT_SOURCE, &overlay);
        renderer.add_layer(LayerSpec {
            id: HIGHLIGHT_LAYER.to_string(),
            source: HIGHLIGHT_SOURCE.to_string(),
            style: LayerStyle::Line {
                color: "#f97316",
                width: 4.0,
                dashed: false,
            },
        });
        self.highlighted = Some(clicked.id.clone());

        Ok(summary.to_popup())
    }

    fn install<R: MapRenderer>(
        &mut self,
        kind: LayerKind,
        data: &AtlasCollection,
        renderer: &mut R,
    ) {
        match kind {
            LayerKind::Boundaries => {
                for level in AdminLevel::ALL {
                    let features = data
                        .features
                        .iter()
                        .filter(|f| f.as_boundary().is_some_and(|b| b.admin_level == level))
                        .cloned()
                        .collect();
                    let subset = AtlasCollection {
                        features,
                        metadata: data.metadata.clone(),
                    };
                    replace_source(renderer, &boundary_source_id(&level), &subset);
                }
            }
            LayerKind::Claims | LayerKind::Assets => {
                for id in kind.source_ids() {
                    replace_source(renderer, &id, data);
                }
            }
        }
        for spec in kind.layer_specs() {
            if !renderer.has_layer(&spec.id) {
                renderer.add_layer(spec);
            }
        }
        self.active.insert(kind);
    }

    fn uninstall<R: MapRenderer>(&mut self, kind: LayerKind, renderer: &mut R) {
        if kind == LayerKind::Boundaries {
            self.clear_highlight(renderer);
        }
        // Layers go before the sources they draw from.
        for id in kind.layer_ids() {
            if renderer.has_layer(&id) {
                renderer.remove_layer(&id);
            }
        }
        for id in kind.source_ids() {
            if renderer.has_source(&id) {
                renderer.remove_source(&id);
            }
        }
        self.active.remove(&kind);
    }

    fn clear_highlight<R: MapRenderer>(&mut self, renderer: &mut R) {
        if renderer.has_layer(HIGHLIGHT_LAYER) {
            renderer.remove_layer(HIGHLIGHT_LAYER);
        }
        if renderer.has_source(HIGHLIGHT_SOURCE) {
            renderer.remove_source(HIGHLIGHT_SOURCE);
        }
        self.highlighted = None;
    }
}

fn replace_source<R: MapRenderer>(renderer: &mut R, id: &str, data: &AtlasCollection) {
    if renderer.has_source(id) {
        renderer.remove_source(id);
    }
    renderer.add_source(id, data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::fallback;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingRenderer {
        sources: BTreeMap<String, usize>,
        layers: BTreeMap<String, LayerSpec>,
        source_adds: usize,
    }

    impl MapRenderer for RecordingRenderer {
        fn add_source(&mut self, id: &str, data: &AtlasCollection) {
            assert!(!self.sources.contains_key(id), "duplicate source {id}");
            self.sources.insert(id.to_string(), data.features.len());
            self.source_adds += 1;
        }

        fn remove_source(&mut self, id: &str) {
            assert!(
                !self.layers.values().any(|l| l.source == id),
                "source {id} removed while a layer still uses it"
            );
            self.sources.remove(id);
        }

        fn add_layer(&mut self, layer: LayerSpec) {
            assert!(self.sources.contains_key(&layer.source), "layer {} has no source", layer.id);
            self.layers.insert(layer.id.clone(), layer);
        }

        fn remove_layer(&mut self, id: &str) {
            self.layers.remove(id);
        }

        fn has_source(&self, id: &str) -> bool {
            self.sources.contains_key(id)
        }

        fn has_layer(&self, id: &str) -> bool {
            self.layers.contains_key(id)
        }
    }

    /// Serves generated data and counts loads; `fail` makes one kind error out.
    #[derive(Default)]
    struct GeneratedSource {
        loads: AtomicUsize,
        fail: Option<LayerKind>,
    }

    impl LayerDataSource for GeneratedSource {
        fn load<'a>(
            &'a self,
            kind: LayerKind,
            region: &'a Region,
        ) -> BoxFuture<'a, Result<AtlasCollection, LayerError>> {
            Box::pin(async move {
                self.loads.fetch_add(1, Ordering::SeqCst);
                if self.fail == Some(kind) {
                    return Err(LayerError::Load {
                        kind,
                        message: "upstream unavailable".into(),
                    });
                }
                let source = DataSource::FastMock;
                Ok(match kind {
                    LayerKind::Boundaries => fallback::boundaries(region, source),
                    LayerKind::Claims => fallback::claims(region, source),
                    LayerKind::Assets => fallback::assets(region),
                })
            })
        }
    }

    fn expected(kinds: &[LayerKind]) -> (BTreeSet<String>, BTreeSet<String>) {
        let sources = kinds.iter().flat_map(|k| k.source_ids()).collect();
        let layers = kinds.iter().flat_map(|k| k.layer_ids()).collect();
        (sources, layers)
    }

    fn present(renderer: &RecordingRenderer) -> (BTreeSet<String>, BTreeSet<String>) {
        (
            renderer.sources.keys().cloned().collect(),
            renderer.layers.keys().cloned().collect(),
        )
    }

    #[tokio::test]
    async fn renderer_tracks_each_selection_exactly() {
        let region = Region::resolve(Some("Odisha"), Some("Puri"));
        let source = GeneratedSource::default();
        let mut renderer = RecordingRenderer::default();
        let mut reconciler = LayerReconciler::new();

        let steps = [
            vec![LayerKind::Claims],
            vec![LayerKind::Claims, LayerKind::Boundaries],
            vec![LayerKind::Boundaries, LayerKind::Assets],
            vec![],
            vec![LayerKind::Assets, LayerKind::Claims, LayerKind::Boundaries],
        ];
        for kinds in steps {
            let mut selection = LayerSelection::new(region.clone());
            for kind in &kinds {
                selection = selection.with(*kind);
            }
            let report = reconciler.reconcile(&selection, &mut renderer, &source).await;
            assert!(report.failed.is_empty());
            assert_eq!(present(&renderer), expected(&kinds), "after selecting {kinds:?}");
        }
    }

    #[tokio::test]
    async fn unchanged_layers_are_not_refetched() {
        let region = Region::resolve(Some("Odisha"), Some("Puri"));
        let source = GeneratedSource::default();
        let mut renderer = RecordingRenderer::default();
        let mut reconciler = LayerReconciler::new();

        let first = LayerSelection::new(region.clone()).with(LayerKind::Claims);
        reconciler.reconcile(&first, &mut renderer, &source).await;
        let adds = renderer.source_adds;

        let second = first.clone().with(LayerKind::Assets);
        let report = reconciler.reconcile(&second, &mut renderer, &source).await;
        assert_eq!(report.unchanged, vec![LayerKind::Claims]);
        assert_eq!(report.added, vec![LayerKind::Assets]);
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
        assert_eq!(renderer.source_adds, adds + 1);
    }

    #[tokio::test]
    async fn boundaries_split_by_admin_level() {
        let region = Region::resolve(Some("Odisha"), Some("Puri"));
        let mut renderer = RecordingRenderer::default();
        let mut reconciler = LayerReconciler::new();
        let selection = LayerSelection::new(region).with(LayerKind::Boundaries);
        reconciler.reconcile(&selection, &mut renderer, &GeneratedSource::default()).await;

        assert_eq!(renderer.sources["boundaries-state"], 1);
        assert_eq!(renderer.sources["boundaries-district"], 9);
        assert_eq!(renderer.sources["boundaries-tehsil"], 4);
        let line_ids = [
            "boundaries-state-line",
            "boundaries-district-line",
            "boundaries-tehsil-line",
        ];
        let widths: Vec<f32> = line_ids
            .iter()
            .map(|id| match renderer.layers[*id].style {
                LayerStyle::Line { width, .. } => width,
                _ => panic!("boundary layers are lines"),
            })
            .collect();
        assert_eq!(widths, vec![3.0, 2.0, 1.0]);
    }

    #[tokio::test]
    async fn failed_layer_is_retried_next_pass() {
        let region = Region::resolve(Some("Tripura"), Some("Dhalai"));
        let mut renderer = RecordingRenderer::default();
        let mut reconciler = LayerReconciler::new();
        let selection = LayerSelection::new(region).with(LayerKind::Claims).with(LayerKind::Assets);

        let failing = GeneratedSource {
            fail: Some(LayerKind::Claims),
            ..Default::default()
        };
        let report = reconciler.reconcile(&selection, &mut renderer, &failing).await;
        assert_eq!(report.added, vec![LayerKind::Assets]);
        assert_eq!(report.failed.len(), 1);
        assert!(!renderer.has_source("claims"));

        let healthy = GeneratedSource::default();
        let report = reconciler.reconcile(&selection, &mut renderer, &healthy).await;
        assert_eq!(report.added, vec![LayerKind::Claims]);
        assert_eq!(present(&renderer), expected(&[LayerKind::Claims, LayerKind::Assets]));
    }

    #[tokio::test]
    async fn region_change_reloads_everything() {
        let source = GeneratedSource::default();
        let mut renderer = RecordingRenderer::default();
        let mut reconciler = LayerReconciler::new();
        let puri = Region::resolve(Some("Odisha"), Some("Puri"));
        let puri = LayerSelection::new(puri).with(LayerKind::Claims);
        reconciler.reconcile(&puri, &mut renderer, &source).await;

        let koraput = Region::resolve(Some("Odisha"), Some("Koraput"));
        let koraput = LayerSelection::new(koraput).with(LayerKind::Claims);
        let report = reconciler.reconcile(&koraput, &mut renderer, &source).await;
        assert_eq!(report.removed, vec![LayerKind::Claims]);
        assert_eq!(report.added, vec![LayerKind::Claims]);
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn boundary_click_highlights_and_disabling_clears_it() {
        let region = Region::resolve(Some("Odisha"), Some("Puri"));
        let source = GeneratedSource::default();
        let mut renderer = RecordingRenderer::default();
        let mut reconciler = LayerReconciler::new();
        let selection = LayerSelection::new(region.clone()).with(LayerKind::Boundaries);
        reconciler.reconcile(&selection, &mut renderer, &source).await;

        let boundaries = fallback::boundaries(&region, DataSource::FastMock);
        let state = boundaries
            .features
            .iter()
            .find(|f| f.as_boundary().is_some_and(|b| b.admin_level == AdminLevel::State))
            .unwrap();
        let popup = reconciler
            .handle_boundary_click(state, &mut renderer, &source, 0.0045)
            .await
            .unwrap();
        assert_eq!(popup.title, "Odisha");
        assert!(popup.footer.starts_with("Showing "));
        assert!(renderer.has_layer(HIGHLIGHT_LAYER));
        assert_eq!(reconciler.highlighted(), Some(state.id.as_str()));

        let off = selection.without(LayerKind::Boundaries);
        reconciler.reconcile(&off, &mut renderer, &source).await;
        assert!(!renderer.has_source(HIGHLIGHT_SOURCE));
        assert!(renderer.sources.is_empty());
        assert_eq!(reconciler.highlighted(), None);
    }

    #[tokio::test]
    async fn click_requires_active_boundaries() {
        let region = Region::resolve(Some("Odisha"), Some("Puri"));
        let feature = fallback::boundaries(&region, DataSource::FastMock).features.remove(0);
        let mut reconciler = LayerReconciler::new();
        let mut renderer = RecordingRenderer::default();
        let source = GeneratedSource::default();
        let err = reconciler
            .handle_boundary_click(&feature, &mut renderer, &source, 0.0045)
            .await
            .unwrap_err();
        assert_eq!(err, LayerError::BoundariesInactive);
    }

    #[test]
    fn status_paint_matches_claim() {
        let region = Region::resolve(Some("Odisha"), Some("Puri"));
        let claims = fallback::claims(&region, DataSource::FastMock);
        for feature in &claims.features {
            let expected = match feature.as_claim().unwrap().status {
                ClaimStatus::Granted => "#16a34a",
                ClaimStatus::Submitted => "#f59e0b",
                ClaimStatus::Pending => "#dc2626",
            };
            assert_eq!(Paint::ByStatus.resolve(feature), expected);
        }
    }
}
