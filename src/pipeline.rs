use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    abnormality::{detect_abnormalities, Finding, ScoringParams},
    cache::SegmenterCache,
    config::{Config, Device, InputSize, DEFAULT_LABELS},
    errors::{MedSegError, Result},
    loader::{decode_image_bytes, ImageFetcher},
    mask_codec::encode_mask_b64,
    model::load_segmenter,
    segmenter::{segment_slice, HeuristicParams},
    traits::Segmenter,
};

/// Everything the pipeline needs from the process configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub input_size: InputSize,
    pub labels: Vec<String>,
    pub weights_path: Option<PathBuf>,
    pub device: Device,
    pub heuristic: HeuristicParams,
    pub scoring: ScoringParams,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            input_size: config.input_size,
            labels: config.labels.clone(),
            weights_path: config.weights_path.clone(),
            device: config.device,
            heuristic: HeuristicParams {
                tissue_percentile: config.tissue_percentile,
                lesion_percentile: config.lesion_percentile,
            },
            scoring: ScoringParams::default(),
        }
    }
}

/// One analysis call. Exactly one of `image_bytes` and `image_url` must be set.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub image_bytes: Option<Vec<u8>>,
    pub image_url: Option<String>,
    pub labels: Option<Vec<String>>,
}

impl AnalysisRequest {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            image_bytes: Some(bytes.into()),
            ..Self::default()
        }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMeta {
    pub input_shape: [usize; 2],
    pub mask_shape: [usize; 2],
    pub num_findings: usize,
}

/// Response payload of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Color-coded mask as a base64 PNG.
    pub segmentation_mask_b64: String,
    pub segmentation_labels: Vec<String>,
    pub findings: Vec<Finding>,
    pub meta: AnalysisMeta,
}

/// Load -> segment -> score -> encode.
///
/// Cheap to clone; clones share the segmenter cache.
#[derive(Clone)]
pub struct AnalysisPipeline {
    settings: Arc<PipelineSettings>,
    cache: SegmenterCache,
    fetcher: ImageFetcher,
}

impl AnalysisPipeline {
    pub fn new(settings: PipelineSettings, cache: SegmenterCache, fetcher: ImageFetcher) -> Self {
        Self {
            settings: Arc::new(settings),
            cache,
            fetcher,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            PipelineSettings::from(config),
            SegmenterCache::new(),
            ImageFetcher::new(config.fetch_timeout())?,
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// The cached segmenter, loading it on first use.
    pub fn segmenter(&self) -> Arc<dyn Segmenter> {
        let settings = &self.settings;
        self.cache.get_or_init(|| {
            load_segmenter(
                settings.weights_path.as_deref(),
                settings.device,
                settings.input_size,
                settings.heuristic,
            )
        })
    }

    /// Loads the model ahead of the first request when weights are configured.
    pub fn preload(&self) {
        if self.settings.weights_path.is_some() {
            self.segmenter();
        }
    }

    pub fn release(&self) {
        self.cache.clear();
    }

    /// Device of the loaded segmenter, or the configured device if none is loaded.
    pub fn device(&self) -> String {
        self.cache
            .get()
            .map(|segmenter| segmenter.device())
            .unwrap_or_else(|| self.settings.device.to_string())
    }

    /// Runs the full pipeline for one request.
    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalysisResult> {
        let labels = request
            .labels
            .unwrap_or_else(|| self.settings.labels.clone());
        let bytes = match (request.image_bytes, request.image_url) {
            (Some(bytes), None) => bytes,
            (None, Some(url)) if !url.is_empty() => self.fetcher.fetch(&url).await?,
            (Some(_), Some(_)) => {
                return Err(MedSegError::validation(
                    "image",
                    "Provide only one of image_bytes or image_url",
                ))
            }
            _ => {
                return Err(MedSegError::validation(
                    "image",
                    "Provide either image_bytes or image_url",
                ))
            }
        };

        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || pipeline.analyze_bytes(&bytes, labels))
            .await
            .map_err(|e| MedSegError::model("analysis task", e))?
    }

    /// Synchronous variant of [`run`](Self::run) for already-loaded bytes.
    pub fn analyze_bytes(&self, bytes: &[u8], labels: Vec<String>) -> Result<AnalysisResult> {
        let image = decode_image_bytes(bytes)?;
        self.analyze_image(image.view(), labels)
    }

    /// Segments and scores a normalized `(H, W)` image.
    pub fn analyze_image(
        &self,
        image: ArrayView2<f32>,
        labels: Vec<String>,
    ) -> Result<AnalysisResult> {
        let started = Instant::now();
        let labels = if labels.is_empty() {
            DEFAULT_LABELS.map(String::from).to_vec()
        } else {
            labels
        };

        let segmenter = self.segmenter();
        let mask = segment_slice(image, segmenter.as_ref(), self.settings.input_size)?;
        let findings = detect_abnormalities(image, mask.view(), &labels, &self.settings.scoring);
        let segmentation_mask_b64 = encode_mask_b64(mask.view())?;

        let (height, width) = image.dim();
        let (mask_height, mask_width) = mask.dim();
        debug!("Findings: {:?}", findings);
        info!(
            segmenter = segmenter.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analyzed {}x{} image, {} finding(s)",
            height,
            width,
            findings.len()
        );

        Ok(AnalysisResult {
            segmentation_mask_b64,
            segmentation_labels: labels,
            meta: AnalysisMeta {
                input_shape: [height, width],
                mask_shape: [mask_height, mask_width],
                num_findings: findings.len(),
            },
            findings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::StubSegmenter;
    use std::time::Duration;

    fn pipeline_with(segmenter: Arc<dyn Segmenter>) -> AnalysisPipeline {
        AnalysisPipeline::new(
            PipelineSettings::default(),
            SegmenterCache::with_segmenter(segmenter),
            ImageFetcher::new(Duration::from_secs(1)).unwrap(),
        )
    }

    #[test]
    fn test_mask_shape_follows_image() -> Result<()> {
        let pipeline = pipeline_with(Arc::new(StubSegmenter::constant(1)));
        let image = Array2::from_elem((123, 45), 0.5f32);

        let result = pipeline.analyze_image(image.view(), vec![])?;
        assert_eq!(result.meta.input_shape, [123, 45]);
        assert_eq!(result.meta.mask_shape, [123, 45]);
        assert_eq!(result.segmentation_labels, DEFAULT_LABELS.map(String::from));
        Ok(())
    }

    #[test]
    fn test_custom_labels_change_lesion_class() -> Result<()> {
        let pipeline = pipeline_with(Arc::new(StubSegmenter::constant(1)));
        let image = Array2::from_elem((8, 8), 0.5f32);

        let labels = vec!["background".to_string(), "tumor".to_string()];
        let result = pipeline.analyze_image(image.view(), labels.clone())?;
        assert_eq!(result.segmentation_labels, labels);
        assert_eq!(result.meta.num_findings, 1);
        assert!(result.findings[0].description.contains("tumor"));
        Ok(())
    }

    #[test]
    fn test_device_reports_loaded_segmenter() {
        let pipeline = AnalysisPipeline::new(
            PipelineSettings {
                device: Device::Cuda(0),
                ..PipelineSettings::default()
            },
            SegmenterCache::new(),
            ImageFetcher::new(Duration::from_secs(1)).unwrap(),
        );
        assert_eq!(pipeline.device(), "cuda:0");

        // no weights configured: preload is a no-op, first use loads the heuristic
        pipeline.preload();
        assert_eq!(pipeline.device(), "cuda:0");
        assert_eq!(pipeline.segmenter().name(), "threshold-heuristic");
        assert_eq!(pipeline.device(), "cpu");

        pipeline.release();
        assert_eq!(pipeline.device(), "cuda:0");
    }

    #[tokio::test]
    async fn test_run_requires_exactly_one_source() {
        let pipeline = pipeline_with(Arc::new(StubSegmenter::constant(0)));

        let err = pipeline.run(AnalysisRequest::default()).await.unwrap_err();
        assert!(err.is_validation());

        let both = AnalysisRequest {
            image_bytes: Some(vec![1, 2, 3]),
            image_url: Some("http://localhost/x.png".to_string()),
            labels: None,
        };
        let err = pipeline.run(both).await.unwrap_err();
        assert!(err.is_validation());

        let err = pipeline
            .run(AnalysisRequest::from_url(""))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_segmenter_failure_is_server_error() {
        let pipeline = pipeline_with(Arc::new(StubSegmenter::failing()));
        let png = crate::mask_codec::encode_mask_png(Array2::<u32>::zeros((4, 4)).view()).unwrap();

        let err = pipeline
            .run(AnalysisRequest::from_bytes(png))
            .await
            .unwrap_err();
        assert!(!err.is_validation());
    }
}
