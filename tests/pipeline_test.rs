use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use ndarray::prelude::*;

use medical_image_seg::{
    config::{Config, InputSize},
    imageops::stats::percentile,
    loader::{decode_image_bytes, ImageFetcher},
    mask_codec::decode_mask_b64,
    mocks::StubSegmenter,
    AnalysisPipeline, AnalysisRequest, PipelineSettings, Result, SegmenterCache,
};

fn png(image: DynamicImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let total = (width * height - 1) as f32;
    let image = GrayImage::from_fn(width, height, |x, y| {
        Luma([((y * width + x) as f32 / total * 255.0) as u8])
    });
    png(DynamicImage::ImageLuma8(image))
}

fn pipeline(input_size: InputSize, cache: SegmenterCache) -> AnalysisPipeline {
    let config = Config {
        input_size,
        ..Config::default()
    };
    AnalysisPipeline::new(
        PipelineSettings::from(&config),
        cache,
        ImageFetcher::new(Duration::from_secs(5)).unwrap(),
    )
}

#[tokio::test]
async fn test_mask_shape_matches_input_for_any_model_size() -> Result<()> {
    let bytes = gradient_png(97, 41);
    for size in [InputSize::square(256), InputSize::new(32, 64), InputSize::square(7)] {
        let result = pipeline(size, SegmenterCache::new())
            .run(AnalysisRequest::from_bytes(bytes.clone()))
            .await?;

        assert_eq!(result.meta.input_shape, [41, 97]);
        assert_eq!(result.meta.mask_shape, [41, 97]);
        assert_eq!(decode_mask_b64(&result.segmentation_mask_b64)?.dim(), (41, 97));
    }
    Ok(())
}

#[tokio::test]
async fn test_fixed_size_segmenter_overrides_configured_size() -> Result<()> {
    let segmenter = StubSegmenter::constant(1).with_input_size(InputSize::square(48));
    let cache = SegmenterCache::with_segmenter(Arc::new(segmenter));

    let result = pipeline(InputSize::square(256), cache)
        .run(AnalysisRequest::from_bytes(gradient_png(90, 30)))
        .await?;

    assert_eq!(result.meta.mask_shape, [30, 90]);
    let mask = decode_mask_b64(&result.segmentation_mask_b64)?;
    assert!(mask.iter().all(|&l| l == 1));
    Ok(())
}

#[tokio::test]
async fn test_heuristic_thresholds_on_gradient() -> Result<()> {
    let bytes = gradient_png(64, 64);
    let result = pipeline(InputSize::square(64), SegmenterCache::new())
        .run(AnalysisRequest::from_bytes(bytes.clone()))
        .await?;

    let image = decode_image_bytes(&bytes)?;
    let p50 = percentile(image.iter().copied(), 50.0).unwrap();
    let p95 = percentile(image.iter().copied(), 95.0).unwrap();
    let mask = decode_mask_b64(&result.segmentation_mask_b64)?;

    for (v, label) in image.iter().zip(mask.iter()) {
        let expected = if *v >= p95 {
            2
        } else if *v > p50 {
            1
        } else {
            0
        };
        assert_eq!(*label, expected);
    }
    assert!(mask.iter().any(|&l| l == 0));
    assert!(mask.iter().any(|&l| l == 1));
    assert!(mask.iter().any(|&l| l == 2));
    Ok(())
}

#[tokio::test]
async fn test_color_input_is_reduced_to_2d() -> Result<()> {
    let image = RgbImage::from_fn(20, 10, |x, _| Rgb([(x * 10) as u8, 0, 255]));
    let result = pipeline(InputSize::square(16), SegmenterCache::new())
        .run(AnalysisRequest::from_bytes(png(DynamicImage::ImageRgb8(image))))
        .await?;
    assert_eq!(result.meta.input_shape, [10, 20]);
    assert_eq!(result.meta.mask_shape, [10, 20]);
    Ok(())
}

#[tokio::test]
async fn test_stub_segmenter_full_lesion_coverage() -> Result<()> {
    let cache = SegmenterCache::with_segmenter(Arc::new(StubSegmenter::constant(2)));
    let bytes = png(DynamicImage::ImageLuma8(GrayImage::from_pixel(
        30,
        30,
        Luma([128]),
    )));

    let result = pipeline(InputSize::square(64), cache)
        .run(AnalysisRequest::from_bytes(bytes))
        .await?;

    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].label, "Potential lesion / abnormal tissue");
    assert_eq!(result.findings[0].confidence, 0.9);
    assert_eq!(result.meta.num_findings, 1);

    let mask = decode_mask_b64(&result.segmentation_mask_b64)?;
    assert!(mask.iter().all(|&l| l == 2));
    Ok(())
}

#[tokio::test]
async fn test_stub_segmenter_without_lesion() -> Result<()> {
    let cache = SegmenterCache::with_segmenter(Arc::new(StubSegmenter::constant(1)));
    let bytes = png(DynamicImage::ImageLuma8(GrayImage::from_pixel(
        12,
        12,
        Luma([90]),
    )));

    let result = pipeline(InputSize::square(8), cache)
        .run(AnalysisRequest::from_bytes(bytes))
        .await?;
    assert!(result.findings.is_empty());
    assert_eq!(result.meta.num_findings, 0);
    Ok(())
}

#[tokio::test]
async fn test_black_image_has_no_intensity_finding() -> Result<()> {
    let cache = SegmenterCache::with_segmenter(Arc::new(StubSegmenter::constant(0)));
    let bytes = png(DynamicImage::ImageLuma8(GrayImage::new(16, 16)));

    let result = pipeline(InputSize::square(16), cache)
        .run(AnalysisRequest::from_bytes(bytes))
        .await?;
    assert!(result.findings.is_empty());
    Ok(())
}

#[test]
fn test_analyze_image_accepts_raw_arrays() -> Result<()> {
    let cache = SegmenterCache::with_segmenter(Arc::new(StubSegmenter::constant(1)));
    let pipeline = pipeline(InputSize::square(32), cache.clone());

    let image = Array2::from_shape_fn((50, 70), |(y, x)| ((x + y) % 10) as f32 / 10.0);
    let result = pipeline.analyze_image(image.view(), vec![])?;
    assert_eq!(result.meta.mask_shape, [50, 70]);
    assert_eq!(cache.get().map(|s| s.name().to_string()), Some("stub".to_string()));
    Ok(())
}
