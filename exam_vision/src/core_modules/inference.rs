// THEORY:
// The `inference` module is the analysis stage of the pipeline. It is built
// around the `Analyzer` capability: anything that can take an `ImageAsset` and
// return an overlay asset plus a confidence score. Ingestion and the registry
// only ever see that trait, so a real model can replace the simulator without
// touching them.
//
// The `InferenceSimulator` is a documented stand-in for a segmentation model.
// It does not look at the image content at all:
// 1.  **Saliency field**: One independent uniform [0, 1) value per pixel,
//     exactly `height x width` of them. Every call is a fresh draw; repeated
//     analyses of the same image differ, modeling inference variance.
// 2.  **Compositing**: Each value is mapped through the jet color scale and
//     alpha-blended over the matching original pixel. The overlay has no axes,
//     margins or borders and keeps the original's exact dimensions.
// 3.  **Persistence**: The composite is PNG-encoded and written to the results
//     area under a fresh key derived from the original's key.
// 4.  **Confidence**: A uniform integer in [88, 98].
//
// Images above the configured pixel budget are refused up front with
// `DimensionOverflow`; that budget is the only bound on analysis time.

use crate::core_modules::asset_store::{AssetStore, StorageArea};
use crate::core_modules::colormap::{blend, jet};
use crate::core_modules::exam_record::Confidence;
use crate::core_modules::image_asset::{Height, ImageAsset, Width};
use crate::error::{ExamError, Result};
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbImage};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, instrument};

/// The output of one analysis.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub result: ImageAsset,
    pub confidence: Confidence,
}

/// Produces an overlay and a confidence score for an ingested image.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, asset: &ImageAsset) -> Result<Analysis>;
}

/// A dense per-pixel field of values in [0, 1), row-major.
#[derive(Debug, Clone)]
pub struct SaliencyField {
    pub width: Width,
    pub height: Height,
    pub values: Vec<f32>,
}

impl SaliencyField {
    /// Uncorrelated uniform noise, one value per pixel.
    pub fn random<R: Rng + ?Sized>(width: Width, height: Height, rng: &mut R) -> Self {
        let len = width as usize * height as usize;
        let values = (0..len).map(|_| rng.random::<f32>()).collect();
        Self {
            width,
            height,
            values,
        }
    }

    pub fn at(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }
}

/// Composites `field` over `base` with the jet color scale at `alpha` opacity.
pub fn composite(base: &RgbImage, field: &SaliencyField, alpha: f32) -> Result<RgbImage> {
    if base.dimensions() != (field.width, field.height) {
        return Err(ExamError::UnsupportedImageFormat(image::ImageError::Parameter(
            image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ),
        )));
    }
    let mut overlay = base.clone();
    for (x, y, pixel) in overlay.enumerate_pixels_mut() {
        *pixel = blend(*pixel, jet(field.at(x, y)), alpha);
    }
    Ok(overlay)
}

/// The stand-in analyzer: random saliency, real compositing, real persistence.
#[derive(Debug, Clone)]
pub struct InferenceSimulator {
    store: Arc<AssetStore>,
    max_pixels: u64,
    overlay_alpha: f32,
}

impl InferenceSimulator {
    pub fn new(store: Arc<AssetStore>, max_pixels: u64, overlay_alpha: f32) -> Self {
        Self {
            store,
            max_pixels,
            overlay_alpha,
        }
    }

    fn check_budget(&self, asset: &ImageAsset) -> Result<()> {
        if asset.pixel_count() > self.max_pixels {
            return Err(ExamError::DimensionOverflow {
                width: asset.width(),
                height: asset.height(),
                max_pixels: self.max_pixels,
            });
        }
        Ok(())
    }

    fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
        let mut encoded = Vec::new();
        let encoder = PngEncoder::new(&mut encoded);
        encoder.write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )?;
        Ok(encoded)
    }
}

impl Analyzer for InferenceSimulator {
    #[instrument(skip(self, asset), fields(asset = %asset.reference()))]
    fn analyze(&self, asset: &ImageAsset) -> Result<Analysis> {
        self.check_budget(asset)?;
        let mut rng = rand::rng();

        // --- 1. Saliency Field ---
        let field = SaliencyField::random(asset.width(), asset.height(), &mut rng);

        // --- 2. Compositing ---
        let base = asset.image().to_rgb8();
        let overlay = composite(&base, &field, self.overlay_alpha)?;

        // --- 3. Persistence ---
        let encoded = Self::encode_png(&overlay)?;
        let key = self.store.next_result_key(&asset.reference().key);
        let reference = self.store.put(StorageArea::Results, &key, &encoded)?;

        // --- 4. Confidence ---
        let confidence = Confidence::random(&mut rng);

        debug!(result = %reference, confidence = confidence.value(), "analysis complete");
        Ok(Analysis {
            result: ImageAsset::new(reference, DynamicImage::ImageRgb8(overlay)),
            confidence,
        })
    }
}
