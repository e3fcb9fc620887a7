// THEORY:
// An `ImageAsset` is a "dumb" data container: a decoded image, its measured
// dimensions, and the reference under which its encoded bytes were persisted.
// It is produced by ingestion (for originals) and by the analyzer (for overlays)
// and is never mutated afterwards. The decoded pixels sit behind an `Arc`, so
// handing an asset to a worker thread is a pointer copy.

use crate::core_modules::asset_store::AssetRef;
use image::DynamicImage;
use std::sync::Arc;

pub type Width = u32;
pub type Height = u32;

/// A decoded image that has already been persisted.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    reference: AssetRef,
    width: Width,
    height: Height,
    image: Arc<DynamicImage>,
}

impl ImageAsset {
    pub fn new(reference: AssetRef, image: DynamicImage) -> Self {
        Self {
            reference,
            width: image.width(),
            height: image.height(),
            image: Arc::new(image),
        }
    }

    pub fn reference(&self) -> &AssetRef {
        &self.reference
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}
