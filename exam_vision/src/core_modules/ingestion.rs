// THEORY:
// The `IngestionService` is the front door of the pipeline. It turns an untrusted
// upload (a byte payload plus the filename the operator supplied) into an
// `ImageAsset` that every later stage can rely on.
//
// Order of operations matters:
// 1.  Reject empty payloads and empty or unusable filenames (`InvalidUpload`).
// 2.  Read only the image header. Anything the image decoders do not recognize
//     is `UnsupportedImageFormat`. A header declaring more than `max_pixels` is
//     `DimensionOverflow`, so the pixel budget bounds the decode as well as the
//     analysis.
// 3.  Decode the bytes. Nothing is written until this succeeds.
// 4.  Persist the raw bytes, exactly as uploaded, in the originals area under the
//     filename-derived key. A previous upload with the same name is replaced.

use crate::core_modules::asset_store::{AssetStore, StorageArea, storage_key};
use crate::core_modules::image_asset::ImageAsset;
use crate::error::{ExamError, Result};
use image::ImageReader;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Validates uploads and persists them as originals.
#[derive(Debug, Clone)]
pub struct IngestionService {
    store: Arc<AssetStore>,
    max_pixels: u64,
}

impl IngestionService {
    pub fn new(store: Arc<AssetStore>, max_pixels: u64) -> Self {
        Self { store, max_pixels }
    }

    fn check_header(&self, raw_bytes: &[u8]) -> Result<()> {
        let (width, height) = ImageReader::new(Cursor::new(raw_bytes))
            .with_guessed_format()
            .map_err(image::ImageError::IoError)?
            .into_dimensions()?;
        if u64::from(width) * u64::from(height) > self.max_pixels {
            return Err(ExamError::DimensionOverflow {
                width,
                height,
                max_pixels: self.max_pixels,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, raw_bytes), fields(bytes = raw_bytes.len()))]
    pub fn ingest(&self, raw_bytes: &[u8], filename: &str) -> Result<ImageAsset> {
        if filename.is_empty() {
            return Err(ExamError::InvalidUpload("empty filename".into()));
        }
        if raw_bytes.is_empty() {
            return Err(ExamError::InvalidUpload("empty payload".into()));
        }
        let key = storage_key(filename)
            .ok_or_else(|| ExamError::InvalidUpload(format!("unusable filename '{filename}'")))?;

        self.check_header(raw_bytes)?;
        let image = image::load_from_memory(raw_bytes)?;
        let reference = self.store.put(StorageArea::Originals, &key, raw_bytes)?;

        let asset = ImageAsset::new(reference, image);
        debug!(
            asset = %asset.reference(),
            width = asset.width(),
            height = asset.height(),
            "upload ingested"
        );
        Ok(asset)
    }
}
