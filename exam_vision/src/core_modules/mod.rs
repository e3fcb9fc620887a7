pub mod asset_store;
pub mod colormap;
pub mod dashboard;
pub mod exam_record;
pub mod image_asset;
pub mod inference;
pub mod ingestion;
pub mod registry;
