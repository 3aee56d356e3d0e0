pub mod defs;

pub use defs::{
    document_id_for, normalize_image_path, ImageRecord, RecordStatus, SearchDocument, SearchResult,
};
