pub mod types;
pub mod traits;
pub mod utils;
pub mod locator;
pub mod captioner;
pub mod store;
pub mod pipeline;
pub mod engine;
pub mod indexer;
pub mod search;

pub use types::*;
pub use traits::{Captioner, SearchEngine};
pub use locator::{Discovery, ImageLocator};
pub use captioner::{MockCaptioner, OpenAiCaptioner};
pub use store::{DescriptionStore, StatusCounts, StoreAnomaly};
pub use pipeline::IngestionPipeline;
pub use engine::{ElasticsearchClient, InMemorySearchEngine};
pub use indexer::BulkIndexer;
pub use search::{render_response, SearchResponse, SearchService};
