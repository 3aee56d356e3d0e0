use crate::store::DescriptionStore;
use crate::traits::SearchEngine;
use crate::types::{normalize_image_path, BulkFailure, BulkReport, IndexConfig, IndexerError, Result, SearchDocument};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Loads described records into the search index in bulk.
pub struct BulkIndexer {
    engine: Arc<dyn SearchEngine>,
    config: IndexConfig,
}

impl BulkIndexer {
    pub fn new(engine: Arc<dyn SearchEngine>, config: IndexConfig) -> Self {
        Self { engine, config }
    }

    /// Fail unless the engine answers a ping.
    pub async fn health_check(&self) -> Result<()> {
        match self.engine.ping().await {
            Ok(true) => {
                info!("Connected to search engine");
                Ok(())
            }
            Ok(false) => Err(IndexerError::IndexConnection("ping was not acknowledged".to_string())),
            Err(IndexerError::IndexConnection(reason)) => Err(IndexerError::IndexConnection(reason)),
            Err(e) => Err(IndexerError::IndexConnection(e.to_string())),
        }
    }

    /// Create the target index unless it exists. Returns true when it was created.
    pub async fn ensure_index(&self) -> Result<bool> {
        let index = &self.config.index_name;
        if self.engine.index_exists(index).await? {
            return Ok(false);
        }
        self.engine.create_index(index).await?;
        info!("Created index '{}'", index);
        Ok(true)
    }

    /// Index every described record of the store file at `path`.
    pub async fn index_file(&self, path: impl AsRef<Path>) -> Result<BulkReport> {
        let store = DescriptionStore::load(path);
        self.index_store(&store).await
    }

    pub async fn index_store(&self, store: &DescriptionStore) -> Result<BulkReport> {
        let documents = store.search_documents();
        let skipped = store.len() - documents.len();
        let mut report = self.index_documents(documents).await?;
        report.skipped_undescribed = skipped;
        Ok(report)
    }

    /// Health check, ensure the index, then submit in chunks. Per-document
    /// failures end up in the report; only an unreachable engine or a failure
    /// to prepare the index is an error.
    pub async fn index_documents(&self, documents: Vec<SearchDocument>) -> Result<BulkReport> {
        self.health_check().await?;
        let index_created = self.ensure_index().await?;

        let documents: Vec<SearchDocument> = documents
            .into_iter()
            .map(|doc| SearchDocument {
                image_path: normalize_image_path(&doc.image_path),
                description: doc.description,
            })
            .collect();

        let mut report = BulkReport {
            index_name: self.config.index_name.clone(),
            index_created,
            submitted: documents.len(),
            ..Default::default()
        };

        let batch_size = if self.config.batch_size == 0 {
            documents.len().max(1)
        } else {
            self.config.batch_size
        };

        for chunk in documents.chunks(batch_size) {
            self.submit_chunk(chunk, &mut report).await;
        }

        if report.is_complete() {
            info!("Indexed {} documents into '{}' index.", report.succeeded, report.index_name);
        } else {
            error!(
                "Bulk indexing into '{}' finished with {} failures ({} indexed)",
                report.index_name,
                report.failures.len(),
                report.succeeded
            );
            for failure in &report.failures {
                error!("  {}: {}", failure.image_path, failure.reason);
            }
        }

        Ok(report)
    }

    async fn submit_chunk(&self, chunk: &[SearchDocument], report: &mut BulkReport) {
        let ids: Option<Vec<String>> = self
            .config
            .stable_ids
            .then(|| chunk.iter().map(|doc| doc.document_id()).collect());

        match self.engine.bulk_index(&self.config.index_name, chunk, ids.as_deref()).await {
            Ok(outcomes) => {
                for (i, document) in chunk.iter().enumerate() {
                    let error = match outcomes.get(i) {
                        Some(outcome) => outcome.error.clone(),
                        None => Some("no result returned by engine".to_string()),
                    };
                    match error {
                        None => report.succeeded += 1,
                        Some(reason) => report.failures.push(BulkFailure {
                            image_path: document.image_path.clone(),
                            reason,
                        }),
                    }
                }
            }
            Err(e) => {
                warn!("Bulk request for {} documents failed: {}", chunk.len(), e);
                let reason = e.to_string();
                report.failures.extend(chunk.iter().map(|document| BulkFailure {
                    image_path: document.image_path.clone(),
                    reason: reason.clone(),
                }));
            }
        }
    }
}
