use crate::locator::{Discovery, ImageLocator};
use crate::store::DescriptionStore;
use crate::traits::Captioner;
use crate::types::{CaptionError, ImageRecord, IngestConfig, IngestReport, RecordStatus, Result};
use crate::utils::path::to_key;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// An image the run will caption, with the attempts it already used.
struct WorkItem {
    path: PathBuf,
    key: String,
    prior_attempts: u32,
}

/// Locates images, captions the ones without a description and records
/// the outcome of each in the description store.
pub struct IngestionPipeline {
    captioner: Arc<dyn Captioner>,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(captioner: Arc<dyn Captioner>, config: IngestConfig) -> Self {
        Self { captioner, config }
    }

    /// Full run: scan the image root, load the store, caption, save.
    pub async fn run(&self) -> Result<IngestReport> {
        info!(
            "Starting ingestion of {} into {} using {}",
            self.config.image_root.display(),
            self.config.store_path.display(),
            self.captioner.captioner_name()
        );

        let discovery = ImageLocator::new(&self.config.image_root).locate()?;
        let mut store = DescriptionStore::load(&self.config.store_path);
        let report = self.ingest(&mut store, discovery).await?;

        info!(
            "Ingestion finished: {} described, {} failed, {} already described, {} out of attempts",
            report.described,
            report.failed.len(),
            report.skipped_described,
            report.skipped_exhausted
        );
        Ok(report)
    }

    /// Caption everything in `discovery` that still needs it, updating `store`
    /// in place and persisting it to the configured path.
    pub async fn ingest(&self, store: &mut DescriptionStore, discovery: Discovery) -> Result<IngestReport> {
        let mut report = IngestReport {
            discovered: discovery.images.len(),
            discovery_errors: discovery.errors,
            store_recovered: store.anomaly().is_some(),
            ..Default::default()
        };

        let work = self.plan(store, discovery.images, &mut report);
        info!("{} of {} images need captioning", work.len(), report.discovered);

        let concurrency = self.config.concurrency.max(1);
        let mut results = stream::iter(work)
            .map(|item| async move {
                info!("Processing image: {}", item.key);
                let outcome = self.caption_with_retry(&item).await;
                (item, outcome)
            })
            .buffer_unordered(concurrency);

        let mut processed = 0usize;
        while let Some((item, outcome)) = results.next().await {
            let attempts = item.prior_attempts + 1;
            match outcome {
                Ok(description) => {
                    store.upsert(ImageRecord::described(&item.key, description).with_attempts(attempts));
                    report.described += 1;
                }
                Err(e) => {
                    error!("Error processing {}: {}", item.key, e);
                    store.upsert(ImageRecord::failed(&item.key, e.reason()).with_attempts(attempts));
                    report.failed.push(e);
                }
            }

            processed += 1;
            if self.config.checkpoint_every > 0 && processed % self.config.checkpoint_every == 0 {
                store.save(&self.config.store_path)?;
                report.checkpoints += 1;
                debug!("Checkpoint after {} images", processed);
            }
        }

        store.save(&self.config.store_path)?;
        info!("Responses saved to {}", self.config.store_path.display());
        Ok(report)
    }

    /// Decide which images to caption and register new ones as pending.
    fn plan(&self, store: &mut DescriptionStore, images: Vec<PathBuf>, report: &mut IngestReport) -> Vec<WorkItem> {
        let mut work = Vec::new();

        for path in images {
            let key = to_key(&path);
            let prior_attempts = match store.get(&key) {
                Some(record) if record.status == RecordStatus::Described => {
                    report.skipped_described += 1;
                    continue;
                }
                Some(record) if record.status == RecordStatus::Failed && self.is_exhausted(record.attempts) => {
                    debug!("Skipping {}: failed {} times", key, record.attempts);
                    report.skipped_exhausted += 1;
                    continue;
                }
                Some(record) => record.attempts,
                None => {
                    store.upsert(ImageRecord::pending(&key));
                    0
                }
            };

            work.push(WorkItem {
                path,
                key,
                prior_attempts,
            });
        }

        work
    }

    fn is_exhausted(&self, attempts: u32) -> bool {
        self.config.max_attempts > 0 && attempts >= self.config.max_attempts
    }

    async fn caption_with_retry(&self, item: &WorkItem) -> std::result::Result<String, CaptionError> {
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: delay,
            initial_interval: delay,
            max_interval: delay * 32,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            match self.captioner.describe(&item.path).await {
                Ok(description) => return Ok(description),
                Err(e) if e.is_transient() && attempt < self.config.retries => {
                    attempt += 1;
                    let wait = backoff.next_backoff().unwrap_or(delay);
                    warn!("Attempt {} failed for {}, retrying in {:?}: {}", attempt, item.key, wait, e);
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
