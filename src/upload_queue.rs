// CloudShare Upload Queue
// Sequential batch upload engine with per-item failure isolation

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client_config::MAX_CLEAR_DELAY_MS;
use crate::remote::{FileRecord, FileService, ProgressCallback, TransferProgress, UploadSource};

/// Local identifier of a queued file (never sent to the server)
pub type ItemId = Uuid;

/// Lifecycle of one queued file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Succeeded,
    /// Transport failure or server rejection; the two are not distinguished here
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Succeeded | UploadStatus::Failed)
    }
}

/// One file in an upload batch
#[derive(Debug, Clone)]
pub struct FileItem {
    pub local_id: ItemId,
    pub source: UploadSource,
    pub status: UploadStatus,
    /// 0-100, for this item only
    pub progress_percent: f64,
    /// The record the server created, once Succeeded
    pub record: Option<FileRecord>,
    /// Display text of the last failure, once Failed
    pub failure: Option<String>,
}

impl FileItem {
    fn new(source: UploadSource) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            source,
            status: UploadStatus::Pending,
            progress_percent: 0.0,
            record: None,
            failure: None,
        }
    }
}

/// Collaborator notified while a batch runs. All hooks default to no-ops.
pub trait UploadObserver: Send + Sync {
    /// Progress of the item currently on the wire
    fn on_progress(&self, _item: ItemId, _percent: f64) {}

    /// An item reached a terminal state
    fn on_item_finished(&self, _item: ItemId, _status: UploadStatus) {}

    /// Fired once per run, only when every item in the batch succeeded
    fn on_batch_complete(&self, _records: &[FileRecord]) {}
}

pub struct NoopObserver;

impl UploadObserver for NoopObserver {}

/// Configuration for the upload queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadQueueConfig {
    /// Delay between the completion signal and clearing the batch
    pub clear_delay_ms: u64,
}

impl Default for UploadQueueConfig {
    fn default() -> Self {
        Self {
            clear_delay_ms: 1000,
        }
    }
}

/// Validate queue config, clamping values to safe ranges
pub fn validate_config(config: &mut UploadQueueConfig) {
    if config.clear_delay_ms > MAX_CLEAR_DELAY_MS {
        config.clear_delay_ms = MAX_CLEAR_DELAY_MS;
    }
}

/// Error for a single item in the batch
#[derive(Debug, Clone)]
pub struct UploadItemError {
    pub local_id: ItemId,
    pub name: String,
    pub error: String,
}

/// Result of one `start_upload` run
#[derive(Debug, Clone, Default)]
pub struct UploadSummary {
    pub uploaded: u32,
    pub failed: u32,
    /// Items already Succeeded before this run
    pub skipped: u32,
    pub errors: Vec<UploadItemError>,
    pub duration_ms: u64,
    /// Every item succeeded and the completion signal fired
    pub completed: bool,
    /// The batch was dismissed mid-run; late results were dropped
    pub discarded: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("An upload is already running for this batch")]
    Busy,
}

struct UploadBatch {
    /// Bumped on dismiss; handlers from an older epoch must not write
    epoch: u64,
    items: Vec<FileItem>,
    running: bool,
}

/// Owns one upload batch and drives it one transfer at a time.
pub struct UploadQueueManager {
    service: Arc<dyn FileService>,
    observer: Arc<dyn UploadObserver>,
    config: UploadQueueConfig,
    batch: Arc<Mutex<UploadBatch>>,
}

impl UploadQueueManager {
    pub fn new(
        service: Arc<dyn FileService>,
        observer: Arc<dyn UploadObserver>,
        mut config: UploadQueueConfig,
    ) -> Self {
        validate_config(&mut config);
        Self {
            service,
            observer,
            config,
            batch: Arc::new(Mutex::new(UploadBatch {
                epoch: 0,
                items: Vec::new(),
                running: false,
            })),
        }
    }

    /// Append sources as Pending items, in selection order. The same source
    /// may be queued more than once.
    pub fn enqueue(&self, sources: impl IntoIterator<Item = UploadSource>) -> Vec<ItemId> {
        let mut batch = self.batch.lock();
        sources
            .into_iter()
            .map(|source| {
                let item = FileItem::new(source);
                let id = item.local_id;
                debug!("Queued {} as {}", item.source.name(), id);
                batch.items.push(item);
                id
            })
            .collect()
    }

    /// Remove a Pending item. Uploading and terminal items stay put.
    pub fn remove(&self, id: ItemId) -> bool {
        let mut batch = self.batch.lock();
        match batch.items.iter().position(|i| i.local_id == id) {
            Some(pos) if batch.items[pos].status == UploadStatus::Pending => {
                batch.items.remove(pos);
                true
            }
            Some(_) => {
                debug!("Item {} is not pending, not removed", id);
                false
            }
            None => false,
        }
    }

    /// Tear down the batch. An in-flight transfer is not aborted; its outcome
    /// is dropped when it lands and no further item is started.
    pub fn dismiss(&self) {
        let mut batch = self.batch.lock();
        batch.epoch += 1;
        batch.items.clear();
        batch.running = false;
        info!("Upload batch dismissed");
    }

    pub fn items(&self) -> Vec<FileItem> {
        self.batch.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.batch.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.lock().items.is_empty()
    }

    pub fn is_uploading(&self) -> bool {
        self.batch.lock().running
    }

    /// Mean progress over the batch, counting Succeeded items as 100.
    /// Convenience for callers; the upload loop itself never aggregates.
    pub fn aggregate_progress(&self) -> f64 {
        let batch = self.batch.lock();
        if batch.items.is_empty() {
            return 0.0;
        }
        let sum: f64 = batch
            .items
            .iter()
            .map(|i| match i.status {
                UploadStatus::Succeeded => 100.0,
                _ => i.progress_percent,
            })
            .sum();
        sum / batch.items.len() as f64
    }

    /// Upload every item that has not succeeded yet, in insertion order.
    ///
    /// Failed items do not stop the run. When the run ends with every item
    /// Succeeded the observer's completion hook fires once and, after the
    /// configured delay, the batch is cleared.
    pub async fn start_upload(&self) -> Result<UploadSummary, QueueError> {
        let epoch = {
            let mut batch = self.batch.lock();
            if batch.running {
                return Err(QueueError::Busy);
            }
            batch.running = true;
            batch.epoch
        };

        let started = Instant::now();
        let mut summary = UploadSummary::default();
        let mut attempted: HashSet<ItemId> = HashSet::new();

        loop {
            let next = {
                let mut batch = self.batch.lock();
                if batch.epoch != epoch {
                    summary.discarded = true;
                    break;
                }
                batch
                    .items
                    .iter_mut()
                    .find(|i| i.status != UploadStatus::Succeeded && !attempted.contains(&i.local_id))
                    .map(|item| {
                        item.status = UploadStatus::Uploading;
                        item.progress_percent = 0.0;
                        item.failure = None;
                        (item.local_id, item.source.clone())
                    })
            };
            let Some((id, source)) = next else { break };
            attempted.insert(id);

            let result = self
                .service
                .upload(&source, Some(self.progress_reporter(epoch, id)))
                .await;

            let status = {
                let mut batch = self.batch.lock();
                if batch.epoch != epoch {
                    debug!("Batch dismissed while {} was in flight, dropping result", id);
                    summary.discarded = true;
                    break;
                }
                let Some(item) = batch.items.iter_mut().find(|i| i.local_id == id) else {
                    continue;
                };
                match result {
                    Ok(record) => {
                        item.status = UploadStatus::Succeeded;
                        item.progress_percent = 100.0;
                        item.record = Some(record);
                        summary.uploaded += 1;
                    }
                    Err(e) => {
                        warn!("Upload of {} failed: {}", source.name(), e);
                        item.status = UploadStatus::Failed;
                        item.failure = Some(e.to_string());
                        summary.failed += 1;
                        summary.errors.push(UploadItemError {
                            local_id: id,
                            name: source.name().to_string(),
                            error: e.to_string(),
                        });
                    }
                }
                item.status
            };
            self.observer.on_item_finished(id, status);
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        if summary.discarded {
            return Ok(summary);
        }

        let finished = {
            let batch = self.batch.lock();
            summary.skipped = batch
                .items
                .iter()
                .filter(|i| i.status == UploadStatus::Succeeded && !attempted.contains(&i.local_id))
                .count() as u32;
            let all_succeeded = !batch.items.is_empty()
                && batch.items.iter().all(|i| i.status == UploadStatus::Succeeded);
            all_succeeded.then(|| {
                let ids: HashSet<ItemId> = batch.items.iter().map(|i| i.local_id).collect();
                let records: Vec<FileRecord> =
                    batch.items.iter().filter_map(|i| i.record.clone()).collect();
                (ids, records)
            })
        };

        if let Some((ids, records)) = finished {
            info!("Upload batch complete: {} files", records.len());
            summary.completed = true;
            self.observer.on_batch_complete(&records);
            if self.config.clear_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.clear_delay_ms)).await;
            }
            let mut batch = self.batch.lock();
            if batch.epoch == epoch {
                // Items queued during the delay belong to the next run.
                batch.items.retain(|i| !ids.contains(&i.local_id));
            }
        } else {
            info!(
                "Upload run finished: {} uploaded, {} failed",
                summary.uploaded, summary.failed
            );
        }

        let mut batch = self.batch.lock();
        if batch.epoch == epoch {
            batch.running = false;
        }
        Ok(summary)
    }

    fn progress_reporter(&self, epoch: u64, id: ItemId) -> ProgressCallback {
        let batch = Arc::clone(&self.batch);
        let observer = Arc::clone(&self.observer);
        Box::new(move |sent, total| {
            let percent = TransferProgress::new(sent, total).percentage;
            {
                let mut batch = batch.lock();
                if batch.epoch != epoch {
                    return;
                }
                if let Some(item) = batch.items.iter_mut().find(|i| i.local_id == id) {
                    item.progress_percent = percent;
                }
            }
            observer.on_progress(id, percent);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFileService;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingObserver {
        completions: AtomicUsize,
        completed_records: Mutex<Vec<FileRecord>>,
        progress: Mutex<Vec<(ItemId, f64)>>,
        finished: Mutex<Vec<(ItemId, UploadStatus)>>,
    }

    impl UploadObserver for RecordingObserver {
        fn on_progress(&self, item: ItemId, percent: f64) {
            self.progress.lock().push((item, percent));
        }

        fn on_item_finished(&self, item: ItemId, status: UploadStatus) {
            self.finished.lock().push((item, status));
        }

        fn on_batch_complete(&self, records: &[FileRecord]) {
            self.completions.fetch_add(1, Ordering::SeqCst);
            self.completed_records.lock().extend_from_slice(records);
        }
    }

    fn source(name: &str, size: usize) -> UploadSource {
        UploadSource::from_bytes(name, None, vec![7u8; size])
    }

    fn setup(
        service: Arc<FakeFileService>,
    ) -> (UploadQueueManager, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let queue = UploadQueueManager::new(
            service as Arc<dyn FileService>,
            Arc::clone(&observer) as Arc<dyn UploadObserver>,
            UploadQueueConfig { clear_delay_ms: 0 },
        );
        (queue, observer)
    }

    #[test]
    fn test_validate_config_clamp_high() {
        let mut config = UploadQueueConfig { clear_delay_ms: 60_000 };
        validate_config(&mut config);
        assert_eq!(config.clear_delay_ms, MAX_CLEAR_DELAY_MS);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!UploadStatus::Pending.is_terminal());
        assert!(!UploadStatus::Uploading.is_terminal());
        assert!(UploadStatus::Succeeded.is_terminal());
        assert!(UploadStatus::Failed.is_terminal());
    }

    #[test]
    fn test_enqueue_preserves_order_and_allows_duplicates() {
        let (queue, _) = setup(Arc::new(FakeFileService::default()));
        let a = source("a.txt", 3);
        let ids = queue.enqueue(vec![a.clone(), source("b.txt", 3), a]);
        assert_eq!(ids.len(), 3);

        let items = queue.items();
        let names: Vec<&str> = items.iter().map(|i| i.source.name()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "a.txt"]);
        assert!(items.iter().all(|i| i.status == UploadStatus::Pending));
        assert_ne!(items[0].local_id, items[2].local_id);
    }

    #[test]
    fn test_remove_pending_only() {
        let (queue, _) = setup(Arc::new(FakeFileService::default()));
        let ids = queue.enqueue(vec![source("a.txt", 1), source("b.txt", 1)]);
        assert!(queue.remove(ids[0]));
        assert!(!queue.remove(ids[0]));
        assert_eq!(queue.len(), 1);

        queue.batch.lock().items[0].status = UploadStatus::Failed;
        assert!(!queue.remove(ids[1]));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_all_succeed_signals_once_and_clears() {
        let service = Arc::new(FakeFileService::default());
        let (queue, observer) = setup(Arc::clone(&service));
        queue.enqueue(vec![source("a.txt", 10), source("b.png", 20), source("c.pdf", 30)]);

        let summary = queue.start_upload().await.unwrap();
        assert_eq!(summary.uploaded, 3);
        assert_eq!(summary.failed, 0);
        assert!(summary.completed);
        assert!(!summary.discarded);
        assert_eq!(observer.completions.load(Ordering::SeqCst), 1);
        assert_eq!(observer.completed_records.lock().len(), 3);
        assert!(queue.is_empty());
        assert!(!queue.is_uploading());
        assert_eq!(service.calls_of("upload"), 3);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_batch_kept() {
        let service = Arc::new(FakeFileService::default());
        service.reject_uploads_named("huge.iso");
        let (queue, observer) = setup(Arc::clone(&service));
        queue.enqueue(vec![source("a.txt", 1), source("huge.iso", 1), source("c.txt", 1)]);

        let summary = queue.start_upload().await.unwrap();
        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.completed);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].name, "huge.iso");
        assert_eq!(observer.completions.load(Ordering::SeqCst), 0);

        let statuses: Vec<UploadStatus> = queue.items().iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![UploadStatus::Succeeded, UploadStatus::Failed, UploadStatus::Succeeded]
        );
        // The item after the failure was still attempted.
        assert_eq!(service.calls_of("upload"), 3);
        assert!(queue.items()[1].failure.as_deref().unwrap_or("").contains("413"));
    }

    #[tokio::test]
    async fn test_every_item_terminal_when_offline() {
        let service = Arc::new(FakeFileService::default());
        service.set_offline(true);
        let (queue, observer) = setup(Arc::clone(&service));
        queue.enqueue((0..5).map(|i| source(&format!("f{}.txt", i), 4)));

        let summary = queue.start_upload().await.unwrap();
        assert_eq!(summary.failed, 5);
        assert!(queue.items().iter().all(|i| i.status.is_terminal()));
        assert_eq!(queue.len(), 5);
        assert_eq!(observer.completions.load(Ordering::SeqCst), 0);
        assert_eq!(observer.finished.lock().len(), 5);
    }

    #[tokio::test]
    async fn test_retry_resumes_only_unfinished_items() {
        let service = Arc::new(FakeFileService::default());
        service.set_offline(true);
        let (queue, observer) = setup(Arc::clone(&service));
        queue.enqueue(vec![source("a.txt", 1), source("b.txt", 1)]);

        // First item succeeds by hand, second fails offline.
        queue.batch.lock().items[0].status = UploadStatus::Succeeded;
        let first = queue.start_upload().await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.skipped, 1);
        assert_eq!(service.calls_of("upload"), 1);

        service.set_offline(false);
        let second = queue.start_upload().await.unwrap();
        assert_eq!(second.uploaded, 1);
        assert_eq!(second.skipped, 1);
        assert!(second.completed);
        assert_eq!(service.calls_of("upload"), 2);
        assert_eq!(observer.completions.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_progress_is_scoped_per_item() {
        let service = Arc::new(FakeFileService::default());
        let (queue, observer) = setup(Arc::clone(&service));
        let ids = queue.enqueue(vec![source("a.txt", 100), source("b.txt", 10)]);

        queue.start_upload().await.unwrap();
        let progress = observer.progress.lock().clone();
        let for_a: Vec<f64> = progress.iter().filter(|(id, _)| *id == ids[0]).map(|p| p.1).collect();
        let for_b: Vec<f64> = progress.iter().filter(|(id, _)| *id == ids[1]).map(|p| p.1).collect();
        assert_eq!(for_a, vec![50.0, 100.0]);
        assert_eq!(for_b, vec![50.0, 100.0]);
    }

    #[tokio::test]
    async fn test_empty_batch_never_completes() {
        let (queue, observer) = setup(Arc::new(FakeFileService::default()));
        let summary = queue.start_upload().await.unwrap();
        assert!(!summary.completed);
        assert_eq!(observer.completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_busy_and_dismiss_during_transfer() {
        let service = Arc::new(FakeFileService::default());
        let gate = service.gate_uploads();
        let (queue, observer) = setup(Arc::clone(&service));
        let queue = Arc::new(queue);
        queue.enqueue(vec![source("a.txt", 8), source("b.txt", 8)]);

        let runner = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.start_upload().await })
        };
        gate.started.notified().await;

        assert!(queue.is_uploading());
        assert_eq!(queue.start_upload().await.unwrap_err(), QueueError::Busy);
        assert_eq!(queue.items()[0].status, UploadStatus::Uploading);
        assert!(!queue.remove(queue.items()[0].local_id));

        queue.dismiss();
        gate.release.notify_one();

        let summary = runner.await.unwrap().unwrap();
        assert!(summary.discarded);
        assert!(!summary.completed);
        assert!(queue.is_empty());
        assert_eq!(observer.completions.load(Ordering::SeqCst), 0);
        // The second item was never started.
        assert_eq!(service.calls_of("upload"), 1);
    }

    #[tokio::test]
    async fn test_items_enqueued_mid_run_join_the_run() {
        let service = Arc::new(FakeFileService::default());
        let gate = service.gate_uploads();
        let (queue, observer) = setup(Arc::clone(&service));
        let queue = Arc::new(queue);
        queue.enqueue(vec![source("first.txt", 4)]);

        let runner = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.start_upload().await })
        };
        gate.started.notified().await;
        queue.enqueue(vec![source("late.txt", 4)]);
        gate.release.notify_one();

        gate.started.notified().await;
        gate.release.notify_one();

        let summary = runner.await.unwrap().unwrap();
        assert_eq!(summary.uploaded, 2);
        assert!(summary.completed);
        assert_eq!(observer.completions.load(Ordering::SeqCst), 1);
        assert_eq!(observer.completed_records.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_aggregate_progress() {
        let (queue, _) = setup(Arc::new(FakeFileService::default()));
        assert_eq!(queue.aggregate_progress(), 0.0);
        queue.enqueue(vec![source("a.txt", 1), source("b.txt", 1)]);
        {
            let mut batch = queue.batch.lock();
            batch.items[0].status = UploadStatus::Succeeded;
            batch.items[1].progress_percent = 50.0;
        }
        assert_eq!(queue.aggregate_progress(), 75.0);
    }

    #[tokio::test]
    async fn test_clear_delay_keeps_items_visible() {
        let service = Arc::new(FakeFileService::default());
        let observer = Arc::new(RecordingObserver::default());
        let queue = Arc::new(UploadQueueManager::new(
            service as Arc<dyn FileService>,
            Arc::clone(&observer) as Arc<dyn UploadObserver>,
            UploadQueueConfig { clear_delay_ms: 200 },
        ));
        queue.enqueue(vec![source("a.txt", 1)]);

        let runner = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.start_upload().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Completion already signalled, success still on screen.
        assert_eq!(observer.completions.load(Ordering::SeqCst), 1);
        assert_eq!(queue.items()[0].status, UploadStatus::Succeeded);

        let summary = runner.await.unwrap().unwrap();
        assert!(summary.completed);
        assert!(queue.is_empty());
    }
}
