//! Ingest stage: dataset rows in, PENDING records and work items out.
//!
//! For every row the record is registered first and then one work item
//! carrying its id is published. A row whose registration fails is not
//! published, so the worker never sees an id the store cannot resolve.

use crate::dataset::{DatasetReader, DatasetSource};
use csv_async::{AsyncReaderBuilder, ErrorKind, Trim};
use futures::StreamExt;
use pipeline_core::{
    ColumnIndex, CreateOutcome, DatasetRef, DatasetRow, Error, RecordStore, Result, StorageEvent,
    WorkItem, WorkQueue,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Outcome of ingesting one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub bucket: String,
    pub key: String,
    pub rows_read: u64,
    pub rows_registered: u64,
    pub rows_enqueued: u64,
    /// Rows that could not be decoded at all
    pub rows_rejected: u64,
    pub registration_failures: u64,
    pub publish_failures: u64,
}

impl FileReport {
    fn new(dataset: &DatasetRef) -> Self {
        Self {
            bucket: dataset.bucket.clone(),
            key: dataset.key.clone(),
            ..Self::default()
        }
    }
}

/// A dataset that could not be ingested in full.
///
/// Rows handled before the failure stay registered and queued; their
/// counts are kept here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub bucket: String,
    pub key: String,
    pub cause: String,
    #[serde(default)]
    pub rows_read: u64,
    #[serde(default)]
    pub rows_enqueued: u64,
}

impl FailedFile {
    fn new(report: &FileReport, cause: &Error) -> Self {
        Self {
            bucket: report.bucket.clone(),
            key: report.key.clone(),
            cause: cause.to_string(),
            rows_read: report.rows_read,
            rows_enqueued: report.rows_enqueued,
        }
    }
}

/// Outcome of one ingest invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub files: Vec<FileReport>,
    pub failed: Vec<FailedFile>,
}

impl IngestSummary {
    /// Work items published, partially ingested files included.
    pub fn rows_enqueued(&self) -> u64 {
        self.files.iter().map(|f| f.rows_enqueued).sum::<u64>()
            + self.failed.iter().map(|f| f.rows_enqueued).sum::<u64>()
    }

    pub fn rows_read(&self) -> u64 {
        self.files.iter().map(|f| f.rows_read).sum::<u64>()
            + self.failed.iter().map(|f| f.rows_read).sum::<u64>()
    }
}

/// Parses datasets and fans their rows out as work items.
pub struct IngestStage {
    source: Arc<dyn DatasetSource>,
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn WorkQueue>,
}

impl IngestStage {
    pub fn new(
        source: Arc<dyn DatasetSource>,
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            source,
            store,
            queue,
        }
    }

    /// Ingest every object named by a storage notification.
    pub async fn ingest_event(&self, event: &StorageEvent) -> IngestSummary {
        self.ingest_all(&event.datasets()).await
    }

    /// Ingest several datasets. A failing dataset is recorded and skipped.
    pub async fn ingest_all(&self, datasets: &[DatasetRef]) -> IngestSummary {
        let run_id = Uuid::new_v4();
        let mut summary = IngestSummary {
            run_id,
            files: Vec::with_capacity(datasets.len()),
            failed: Vec::new(),
        };

        for dataset in datasets {
            let mut report = FileReport::new(dataset);
            match self.ingest_into(dataset, &mut report).await {
                Ok(()) => summary.files.push(report),
                Err(e) => {
                    error!(
                        run_id = %run_id,
                        bucket = %dataset.bucket,
                        key = %dataset.key,
                        rows_enqueued = report.rows_enqueued,
                        error = %e,
                        "Dataset ingest failed, continuing with next file"
                    );
                    metrics().datasets_failed.inc();
                    summary.failed.push(FailedFile::new(&report, &e));
                }
            }
        }

        info!(
            run_id = %run_id,
            files = summary.files.len(),
            failed = summary.failed.len(),
            rows_enqueued = summary.rows_enqueued(),
            "Ingest run finished"
        );
        summary
    }

    /// Ingest one dataset.
    ///
    /// Fails only when the object cannot be opened, has no header, or the
    /// byte stream breaks mid-file. Bad rows and per-row store or queue
    /// failures are counted in the report instead.
    pub async fn ingest_file(&self, dataset: &DatasetRef) -> Result<FileReport> {
        let mut report = FileReport::new(dataset);
        self.ingest_into(dataset, &mut report).await?;
        Ok(report)
    }

    #[instrument(skip(self, dataset, report), fields(bucket = %dataset.bucket, key = %dataset.key))]
    async fn ingest_into(&self, dataset: &DatasetRef, report: &mut FileReport) -> Result<()> {
        let start = Instant::now();
        let reader = self.source.open(dataset).await?;
        self.ingest_reader(dataset, reader, report).await?;

        metrics().datasets_ingested.inc();
        metrics()
            .ingest_latency_ms
            .observe(start.elapsed().as_millis() as u64);
        info!(
            rows_read = report.rows_read,
            rows_enqueued = report.rows_enqueued,
            rows_rejected = report.rows_rejected,
            registration_failures = report.registration_failures,
            publish_failures = report.publish_failures,
            "Dataset ingested"
        );
        Ok(())
    }

    async fn ingest_reader(
        &self,
        dataset: &DatasetRef,
        reader: DatasetReader,
        report: &mut FileReport,
    ) -> Result<()> {
        let mut csv = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .create_reader(reader);

        let headers = csv
            .headers()
            .await
            .map_err(|e| Error::parse(format!("{}: unreadable header: {}", dataset, e)))?
            .clone();
        if headers.iter().all(str::is_empty) {
            return Err(Error::parse(format!("{}: dataset has no header row", dataset)));
        }

        let columns = ColumnIndex::from_header(headers.iter());
        let missing = columns.missing();
        if !missing.is_empty() {
            warn!(missing = ?missing, "Header lacks columns; values will default to empty");
        }

        let mut records = csv.records();

        while let Some(record) = records.next().await {
            report.rows_read += 1;
            metrics().rows_read.inc();

            let record = match record {
                Ok(record) => record,
                Err(e) if matches!(e.kind(), ErrorKind::Io(_)) => {
                    return Err(Error::dataset(format!(
                        "{}: read failed after {} rows: {}",
                        dataset, report.rows_read, e
                    )));
                }
                Err(e) => {
                    warn!(row = report.rows_read, error = %e, "Rejecting undecodable row");
                    report.rows_rejected += 1;
                    metrics().rows_rejected.inc();
                    continue;
                }
            };

            let row = columns.row(|i| record.get(i));
            self.register_and_enqueue(row, report).await;
        }

        Ok(())
    }

    async fn register_and_enqueue(&self, row: DatasetRow, report: &mut FileReport) {
        let record = row.into_record();

        match self.store.create_pending(&record).await {
            Ok(CreateOutcome::Created) => {
                report.rows_registered += 1;
                metrics().rows_registered.inc();
            }
            Ok(CreateOutcome::AlreadyExists) => {
                debug!(record_id = %record.id, "Record already registered, state kept");
            }
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "Failed to register record");
                report.registration_failures += 1;
                metrics().registration_errors.inc();
                return;
            }
        }

        match self.queue.enqueue(&WorkItem::single(record.id.clone())).await {
            Ok(()) => {
                report.rows_enqueued += 1;
                metrics().items_enqueued.inc();
            }
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "Failed to enqueue work item");
                report.publish_failures += 1;
                metrics().enqueue_errors.inc();
            }
        }
    }
}
