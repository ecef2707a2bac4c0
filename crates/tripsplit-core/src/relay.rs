use std::sync::Arc;

use futures::StreamExt;
use tripsplit_bucket::ObjectStorage;

use crate::config::RelaySettings;
use crate::decoder::TableSource;
use crate::error::{DecodeError, ObjectError, RelayError, RowError};
use crate::filter::SourceFilter;
use crate::record::TripRow;
use crate::report::{Reporter, RunEvent};

/// Counters for one pass over the source bucket.
///
/// `processed` counts objects whose table was decoded and walked, whatever
/// happened to the individual rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub listed: usize,
    pub matched: usize,
    pub processed: usize,
    pub failed: usize,
    pub rows_written: usize,
    pub rows_failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectReport {
    pub rows_read: usize,
    pub rows_written: usize,
    pub rows_failed: usize,
}

pub struct Relay {
    storage: Arc<dyn ObjectStorage>,
    tables: Arc<dyn TableSource>,
    reporter: Arc<dyn Reporter>,
    filter: SourceFilter,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        tables: Arc<dyn TableSource>,
        reporter: Arc<dyn Reporter>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            storage,
            tables,
            reporter,
            filter: settings.filter(),
            settings,
        }
    }

    /// One pass: check buckets, then relay every matching object in listing order.
    pub async fn run(&self) -> Result<RunSummary, RelayError> {
        let result = self.run_pass().await;
        match &result {
            Ok(summary) => self.reporter.report(&RunEvent::RunFinished {
                summary: summary.clone(),
            }),
            Err(err) => self.reporter.report(&RunEvent::RunAborted {
                error: err.to_string(),
            }),
        }
        result
    }

    async fn run_pass(&self) -> Result<RunSummary, RelayError> {
        let source = &self.settings.source_bucket;
        if !self.storage.bucket_exists(source).await? {
            return Err(RelayError::SourceBucketMissing(source.clone()));
        }
        self.ensure_target_bucket().await?;

        let mut summary = RunSummary::default();
        let mut listing = self.storage.list_objects(source);

        while let Some(entry) = listing.next().await {
            let object = entry?.key;
            summary.listed += 1;

            if !self.filter.matches(&object) {
                self.reporter.report(&RunEvent::ObjectSkipped { object });
                continue;
            }
            summary.matched += 1;
            self.reporter.report(&RunEvent::ObjectMatched {
                object: object.clone(),
            });

            match self.process_object(&object).await {
                Ok(report) => {
                    summary.processed += 1;
                    summary.rows_written += report.rows_written;
                    summary.rows_failed += report.rows_failed;
                }
                Err(ObjectError::Decode(DecodeError::Empty)) => {
                    summary.failed += 1;
                    self.reporter.report(&RunEvent::TableEmpty { object });
                }
                Err(err) => {
                    summary.failed += 1;
                    self.reporter.report(&RunEvent::ObjectFailed {
                        object,
                        error: err.to_string(),
                    });
                }
            }
        }

        if summary.processed == 0 {
            self.reporter.report(&RunEvent::NoMatchingObjects {
                bucket: source.clone(),
                marker: self.filter.marker().to_string(),
                extension: self.filter.extension().to_string(),
            });
        }

        Ok(summary)
    }

    async fn ensure_target_bucket(&self) -> Result<(), RelayError> {
        let bucket = &self.settings.target_bucket;
        if self.storage.bucket_exists(bucket).await? {
            self.reporter.report(&RunEvent::TargetBucketExists {
                bucket: bucket.clone(),
            });
        } else {
            self.storage.make_bucket(bucket).await?;
            self.reporter.report(&RunEvent::TargetBucketCreated {
                bucket: bucket.clone(),
            });
        }
        Ok(())
    }

    /// Sign, decode and republish one source object. Row failures are
    /// reported and counted; only signing and decoding abandon the object.
    pub async fn process_object(&self, object: &str) -> Result<ObjectReport, ObjectError> {
        let url = self
            .storage
            .presign_get(&self.settings.source_bucket, object, self.settings.url_expiry)
            .await?;
        self.reporter.report(&RunEvent::UrlSigned {
            object: object.to_string(),
        });

        let table = self.tables.read_table(&url).await?;
        self.reporter.report(&RunEvent::TableRead {
            object: object.to_string(),
            rows: table.len(),
        });

        let mut report = ObjectReport {
            rows_read: table.len(),
            ..ObjectReport::default()
        };

        for (index, row) in table.rows() {
            match self.publish_row(row).await {
                Ok(key) => {
                    report.rows_written += 1;
                    self.reporter.report(&RunEvent::RecordUploaded {
                        object: object.to_string(),
                        key,
                    });
                }
                Err(RowError::MissingField(field)) => {
                    report.rows_failed += 1;
                    self.reporter.report(&RunEvent::RowMissingField {
                        object: object.to_string(),
                        index,
                        field,
                    });
                }
                Err(err) => {
                    report.rows_failed += 1;
                    self.reporter.report(&RunEvent::RowFailed {
                        object: object.to_string(),
                        index,
                        error: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn publish_row(&self, row: Result<TripRow, RowError>) -> Result<String, RowError> {
        let record = row?.to_record()?;
        let key = record.object_key(&self.settings.target_prefix);
        self.storage
            .put_object(
                &self.settings.target_bucket,
                &key,
                record.body,
                &self.settings.content_type,
            )
            .await?;
        Ok(key)
    }
}
