use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::relay::RunSummary;

/// Everything a run has to say about its progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Connected { endpoint: String },
    TargetBucketCreated { bucket: String },
    TargetBucketExists { bucket: String },
    ObjectSkipped { object: String },
    ObjectMatched { object: String },
    UrlSigned { object: String },
    TableRead { object: String, rows: usize },
    TableEmpty { object: String },
    RecordUploaded { object: String, key: String },
    RowMissingField { object: String, index: usize, field: &'static str },
    RowFailed { object: String, index: usize, error: String },
    ObjectFailed { object: String, error: String },
    NoMatchingObjects { bucket: String, marker: String, extension: String },
    RunAborted { error: String },
    RunFinished { summary: RunSummary },
}

/// Sink for run events, handed to the relay at construction.
pub trait Reporter: Send + Sync {
    fn report(&self, event: &RunEvent);
}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: &RunEvent) {
        match event {
            RunEvent::Connected { endpoint } => {
                info!(%endpoint, "connected to object storage")
            }
            RunEvent::TargetBucketCreated { bucket } => {
                info!(%bucket, "target bucket created")
            }
            RunEvent::TargetBucketExists { bucket } => {
                info!(%bucket, "target bucket already exists")
            }
            RunEvent::ObjectSkipped { object } => debug!(%object, "object does not match filter"),
            RunEvent::ObjectMatched { object } => info!(%object, "processing object"),
            RunEvent::UrlSigned { object } => info!(%object, "generated presigned URL"),
            RunEvent::TableRead { object, rows } => info!(%object, rows, "read table"),
            RunEvent::TableEmpty { object } => warn!(%object, "no data to read"),
            RunEvent::RecordUploaded { object, key } => info!(%object, %key, "uploaded record"),
            RunEvent::RowMissingField {
                object,
                index,
                field,
            } => error!(%object, row = index, field, "missing expected column in row"),
            RunEvent::RowFailed {
                object,
                index,
                error,
            } => error!(%object, row = index, %error, "error processing row"),
            RunEvent::ObjectFailed { object, error } => {
                error!(%object, %error, "error while processing object")
            }
            RunEvent::NoMatchingObjects {
                bucket,
                marker,
                extension,
            } => warn!(%bucket, %marker, %extension, "no matching objects found"),
            RunEvent::RunAborted { error } => error!(%error, "relay run aborted"),
            RunEvent::RunFinished { summary } => info!(
                listed = summary.listed,
                matched = summary.matched,
                processed = summary.processed,
                failed = summary.failed,
                rows_written = summary.rows_written,
                rows_failed = summary.rows_failed,
                "relay run finished"
            ),
        }
    }
}

/// Keeps events in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<RunEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, event: &RunEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
