//! Relay pipeline: list -> filter -> decode parquet -> one JSON object per trip row.

pub mod config;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod record;
pub mod relay;
pub mod report;

pub use config::{ConnectionConfig, RelaySettings};
pub use decoder::{decode_parquet, HttpTableSource, TableSource, TripTable};
pub use error::{ConfigError, DecodeError, ObjectError, RelayError, RowError};
pub use filter::SourceFilter;
pub use record::{sanitize_timestamp, trip_file_name, TripRecord, TripRow};
pub use relay::{ObjectReport, Relay, RunSummary};
pub use report::{CollectingReporter, Reporter, RunEvent, TracingReporter};
