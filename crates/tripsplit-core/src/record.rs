use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::RowError;

pub const VENDOR_COLUMN: &str = "VendorID";
pub const PICKUP_COLUMN: &str = "tpep_pickup_datetime";

/// One decoded trip row. The two key columns are resolved when the table is
/// decoded; `fields` keeps every column in table order.
#[derive(Debug, Clone, PartialEq)]
pub struct TripRow {
    pub index: usize,
    pub vendor_id: Option<String>,
    pub pickup_datetime: Option<String>,
    pub fields: Map<String, Value>,
}

/// A row ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripRecord {
    pub file_name: String,
    pub body: Bytes,
}

pub fn sanitize_timestamp(raw: &str) -> String {
    raw.replace(':', "-").replace(' ', "_")
}

pub fn trip_file_name(vendor_id: &str, pickup_datetime: &str) -> String {
    format!(
        "trip_{vendor_id}_{}.json",
        sanitize_timestamp(pickup_datetime)
    )
}

impl TripRow {
    pub fn to_record(&self) -> Result<TripRecord, RowError> {
        let vendor_id = self
            .vendor_id
            .as_deref()
            .ok_or(RowError::MissingField(VENDOR_COLUMN))?;
        let pickup_datetime = self
            .pickup_datetime
            .as_deref()
            .ok_or(RowError::MissingField(PICKUP_COLUMN))?;

        let body = serde_json::to_vec(&self.fields)?;

        Ok(TripRecord {
            file_name: trip_file_name(vendor_id, pickup_datetime),
            body: Bytes::from(body),
        })
    }
}

impl TripRecord {
    pub fn object_key(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.file_name)
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}
