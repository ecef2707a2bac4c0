use std::io::Cursor;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Timelike};
use polars::prelude::*;
use serde_json::{Map, Number, Value};

use crate::error::{DecodeError, RowError};
use crate::record::{TripRow, PICKUP_COLUMN, VENDOR_COLUMN};

/// Turns a presigned URL into a decoded table.
#[async_trait]
pub trait TableSource: Send + Sync {
    async fn read_table(&self, url: &str) -> Result<TripTable, DecodeError>;
}

/// Fetches parquet files over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpTableSource {
    client: reqwest::Client,
}

impl HttpTableSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TableSource for HttpTableSource {
    async fn read_table(&self, url: &str) -> Result<TripTable, DecodeError> {
        // Errors must not echo the URL; it carries the signature.
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| DecodeError::Fetch(err.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DecodeError::Fetch(format!("GET returned {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| DecodeError::Fetch(err.without_url().to_string()))?;

        decode_parquet(&body)
    }
}

pub fn decode_parquet(bytes: &[u8]) -> Result<TripTable, DecodeError> {
    let frame = ParquetReader::new(Cursor::new(bytes)).finish()?;
    TripTable::new(frame)
}

/// A decoded, non-empty table with the key column positions resolved.
#[derive(Debug, Clone)]
pub struct TripTable {
    frame: DataFrame,
    vendor_column: Option<usize>,
    pickup_column: Option<usize>,
}

impl TripTable {
    pub fn new(frame: DataFrame) -> Result<Self, DecodeError> {
        if frame.height() == 0 {
            return Err(DecodeError::Empty);
        }

        let vendor_column = frame.get_column_index(VENDOR_COLUMN);
        let pickup_column = frame.get_column_index(PICKUP_COLUMN);

        Ok(Self {
            frame,
            vendor_column,
            pickup_column,
        })
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Rows in table order.
    pub fn rows(&self) -> impl Iterator<Item = (usize, Result<TripRow, RowError>)> + '_ {
        (0..self.len()).map(move |index| (index, self.row(index)))
    }

    pub fn row(&self, index: usize) -> Result<TripRow, RowError> {
        let mut fields = Map::with_capacity(self.frame.width());
        let mut vendor_id = None;
        let mut pickup_datetime = None;

        for (position, column) in self.frame.get_columns().iter().enumerate() {
            let name = column.name().to_string();
            let invalid = |message: String| RowError::Value {
                column: name.clone(),
                message,
            };

            let value = column
                .as_materialized_series()
                .get(index)
                .map_err(|err| invalid(err.to_string()))?;

            if Some(position) == self.vendor_column {
                vendor_id = text_value(&value).map_err(invalid)?;
            } else if Some(position) == self.pickup_column {
                pickup_datetime = text_value(&value).map_err(invalid)?;
            }

            fields.insert(name, json_value(&value));
        }

        Ok(TripRow {
            index,
            vendor_id,
            pickup_datetime,
            fields,
        })
    }
}

/// String form of a cell as used in object keys. Nulls and NaN count as absent.
fn text_value(value: &AnyValue<'_>) -> Result<Option<String>, String> {
    Ok(match value {
        AnyValue::Null => None,
        AnyValue::String(text) => Some(text.to_string()),
        AnyValue::StringOwned(text) => Some(text.to_string()),
        AnyValue::Float32(v) => float_text(f64::from(*v)),
        AnyValue::Float64(v) => float_text(*v),
        AnyValue::Date(days) => Some(format_date(*days)?),
        AnyValue::Datetime(v, unit, _) => Some(format_datetime(*v, *unit)?),
        other => Some(other.to_string()),
    })
}

/// Body form of a cell. Dates and datetimes are epoch milliseconds.
fn json_value(value: &AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::String(text) => Value::String(text.to_string()),
        AnyValue::StringOwned(text) => Value::String(text.to_string()),
        AnyValue::Boolean(v) => Value::Bool(*v),
        AnyValue::Int8(v) => Value::from(*v),
        AnyValue::Int16(v) => Value::from(*v),
        AnyValue::Int32(v) => Value::from(*v),
        AnyValue::Int64(v) => Value::from(*v),
        AnyValue::UInt8(v) => Value::from(*v),
        AnyValue::UInt16(v) => Value::from(*v),
        AnyValue::UInt32(v) => Value::from(*v),
        AnyValue::UInt64(v) => Value::from(*v),
        AnyValue::Float32(v) => float_json(f64::from(*v)),
        AnyValue::Float64(v) => float_json(*v),
        AnyValue::Date(days) => Value::from(i64::from(*days) * 86_400_000),
        AnyValue::Datetime(v, unit, _) => Value::from(epoch_millis(*v, *unit)),
        other => Value::String(other.to_string()),
    }
}

fn epoch_millis(value: i64, unit: TimeUnit) -> i64 {
    match unit {
        TimeUnit::Nanoseconds => value.div_euclid(1_000_000),
        TimeUnit::Microseconds => value.div_euclid(1_000),
        TimeUnit::Milliseconds => value,
    }
}

fn float_text(v: f64) -> Option<String> {
    if v.is_nan() {
        None
    } else if v.is_finite() && v.fract() == 0.0 {
        Some(format!("{v:.1}"))
    } else {
        Some(v.to_string())
    }
}

fn float_json(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn format_date(days: i32) -> Result<String, String> {
    DateTime::from_timestamp(i64::from(days) * 86_400, 0)
        .map(|stamp| stamp.date_naive().format("%Y-%m-%d").to_string())
        .ok_or_else(|| format!("date {days} out of range"))
}

fn format_datetime(value: i64, unit: TimeUnit) -> Result<String, String> {
    let stamp: Option<NaiveDateTime> = match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value).naive_utc()),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value).map(|d| d.naive_utc()),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value).map(|d| d.naive_utc()),
    };
    let stamp = stamp.ok_or_else(|| format!("timestamp {value} out of range"))?;

    let fraction = match (unit, stamp.nanosecond()) {
        (_, 0) => "",
        (TimeUnit::Nanoseconds, nanos) if nanos % 1_000 != 0 => "%.9f",
        _ => "%.6f",
    };
    Ok(stamp
        .format(&format!("%Y-%m-%d %H:%M:%S{fraction}"))
        .to_string())
}
