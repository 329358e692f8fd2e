//! Calendar columns: `Date` (UInt16 days), `Date32` (Int32 days),
//! `DateTime` (UInt32 seconds) and `DateTime64(p)` (Int64 ticks at scale
//! `10^p`). Timezone parameters affect server-side rendering only; values
//! here are epoch-relative.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::column::{out_of_range, wrong_kind, ColumnCodec};
use crate::error::Result;
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::Value;

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch exists")
}

fn days_since_epoch(value: &Value) -> Option<i64> {
    match value {
        Value::Date(d) | Value::Date32(d) => Some((*d - epoch_date()).num_days()),
        Value::DateTime(dt) => Some((dt.date_naive() - epoch_date()).num_days()),
        _ => None,
    }
}

fn seconds_since_epoch(value: &Value) -> Option<i64> {
    match value {
        Value::DateTime(dt) => Some(dt.timestamp()),
        Value::Date(d) | Value::Date32(d) => Some((*d - epoch_date()).num_days() * 86_400),
        _ => None,
    }
}

/// Codec for `Date`.
pub struct DateCodec;

#[async_trait]
impl ColumnCodec for DateCodec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * 2).await?;
        Ok(bytes
            .chunks_exact(2)
            .map(|chunk| {
                let days = u16::from_le_bytes(chunk.try_into().expect("2 bytes"));
                Value::Date(epoch_date() + Duration::days(i64::from(days)))
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * 2);
        for value in values {
            let days = days_since_epoch(value).ok_or_else(|| wrong_kind("Date", value))?;
            let days = u16::try_from(days).map_err(|_| out_of_range(value, "Date"))?;
            out.extend_from_slice(&days.to_le_bytes());
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::Date(epoch_date())
    }
}

/// Codec for `Date32`.
pub struct Date32Codec;

#[async_trait]
impl ColumnCodec for Date32Codec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * 4).await?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| {
                let days = i32::from_le_bytes(chunk.try_into().expect("4 bytes"));
                Value::Date32(epoch_date() + Duration::days(i64::from(days)))
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * 4);
        for value in values {
            let days = days_since_epoch(value).ok_or_else(|| wrong_kind("Date32", value))?;
            let days = i32::try_from(days).map_err(|_| out_of_range(value, "Date32"))?;
            out.extend_from_slice(&days.to_le_bytes());
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::Date32(epoch_date())
    }
}

/// Codec for `DateTime` / `DateTime('TZ')`.
pub struct DateTimeCodec;

#[async_trait]
impl ColumnCodec for DateTimeCodec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * 4).await?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| {
                let secs = u32::from_le_bytes(chunk.try_into().expect("4 bytes"));
                let dt = DateTime::<Utc>::from_timestamp(i64::from(secs), 0)
                    .expect("u32 seconds always in range");
                Value::DateTime(dt)
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * 4);
        for value in values {
            let secs = seconds_since_epoch(value).ok_or_else(|| wrong_kind("DateTime", value))?;
            let secs = u32::try_from(secs).map_err(|_| out_of_range(value, "DateTime"))?;
            out.extend_from_slice(&secs.to_le_bytes());
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::DateTime(DateTime::<Utc>::from_timestamp(0, 0).expect("epoch exists"))
    }
}

/// Codec for `DateTime64(p[, 'TZ'])`.
pub struct DateTime64Codec {
    precision: u8,
}

impl DateTime64Codec {
    /// Construct for sub-second precision `precision` (0..=9).
    pub fn new(precision: u8) -> Self {
        DateTime64Codec { precision }
    }

    fn ticks_of(&self, value: &Value) -> Option<i64> {
        match value {
            Value::DateTime64 { ticks, precision } if *precision == self.precision => Some(*ticks),
            Value::DateTime(dt) => {
                let scale = 10i64.checked_pow(u32::from(self.precision))?;
                dt.timestamp().checked_mul(scale)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ColumnCodec for DateTime64Codec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * 8).await?;
        Ok(bytes
            .chunks_exact(8)
            .map(|chunk| Value::DateTime64 {
                ticks: i64::from_le_bytes(chunk.try_into().expect("8 bytes")),
                precision: self.precision,
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * 8);
        for value in values {
            let ticks = self
                .ticks_of(value)
                .ok_or_else(|| wrong_kind(&format!("DateTime64({})", self.precision), value))?;
            out.extend_from_slice(&ticks.to_le_bytes());
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::DateTime64 { ticks: 0, precision: self.precision }
    }
}
