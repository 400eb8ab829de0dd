//! Copies the store into ClickHouse.
//!
//! The target table has the same columns as `logs`, with `t` as a
//! `DateTime64(6)` and absent strings stored as empty strings:
//!
//! ```sql
//! CREATE TABLE n2tlogs.logs (
//!     id String, t DateTime64(6), y Int32, m UInt32, d UInt32, msec UInt32,
//!     client_ip String, id_scheme String, id_value String, country_code String,
//!     browser_family String, browser_major String,
//!     device_brand String, device_family String, device_model String,
//!     os_family String, os_major String
//! ) ENGINE = ReplacingMergeTree ORDER BY (t, id)
//! ```

use super::{record_from_row, SELECT_SQL};
use crate::error::{Error, Result};
use crate::models::Record;
use chrono::{DateTime, FixedOffset};
use clickhouse::{Client, Row};
use rusqlite::Connection;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info};

#[derive(Row, Serialize, Clone, Debug, PartialEq)]
pub struct ExportRow {
    id: String,
    #[serde(with = "clickhouse::serde::time::datetime64::micros")]
    t: OffsetDateTime,
    y: i32,
    m: u32,
    d: u32,
    msec: u32,
    client_ip: String,
    id_scheme: String,
    id_value: String,
    country_code: String,
    browser_family: String,
    browser_major: String,
    device_brand: String,
    device_family: String,
    device_model: String,
    os_family: String,
    os_major: String,
}

fn to_offset_date_time(ts: &DateTime<FixedOffset>) -> Result<OffsetDateTime> {
    let seconds = OffsetDateTime::from_unix_timestamp(ts.timestamp())
        .map_err(|_| Error::CorruptTimestamp(ts.to_rfc3339()))?;
    Ok(seconds + time::Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos())))
}

impl ExportRow {
    pub fn from_record(record: Record) -> Result<ExportRow> {
        let ua = record.user_agent;
        Ok(ExportRow {
            id: record.id.as_str().to_owned(),
            t: to_offset_date_time(&record.timestamp)?,
            y: record.year,
            m: record.month,
            d: record.day,
            msec: record.msec,
            client_ip: record.client_ip,
            id_scheme: record.id_scheme,
            id_value: record.id_value,
            country_code: record.country_code.unwrap_or_default(),
            browser_family: ua.browser_family.unwrap_or_default(),
            browser_major: ua.browser_major.unwrap_or_default(),
            device_brand: ua.device_brand.unwrap_or_default(),
            device_family: ua.device_family.unwrap_or_default(),
            device_model: ua.device_model.unwrap_or_default(),
            os_family: ua.os_family.unwrap_or_default(),
            os_major: ua.os_major.unwrap_or_default(),
        })
    }
}

/// Reads every stored row in export form, `batch_size` rows at a time.
fn for_each_batch<F>(con: &Connection, batch_size: usize, mut f: F) -> Result<usize>
where
    F: FnMut(&[ExportRow]) -> Result<()>,
{
    let batch_size = batch_size.max(1);
    let mut stmt = con.prepare(SELECT_SQL)?;
    let rows = stmt.query_map([], record_from_row)?;
    let mut batch = Vec::with_capacity(batch_size.min(10_000));
    let mut read = 0;
    for row in rows {
        batch.push(ExportRow::from_record(row?)?);
        read += 1;
        if batch.len() == batch_size {
            f(&batch)?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        f(&batch)?;
    }
    Ok(read)
}

async fn insert_batch(client: &Client, table: &str, rows: &[ExportRow]) -> Result<()> {
    let mut insert = client.insert::<ExportRow>(table)?;
    for row in rows {
        insert.write(row).await?;
    }
    insert.end().await?;
    Ok(())
}

/// Writes every row of the store behind `con` into `table`, one insert per
/// `batch_size` rows. Rows are only buffered per batch, the store is read
/// once.
pub fn export(
    con: &Connection,
    client: &Client,
    table: &str,
    batch_size: usize,
    runtime: &tokio::runtime::Runtime,
) -> Result<usize> {
    let mut inserted = 0;
    let read = for_each_batch(con, batch_size, |batch| {
        runtime.block_on(insert_batch(client, table, batch))?;
        inserted += batch.len();
        info!("Inserted {} rows", inserted);
        Ok(())
    })?;
    debug!(read, table, "export finished");
    Ok(read)
}
