use super::{record_from_row, BatchWriter, FlushStats, SELECT_SQL};
use crate::error::Result;
use crate::record::{identity_key, timestamp_string};
use rusqlite::Connection;
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RekeySummary {
    pub read: usize,
    pub written: FlushStats,
}

/// Copies every row of `src` into `dest`, recomputing the identity key from
/// the stored timestamp, client IP and identifier value. Rows whose new keys
/// coincide are written once.
pub fn rekey(src: &Connection, dest: &mut Connection, batch_size: usize) -> Result<RekeySummary> {
    let batch_size = batch_size.max(1);
    let mut summary = RekeySummary::default();
    let mut stmt = src.prepare(SELECT_SQL)?;
    let rows = stmt.query_map([], record_from_row)?;
    let mut writer = BatchWriter::new(dest);

    for row in rows {
        let mut record = row?;
        record.id = identity_key(
            &timestamp_string(&record.timestamp),
            &record.client_ip,
            &record.id_value,
        );
        writer.add(record);
        summary.read += 1;
        if summary.read % batch_size == 0 {
            summary.written += writer.flush()?;
            info!("{} rows processed...", summary.read);
        }
    }
    summary.written += writer.flush()?;
    info!(
        read = summary.read,
        inserted = summary.written.inserted,
        "rekey finished"
    );
    Ok(summary)
}
