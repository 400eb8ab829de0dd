use super::{insert_record, is_unique_violation, INSERT_SQL};
use crate::error::Result;
use crate::models::Record;
use itertools::Itertools;
use rusqlite::Connection;
use std::ops::AddAssign;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Rows newly written.
    pub inserted: usize,
    /// Records rejected because their identity key was already stored. Each
    /// one is logged once at warn level as a skipped duplicate.
    pub duplicates: usize,
    /// Records dropped because an earlier record in the same buffer had the
    /// same identity key.
    pub collapsed: usize,
}

impl AddAssign for FlushStats {
    fn add_assign(&mut self, other: FlushStats) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.collapsed += other.collapsed;
    }
}

/// Buffers records and writes them with first-writer-wins semantics.
///
/// A flush tries a single transaction for the whole buffer. If that hits a
/// uniqueness conflict the transaction is rolled back and the records are
/// written one by one, each in its own commit, so only the conflicting ones
/// are lost.
pub struct BatchWriter<'conn> {
    con: &'conn mut Connection,
    buffer: Vec<Record>,
}

impl<'conn> BatchWriter<'conn> {
    pub fn new(con: &'conn mut Connection) -> BatchWriter<'conn> {
        BatchWriter {
            con,
            buffer: Vec::new(),
        }
    }

    pub fn add(&mut self, record: Record) {
        self.buffer.push(record);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn flush(&mut self) -> Result<FlushStats> {
        if self.buffer.is_empty() {
            return Ok(FlushStats::default());
        }
        let buffered = self.buffer.len();
        let records = std::mem::take(&mut self.buffer)
            .into_iter()
            .unique_by(|r| r.id.clone())
            .collect_vec();
        let mut stats = FlushStats {
            collapsed: buffered - records.len(),
            ..Default::default()
        };

        match self.insert_all(&records) {
            Ok(()) => {
                stats.inserted = records.len();
                debug!(rows = stats.inserted, "bulk insert committed");
                return Ok(stats);
            }
            Err(e) if is_unique_violation(&e) => {
                warn!(error = %e, rows = records.len(), "bulk insert conflicted, inserting records one at a time");
            }
            Err(e) => return Err(e.into()),
        }

        for record in &records {
            match self.insert_one(record) {
                Ok(()) => stats.inserted += 1,
                Err(e) if is_unique_violation(&e) => {
                    warn!(id = %record.id, timestamp = %record.timestamp, "duplicate row skipped");
                    stats.duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(stats)
    }

    fn insert_all(&mut self, records: &[Record]) -> rusqlite::Result<()> {
        let tx = self.con.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_SQL)?;
            for record in records {
                insert_record(&mut stmt, record)?;
            }
        }
        tx.commit()
    }

    fn insert_one(&mut self, record: &Record) -> rusqlite::Result<()> {
        let mut stmt = self.con.prepare_cached(INSERT_SQL)?;
        insert_record(&mut stmt, record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchWriter, FlushStats};
    use crate::db::testing::{record, stored_ids};
    use crate::db::{count_rows, init};

    #[test]
    fn bulk_insert() {
        let pool = init(":memory:").unwrap();
        let mut con = pool.get().unwrap();
        let mut writer = BatchWriter::new(&mut con);
        for i in 0..5 {
            writer.add(record(i, "12025/1234"));
        }
        assert_eq!(5, writer.len());
        let stats = writer.flush().unwrap();
        assert!(writer.is_empty());
        assert_eq!(
            FlushStats {
                inserted: 5,
                duplicates: 0,
                collapsed: 0
            },
            stats
        );
        drop(writer);
        assert_eq!(5, count_rows(&con).unwrap());
    }

    #[test]
    fn conflict_counts_one_duplicate_and_keeps_the_rest() {
        let pool = init(":memory:").unwrap();
        let mut con = pool.get().unwrap();
        let mut writer = BatchWriter::new(&mut con);
        writer.add(record(3, "v"));
        writer.flush().unwrap();

        for i in 1..=5 {
            writer.add(record(i, "v"));
        }
        let stats = writer.flush().unwrap();
        assert_eq!(4, stats.inserted);
        // One skipped-duplicate event for the record stored by the first flush.
        assert_eq!(1, stats.duplicates);
        assert_eq!(0, stats.collapsed);
        drop(writer);

        let expected = (1..=5).map(|i| record(i, "v").id).collect::<Vec<_>>();
        assert_eq!(expected, stored_ids(&con));
    }

    #[test]
    fn duplicates_within_a_buffer_collapse() {
        let pool = init(":memory:").unwrap();
        let mut con = pool.get().unwrap();
        let mut writer = BatchWriter::new(&mut con);
        writer.add(record(1, "v"));
        writer.add(record(2, "v"));
        writer.add(record(1, "v"));
        let stats = writer.flush().unwrap();
        assert_eq!(
            FlushStats {
                inserted: 2,
                duplicates: 0,
                collapsed: 1
            },
            stats
        );
    }

    #[test]
    fn flushing_twice_is_idempotent() {
        let pool = init(":memory:").unwrap();
        let mut con = pool.get().unwrap();
        let mut writer = BatchWriter::new(&mut con);
        let mut total = FlushStats::default();
        for _ in 0..2 {
            writer.add(record(1, "a"));
            writer.add(record(2, "b"));
            total += writer.flush().unwrap();
        }
        assert_eq!(2, total.inserted);
        assert_eq!(2, total.duplicates);
        assert_eq!(FlushStats::default(), writer.flush().unwrap());
        drop(writer);
        assert_eq!(2, count_rows(&con).unwrap());
    }
}
