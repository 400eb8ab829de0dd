use crate::error::{Error, Result};
use crate::record::parse_timestamp_string;
use chrono::{DateTime, FixedOffset};
use rusqlite::Connection;
use std::fmt;

/// Resumption guard: entries older than the newest stored record are skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Watermark {
    /// Empty store, everything is ingested.
    Unbounded,
    At(DateTime<FixedOffset>),
}

impl Watermark {
    /// The newest timestamp in the store, or `Error::EmptyStore`.
    ///
    /// `t` is compared as text, which orders correctly as long as the log
    /// keeps a single UTC offset.
    pub fn current(conn: &Connection) -> Result<DateTime<FixedOffset>> {
        let newest: Option<String> = conn
            .query_row("SELECT MAX(t) FROM logs", [], |row| row.get(0))?;
        let newest = newest.ok_or(Error::EmptyStore)?;
        parse_timestamp_string(&newest).ok_or(Error::CorruptTimestamp(newest))
    }

    pub fn load(conn: &Connection) -> Result<Watermark> {
        match Watermark::current(conn) {
            Ok(ts) => Ok(Watermark::At(ts)),
            Err(Error::EmptyStore) => Ok(Watermark::Unbounded),
            Err(e) => Err(e),
        }
    }

    /// True for timestamps strictly older than the watermark.
    pub fn is_behind(&self, ts: &DateTime<FixedOffset>) -> bool {
        match self {
            Watermark::Unbounded => false,
            Watermark::At(mark) => ts < mark,
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Unbounded => write!(f, "none"),
            Watermark::At(ts) => write!(f, "{}", ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Watermark;
    use crate::db::testing::record;
    use crate::db::{init, BatchWriter};
    use crate::error::Error;

    #[test]
    fn empty_store_has_no_watermark() {
        let pool = init(":memory:").unwrap();
        let con = pool.get().unwrap();
        assert!(matches!(Watermark::current(&con), Err(Error::EmptyStore)));
        assert_eq!(Watermark::Unbounded, Watermark::load(&con).unwrap());
    }

    #[test]
    fn newest_stored_timestamp() {
        let pool = init(":memory:").unwrap();
        let mut con = pool.get().unwrap();
        {
            let mut writer = BatchWriter::new(&mut con);
            writer.add(record(30, "a"));
            writer.add(record(10, "b"));
            writer.flush().unwrap();
        }
        let newest = record(30, "a").timestamp;
        assert_eq!(newest, Watermark::current(&con).unwrap());

        let mark = Watermark::load(&con).unwrap();
        assert!(mark.is_behind(&record(29, "x").timestamp));
        assert!(!mark.is_behind(&newest));
        assert!(!mark.is_behind(&record(31, "x").timestamp));
    }

    #[test]
    fn corrupt_timestamp_is_fatal() {
        let pool = init(":memory:").unwrap();
        let con = pool.get().unwrap();
        con.execute("INSERT INTO logs(id, t) VALUES ('x', 'yesterday')", [])
            .unwrap();
        assert!(matches!(Watermark::load(&con), Err(Error::CorruptTimestamp(_))));
    }

    #[test]
    fn unbounded_admits_everything() {
        assert!(!Watermark::Unbounded.is_behind(&record(0, "a").timestamp));
    }
}
