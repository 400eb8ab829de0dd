use crate::error::{Error, Result};
use crate::models::{IdentityKey, Record, UserAgentInfo};
use crate::record::{parse_timestamp_string, timestamp_string};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, Row, Statement};
use std::path::Path;
use std::time::Duration;

mod batchwriter;
mod export;
mod rekey;
mod watermark;

pub use batchwriter::{BatchWriter, FlushStats};
pub use export::export;
pub use rekey::rekey;
pub use watermark::Watermark;

const SCHEMA: &str = include_str!("schema.sql");

const INSERT_SQL: &str = "
    INSERT INTO logs(
        id,
        t, y, m, d, msec,
        client_ip,
        id_scheme, id_value,
        country_code,
        browser_family, browser_major,
        device_brand, device_family, device_model,
        os_family, os_major
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_SQL: &str = "
    SELECT
        id,
        t, y, m, d, msec,
        client_ip,
        id_scheme, id_value,
        country_code,
        browser_family, browser_major,
        device_brand, device_family, device_model,
        os_family, os_major
    FROM logs
";

pub type DbPool = Pool<SqliteConnectionManager>;

/// Opens (or creates) the store and makes sure the schema exists.
///
/// Ingestion is single writer, so the pool holds exactly one connection. This
/// also keeps `:memory:` stores usable, every checkout sees the same database.
pub fn init(path: impl AsRef<Path>) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder()
        .max_size(1)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)?;
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;
    Ok(pool)
}

fn insert_record(stmt: &mut Statement<'_>, record: &Record) -> rusqlite::Result<usize> {
    let ua = &record.user_agent;
    stmt.execute(params![
        record.id.as_str(),
        timestamp_string(&record.timestamp),
        record.year,
        record.month,
        record.day,
        record.msec,
        record.client_ip,
        record.id_scheme,
        record.id_value,
        record.country_code,
        ua.browser_family,
        ua.browser_major,
        ua.device_brand,
        ua.device_family,
        ua.device_model,
        ua.os_family,
        ua.os_major,
    ])
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let t: String = row.get(1)?;
    let timestamp = parse_timestamp_string(&t).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(Error::CorruptTimestamp(t)))
    })?;
    Ok(Record {
        id: IdentityKey::from(row.get::<_, String>(0)?),
        timestamp,
        year: row.get(2)?,
        month: row.get(3)?,
        day: row.get(4)?,
        msec: row.get(5)?,
        client_ip: row.get(6)?,
        id_scheme: row.get(7)?,
        id_value: row.get(8)?,
        country_code: row.get(9)?,
        user_agent: UserAgentInfo {
            browser_family: row.get(10)?,
            browser_major: row.get(11)?,
            device_brand: row.get(12)?,
            device_family: row.get(13)?,
            device_model: row.get(14)?,
            os_family: row.get(15)?,
            os_major: row.get(16)?,
        },
    })
}

/// Primary key (or any other uniqueness) violation.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

pub fn count_rows(conn: &Connection) -> Result<usize> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
    Ok(n as usize)
}


#[cfg(test)]
mod tests {
    use super::testing::record;
    use super::{count_rows, init, insert_record, is_unique_violation, record_from_row, INSERT_SQL, SELECT_SQL};

    #[test]
    fn test_init_schema() {
        let pool = init(":memory:").unwrap();
        assert_eq!(0, count_rows(&pool.get().unwrap()).unwrap());
    }

    #[test]
    fn init_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.sqlite3");
        drop(init(&path).unwrap());
        let pool = init(&path).unwrap();
        assert_eq!(0, count_rows(&pool.get().unwrap()).unwrap());
    }

    #[test]
    fn stored_row_reads_back() {
        let pool = init(":memory:").unwrap();
        let con = pool.get().unwrap();
        let mut original = record(7, "12025/1234");
        original.country_code = Some("NZ".to_owned());
        original.user_agent.browser_family = Some("Firefox".to_owned());
        original.user_agent.os_major = Some("14".to_owned());

        let mut stmt = con.prepare(INSERT_SQL).unwrap();
        assert_eq!(1, insert_record(&mut stmt, &original).unwrap());

        let err = insert_record(&mut stmt, &original).unwrap_err();
        assert!(is_unique_violation(&err));

        let read = con.query_row(SELECT_SQL, [], record_from_row).unwrap();
        assert_eq!(original, read);
    }
}
