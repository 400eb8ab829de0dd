use crate::enrichment::{CountryLookup, EnrichmentCache, UserAgentLookup};
use crate::error::Result;
use crate::models::{Classification, IdentityKey, LogEntry, Record};
use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use sha1::{Digest, Sha1};

/// Renders a timestamp as `YYYY-MM-DD HH:MM:SS[.ffffff]+HH:MM`.
///
/// This string is both the stored `t` column and the first hash input of
/// the identity key, so its shape must not change: microseconds appear only
/// when non-zero.
pub fn timestamp_string(ts: &DateTime<FixedOffset>) -> String {
    let micros = ts.nanosecond() / 1_000;
    if micros == 0 {
        ts.format("%Y-%m-%d %H:%M:%S%:z").to_string()
    } else {
        format!(
            "{}.{:06}{}",
            ts.format("%Y-%m-%d %H:%M:%S"),
            micros,
            ts.format("%:z")
        )
    }
}

pub fn parse_timestamp_string(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z").ok()
}

/// SHA-1 of timestamp, host and identifier value, concatenated without
/// separators.
pub fn identity_key(timestamp: &str, host: &str, id_value: &str) -> IdentityKey {
    let mut hasher = Sha1::new();
    hasher.update(timestamp.as_bytes());
    hasher.update(host.as_bytes());
    hasher.update(id_value.as_bytes());
    IdentityKey::from(hex::encode(hasher.finalize()))
}

/// Milliseconds since local midnight.
pub fn millis_of_day(ts: &DateTime<FixedOffset>) -> u32 {
    // Leap seconds are folded into the last second of the minute.
    let micros = (ts.nanosecond() % 1_000_000_000) / 1_000;
    ts.hour() * 3_600_000 + ts.minute() * 60_000 + ts.second() * 1_000 + micros / 1_000
}

pub struct RecordBuilder;

impl RecordBuilder {
    pub fn build<C, U>(
        entry: &LogEntry,
        classification: Classification,
        enrichment: &mut EnrichmentCache<C, U>,
    ) -> Result<Record>
    where
        C: CountryLookup,
        U: UserAgentLookup,
    {
        let ts = entry.timestamp;
        let Classification { scheme, value } = classification;
        Ok(Record {
            id: identity_key(&timestamp_string(&ts), &entry.remote_host, &value),
            timestamp: ts,
            year: ts.year(),
            month: ts.month(),
            day: ts.day(),
            msec: millis_of_day(&ts),
            client_ip: entry.remote_host.clone(),
            id_scheme: scheme,
            id_value: value,
            country_code: enrichment.country_of(&entry.remote_host)?,
            user_agent: enrichment.user_agent_info_of(entry.user_agent()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{identity_key, millis_of_day, parse_timestamp_string, timestamp_string, RecordBuilder};
    use crate::enrichment::fakes::{FirstWordAgents, StaticCountries};
    use crate::enrichment::EnrichmentCache;
    use crate::models::{Classification, Headers, LogEntry};
    use chrono::{DateTime, FixedOffset};

    fn rfc3339(value: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(value).unwrap()
    }

    fn entry(ts: &str, host: &str, user_agent: &str) -> LogEntry {
        let mut headers = Headers::default();
        headers.insert("User-Agent", user_agent);
        LogEntry {
            forwarded_for: None,
            remote_host: host.to_owned(),
            ident: None,
            auth_user: None,
            timestamp: DateTime::parse_from_str(ts, "%d/%b/%Y:%H:%M:%S %z").unwrap(),
            request_line: "GET /ark:/12025/1234 HTTP/1.1".to_owned(),
            status: 302,
            bytes: None,
            headers,
        }
    }

    fn ark() -> Classification {
        Classification {
            scheme: "ark".to_owned(),
            value: "12025/1234".to_owned(),
        }
    }

    #[test]
    fn renders_timestamps() {
        let ts = rfc3339("2023-01-05T12:34:56-08:00");
        assert_eq!("2023-01-05 12:34:56-08:00", timestamp_string(&ts));

        let ts = rfc3339("2023-01-05T12:34:56.0015+05:30");
        assert_eq!("2023-01-05 12:34:56.001500+05:30", timestamp_string(&ts));
        assert_eq!(Some(ts), parse_timestamp_string(&timestamp_string(&ts)));
    }

    #[test]
    fn identity_key_is_stable() {
        assert_eq!(
            "dab39ca2fbbdf4242ce766da0e6f9a8b1eef84bf",
            identity_key("2023-01-05 12:34:56-08:00", "203.0.113.5", "12025/1234").as_str()
        );
    }

    #[test]
    fn millis_since_midnight() {
        let ts = rfc3339("2023-01-05T01:02:03.004999Z");
        assert_eq!(3_600_000 + 2 * 60_000 + 3_000 + 4, millis_of_day(&ts));
    }

    #[test]
    fn builds_record_in_local_time() {
        let mut cache = EnrichmentCache::new(
            StaticCountries::with(&[("203.0.113.5", "NZ")]),
            FirstWordAgents::default(),
        );
        // 23:30 in UTC-8 is already the next day in UTC.
        let entry = entry("31/Dec/2022:23:30:00 -0800", "203.0.113.5", "Firefox/118.0");
        let record = RecordBuilder::build(&entry, ark(), &mut cache).unwrap();
        assert_eq!((2022, 12, 31), (record.year, record.month, record.day));
        assert_eq!(23 * 3_600_000 + 30 * 60_000, record.msec);
        assert_eq!("ark", record.id_scheme);
        assert_eq!("12025/1234", record.id_value);
        assert_eq!("203.0.113.5", record.client_ip);
        assert_eq!(Some("NZ".to_owned()), record.country_code);
        assert_eq!(Some("Firefox".to_owned()), record.user_agent.browser_family);
        assert_eq!(
            identity_key("2022-12-31 23:30:00-08:00", "203.0.113.5", "12025/1234"),
            record.id
        );
    }

    #[test]
    fn same_event_same_key_regardless_of_enrichment() {
        let mut cache = EnrichmentCache::new(StaticCountries::default(), FirstWordAgents::default());
        let a = entry("05/Jan/2023:12:34:56 -0800", "203.0.113.5", "Firefox/118.0");
        let b = entry("05/Jan/2023:12:34:56 -0800", "203.0.113.5", "curl/8.1");
        let ra = RecordBuilder::build(&a, ark(), &mut cache).unwrap();
        let rb = RecordBuilder::build(&b, ark(), &mut cache).unwrap();
        assert_ne!(ra.user_agent, rb.user_agent);
        assert_eq!(ra.id, rb.id);
        assert_eq!(ra, RecordBuilder::build(&a, ark(), &mut cache).unwrap());
    }
}
