use std::net::IpAddr;
use std::path::PathBuf;

pub const DEFAULT_DATABASE: &str = "analysis/logs.sqlite3";
pub const DEFAULT_GEO_DATABASE: &str = "geo/GeoLite2-Country.mmdb";
pub const DEFAULT_UA_REGEXES: &str = "geo/regexes.yaml";
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_CLICKHOUSE_URL: &str = "http://localhost:8123";
pub const DEFAULT_CLICKHOUSE_TABLE: &str = "n2tlogs.logs";
pub const DEFAULT_EXPORT_BATCH_SIZE: usize = 100_000;

/// Settings for one ingestion run.
#[derive(Clone, Debug)]
pub struct Config {
    /// Destination SQLite store.
    pub database: PathBuf,
    /// MaxMind country database used for geolocation.
    pub geo_database: PathBuf,
    /// ua-parser `regexes.yaml`.
    pub ua_regexes: PathBuf,
    /// Final statuses that count as an identifier resolution.
    pub redirect_statuses: Vec<u16>,
    /// Hosts never ingested. Loopback IP literals are excluded as well.
    pub local_hosts: Vec<String>,
    /// Records buffered between flushes.
    pub batch_size: usize,
    /// Stop after this many records, `None` for no limit.
    pub max_records: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: PathBuf::from(DEFAULT_DATABASE),
            geo_database: PathBuf::from(DEFAULT_GEO_DATABASE),
            ua_regexes: PathBuf::from(DEFAULT_UA_REGEXES),
            redirect_statuses: vec![302],
            local_hosts: vec!["localhost".to_owned(), "127.0.0.1".to_owned()],
            batch_size: DEFAULT_BATCH_SIZE,
            max_records: None,
        }
    }
}

impl Config {
    pub fn is_redirect(&self, status: u16) -> bool {
        self.redirect_statuses.contains(&status)
    }

    pub fn is_local_host(&self, host: &str) -> bool {
        self.local_hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
            || host
                .parse::<IpAddr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn local_hosts() {
        let config = Config::default();
        assert!(config.is_local_host("127.0.0.1"));
        assert!(config.is_local_host("LOCALHOST"));
        assert!(config.is_local_host("127.0.0.53"));
        assert!(config.is_local_host("::1"));
        assert!(!config.is_local_host("203.0.113.5"));
    }

    #[test]
    fn redirect_statuses() {
        let mut config = Config::default();
        assert!(config.is_redirect(302));
        assert!(!config.is_redirect(303));
        assert!(!config.is_redirect(404));
        config.redirect_statuses.push(303);
        assert!(config.is_redirect(303));
    }
}
