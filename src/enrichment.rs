use crate::error::{Error, Result};
use crate::models::UserAgentInfo;
use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use uaparser::{Parser, UserAgentParser};

/// Country lookup by IP address.
pub trait CountryLookup {
    /// `Ok(None)` when the database has no data for the address.
    fn country_of(&self, ip: IpAddr) -> Result<Option<String>>;
}

/// User agent breakdown. Unparseable input yields an empty `UserAgentInfo`.
pub trait UserAgentLookup {
    fn user_agent_info_of(&self, user_agent: &str) -> UserAgentInfo;
}

pub struct GeoIpCountries {
    reader: Reader<Vec<u8>>,
}

impl GeoIpCountries {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(GeoIpCountries {
            reader: Reader::open_readfile(path)?,
        })
    }
}

impl CountryLookup for GeoIpCountries {
    fn country_of(&self, ip: IpAddr) -> Result<Option<String>> {
        match self.reader.lookup::<geoip2::Country>(ip) {
            Ok(found) => Ok(found
                .country
                .and_then(|c| c.iso_code)
                .map(str::to_owned)),
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct UaParserAgents {
    parser: UserAgentParser,
}

impl UaParserAgents {
    /// Loads a ua-parser `regexes.yaml`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let parser = UserAgentParser::from_yaml(&path.to_string_lossy())
            .map_err(|e| Error::UserAgentRegexes(format!("{}: {:?}", path.display(), e)))?;
        Ok(UaParserAgents { parser })
    }
}

impl UserAgentLookup for UaParserAgents {
    fn user_agent_info_of(&self, user_agent: &str) -> UserAgentInfo {
        let client = self.parser.parse(user_agent);
        UserAgentInfo {
            browser_family: Some(client.user_agent.family.to_string()),
            browser_major: client.user_agent.major.map(|v| v.to_string()),
            device_brand: client.device.brand.map(|v| v.to_string()),
            device_family: Some(client.device.family.to_string()),
            device_model: client.device.model.map(|v| v.to_string()),
            os_family: Some(client.os.family.to_string()),
            os_major: client.os.major.map(|v| v.to_string()),
        }
    }
}

/// Memoizes lookups by exact input for the lifetime of one ingestion run.
pub struct EnrichmentCache<C, U> {
    countries: C,
    user_agents: U,
    country_cache: HashMap<String, Option<String>>,
    user_agent_cache: HashMap<String, UserAgentInfo>,
}

impl<C: CountryLookup, U: UserAgentLookup> EnrichmentCache<C, U> {
    pub fn new(countries: C, user_agents: U) -> Self {
        EnrichmentCache {
            countries,
            user_agents,
            country_cache: HashMap::new(),
            user_agent_cache: HashMap::new(),
        }
    }

    /// Hosts that are not IP literals have no country.
    pub fn country_of(&mut self, host: &str) -> Result<Option<String>> {
        if let Some(country) = self.country_cache.get(host) {
            return Ok(country.clone());
        }
        let country = match host.parse::<IpAddr>() {
            Ok(ip) => self.countries.country_of(ip)?,
            Err(_) => None,
        };
        self.country_cache.insert(host.to_owned(), country.clone());
        Ok(country)
    }

    pub fn user_agent_info_of(&mut self, user_agent: &str) -> UserAgentInfo {
        if let Some(info) = self.user_agent_cache.get(user_agent) {
            return info.clone();
        }
        let info = self.user_agents.user_agent_info_of(user_agent);
        self.user_agent_cache
            .insert(user_agent.to_owned(), info.clone());
        info
    }

    pub fn cached_hosts(&self) -> usize {
        self.country_cache.len()
    }

    pub fn cached_user_agents(&self) -> usize {
        self.user_agent_cache.len()
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{FirstWordAgents, StaticCountries};
    use super::EnrichmentCache;
    use crate::models::UserAgentInfo;

    #[test]
    fn memoizes_countries() {
        let mut cache = EnrichmentCache::new(
            StaticCountries::with(&[("203.0.113.5", "NZ")]),
            FirstWordAgents::default(),
        );
        assert_eq!(Some("NZ".to_owned()), cache.country_of("203.0.113.5").unwrap());
        assert_eq!(Some("NZ".to_owned()), cache.country_of("203.0.113.5").unwrap());
        assert_eq!(None, cache.country_of("198.51.100.1").unwrap());
        assert_eq!(None, cache.country_of("198.51.100.1").unwrap());
        assert_eq!(2, cache.countries.calls.get());
        assert_eq!(2, cache.cached_hosts());
    }

    #[test]
    fn hostnames_have_no_country() {
        let mut cache = EnrichmentCache::new(StaticCountries::default(), FirstWordAgents::default());
        assert_eq!(None, cache.country_of("crawler.example.org").unwrap());
        assert_eq!(0, cache.countries.calls.get());
    }

    #[test]
    fn memoizes_user_agents() {
        let mut cache = EnrichmentCache::new(StaticCountries::default(), FirstWordAgents::default());
        let info = cache.user_agent_info_of("Firefox/118.0");
        assert_eq!(Some("Firefox".to_owned()), info.browser_family);
        assert_eq!(Some("118".to_owned()), info.browser_major);
        assert_eq!(info, cache.user_agent_info_of("Firefox/118.0"));
        assert_eq!(1, cache.user_agents.calls.get());
        assert_eq!(1, cache.cached_user_agents());
    }

    #[test]
    fn unparseable_user_agent_is_empty() {
        let mut cache = EnrichmentCache::new(StaticCountries::default(), FirstWordAgents::default());
        assert_eq!(UserAgentInfo::default(), cache.user_agent_info_of(""));
    }
}
