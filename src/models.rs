use chrono::{DateTime, FixedOffset};
use derive_more::{Display, From};
use std::collections::HashMap;

/// One parsed access log line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LogEntry {
    pub forwarded_for: Option<String>,
    pub remote_host: String,
    pub ident: Option<String>,
    pub auth_user: Option<String>,
    pub timestamp: DateTime<FixedOffset>,
    pub request_line: String,
    pub status: u16,
    pub bytes: Option<u64>,
    pub headers: Headers,
}

impl LogEntry {
    pub fn user_agent(&self) -> &str {
        self.headers.get("User-Agent").unwrap_or("")
    }
}

/// Request headers captured by the log format, looked up case-insensitively.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Classification {
    pub scheme: String,
    pub value: String,
}

/// Best-effort breakdown of a user agent string. Every field may be absent.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct UserAgentInfo {
    pub browser_family: Option<String>,
    pub browser_major: Option<String>,
    pub device_brand: Option<String>,
    pub device_family: Option<String>,
    pub device_model: Option<String>,
    pub os_family: Option<String>,
    pub os_major: Option<String>,
}

/// Hex encoded SHA-1 over (timestamp, host, identifier value), used as the
/// primary key of the `logs` table.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, From)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A persistable row of the `logs` table.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Record {
    pub id: IdentityKey,
    pub timestamp: DateTime<FixedOffset>,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub msec: u32,
    pub client_ip: String,
    pub id_scheme: String,
    pub id_value: String,
    pub country_code: Option<String>,
    pub user_agent: UserAgentInfo,
}
