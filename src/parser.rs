use crate::error::Error;
use crate::models::{Headers, LogEntry};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{self, BufRead};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
#[error("Unable to parse line '{0}'")]
pub struct ParseError(String);

impl ParseError {
    pub fn new(line: impl AsRef<str>) -> Self {
        ParseError(line.as_ref().to_owned())
    }
}

// LogFormat "%{XFF}e %h %l %u %t \"%r\" %>s %b \"%{Referer}i\" \"%{User-Agent}i\""
//
// Apache escapes `"` and `\` inside quoted fields, so a quoted field is a run
// of non-quote characters or backslash escapes.
static ACCESS_LOG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<xff>\S+) (?P<host>\S+) (?P<ident>\S+) (?P<user>\S+) \[(?P<date>[^\]]+)\] "(?P<request>(?:[^"\\]|\\.)*)" (?P<status>\d{3}) (?P<bytes>\d+|-) "(?P<referrer>(?:[^"\\]|\\.)*)" "(?P<useragent>(?:[^"\\]|\\.)*)""#,
    )
    .expect("access log regex is valid")
});

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    out
}

fn optional(value: &str) -> Option<String> {
    (value != "-").then(|| value.to_owned())
}

pub fn parse(line: &str) -> Result<LogEntry, ParseError> {
    let captures = ACCESS_LOG_REGEX
        .captures(line)
        .ok_or_else(|| ParseError::new(line))?;

    let timestamp = chrono::DateTime::parse_from_str(&captures["date"], "%d/%b/%Y:%H:%M:%S %z")
        .map_err(|_| ParseError::new(line))?;
    let status = captures["status"]
        .parse::<u16>()
        .map_err(|_| ParseError::new(line))?;
    let bytes = match &captures["bytes"] {
        "-" => None,
        n => Some(n.parse::<u64>().map_err(|_| ParseError::new(line))?),
    };

    let mut headers = Headers::default();
    if let Some(referrer) = optional(&captures["referrer"]) {
        headers.insert("Referer", unescape(&referrer));
    }
    if let Some(useragent) = optional(&captures["useragent"]) {
        headers.insert("User-Agent", unescape(&useragent));
    }

    Ok(LogEntry {
        forwarded_for: optional(&captures["xff"]),
        remote_host: captures["host"].to_owned(),
        ident: optional(&captures["ident"]),
        auth_user: optional(&captures["user"]),
        timestamp,
        request_line: unescape(&captures["request"]),
        status,
        bytes,
        headers,
    })
}

/// Lines of a log stream. Invalid UTF-8 is replaced rather than failing the
/// read, only errors of the underlying reader are yielded as errors.
pub struct LogLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> LogLines<R> {
    pub fn new(reader: R) -> Self {
        LogLines {
            reader,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for LogLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.buf);
                Some(Ok(line.trim_end_matches(&['\r', '\n'][..]).to_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Parsed entries of a log stream. Lines that don't match the access log
/// grammar are logged at debug level and skipped; reader errors are passed on.
pub fn entries<R: BufRead>(reader: R) -> impl Iterator<Item = Result<LogEntry, Error>> {
    LogLines::new(reader).filter_map(|line| match line {
        Ok(line) => match parse(&line) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                debug!("{}", e);
                None
            }
        },
        Err(e) => Some(Err(Error::from(e))),
    })
}
