// 🌐 Foundational Record Fetch - "fetch object by URL → parsed record"
// Blocking, no retry: any failure here aborts the run before tables are read.

use crate::error::Error;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub trait RecordFetcher {
    fn fetch(&self, location: &str) -> Result<Value, Error>;
}

fn fetch_error(location: &str, reason: impl std::fmt::Display) -> Error {
    Error::FoundationalFetch {
        url: location.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_record(location: &str, text: &str) -> Result<Value, Error> {
    let value: Value = serde_json::from_str(text).map_err(|e| fetch_error(location, e))?;
    if value.get("id").and_then(Value::as_str).is_none() {
        return Err(fetch_error(location, "record has no string 'id'"));
    }
    Ok(value)
}

// ============================================================================
// LOCAL FILES
// ============================================================================

/// Reads `file://` URLs and plain paths
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl RecordFetcher for FileFetcher {
    fn fetch(&self, location: &str) -> Result<Value, Error> {
        let path = location.strip_prefix("file://").unwrap_or(location);
        let text = fs::read_to_string(Path::new(path)).map_err(|e| fetch_error(location, e))?;
        parse_record(location, &text)
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[cfg(feature = "http")]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("ransomware-kb/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpFetcher { client })
    }
}

#[cfg(feature = "http")]
impl RecordFetcher for HttpFetcher {
    fn fetch(&self, location: &str) -> Result<Value, Error> {
        let response = self
            .client
            .get(location)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| fetch_error(location, e))?;
        let text = response.text().map_err(|e| fetch_error(location, e))?;
        parse_record(location, &text)
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// http(s) URLs go over the network, everything else is read from disk
pub struct LocationFetcher {
    #[cfg(feature = "http")]
    http: HttpFetcher,
    file: FileFetcher,
}

impl LocationFetcher {
    pub fn new() -> anyhow::Result<Self> {
        Ok(LocationFetcher {
            #[cfg(feature = "http")]
            http: HttpFetcher::new()?,
            file: FileFetcher,
        })
    }
}

impl RecordFetcher for LocationFetcher {
    fn fetch(&self, location: &str) -> Result<Value, Error> {
        let is_remote = location.starts_with("http://") || location.starts_with("https://");

        if !is_remote {
            return self.file.fetch(location);
        }

        #[cfg(feature = "http")]
        {
            self.http.fetch(location)
        }
        #[cfg(not(feature = "http"))]
        {
            Err(fetch_error(location, "built without the 'http' feature"))
        }
    }
}

// ============================================================================
// STATIC
// ============================================================================

/// Pre-loaded records keyed by location; for tests and air-gapped runs
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    records: HashMap<String, Value>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, location: &str, record: Value) -> Self {
        self.records.insert(location.to_string(), record);
        self
    }
}

impl RecordFetcher for StaticFetcher {
    fn fetch(&self, location: &str) -> Result<Value, Error> {
        let record = self
            .records
            .get(location)
            .ok_or_else(|| fetch_error(location, "not found"))?;
        parse_record(location, &record.to_string())
    }
}
