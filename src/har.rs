//! HAR (HTTP Archive) model
//!
//! HAR 1.2 records as written by the archive writer and read back by
//! `kiroku inspect`. Field names follow the HAR 1.2 format exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// HAR format version written into every archive
pub const HAR_VERSION: &str = "1.2";

/// HAR 1.2 root structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Har {
    pub log: Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    pub version: String,
    pub creator: Creator,
    pub entries: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Name and version of the application that produced the archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Default for Creator {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            comment: None,
        }
    }
}

/// One captured round trip
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub started_date_time: DateTime<Utc>,
    #[serde(deserialize_with = "whole_millis")]
    pub time: i64,
    pub request: Request,
    pub response: Response,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub timings: Timings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Entry {
    pub fn new(
        started: DateTime<Utc>,
        elapsed: Duration,
        request: Request,
        response: Response,
    ) -> Self {
        let time = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        Self {
            started_date_time: started,
            time,
            request,
            response,
            cache: Cache::default(),
            timings: Timings::waiting(time),
            comment: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub method: String,
    pub url: String,
    pub http_version: String,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    pub headers: Vec<Header>,
    #[serde(default)]
    pub query_string: Vec<QueryParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<PostData>,
    pub headers_size: i64,
    pub body_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    pub headers: Vec<Header>,
    pub content: Content,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Bytes this header occupies on the wire: `name: value\r\n`
    pub fn wire_size(&self) -> i64 {
        (self.name.len() + 2 + self.value.len() + 2) as i64
    }
}

/// Byte size of a header block, including the blank line that ends it
pub fn headers_size(headers: &[Header]) -> i64 {
    headers.iter().map(Header::wire_size).sum::<i64>() + 2
}

/// Cookies are part of the format but never captured
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    pub value: String,
}

/// Request body. `params` and `text` are mutually exclusive; only `text`
/// is ever written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostData {
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<i64>,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Round-trip phases in milliseconds; `-1` marks a phase that was not observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    #[serde(default = "unknown")]
    pub blocked: i64,
    #[serde(default = "unknown")]
    pub dns: i64,
    #[serde(default = "unknown")]
    pub connect: i64,
    #[serde(deserialize_with = "whole_millis")]
    pub send: i64,
    #[serde(deserialize_with = "whole_millis")]
    pub wait: i64,
    #[serde(deserialize_with = "whole_millis")]
    pub receive: i64,
    #[serde(default = "unknown")]
    pub ssl: i64,
}

impl Timings {
    /// Attribute the whole round trip to `wait`, the only phase we can observe
    pub fn waiting(millis: i64) -> Self {
        Self {
            blocked: -1,
            dns: -1,
            connect: -1,
            send: 0,
            wait: millis,
            receive: 0,
            ssl: -1,
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self::waiting(0)
    }
}

fn unknown() -> i64 {
    -1
}

// Browsers export fractional milliseconds; round them on the way in.
fn whole_millis<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    Ok(value.round() as i64)
}

/// Parse a HAR file from JSON string
pub fn parse_har(content: &str) -> Result<Har> {
    let har: Har = serde_json::from_str(content)?;
    Ok(har)
}

/// Load and parse a HAR file from disk
pub fn load_har(path: impl AsRef<Path>) -> Result<Har> {
    let content = std::fs::read_to_string(path)?;
    parse_har(&content)
}
