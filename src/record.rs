//! Recording sessions
//!
//! Issues a list of requests through a capturing transport and reports how
//! each one went. This is what `kiroku record` runs.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use url::Url;

use crate::capture::{HarTransport, Transport};
use crate::error::Error;
use crate::writer::{HarWriter, WriterOptions};

/// Configuration for a recording session
#[derive(Debug, Clone)]
pub struct RecordConfig {
    pub timeout: Duration,
    pub concurrency: usize,
    pub follow_redirects: bool,
    pub writer: WriterOptions,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            concurrency: 1,
            follow_redirects: false,
            writer: WriterOptions::default(),
        }
    }
}

/// One request to issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: vec![],
            body: None,
        }
    }
}

/// Outcome of a single recorded request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordResult {
    pub request_index: usize,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub body_size: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of a complete recording session
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordSession {
    pub archive: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub total_requests: usize,
    pub successful: usize,
    pub failed: usize,
    pub entries_written: usize,
    pub results: Vec<RecordResult>,
}

/// Issue `requests` and capture them into a new archive at `path`
pub async fn record(
    requests: &[RequestSpec],
    path: &Path,
    config: RecordConfig,
) -> Result<RecordSession> {
    let redirect = if config.follow_redirects {
        reqwest::redirect::Policy::default()
    } else {
        reqwest::redirect::Policy::none()
    };
    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .redirect(redirect)
        .build()
        .context("Failed to build HTTP client")?;

    let writer = HarWriter::with_options(path, config.writer.clone())
        .with_context(|| format!("Failed to open archive {}", path.display()))?
        .shared();
    let transport = HarTransport::new(client, writer);

    let mut results: Vec<RecordResult> = if config.concurrency > 1 {
        stream::iter(requests.iter().enumerate())
            .map(|(index, request)| record_single(&transport, request, index))
            .buffer_unordered(config.concurrency)
            .collect()
            .await
    } else {
        let mut results = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            results.push(record_single(&transport, request, index).await);
        }
        results
    };
    results.sort_by_key(|r| r.request_index);

    let entries_written = transport
        .writer()
        .lock()
        .map(|w| w.entries())
        .unwrap_or_default();
    transport.close().context("Failed to finalize archive")?;

    let failed = results.iter().filter(|r| r.error.is_some()).count();

    Ok(RecordSession {
        archive: path.display().to_string(),
        timestamp: chrono::Utc::now(),
        total_requests: requests.len(),
        successful: results.len() - failed,
        failed,
        entries_written,
        results,
    })
}

async fn record_single(
    transport: &HarTransport<reqwest::Client>,
    request: &RequestSpec,
    index: usize,
) -> RecordResult {
    let start = Instant::now();
    let outcome = execute_spec(transport, request).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let (status, body_size, error) = match outcome {
        Ok((status, body_size)) => (status, body_size, None),
        Err(e) => (0, 0, Some(format!("{e:#}"))),
    };

    RecordResult {
        request_index: index,
        method: request.method.clone(),
        url: request.url.clone(),
        status,
        body_size,
        duration_ms,
        error,
    }
}

async fn execute_spec(
    transport: &HarTransport<reqwest::Client>,
    request: &RequestSpec,
) -> Result<(u16, usize)> {
    let method: reqwest::Method = request
        .method
        .parse()
        .map_err(|_| Error::InvalidMethod(request.method.clone()))?;
    let url = Url::parse(&request.url).context("Invalid URL")?;
    let headers = build_header_map(&request.headers)?;

    let mut builder = transport.base().request(method, url).headers(headers);
    if let Some(ref body) = request.body {
        builder = builder.body(body.clone());
    }
    let req = builder.build().context("Failed to build request")?;

    let response = transport.execute(req).await.context("Request failed")?;
    let status = response.status().as_u16();
    let body = response.bytes().await.context("Failed to read response body")?;

    Ok((status, body.len()))
}

/// Parse a `Name: value` header argument
pub fn parse_header(raw: &str) -> crate::Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| Error::InvalidHeader(raw.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidHeader(raw.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Build a HeaderMap from header tuples, keeping repeated names
fn build_header_map(headers: &[(String, String)]) -> crate::Result<HeaderMap> {
    let mut map = HeaderMap::new();

    for (name, value) in headers {
        let header_name: HeaderName = name
            .parse()
            .map_err(|_| Error::InvalidHeader(name.clone()))?;
        let header_value: HeaderValue = value
            .parse()
            .map_err(|_| Error::InvalidHeader(format!("{name}: {value}")))?;
        map.append(header_name, header_value);
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let (name, value) = parse_header("Content-Type: application/json").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "application/json");
    }

    #[test]
    fn test_parse_header_keeps_colons_in_value() {
        let (name, value) = parse_header("X-Origin:https://example.com:8443").unwrap();
        assert_eq!(name, "X-Origin");
        assert_eq!(value, "https://example.com:8443");
    }

    #[test]
    fn test_parse_header_rejects_missing_name() {
        assert!(matches!(parse_header(": value"), Err(Error::InvalidHeader(_))));
        assert!(matches!(parse_header("no-colon"), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_build_header_map_appends_repeats() {
        let headers = vec![
            ("Accept".to_string(), "text/html".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        let map = build_header_map(&headers).unwrap();
        assert_eq!(map.get_all("accept").iter().count(), 2);
    }

    #[test]
    fn test_build_header_map_rejects_bad_name() {
        let headers = vec![("Bad Header".to_string(), "x".to_string())];
        assert!(matches!(build_header_map(&headers), Err(Error::InvalidHeader(_))));
    }
}
