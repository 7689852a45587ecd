//! Capturing transport
//!
//! Wraps any request executor so that every round trip made through it is
//! appended to a HAR archive, without the caller noticing.

use chrono::Utc;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, warn};

use crate::convert;
use crate::error::{Error, Result};
use crate::har::Entry;
use crate::writer::SharedWriter;

/// Executes one request and produces one response or error
pub trait Transport: Send + Sync {
    fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = reqwest::Result<reqwest::Response>> + Send;
}

impl Transport for reqwest::Client {
    fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = reqwest::Result<reqwest::Response>> + Send {
        reqwest::Client::execute(self, request)
    }
}

/// A transport that records every round trip of its base transport
#[derive(Debug, Clone)]
pub struct HarTransport<T> {
    base: T,
    writer: SharedWriter,
}

impl<T> HarTransport<T> {
    pub fn new(base: T, writer: SharedWriter) -> Self {
        Self { base, writer }
    }

    pub fn base(&self) -> &T {
        &self.base
    }

    pub fn writer(&self) -> &SharedWriter {
        &self.writer
    }

    /// Finalize the archive. Later round trips still go through but are
    /// no longer recorded.
    pub fn close(&self) -> Result<()> {
        match self.writer.lock() {
            Ok(mut writer) => writer.close(),
            Err(poisoned) => poisoned.into_inner().close(),
        }
    }

    fn record(&self, entry: Entry) {
        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(_) => {
                warn!(url = %entry.request.url, "archive writer poisoned, entry dropped");
                return;
            }
        };

        match writer.append(&entry) {
            Ok(()) => debug!(
                method = %entry.request.method,
                url = %entry.request.url,
                status = entry.response.status,
                time_ms = entry.time,
                "captured round trip"
            ),
            Err(Error::Closed) => debug!(url = %entry.request.url, "archive closed, entry dropped"),
            Err(err) => warn!(url = %entry.request.url, error = %err, "failed to capture round trip"),
        }
    }
}

impl<T: Transport> Transport for HarTransport<T> {
    fn execute(
        &self,
        mut request: reqwest::Request,
    ) -> impl Future<Output = reqwest::Result<reqwest::Response>> + Send {
        async move {
            let har_request = convert::request_from_reqwest(&mut request).await;

            let started = Utc::now();
            let clock = Instant::now();
            let result = self.base.execute(request).await;
            let elapsed = clock.elapsed();

            let (result, har_response) = match result {
                Ok(response) => {
                    let (response, har_response) = convert::response_from_reqwest(response).await;
                    (Ok(response), har_response)
                }
                Err(err) => {
                    let har_response = convert::failed_response(&err);
                    (Err(err), har_response)
                }
            };

            self.record(Entry::new(started, elapsed, har_request, har_response));
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::har;
    use crate::writer::HarWriter;
    use reqwest::{Method, ResponseBuilderExt};
    use tempfile::TempDir;
    use url::Url;

    /// Answers with the request body it was given
    struct Echo;

    impl Transport for Echo {
        fn execute(
            &self,
            request: reqwest::Request,
        ) -> impl Future<Output = reqwest::Result<reqwest::Response>> + Send {
            let body = request
                .body()
                .and_then(|b| b.as_bytes())
                .map(|b| b.to_vec())
                .unwrap_or_default();
            let url = request.url().clone();
            async move {
                let response = http::Response::builder()
                    .status(201)
                    .header("content-type", "text/plain")
                    .url(url)
                    .body(body)
                    .unwrap();
                Ok(reqwest::Response::from(response))
            }
        }
    }

    #[tokio::test]
    async fn test_round_trip_is_recorded_and_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("echo.har");
        let transport = HarTransport::new(Echo, HarWriter::open(&path).unwrap().shared());

        let mut request = reqwest::Request::new(
            Method::POST,
            Url::parse("https://example.com/echo").unwrap(),
        );
        *request.body_mut() = Some("ping".into());

        let response = transport.execute(request).await.unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(response.url().as_str(), "https://example.com/echo");
        assert_eq!(response.text().await.unwrap(), "ping");

        transport.close().unwrap();

        let har = har::load_har(&path).unwrap();
        assert_eq!(har.log.entries.len(), 1);
        let entry = &har.log.entries[0];
        assert_eq!(entry.request.post_data.as_ref().unwrap().text, "ping");
        assert_eq!(entry.response.content.text.as_deref(), Some("ping"));
        assert_eq!(entry.response.content.mime_type, "text/plain");
    }

    #[tokio::test]
    async fn test_closed_archive_does_not_break_requests() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("closed.har");
        let transport = HarTransport::new(Echo, HarWriter::open(&path).unwrap().shared());
        transport.close().unwrap();

        let request = reqwest::Request::new(
            Method::GET,
            Url::parse("https://example.com/").unwrap(),
        );
        let response = transport.execute(request).await.unwrap();
        assert_eq!(response.status(), 201);

        assert!(har::load_har(&path).unwrap().log.entries.is_empty());
    }
}
