//! Live HTTP to HAR conversion
//!
//! Turns `reqwest` requests and responses into archive records. Bodies are
//! peeked, not consumed: whatever is drained gets put back as a fresh body
//! so the network stack and the caller read exactly what they would have
//! read without capture.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::header::{HeaderName, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, Version};
use http_body_util::BodyExt;
use hyper::body::{Body as HttpBody, Bytes};
use reqwest::{Body, ResponseBuilderExt};
use tracing::debug;
use url::Url;

use crate::har::{self, Content, Header, PostData};

/// Build the archive form of a request, restoring its body in place
pub async fn request_from_reqwest(request: &mut reqwest::Request) -> har::Request {
    let header_data = HeaderData::from_map(request.headers());

    // Fragments never go on the wire
    let mut url = request.url().clone();
    url.set_fragment(None);

    let mut har_request = har::Request {
        method: request.method().to_string(),
        url: url.to_string(),
        http_version: version_string(request.version()),
        cookies: vec![],
        headers: header_data.headers,
        query_string: vec![],
        post_data: None,
        headers_size: header_data.size,
        body_size: -1,
        comment: None,
    };

    if let Some(body) = peek_request_body(request.body_mut()).await {
        har_request.body_size = body.len() as i64;
        har_request.post_data = Some(PostData {
            mime_type: header_data.mime_type,
            params: vec![],
            text: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    har_request
}

/// Build the archive form of a response.
///
/// Returns the response to hand back to the caller (same status, headers,
/// extensions and URL, body re-readable from the start) alongside its record.
pub async fn response_from_reqwest(response: reqwest::Response) -> (reqwest::Response, har::Response) {
    let url = response.url().clone();
    let reported_length = response.content_length().map(|len| len as i64);

    let (parts, body) = http::Response::<Body>::from(response).into_parts();
    let header_data = HeaderData::from_map(&parts.headers);

    let mut har_response = har::Response {
        status: parts.status.as_u16(),
        status_text: parts.status.canonical_reason().unwrap_or_default().to_string(),
        http_version: version_string(parts.version),
        cookies: vec![],
        headers: header_data.headers,
        content: Content {
            size: -1,
            compression: None,
            mime_type: header_data.mime_type,
            text: None,
            encoding: None,
        },
        redirect_url: header_data.location,
        headers_size: header_data.size,
        body_size: reported_length.unwrap_or(-1),
        comment: None,
    };

    // reqwest's decoder never reports end-of-stream itself, so an exact
    // zero-length hint (204, HEAD, `Content-Length: 0`) also means no body
    let no_body = body.is_end_stream() || body.size_hint().exact() == Some(0);

    let body = if no_body {
        body
    } else {
        match drain(body).await {
            Drained::Complete(bytes) => {
                let (text, encoding) = content_text(&bytes);
                har_response.content.size = bytes.len() as i64;
                har_response.content.text = Some(text);
                har_response.content.encoding = encoding;
                har_response.body_size = reported_length.unwrap_or(bytes.len() as i64);
                Body::from(bytes)
            }
            Drained::Failed { chunks, error } => {
                debug!(url = %url, error = %error, "response body unavailable for capture");
                replay_body(chunks, error)
            }
        }
    };

    (rebuild_response(parts, body, url), har_response)
}

/// Describe a round trip that produced no response
pub fn failed_response(error: &reqwest::Error) -> har::Response {
    har::Response {
        status: 0,
        status_text: String::new(),
        http_version: String::new(),
        cookies: vec![],
        headers: vec![],
        content: Content {
            size: -1,
            compression: None,
            mime_type: String::new(),
            text: None,
            encoding: None,
        },
        redirect_url: String::new(),
        headers_size: -1,
        body_size: -1,
        comment: Some(error.to_string()),
    }
}

struct HeaderData {
    headers: Vec<Header>,
    size: i64,
    mime_type: String,
    location: String,
}

impl HeaderData {
    /// Names come out lowercase (that is how `HeaderMap` stores them) in
    /// first-insertion order. Repeated values are joined with a space in
    /// the header list, while the MIME type and redirect target take the
    /// first value. The size counts raw header bytes, before any lossy
    /// UTF-8 conversion for the archive text.
    fn from_map(map: &HeaderMap) -> Self {
        let mut headers = Vec::with_capacity(map.keys_len());
        let mut size: i64 = 2;

        for name in map.keys() {
            let values = map.get_all(name);
            let count = values.iter().count();
            let value_len: usize = values.iter().map(|v| v.as_bytes().len()).sum::<usize>()
                + count.saturating_sub(1);
            size += (name.as_str().len() + 2 + value_len + 2) as i64;

            let text: Vec<String> = values
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            headers.push(Header::new(name.as_str(), text.join(" ")));
        }

        let first = |name: HeaderName| {
            map.get(name)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .unwrap_or_default()
        };

        Self {
            headers,
            size,
            mime_type: first(CONTENT_TYPE),
            location: first(LOCATION),
        }
    }
}

fn version_string(version: Version) -> String {
    // `Version`'s Debug output is the protocol token, e.g. "HTTP/1.1"
    format!("{:?}", version)
}

/// Response text as HAR wants it: UTF-8 verbatim, anything else base64
fn content_text(bytes: &[u8]) -> (String, Option<String>) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), None),
        Err(_) => (STANDARD.encode(bytes), Some("base64".to_string())),
    }
}

async fn peek_request_body(slot: &mut Option<Body>) -> Option<Bytes> {
    let body = slot.take()?;

    if let Some(bytes) = body.as_bytes().map(Bytes::copy_from_slice) {
        *slot = Some(body);
        return Some(bytes);
    }

    match drain(body).await {
        Drained::Complete(bytes) => {
            *slot = Some(Body::from(bytes.clone()));
            Some(bytes)
        }
        Drained::Failed { chunks, error } => {
            debug!(error = %error, "request body unavailable for capture");
            *slot = Some(replay_body(chunks, error));
            None
        }
    }
}

enum Drained<E> {
    Complete(Bytes),
    Failed { chunks: Vec<Bytes>, error: E },
}

async fn drain<B>(mut body: B) -> Drained<B::Error>
where
    B: HttpBody<Data = Bytes> + Unpin,
{
    let mut chunks = Vec::new();

    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                // Trailers carry no body bytes
                if let Ok(data) = frame.into_data() {
                    chunks.push(data);
                }
            }
            Err(error) => return Drained::Failed { chunks, error },
        }
    }

    let bytes = match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.remove(0),
        _ => Bytes::from(chunks.concat()),
    };
    Drained::Complete(bytes)
}

/// A body that yields the chunks read before a failure, then the failure
fn replay_body(chunks: Vec<Bytes>, error: reqwest::Error) -> Body {
    let items = chunks
        .into_iter()
        .map(Ok)
        .chain(std::iter::once(Err(error)));
    Body::wrap_stream(futures::stream::iter(items))
}

fn rebuild_response(mut parts: http::response::Parts, body: Body, url: Url) -> reqwest::Response {
    // The URL travels as a response extension; without it reqwest would
    // substitute a placeholder.
    match http::Response::builder().url(url).body(()) {
        Ok(carrier) => parts.extensions.extend(carrier.into_parts().0.extensions),
        Err(err) => debug!(error = %err, "could not carry response URL"),
    }
    reqwest::Response::from(http::Response::from_parts(parts, body))
}
