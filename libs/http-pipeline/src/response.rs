use crate::error::PipelineError;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, SystemTime};

/// Maximum number of body bytes quoted in [`PipelineError::HttpStatus`]
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Parse `Retry-After` header value into a `Duration`.
///
/// Supports the delay-seconds form ("120") and the HTTP-date form
/// ("Wed, 21 Oct 2015 07:28:00 GMT"). Returns `None` when the header is missing,
/// unparseable, negative or already in the past.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds.cast_unsigned()));
    }

    let parsed = httpdate::parse_http_date(trimmed).ok()?;
    parsed.duration_since(SystemTime::now()).ok()
}

/// Buffered response returned by the pipeline.
///
/// The body has already been through the compressor: when the provider sent a
/// recognized `Content-Encoding`, the bytes here are decoded and the header is
/// gone.
#[derive(Debug, Clone)]
pub struct Response {
    method: Method,
    target: String,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub(crate) fn from_http(
        method: Method,
        target: String,
        response: http::Response<Bytes>,
    ) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            method,
            target,
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// Method of the request that produced this response
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL of the request that produced this response
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Check status and return error for non-2xx responses
    ///
    /// # Errors
    /// Returns `PipelineError::HttpStatus` with a lossy UTF-8 preview of the
    /// body if the status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, PipelineError> {
        if self.status.is_success() {
            return Ok(self);
        }
        let preview_len = self.body.len().min(ERROR_BODY_PREVIEW_LIMIT);
        let body_preview = String::from_utf8_lossy(&self.body[..preview_len]).into_owned();
        Err(PipelineError::HttpStatus {
            method: self.method,
            target: self.target,
            status: self.status,
            body_preview,
        })
    }

    /// Consume the response and return the body
    #[must_use]
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Body as text; invalid UTF-8 is replaced with U+FFFD
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON with status check
    ///
    /// # Errors
    /// Returns `PipelineError::HttpStatus` if status is not 2xx, or
    /// `PipelineError::Json` if parsing fails.
    pub fn json<T: DeserializeOwned>(self) -> Result<T, PipelineError> {
        let resp = self.error_for_status()?;
        serde_json::from_slice(&resp.body).map_err(|source| PipelineError::Json {
            method: resp.method,
            target: resp.target,
            source,
        })
    }

    /// Convert back into an `http::Response`
    #[must_use]
    pub fn into_http(self) -> http::Response<Bytes> {
        let mut response = http::Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn response(status: u16, body: &'static [u8]) -> Response {
        let http_resp = http::Response::builder()
            .status(status)
            .body(Bytes::from_static(body))
            .unwrap();
        Response::from_http(Method::GET, "https://api.test/x".to_owned(), http_resp)
    }

    #[test]
    fn test_error_for_status() {
        assert!(response(200, b"ok").error_for_status().is_ok());
        assert!(response(204, b"").error_for_status().is_ok());

        let err = response(503, b"down for maintenance")
            .error_for_status()
            .unwrap_err();
        match err {
            PipelineError::HttpStatus {
                status,
                body_preview,
                ref target,
                ..
            } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body_preview, "down for maintenance");
                assert_eq!(target, "https://api.test/x");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_json_checks_status() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Item {
            id: u32,
        }

        let item: Item = response(200, br#"{"id":5}"#).json().unwrap();
        assert_eq!(item, Item { id: 5 });

        let err = response(404, br#"{"id":5}"#).json::<Item>().unwrap_err();
        assert!(matches!(err, PipelineError::HttpStatus { .. }));

        let err = response(200, b"not json").json::<Item>().unwrap_err();
        assert!(matches!(err, PipelineError::Json { .. }));
        assert!(err.operation().is_some());
    }

    #[test]
    fn test_text_is_lossy() {
        assert_eq!(response(200, b"hi \xff").text(), "hi \u{fffd}");
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));

        headers.insert(http::header::RETRY_AFTER, HeaderValue::from_static("-1"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(http::header::RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let future = SystemTime::now() + Duration::from_secs(3600);
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::RETRY_AFTER,
            HeaderValue::from_str(&httpdate::fmt_http_date(future)).unwrap(),
        );
        let parsed = parse_retry_after(&headers).unwrap();
        assert!(parsed > Duration::from_secs(3500));

        headers.insert(
            http::header::RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }
}
