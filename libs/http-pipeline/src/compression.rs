//! Transparent request/response body compression.
//!
//! Request bodies at or above the configured threshold are encoded with the
//! first enabled encoding. Responses carrying a recognized `Content-Encoding`
//! are decoded in place, with the decoded size capped by `max_decoded_size`
//! to guard against decompression bombs.

use crate::error::CodecError;
use crate::request::Request;
use crate::response::Response;
use bytes::Bytes;
use flate2::Compression;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue};
use http::HeaderMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Default decoded-size cap (10 MB)
pub const DEFAULT_MAX_DECODED_SIZE: usize = 10 * 1024 * 1024;

/// Supported content codings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Gzip,
    /// zlib-wrapped deflate (RFC 1950); raw deflate is accepted when decoding
    Deflate,
}

impl Encoding {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }

    /// Recognize a `Content-Encoding` value (`gzip`, `x-gzip`, `deflate`)
    #[must_use]
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("gzip") || value.eq_ignore_ascii_case("x-gzip") {
            Some(Self::Gzip)
        } else if value.eq_ignore_ascii_case("deflate") {
            Some(Self::Deflate)
        } else {
            None
        }
    }

    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::from_header)
    }
}

/// Compression negotiation policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    /// Encodings in preference order; the first one is used for requests.
    /// Empty disables request compression.
    pub enabled_types: Vec<Encoding>,
    /// flate2 level, `0..=9` (default: 6)
    pub compression_level: u32,
    /// Minimum body size in bytes before a request is compressed (default: 1024)
    pub threshold: usize,
    /// Maximum decoded response size in bytes (default: 10 MB)
    pub max_decoded_size: usize,
    /// Leave bodies that start with a gzip or zlib header alone (default: false).
    ///
    /// Only enable this when callers hand over pre-compressed payloads without
    /// setting `Content-Encoding`; plain text can carry a zlib-like prefix.
    pub skip_precompressed: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled_types: vec![Encoding::Gzip, Encoding::Deflate],
            compression_level: 6,
            threshold: 1024,
            max_decoded_size: DEFAULT_MAX_DECODED_SIZE,
            skip_precompressed: false,
        }
    }
}

impl CompressionConfig {
    /// Never compress requests; responses are still decoded
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled_types: Vec::new(),
            ..Default::default()
        }
    }
}

/// Cumulative compression metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressionStats {
    pub requests_compressed: u64,
    pub responses_decompressed: u64,
    pub request_bytes_saved: u64,
    pub response_bytes_saved: u64,
    /// Running mean of per-operation `compressed / original` ratios
    pub average_ratio: f64,
}

impl CompressionStats {
    #[allow(clippy::cast_precision_loss)]
    fn record_ratio(&mut self, ratio: f64) {
        let samples = self.requests_compressed + self.responses_decompressed;
        if samples == 0 {
            return;
        }
        self.average_ratio += (ratio - self.average_ratio) / samples as f64;
    }
}

/// `compressed / original`; reported even when `>= 1.0`. An empty original
/// yields `1.0`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        return 1.0;
    }
    compressed as f64 / original as f64
}

/// Percentage of bytes saved: `(1 - ratio) * 100`
#[must_use]
pub fn savings(original: usize, compressed: usize) -> f64 {
    (1.0 - compression_ratio(original, compressed)) * 100.0
}

/// Whether `data` starts with a gzip or zlib header.
///
/// zlib is recognized by CMF `0x78` (deflate, 32K window), a valid FCHECK
/// (`(CMF << 8 | FLG) % 31 == 0`) and no preset dictionary.
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    let [b0, b1, ..] = *data else {
        return false;
    };
    if b0 == 0x1f && b1 == 0x8b {
        return true;
    }
    let fdict = b1 & 0x20 != 0;
    b0 == 0x78 && !fdict && ((u16::from(b0) << 8) | u16::from(b1)) % 31 == 0
}

/// Encode `data` in one shot.
///
/// # Errors
/// Returns [`CodecError::Io`] if the encoder fails.
pub fn encode(encoding: Encoding, data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
    let level = Compression::new(level.min(9));
    let io_err = |source| CodecError::Io {
        encoding: encoding.as_str(),
        source,
    };
    match encoding {
        Encoding::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(Vec::with_capacity(data.len()), level);
            encoder.write_all(data).map_err(io_err)?;
            encoder.finish().map_err(io_err)
        }
        Encoding::Deflate => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::with_capacity(data.len()), level);
            encoder.write_all(data).map_err(io_err)?;
            encoder.finish().map_err(io_err)
        }
    }
}

/// Decode `data` in one shot, refusing output larger than `limit`.
///
/// # Errors
/// Returns [`CodecError::TooLarge`] when the decoded size exceeds `limit`, or
/// [`CodecError::Io`] for corrupt input.
pub fn decode(encoding: Encoding, data: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::Gzip => read_limited(flate2::read::MultiGzDecoder::new(data), encoding, limit),
        Encoding::Deflate if is_compressed(data) => {
            read_limited(flate2::read::ZlibDecoder::new(data), encoding, limit)
        }
        Encoding::Deflate => read_limited(flate2::read::DeflateDecoder::new(data), encoding, limit),
    }
}

fn read_limited<R: Read>(
    reader: R,
    encoding: Encoding,
    limit: usize,
) -> Result<Vec<u8>, CodecError> {
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut out = Vec::new();
    reader
        .take(cap)
        .read_to_end(&mut out)
        .map_err(|source| CodecError::Io {
            encoding: encoding.as_str(),
            source,
        })?;
    if out.len() > limit {
        return Err(CodecError::TooLarge {
            encoding: encoding.as_str(),
            limit,
        });
    }
    Ok(out)
}

/// Body compressor owned by a client.
///
/// Configuration may be swapped at runtime; statistics accumulate for the
/// lifetime of the compressor.
#[derive(Debug, Default)]
pub struct Compressor {
    config: RwLock<CompressionConfig>,
    stats: Mutex<CompressionStats>,
}

impl Compressor {
    #[must_use]
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            config: RwLock::new(config),
            stats: Mutex::new(CompressionStats::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> CompressionConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: CompressionConfig) {
        *self.config.write() = config;
    }

    /// Snapshot of the cumulative statistics
    #[must_use]
    pub fn stats(&self) -> CompressionStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = CompressionStats::default();
    }

    /// Compress the request body in place when policy allows.
    ///
    /// No-op (returns `Ok(None)`) when no encoding is enabled, the request
    /// already carries `Content-Encoding` or the body is below the threshold.
    /// With `skip_precompressed` set, bodies that look compressed are skipped
    /// as well.
    ///
    /// # Errors
    /// Returns [`CodecError`] only on a real encoder failure.
    pub fn compress_request(&self, request: &mut Request) -> Result<Option<Encoding>, CodecError> {
        let (encoding, level, threshold, skip_precompressed) = {
            let config = self.config.read();
            let Some(encoding) = config.enabled_types.first().copied() else {
                return Ok(None);
            };
            (
                encoding,
                config.compression_level,
                config.threshold,
                config.skip_precompressed,
            )
        };

        if request.headers().contains_key(CONTENT_ENCODING) {
            return Ok(None);
        }
        let Some(body) = request.body().as_bytes() else {
            return Ok(None);
        };
        if body.is_empty() || body.len() < threshold {
            return Ok(None);
        }
        if skip_precompressed && is_compressed(body) {
            return Ok(None);
        }

        let original = body.len();
        let compressed = encode(encoding, body, level)?;
        let compressed_len = compressed.len();

        request.replace_body_bytes(Bytes::from(compressed));
        let headers = request.headers_mut();
        headers.insert(
            CONTENT_ENCODING,
            HeaderValue::from_static(encoding.as_str()),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from(compressed_len));

        let mut stats = self.stats.lock();
        stats.requests_compressed += 1;
        stats.request_bytes_saved += original.saturating_sub(compressed_len) as u64;
        stats.record_ratio(compression_ratio(original, compressed_len));
        drop(stats);

        tracing::trace!(
            encoding = encoding.as_str(),
            original,
            compressed = compressed_len,
            "request body compressed"
        );
        Ok(Some(encoding))
    }

    /// Decode the response body in place when `Content-Encoding` is recognized.
    ///
    /// On success `Content-Encoding` is removed and `Content-Length` equals the
    /// decoded length. Absent or unrecognized encodings leave the response
    /// untouched.
    ///
    /// # Errors
    /// Returns [`CodecError::TooLarge`] above `max_decoded_size`, or
    /// [`CodecError::Io`] for a corrupt body.
    pub fn decompress_response(
        &self,
        response: &mut Response,
    ) -> Result<Option<Encoding>, CodecError> {
        let Some(encoding) = Encoding::from_headers(response.headers()) else {
            return Ok(None);
        };
        if response.body().is_empty() {
            // HEAD, 204 and 304 responses keep the header but carry no body
            let headers = response.headers_mut();
            headers.remove(CONTENT_ENCODING);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(0_usize));
            return Ok(None);
        }
        let limit = self.config.read().max_decoded_size;

        let encoded_len = response.body().len();
        let decoded = decode(encoding, response.body(), limit)?;
        let decoded_len = decoded.len();

        response.set_body(Bytes::from(decoded));
        let headers = response.headers_mut();
        headers.remove(CONTENT_ENCODING);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(decoded_len));

        let mut stats = self.stats.lock();
        stats.responses_decompressed += 1;
        stats.response_bytes_saved += decoded_len.saturating_sub(encoded_len) as u64;
        stats.record_ratio(compression_ratio(decoded_len, encoded_len));
        drop(stats);

        Ok(Some(encoding))
    }

    /// Incremental decoder for a streamed body, if its encoding is recognized
    #[must_use]
    pub fn stream_decoder(&self, headers: &HeaderMap) -> Option<StreamDecoder> {
        let encoding = Encoding::from_headers(headers)?;
        Some(StreamDecoder::new(encoding, self.config.read().max_decoded_size))
    }
}

enum DecoderState {
    Gzip(flate2::write::GzDecoder<Vec<u8>>),
    Zlib(flate2::write::ZlibDecoder<Vec<u8>>),
    Raw(flate2::write::DeflateDecoder<Vec<u8>>),
    /// Deflate stream whose framing (zlib or raw) is decided on the first chunk
    PendingDeflate,
}

/// Incremental body decoder used by the stream engine.
///
/// Each call returns the bytes decoded from that chunk; the output buffer is
/// reused between chunks.
pub struct StreamDecoder {
    encoding: Encoding,
    state: DecoderState,
    limit: usize,
    decoded: usize,
}

impl StreamDecoder {
    #[must_use]
    pub fn new(encoding: Encoding, limit: usize) -> Self {
        let state = match encoding {
            Encoding::Gzip => DecoderState::Gzip(flate2::write::GzDecoder::new(Vec::new())),
            Encoding::Deflate => DecoderState::PendingDeflate,
        };
        Self {
            encoding,
            state,
            limit,
            decoded: 0,
        }
    }

    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Feed one encoded chunk and return the bytes decoded from it.
    ///
    /// # Errors
    /// Returns [`CodecError`] for corrupt input or when the total decoded size
    /// exceeds the limit.
    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Result<&[u8], CodecError> {
        if matches!(self.state, DecoderState::PendingDeflate) {
            if chunk.is_empty() {
                return Ok(&[]);
            }
            self.state = if is_compressed(chunk) || chunk.len() < 2 {
                DecoderState::Zlib(flate2::write::ZlibDecoder::new(Vec::new()))
            } else {
                DecoderState::Raw(flate2::write::DeflateDecoder::new(Vec::new()))
            };
        }

        let encoding = self.encoding.as_str();
        let io_err = |source| CodecError::Io { encoding, source };
        let produced = match &mut self.state {
            DecoderState::Gzip(d) => {
                d.get_mut().clear();
                d.write_all(chunk).map_err(io_err)?;
                d.flush().map_err(io_err)?;
                d.get_ref().len()
            }
            DecoderState::Zlib(d) => {
                d.get_mut().clear();
                d.write_all(chunk).map_err(io_err)?;
                d.flush().map_err(io_err)?;
                d.get_ref().len()
            }
            DecoderState::Raw(d) => {
                d.get_mut().clear();
                d.write_all(chunk).map_err(io_err)?;
                d.flush().map_err(io_err)?;
                d.get_ref().len()
            }
            DecoderState::PendingDeflate => 0,
        };
        self.account(produced)?;
        Ok(self.output())
    }

    /// Flush any trailing output once the encoded stream has ended.
    ///
    /// # Errors
    /// Returns [`CodecError`] if the stream is truncated or the limit is hit.
    pub fn finish(&mut self) -> Result<&[u8], CodecError> {
        let encoding = self.encoding.as_str();
        let io_err = |source| CodecError::Io { encoding, source };
        let produced = match &mut self.state {
            DecoderState::Gzip(d) => {
                d.get_mut().clear();
                d.try_finish().map_err(io_err)?;
                d.get_ref().len()
            }
            DecoderState::Zlib(d) => {
                d.get_mut().clear();
                d.try_finish().map_err(io_err)?;
                d.get_ref().len()
            }
            DecoderState::Raw(d) => {
                d.get_mut().clear();
                d.try_finish().map_err(io_err)?;
                d.get_ref().len()
            }
            DecoderState::PendingDeflate => 0,
        };
        self.account(produced)?;
        Ok(self.output())
    }

    fn account(&mut self, produced: usize) -> Result<(), CodecError> {
        self.decoded = self.decoded.saturating_add(produced);
        if self.decoded > self.limit {
            return Err(CodecError::TooLarge {
                encoding: self.encoding.as_str(),
                limit: self.limit,
            });
        }
        Ok(())
    }

    fn output(&self) -> &[u8] {
        match &self.state {
            DecoderState::Gzip(d) => d.get_ref(),
            DecoderState::Zlib(d) => d.get_ref(),
            DecoderState::Raw(d) => d.get_ref(),
            DecoderState::PendingDeflate => &[],
        }
    }
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("encoding", &self.encoding)
            .field("limit", &self.limit)
            .field("decoded", &self.decoded)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::request::RequestBody;
    use http::{Method, StatusCode};

    fn compressible(len: usize) -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog. "
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect()
    }

    fn post(body: Vec<u8>) -> Request {
        let mut request = Request::new(Method::POST, "https://api.test/upload").unwrap();
        request.set_body(RequestBody::from(body));
        request
    }

    fn encoded_response(encoding: &'static str, body: Vec<u8>) -> Response {
        let http_resp = http::Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_ENCODING, encoding)
            .header(CONTENT_LENGTH, body.len().to_string())
            .body(Bytes::from(body))
            .unwrap();
        Response::from_http(Method::GET, "https://api.test/".to_owned(), http_resp)
    }

    #[test]
    fn test_below_threshold_untouched() {
        let compressor = Compressor::default();
        let body = compressible(1023);
        let mut request = post(body.clone());

        assert_eq!(compressor.compress_request(&mut request).unwrap(), None);
        assert_eq!(request.body().as_bytes().unwrap().as_ref(), body.as_slice());
        assert!(!request.headers().contains_key(CONTENT_ENCODING));
        assert_eq!(compressor.stats().requests_compressed, 0);
    }

    #[test]
    fn test_roundtrip_for_every_encoding() {
        for encoding in [Encoding::Gzip, Encoding::Deflate] {
            let compressor = Compressor::new(CompressionConfig {
                enabled_types: vec![encoding],
                ..Default::default()
            });
            let body = compressible(4096);
            let mut request = post(body.clone());

            assert_eq!(
                compressor.compress_request(&mut request).unwrap(),
                Some(encoding)
            );
            assert_eq!(request.headers()[CONTENT_ENCODING], encoding.as_str());
            let wire = request.body().as_bytes().unwrap().to_vec();
            assert!(wire.len() < body.len());
            assert!(is_compressed(&wire));

            let mut response = encoded_response(encoding.as_str(), wire);
            assert_eq!(
                compressor.decompress_response(&mut response).unwrap(),
                Some(encoding)
            );
            assert_eq!(response.body().as_ref(), body.as_slice());
            assert!(!response.headers().contains_key(CONTENT_ENCODING));
            assert_eq!(response.headers()[CONTENT_LENGTH], body.len().to_string());
        }
    }

    #[test]
    fn test_existing_content_encoding_skipped() {
        let compressor = Compressor::default();
        let mut request = post(compressible(4096));
        request
            .headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static("br"));
        assert_eq!(compressor.compress_request(&mut request).unwrap(), None);
    }

    #[test]
    fn test_precompressed_body_skipped_only_when_enabled() {
        let gz = encode(Encoding::Gzip, &compressible(8192), 6).unwrap();
        let padded: Vec<u8> = gz.iter().copied().cycle().take(2048).collect();

        let compressor = Compressor::new(CompressionConfig {
            skip_precompressed: true,
            ..Default::default()
        });
        let mut request = post(padded.clone());
        assert_eq!(compressor.compress_request(&mut request).unwrap(), None);

        let mut request = post(padded);
        assert_eq!(
            Compressor::default().compress_request(&mut request).unwrap(),
            Some(Encoding::Gzip)
        );
    }

    #[test]
    fn test_text_with_zlib_like_prefix_is_compressed() {
        let body: Vec<u8> = b"XGrid layout row; "
            .iter()
            .copied()
            .cycle()
            .take(4096)
            .collect();
        let compressor = Compressor::default();
        let mut request = post(body.clone());

        assert_eq!(
            compressor.compress_request(&mut request).unwrap(),
            Some(Encoding::Gzip)
        );
        assert_eq!(request.headers()[CONTENT_ENCODING], "gzip");

        let wire = request.body().as_bytes().unwrap().to_vec();
        let mut response = encoded_response("gzip", wire);
        compressor.decompress_response(&mut response).unwrap();
        assert_eq!(response.body().as_ref(), body.as_slice());
    }

    #[test]
    fn test_empty_encoded_body_is_not_decoded() {
        let compressor = Compressor::default();
        for encoding in ["gzip", "deflate"] {
            let mut response = encoded_response(encoding, Vec::new());
            assert_eq!(compressor.decompress_response(&mut response).unwrap(), None);
            assert!(response.body().is_empty());
            assert!(!response.headers().contains_key(CONTENT_ENCODING));
            assert_eq!(response.headers()[CONTENT_LENGTH], "0");
        }
        assert_eq!(compressor.stats().responses_decompressed, 0);
    }

    #[test]
    fn test_disabled_config_never_compresses() {
        let compressor = Compressor::new(CompressionConfig::disabled());
        let mut request = post(compressible(10_000));
        assert_eq!(compressor.compress_request(&mut request).unwrap(), None);
    }

    #[test]
    fn test_unrecognized_encoding_is_noop() {
        let compressor = Compressor::default();
        let mut response = encoded_response("br", b"opaque".to_vec());
        assert_eq!(compressor.decompress_response(&mut response).unwrap(), None);
        assert_eq!(response.headers()[CONTENT_ENCODING], "br");
    }

    #[test]
    fn test_x_gzip_and_raw_deflate_accepted() {
        let compressor = Compressor::default();
        let body = compressible(2000);

        let gz = encode(Encoding::Gzip, &body, 6).unwrap();
        let mut response = encoded_response("x-gzip", gz);
        assert_eq!(
            compressor.decompress_response(&mut response).unwrap(),
            Some(Encoding::Gzip)
        );
        assert_eq!(response.body().as_ref(), body.as_slice());

        let mut raw = flate2::write::DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(&body).unwrap();
        let mut response = encoded_response("deflate", raw.finish().unwrap());
        compressor.decompress_response(&mut response).unwrap();
        assert_eq!(response.body().as_ref(), body.as_slice());
    }

    #[test]
    fn test_decoded_size_limit() {
        let compressor = Compressor::new(CompressionConfig {
            max_decoded_size: 1024,
            ..Default::default()
        });
        let bomb = encode(Encoding::Gzip, &vec![b'x'; 100 * 1024], 9).unwrap();
        let mut response = encoded_response("gzip", bomb);
        let err = compressor.decompress_response(&mut response).unwrap_err();
        assert!(matches!(err, CodecError::TooLarge { limit: 1024, .. }));
    }

    #[test]
    fn test_corrupt_body_fails() {
        let compressor = Compressor::default();
        let mut response = encoded_response("gzip", b"\x1f\x8bnot really gzip".to_vec());
        let err = compressor.decompress_response(&mut response).unwrap_err();
        assert!(matches!(err, CodecError::Io { .. }));
    }

    #[test]
    fn test_ratio_and_savings() {
        let savings_pct = savings(13, 4);
        assert!((savings_pct - 69.230_769).abs() < 1e-4);
        assert!((compression_ratio(10, 15) - 1.5).abs() < f64::EPSILON);
        assert!((compression_ratio(0, 0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_is_compressed_detection() {
        assert!(is_compressed(&[0x1f, 0x8b, 0x08]));
        assert!(is_compressed(&[0x78, 0x9c]));
        assert!(is_compressed(&[0x78, 0x01]));
        assert!(is_compressed(&[0x78, 0xda]));
        assert!(!is_compressed(b"plain text body"));
        assert!(!is_compressed(b"{\"json\":true}"));
        assert!(!is_compressed(&[0x1f]));
        assert!(!is_compressed(&[]));
        assert!(!is_compressed(b"XGrid"));
        assert!(!is_compressed(b"(Sequence"));
        // Valid FCHECK but preset dictionary flag set
        assert!(!is_compressed(&[0x78, 0xbb]));
    }

    #[test]
    fn test_stats_running_mean() {
        let compressor = Compressor::new(CompressionConfig {
            threshold: 0,
            ..Default::default()
        });
        let mut a = post(compressible(4096));
        let mut b = post(compressible(8192));
        compressor.compress_request(&mut a).unwrap();
        compressor.compress_request(&mut b).unwrap();

        let ra = compression_ratio(4096, a.body().len());
        let rb = compression_ratio(8192, b.body().len());
        let stats = compressor.stats();
        assert_eq!(stats.requests_compressed, 2);
        assert!((stats.average_ratio - (ra + rb) / 2.0).abs() < 1e-9);
        assert_eq!(
            stats.request_bytes_saved,
            (4096 - a.body().len() + 8192 - b.body().len()) as u64
        );

        compressor.reset_stats();
        assert_eq!(compressor.stats(), CompressionStats::default());
    }

    #[test]
    fn test_stream_decoder_across_chunk_boundaries() {
        for encoding in [Encoding::Gzip, Encoding::Deflate] {
            let body = compressible(20_000);
            let wire = encode(encoding, &body, 6).unwrap();
            let mut decoder = StreamDecoder::new(encoding, DEFAULT_MAX_DECODED_SIZE);

            let mut out = Vec::new();
            for chunk in wire.chunks(97) {
                out.extend_from_slice(decoder.decode_chunk(chunk).unwrap());
            }
            out.extend_from_slice(decoder.finish().unwrap());
            assert_eq!(out, body);
        }
    }

    #[test]
    fn test_stream_decoder_limit() {
        let wire = encode(Encoding::Gzip, &vec![0_u8; 64 * 1024], 9).unwrap();
        let mut decoder = StreamDecoder::new(Encoding::Gzip, 1000);
        let mut failed = false;
        for chunk in wire.chunks(16) {
            if decoder.decode_chunk(chunk).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed || decoder.finish().is_err());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: CompressionConfig =
            serde_json::from_str(r#"{"enabled_types":["deflate"],"threshold":64}"#).unwrap();
        assert_eq!(config.enabled_types, vec![Encoding::Deflate]);
        assert_eq!(config.threshold, 64);
        assert_eq!(config.compression_level, 6);

        assert!(serde_json::from_str::<CompressionConfig>(r#"{"level":3}"#).is_err());
    }
}
