//! Content-encoding transparency for recorded bodies.
//!
//! Rules always see decoded bytes. The recorded body is decoded once before
//! the first matching rule and the final body is encoded once on emission,
//! as long as `Content-Encoding` still names a supported codec.

use std::io::{self, Read, Write};

use axum::http::{header::CONTENT_ENCODING, HeaderMap};
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use thiserror::Error;

/// Supported `Content-Encoding` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    /// HTTP `deflate`, i.e. zlib-wrapped deflate.
    Deflate,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported content encoding `{0}`")]
    Unsupported(String),

    #[error("failed to decode {encoding:?} body: {source}")]
    Decode {
        encoding: ContentEncoding,
        #[source]
        source: io::Error,
    },

    #[error("decoded {encoding:?} body exceeds {limit} bytes")]
    TooLarge { encoding: ContentEncoding, limit: usize },

    #[error("failed to encode {encoding:?} body: {source}")]
    Encode {
        encoding: ContentEncoding,
        #[source]
        source: io::Error,
    },
}

impl ContentEncoding {
    /// Reads the encoding named by `Content-Encoding`.
    ///
    /// Returns `Ok(None)` when the header is absent or names `identity`.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, CodecError> {
        let Some(value) = headers.get(CONTENT_ENCODING) else {
            return Ok(None);
        };
        let value = String::from_utf8_lossy(value.as_bytes()).trim().to_ascii_lowercase();
        match value.as_str() {
            "" | "identity" => Ok(None),
            "gzip" | "x-gzip" => Ok(Some(ContentEncoding::Gzip)),
            "deflate" => Ok(Some(ContentEncoding::Deflate)),
            _ => Err(CodecError::Unsupported(value)),
        }
    }

    /// Decodes `body`, refusing output longer than `limit` bytes.
    pub fn decode(self, body: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
        let mut decoded = Vec::with_capacity(body.len().saturating_mul(2).min(limit));
        let bound = (limit as u64).saturating_add(1);
        let result = match self {
            ContentEncoding::Gzip => GzDecoder::new(body).take(bound).read_to_end(&mut decoded),
            ContentEncoding::Deflate => ZlibDecoder::new(body).take(bound).read_to_end(&mut decoded),
        };
        result.map_err(|source| CodecError::Decode { encoding: self, source })?;
        if decoded.len() > limit {
            return Err(CodecError::TooLarge { encoding: self, limit });
        }
        Ok(decoded)
    }

    pub fn encode(self, body: &[u8]) -> Result<Vec<u8>, CodecError> {
        let result = match self {
            ContentEncoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body).and_then(|_| encoder.finish())
            }
            ContentEncoding::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body).and_then(|_| encoder.finish())
            }
        };
        result.map_err(|source| CodecError::Encode { encoding: self, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(encoding: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
        headers
    }

    #[test]
    fn test_from_headers() {
        assert_eq!(ContentEncoding::from_headers(&HeaderMap::new()).unwrap(), None);
        assert_eq!(ContentEncoding::from_headers(&headers_with("identity")).unwrap(), None);
        assert_eq!(
            ContentEncoding::from_headers(&headers_with("GZIP")).unwrap(),
            Some(ContentEncoding::Gzip)
        );
        assert_eq!(
            ContentEncoding::from_headers(&headers_with("x-gzip")).unwrap(),
            Some(ContentEncoding::Gzip)
        );
        assert_eq!(
            ContentEncoding::from_headers(&headers_with("deflate")).unwrap(),
            Some(ContentEncoding::Deflate)
        );
        assert!(matches!(
            ContentEncoding::from_headers(&headers_with("br")),
            Err(CodecError::Unsupported(name)) if name == "br"
        ));
    }

    #[test]
    fn test_decode_restores_encoded_body() {
        for encoding in [ContentEncoding::Gzip, ContentEncoding::Deflate] {
            let encoded = encoding.encode(b"<p>hello</p>").unwrap();
            assert_ne!(encoded.as_slice(), b"<p>hello</p>");
            assert_eq!(encoding.decode(&encoded, 64).unwrap(), b"<p>hello</p>");
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = ContentEncoding::Gzip.decode(b"definitely not gzip", 64).unwrap_err();
        assert!(matches!(err, CodecError::Decode { encoding: ContentEncoding::Gzip, .. }));
    }

    #[test]
    fn test_decode_stops_at_limit() {
        let body = vec![b'a'; 64 * 1024];
        for encoding in [ContentEncoding::Gzip, ContentEncoding::Deflate] {
            let encoded = encoding.encode(&body).unwrap();
            assert!(encoded.len() < 1024);

            let err = encoding.decode(&encoded, 1024).unwrap_err();
            assert!(matches!(err, CodecError::TooLarge { limit: 1024, .. }));
            assert_eq!(encoding.decode(&encoded, body.len()).unwrap(), body);
        }
    }
}
