use hudsucker::{
    decode_request,
    decode_response,
    hyper::{
        body::Bytes,
        header::{CONTENT_ENCODING, CONTENT_LENGTH, TRANSFER_ENCODING},
        Body,
        Method,
        Request,
        Response,
        StatusCode,
        self
    }
};
use http::{HeaderMap, HeaderValue};

use crate::utils::MidnightError;

pub(crate) fn is_body_method(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

pub(crate) fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
}

/// Body-bearing method with a positive declared length
pub(crate) fn carries_body(method: &Method, headers: &HeaderMap) -> bool {
    is_body_method(method) && declared_length(headers).map_or(false, |len| len > 0)
}

/// Statuses whose responses never have a body, whatever the method was
pub(crate) fn bodyless_status(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

/// Makes framing headers describe a body of `len` bytes that is sent in one piece
pub(crate) fn set_framing(headers: &mut HeaderMap, len: usize) {
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
}

pub(crate) async fn read_body(body: Body) -> Result<Bytes, MidnightError> {
    Ok(hyper::body::to_bytes(body).await?)
}

/// Plain bytes of a possibly content-encoded request body. `None` when the encoding is
/// unknown or the data does not decode.
pub(crate) async fn plain_request_body(headers: &HeaderMap, raw: &Bytes) -> Option<Bytes> {
    if !headers.contains_key(CONTENT_ENCODING) {
        return Some(raw.clone());
    }

    let mut probe = Request::new(Body::from(raw.clone()));
    *probe.headers_mut() = headers.clone();
    let decoded = decode_request(probe).ok()?;
    hyper::body::to_bytes(decoded.into_body()).await.ok()
}

pub(crate) async fn plain_response_body(headers: &HeaderMap, raw: &Bytes) -> Option<Bytes> {
    if !headers.contains_key(CONTENT_ENCODING) {
        return Some(raw.clone());
    }

    let mut probe = Response::new(Body::from(raw.clone()));
    *probe.headers_mut() = headers.clone();
    let decoded = decode_response(probe).ok()?;
    hyper::body::to_bytes(decoded.into_body()).await.ok()
}

pub(crate) fn bad_gateway() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}

// ---------------------------------------------------------------------------------------------- //

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn body_gate_needs_method_and_positive_length() {
        let mut headers = HeaderMap::new();
        assert!(!carries_body(&Method::POST, &headers));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(!carries_body(&Method::POST, &headers));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("7"));
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            assert!(carries_body(&method, &headers), "{}", method);
        }
        for method in [Method::GET, Method::HEAD, Method::OPTIONS, Method::CONNECT] {
            assert!(!carries_body(&method, &headers), "{}", method);
        }

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("seven"));
        assert!(!carries_body(&Method::POST, &headers));
    }

    #[test]
    fn framing_replaces_chunked_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        set_framing(&mut headers, 9);

        assert!(headers.get(TRANSFER_ENCODING).is_none());
        assert_eq!(declared_length(&headers), Some(9));
    }

    #[test]
    fn bodyless_statuses() {
        assert!(bodyless_status(StatusCode::NO_CONTENT));
        assert!(bodyless_status(StatusCode::NOT_MODIFIED));
        assert!(bodyless_status(StatusCode::CONTINUE));
        assert!(!bodyless_status(StatusCode::OK));
        assert!(!bodyless_status(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn gzip_response_body_is_decoded_for_inspection() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(br#"{"a":1}"#).unwrap();
        let raw = Bytes::from(encoder.finish().unwrap());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(raw.len()));

        let plain = plain_response_body(&headers, &raw).await.unwrap();
        assert_eq!(&plain[..], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn unknown_encoding_is_not_inspectable() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("x-custom"));

        let raw = Bytes::from_static(b"opaque");
        assert!(plain_response_body(&headers, &raw).await.is_none());
        assert!(plain_request_body(&headers, &raw).await.is_none());

        let plain = plain_request_body(&HeaderMap::new(), &raw).await.unwrap();
        assert_eq!(plain, raw);
    }
}
