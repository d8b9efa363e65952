//! Conversions between [`Metadata`] header lists and `http` heads, and
//! between `h2` errors and [`TransportError`].
//!
//! Pseudo-headers travel in the `http` request/response head; everything
//! else maps one to one onto a [`HeaderMap`].

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode, Uri};

use grpcore_transport_traits::{Metadata, TransportError};

/// Build the request head a client sends when opening a stream.
pub(crate) fn request_from_metadata(metadata: &Metadata) -> Result<Request<()>, TransportError> {
    let method = metadata.get(":method").unwrap_or("POST");
    let scheme = metadata.get(":scheme").unwrap_or("http");
    let path = metadata
        .get(":path")
        .ok_or_else(|| TransportError::ProtocolError("missing :path".to_string()))?;

    let mut uri = Uri::builder().scheme(scheme).path_and_query(path);
    if let Some(authority) = metadata.get(":authority") {
        uri = uri.authority(authority);
    }
    let uri = uri.build().map_err(protocol_error)?;
    let method = Method::from_bytes(method.as_bytes()).map_err(protocol_error)?;

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(())
        .map_err(protocol_error)?;
    *request.headers_mut() = header_map(metadata)?;
    Ok(request)
}

/// Build the response head a server sends.
pub(crate) fn response_from_metadata(metadata: &Metadata) -> Result<Response<()>, TransportError> {
    let status = match metadata.get(":status") {
        Some(code) => code
            .parse::<u16>()
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| TransportError::ProtocolError(format!("invalid :status {code}")))?,
        None => StatusCode::OK,
    };
    let mut response = Response::new(());
    *response.status_mut() = status;
    *response.headers_mut() = header_map(metadata)?;
    Ok(response)
}

/// Non-pseudo entries as a header map, in order.
pub(crate) fn header_map(metadata: &Metadata) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::with_capacity(metadata.len());
    for (key, value) in metadata.regular() {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(protocol_error)?;
        let value = HeaderValue::from_str(value).map_err(protocol_error)?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// The request head as the server's first inbound header block.
pub(crate) fn metadata_from_request(parts: &http::request::Parts) -> Metadata {
    let mut metadata = Metadata::with_capacity(parts.headers.len() + 4);
    metadata.append(":method", parts.method.as_str());
    metadata.append(":scheme", parts.uri.scheme_str().unwrap_or("http"));
    if let Some(authority) = parts.uri.authority() {
        metadata.append(":authority", authority.as_str());
    }
    metadata.append(
        ":path",
        parts.uri.path_and_query().map_or("/", |p| p.as_str()),
    );
    append_headers(&mut metadata, &parts.headers);
    metadata
}

/// The response head as the client's first inbound header block.
pub(crate) fn metadata_from_response(parts: &http::response::Parts) -> Metadata {
    let mut metadata = Metadata::with_capacity(parts.headers.len() + 1);
    metadata.append(":status", parts.status.as_str());
    append_headers(&mut metadata, &parts.headers);
    metadata
}

/// A trailing header block.
pub(crate) fn metadata_from_headers(headers: &HeaderMap) -> Metadata {
    let mut metadata = Metadata::with_capacity(headers.len());
    append_headers(&mut metadata, headers);
    metadata
}

fn append_headers(metadata: &mut Metadata, headers: &HeaderMap) {
    for (name, value) in headers {
        metadata.append(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
}

/// Classify an `h2` error: stream resets stay per-stream, I/O failures and
/// GOAWAY end the connection.
pub(crate) fn from_h2(err: h2::Error) -> TransportError {
    if err.is_io() || err.is_go_away() {
        TransportError::ConnectionLost(err.to_string())
    } else if err.is_reset() {
        TransportError::StreamReset(err.to_string())
    } else {
        TransportError::ProtocolError(err.to_string())
    }
}

fn protocol_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::ProtocolError(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_headers() -> Metadata {
        [
            (":method", "POST"),
            (":scheme", "http"),
            (":path", "/helloworld.Greeter/SayHello"),
            (":authority", "localhost:50051"),
            ("content-type", "application/grpc"),
            ("te", "trailers"),
            ("x-user", "alice"),
            ("x-user", "bob"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_request_head() {
        let request = request_from_metadata(&call_headers()).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(
            request.uri().to_string(),
            "http://localhost:50051/helloworld.Greeter/SayHello"
        );
        assert!(request.headers().get(":path").is_none());
        let users: Vec<_> = request.headers().get_all("x-user").iter().collect();
        assert_eq!(users, ["alice", "bob"]);
    }

    #[test]
    fn test_request_head_round_trip() {
        let (parts, ()) = request_from_metadata(&call_headers()).unwrap().into_parts();
        let metadata = metadata_from_request(&parts);

        assert_eq!(metadata.get(":path"), Some("/helloworld.Greeter/SayHello"));
        assert_eq!(metadata.get(":authority"), Some("localhost:50051"));
        assert_eq!(metadata.get("content-type"), Some("application/grpc"));
        assert_eq!(metadata.get_all("x-user").count(), 2);
        assert_eq!(metadata.iter().next(), Some((":method", "POST")));
    }

    #[test]
    fn test_missing_path() {
        let metadata: Metadata = [(":method", "POST")].into_iter().collect();
        assert!(matches!(
            request_from_metadata(&metadata),
            Err(TransportError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_response_head() {
        let metadata: Metadata = [(":status", "404"), ("grpc-status", "12")]
            .into_iter()
            .collect();
        let (parts, ()) = response_from_metadata(&metadata).unwrap().into_parts();
        assert_eq!(parts.status, StatusCode::NOT_FOUND);

        let back = metadata_from_response(&parts);
        assert_eq!(back.iter().next(), Some((":status", "404")));
        assert_eq!(back.get("grpc-status"), Some("12"));
    }

    #[test]
    fn test_response_defaults_to_ok() {
        let response = response_from_metadata(&Metadata::new()).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_invalid_header_name() {
        let metadata: Metadata = [("bad header", "x")].into_iter().collect();
        assert!(header_map(&metadata).is_err());

        let metadata: Metadata = [(":status", "abc")].into_iter().collect();
        assert!(response_from_metadata(&metadata).is_err());
    }
}
