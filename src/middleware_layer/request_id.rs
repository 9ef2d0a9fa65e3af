use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{HeaderValue, Request, request::Parts},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;

use crate::models::context::CorrelationId;

/// The header carrying the correlation id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Accepts a caller-supplied id only if it is short, visible ASCII.
fn inbound_request_id(request: &Request<Body>) -> Option<CorrelationId> {
    let value = request.headers().get(REQUEST_ID_HEADER)?.to_str().ok()?;
    let well_formed = !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value.bytes().all(|b| b.is_ascii_graphic());
    well_formed.then(|| CorrelationId::new(value))
}

/// Attaches a [`CorrelationId`] to every request and echoes it on the response.
pub async fn assign_correlation_id(mut request: Request<Body>, next: Next) -> Response {
    let id = inbound_request_id(&request).unwrap_or_else(CorrelationId::generate);
    request.extensions_mut().insert(id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

impl<S: Send + Sync> FromRequestParts<S> for CorrelationId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<CorrelationId>()
            .cloned()
            .unwrap_or_else(CorrelationId::generate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(value: &str) -> Request<Body> {
        Request::builder()
            .header(REQUEST_ID_HEADER, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn accepts_well_formed_ids() {
        let id = inbound_request_id(&request_with("req-123")).unwrap();
        assert_eq!(id.as_str(), "req-123");
    }

    #[test]
    fn rejects_oversized_or_odd_ids() {
        assert!(inbound_request_id(&request_with(&"a".repeat(200))).is_none());
        assert!(inbound_request_id(&request_with("has space")).is_none());
        assert!(inbound_request_id(&Request::new(Body::empty())).is_none());
    }
}
