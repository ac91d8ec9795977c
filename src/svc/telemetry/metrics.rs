//! # Metrics module
//!
//! This module expose the metrics gathered by the prometheus registry

use hyper::{
    header::{self, HeaderValue, InvalidHeaderValue},
    Body, Request, Response, StatusCode,
};
use prometheus::{gather, Encoder, TextEncoder};

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize metrics, {0}")]
    PrometheusSerialize(prometheus::Error),
    #[error("failed to parse header value given by prometheus, {0}")]
    PrometheusInvalidHeader(InvalidHeaderValue),
}

// -----------------------------------------------------------------------------
// Helper methods

/// returns the content type and the text encoding of the gathered metrics
pub fn encode() -> Result<(HeaderValue, Vec<u8>), Error> {
    let encoder = TextEncoder::new();
    let mut buf = vec![];

    encoder
        .encode(&gather(), &mut buf)
        .map_err(Error::PrometheusSerialize)?;

    let content_type =
        HeaderValue::from_str(encoder.format_type()).map_err(Error::PrometheusInvalidHeader)?;

    Ok((content_type, buf))
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn handler(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let (content_type, buf) = encode()?;
    let mut res = Response::default();

    res.headers_mut().insert(header::CONTENT_TYPE, content_type);
    *res.status_mut() = StatusCode::OK;
    *res.body_mut() = Body::from(buf);

    Ok(res)
}
