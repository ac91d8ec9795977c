//! # Telemetry module
//!
//! This module expose the http server of the provider: health probe and, with
//! the `metrics` feature, prometheus metrics

use std::{collections::BTreeMap, convert::Infallible, net::SocketAddr, time::Instant};

use hyper::{
    header::{self, HeaderValue},
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use tracing::{info, warn};

#[cfg(feature = "metrics")]
pub mod metrics;

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static SERVER_REQUEST: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_provider_server_request",
            "number of request handled by the server",
        ),
        &["method", "path", "status"]
    )
    .expect("metrics 'kubernetes_provider_server_request' to not be already registered")
});

#[cfg(feature = "metrics")]
static SERVER_REQUEST_DURATION: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_provider_server_request_duration",
            "duration of request handled by the server",
        ),
        &["method", "path", "status", "unit"]
    )
    .expect("metrics 'kubernetes_provider_server_request_duration' to not be already registered")
});

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[cfg(feature = "metrics")]
    #[error("{0}")]
    Metrics(metrics::Error),
    #[error("failed to bind or serve on '{0}', {1}")]
    Serve(SocketAddr, hyper::Error),
}

// -----------------------------------------------------------------------------
// Helper methods

/// listen on the given address until the future is dropped
#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn serve(addr: SocketAddr) -> Result<(), Error> {
    let builder = Server::try_bind(&addr).map_err(|err| Error::Serve(addr, err))?;

    info!(addr = addr.to_string(), "Begin to listen on address");
    builder
        .serve(make_service_fn(|_conn| async {
            Ok::<_, Infallible>(service_fn(|req| async move {
                Ok::<_, Infallible>(router(req).await)
            }))
        }))
        .await
        .map_err(|err| Error::Serve(addr, err))
}

/// dispatch the request to its handler, errors are answered with an internal
/// server error carrying a json document
pub async fn router(req: Request<Body>) -> Response<Body> {
    let begin = Instant::now();
    let method = req.method().to_owned();
    let path = req.uri().path().to_owned();

    let result = match (&method, path.as_str()) {
        (&Method::GET, "/healthz") => healthz(&req).await,
        #[cfg(feature = "metrics")]
        (&Method::GET, "/metrics") => metrics::handler(&req).await.map_err(Error::Metrics),
        _ => not_found(&req).await,
    };

    let res = result.unwrap_or_else(|err| {
        warn!(
            method = method.as_str(),
            path = &path,
            error = err.to_string(),
            "Could not handle request",
        );

        internal_server_error(&err)
    });

    let duration = begin.elapsed().as_micros();
    info!(
        method = method.as_str(),
        path = &path,
        status = res.status().as_u16(),
        duration = duration as u64,
        "Receive request"
    );

    #[cfg(feature = "metrics")]
    {
        let status = res.status().as_u16().to_string();

        SERVER_REQUEST
            .with_label_values(&[method.as_str(), &path, &status])
            .inc();

        SERVER_REQUEST_DURATION
            .with_label_values(&[method.as_str(), &path, &status, "us"])
            .inc_by(duration as f64);
    }

    res
}

pub fn internal_server_error(err: &Error) -> Response<Body> {
    let map = BTreeMap::from([("error", err.to_string())]);
    let mut res = Response::default();

    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    if let Ok(body) = serde_json::to_string_pretty(&map) {
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        *res.body_mut() = Body::from(body);
    }

    res
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn healthz(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let mut res = Response::default();

    *res.status_mut() = StatusCode::NO_CONTENT;

    Ok(res)
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn not_found(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let mut res = Response::default();

    *res.status_mut() = StatusCode::NOT_FOUND;

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, path: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .expect("request to be built")
    }

    #[tokio::test]
    async fn healthz_answers_no_content() {
        let res = router(request(Method::GET, "/healthz")).await;

        assert_eq!(StatusCode::NO_CONTENT, res.status());
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        assert_eq!(
            StatusCode::NOT_FOUND,
            router(request(Method::GET, "/providers")).await.status()
        );
        assert_eq!(
            StatusCode::NOT_FOUND,
            router(request(Method::POST, "/healthz")).await.status()
        );
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn metrics_are_exposed() {
        let res = router(request(Method::GET, "/metrics")).await;

        assert_eq!(StatusCode::OK, res.status());
        assert!(res.headers().contains_key(header::CONTENT_TYPE));
    }
}
