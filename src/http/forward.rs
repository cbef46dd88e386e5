//! Forwarding to the upstream backend.
//!
//! # Responsibilities
//! - Rewrite the inbound request for the single configured backend
//!   (scheme, authority, base path, `Host`)
//! - Add `X-Forwarded-Host`, `X-Forwarded-For`, `X-Forwarded-Proto`
//! - Strip hop-by-hop headers in both directions
//!
//! # Design Decisions
//! - `Forwarder` is the seam between the dispatcher and the network; tests
//!   plug in in-memory implementations
//! - Each call resolves to exactly one of `Ok(response)` / `Err(error)`
//! - Response bodies are streamed, never buffered

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderValue, Request, Response, Uri};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use url::Url;

use crate::http::response::strip_hop_by_hop;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type ForwardFuture = BoxFuture<'static, Result<Response<Body>, ForwardError>>;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Why a forwarding attempt produced no upstream response.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),

    #[error("failed to build upstream request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Transport(#[source] BoxError),

    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<hyper_util::client::legacy::Error> for ForwardError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        ForwardError::Transport(Box::new(err))
    }
}

/// The forwarding primitive.
pub trait Forwarder: Send + Sync + 'static {
    fn forward(&self, request: Request<Body>) -> ForwardFuture;
}

/// Where requests are sent.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    authority: Authority,
    base_path: String,
}

impl UpstreamTarget {
    pub fn parse(raw: &str) -> Result<Self, ForwardError> {
        let url = Url::parse(raw).map_err(|e| ForwardError::InvalidTarget(e.to_string()))?;
        Self::from_url(&url)
    }

    pub fn from_url(url: &Url) -> Result<Self, ForwardError> {
        if url.scheme() != "http" {
            return Err(ForwardError::InvalidTarget(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ForwardError::InvalidTarget("missing host".to_string()))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority = Authority::from_str(&authority)
            .map_err(|e| ForwardError::InvalidTarget(e.to_string()))?;

        Ok(Self {
            authority,
            base_path: url.path().trim_end_matches('/').to_string(),
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Backend URI for an inbound URI: base path joined with the request path.
    pub fn uri_for(&self, inbound: &Uri) -> Result<Uri, ForwardError> {
        let path = inbound.path();
        let joined = match inbound.query() {
            Some(query) => format!("{}{}?{}", self.base_path, path, query),
            None => format!("{}{}", self.base_path, path),
        };
        let path_and_query = PathAndQuery::from_str(&joined)
            .map_err(|e| ForwardError::InvalidTarget(e.to_string()))?;

        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(ForwardError::from)
    }

    /// Rewrite an inbound request in place for this backend.
    pub fn rewrite(&self, request: &mut Request<Body>) -> Result<(), ForwardError> {
        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let uri = self.uri_for(request.uri())?;
        *request.uri_mut() = uri;

        let headers = request.headers_mut();
        strip_hop_by_hop(headers);

        if let Some(host) = headers.remove(header::HOST) {
            headers.insert(X_FORWARDED_HOST, host);
        }
        let host = HeaderValue::from_str(self.authority.as_str())
            .map_err(|e| ForwardError::InvalidTarget(e.to_string()))?;
        headers.insert(header::HOST, host);

        if let Some(ip) = client_ip {
            let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{prior}, {ip}"),
                None => ip.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

        Ok(())
    }
}

/// Forwards over a pooled hyper client.
#[derive(Debug, Clone)]
pub struct HyperForwarder {
    target: UpstreamTarget,
    client: Client<HttpConnector, Body>,
}

impl HyperForwarder {
    pub fn new(target: UpstreamTarget) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { target, client }
    }
}

impl Forwarder for HyperForwarder {
    fn forward(&self, mut request: Request<Body>) -> ForwardFuture {
        let client = self.client.clone();
        let rewritten = self.target.rewrite(&mut request);

        Box::pin(async move {
            rewritten?;
            let response = client.request(request).await?;
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Ok(Response::from_parts(parts, Body::new(body)))
        })
    }
}
