//! Outbound HTTP plumbing shared by the remote collaborators
//! (key provider, identity directory, identity provider, scope policy).

use crate::error::RemoteError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode, header};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = "oauth-server/0.1";

/// Thin JSON-over-HTTP client with a per-request timeout.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|e| RemoteError::Network(e.to_string()))?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let inner = Client::builder(TokioExecutor::new()).build(connector);
        Ok(Self { inner, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[tracing::instrument(name = "http_get_json", level = "debug", skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RemoteError> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "application/json")
            .body(Full::new(Bytes::new()))
            .map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
        let (_, body) = self.send(req).await?;
        parse_json(&body)
    }

    #[tracing::instrument(name = "http_post_json", level = "debug", skip(self, payload))]
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<T, RemoteError> {
        let body =
            serde_json::to_vec(payload).map_err(|e| RemoteError::InvalidJson(e.to_string()))?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
        let (_, body) = self.send(req).await?;
        parse_json(&body)
    }

    /// POST an `application/x-www-form-urlencoded` body.
    ///
    /// Returns the status alongside the body so callers can treat client errors
    /// as a domain answer instead of a transport failure.
    #[tracing::instrument(name = "http_post_form", level = "debug", skip(self, fields))]
    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<(StatusCode, Bytes), RemoteError> {
        let body = serde_urlencoded::to_string(fields)
            .map_err(|e| RemoteError::InvalidForm(e.to_string()))?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::ACCEPT, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
        self.send_raw(req).await
    }

    async fn send(&self, req: Request<Full<Bytes>>) -> Result<(StatusCode, Bytes), RemoteError> {
        let (status, body) = self.send_raw(req).await?;
        if !status.is_success() {
            return Err(RemoteError::Http {
                status,
                context: String::from_utf8_lossy(&body).chars().take(200).collect(),
            });
        }
        Ok((status, body))
    }

    async fn send_raw(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Result<(StatusCode, Bytes), RemoteError> {
        let uri = req.uri().clone();
        let exchange = async {
            let res = self
                .inner
                .request(req)
                .await
                .map_err(|e| RemoteError::Network(e.to_string()))?;
            let status = res.status();
            let body = res
                .into_body()
                .collect()
                .await
                .map_err(|e| RemoteError::Network(e.to_string()))?
                .to_bytes();
            Ok::<_, RemoteError>((status, body))
        };
        let (status, body) = timeout(self.timeout, exchange)
            .await
            .map_err(|_| RemoteError::Timeout(self.timeout))??;
        debug!(%uri, %status, bytes = body.len(), "remote call finished");
        Ok((status, body))
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, RemoteError> {
    serde_json::from_slice(body).map_err(|e| RemoteError::InvalidJson(e.to_string()))
}
