use crate::config::Config;
use bytes::Bytes;
use reqwest::{Client, Method, StatusCode, Url};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Query parameters of an admin request; keys are unique, last write wins.
pub type QueryValues = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub struct TransportResponse<B> {
    pub status: StatusCode,
    pub body: B,
}

/// Streaming response body. Dropping it closes the underlying connection.
pub trait ResponseBody: Send {
    fn chunk(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;
}

/// Executes admin API requests relative to the configured API prefix.
pub trait Transport: Send + Sync {
    type Body: ResponseBody;

    fn execute(
        &self,
        method: Method,
        rel_path: &str,
        query: &QueryValues,
    ) -> impl Future<Output = Result<TransportResponse<Self::Body>, TransportError>> + Send;
}

pub struct ReqwestTransport {
    client: Client,
    endpoint: Url,
    admin_api_prefix: String,
}

impl ReqwestTransport {
    pub fn new(
        endpoint: &str,
        admin_api_prefix: &str,
        user_agent: &str,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let endpoint = parse_endpoint(endpoint)?;
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            admin_api_prefix: admin_api_prefix.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, TransportError> {
        Self::new(
            &cfg.endpoint,
            &cfg.admin_api_prefix,
            &cfg.user_agent,
            Duration::from_secs(cfg.connect_timeout_secs),
        )
    }

    fn url_for(&self, rel_path: &str, query: &QueryValues) -> Url {
        let mut url = self.endpoint.clone();
        let path = format!(
            "{}{}{}",
            self.endpoint.path().trim_end_matches('/'),
            self.admin_api_prefix,
            rel_path
        );
        url.set_path(&path);
        url.set_query(None);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        url
    }
}

pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: endpoint.to_string(),
        reason,
    };
    let url = Url::parse(endpoint).map_err(|err| invalid(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

impl Transport for ReqwestTransport {
    type Body = ReqwestBody;

    async fn execute(
        &self,
        method: Method,
        rel_path: &str,
        query: &QueryValues,
    ) -> Result<TransportResponse<ReqwestBody>, TransportError> {
        let url = self.url_for(rel_path, query);
        debug!(%method, url = %url, "sending admin request");
        let response = self.client.request(method, url).send().await?;
        Ok(TransportResponse {
            status: response.status(),
            body: ReqwestBody(response),
        })
    }
}

pub struct ReqwestBody(reqwest::Response);

impl ResponseBody for ReqwestBody {
    async fn chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.0.chunk().await?)
    }
}
