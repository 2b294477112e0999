use crate::app::ports::{HttpClientPort, HttpGetResult};
use crate::error::{EnrichError, ErrorKind, ExternalError, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

const USER_AGENT: &str = concat!("tabc_enrich/", env!("CARGO_PKG_VERSION"));

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| EnrichError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn classify(err: &reqwest::Error) -> ExternalError {
    if err.is_timeout() {
        ExternalError::transient(ErrorKind::Timeout, err.to_string())
    } else if err.is_decode() {
        ExternalError::malformed(err.to_string())
    } else if err.is_builder() {
        ExternalError::permanent(ErrorKind::ClientError, err.to_string())
    } else {
        // connect, request and redirect failures
        ExternalError::transient(ErrorKind::Network, err.to_string())
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str) -> std::result::Result<HttpGetResult, ExternalError> {
        let resp = self.client.get(url).send().await.map_err(|e| classify(&e))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp.bytes().await.map_err(|e| classify(&e))?.to_vec();
        Ok(HttpGetResult { status, bytes, content_type })
    }
}
