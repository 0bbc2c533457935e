//! Blocking reqwest transport.

use std::time::Duration;

use super::provider::{Connector, FetchError, HttpResponse, Transport};

/// Opens one `reqwest::blocking::Client` (one connection pool) per `connect`.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    timeout: Duration,
    user_agent: String,
}

impl HttpConnector {
    pub fn new(timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self {
            timeout,
            user_agent: user_agent.into(),
        }
    }
}

impl Connector for HttpConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Box::new(ReqwestTransport { client }))
    }
}

/// A live connection pool. Dropping it closes every pooled connection.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

fn network_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Network(format!("timed out: {url}"))
    } else {
        FetchError::Network(format!("{url}: {e}"))
    }
}

impl Transport for ReqwestTransport {
    fn head(&self, url: &str) -> Result<u16, FetchError> {
        let resp = self
            .client
            .head(url)
            .send()
            .map_err(|e| network_error(url, e))?;
        Ok(resp.status().as_u16())
    }

    fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| network_error(url, e))?;
        let status = resp.status().as_u16();
        if status != 200 {
            // Skip the body of error pages.
            return Ok(HttpResponse {
                status,
                body: Vec::new(),
            });
        }
        let body = resp.bytes().map_err(|e| network_error(url, e))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}
