use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::debug;

use crate::config::Config;
use crate::{Result, SplicerError};

/// One network round trip to a backend: a JSON query in, a JSON array of
/// series out.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn run(&self, query_json: &str, backend_addr: &str) -> Result<String>;
}

pub struct HttpTransport {
    client: Client,
    path: String,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(config.backend_timeout()).build()?;
        Ok(Self {
            client,
            path: config.backend_path.clone(),
        })
    }

    fn url(&self, backend_addr: &str) -> String {
        format!("http://{}{}", backend_addr, self.path)
    }
}

#[async_trait]
impl BackendTransport for HttpTransport {
    async fn run(&self, query_json: &str, backend_addr: &str) -> Result<String> {
        let url = self.url(backend_addr);
        debug!("Sending slice to {}", url);

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(query_json.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(SplicerError::Transport(format!(
                "Backend {} returned {}: {}",
                backend_addr, status, body
            )));
        }
        Ok(body)
    }
}
