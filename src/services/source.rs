//! Source page fetching.

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::SourceConfig;
use crate::utils::http::create_page_client;

/// Provider of the raw listings page.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// URL the page is fetched from, for logging.
    fn url(&self) -> &str;

    /// Fetch the page body.
    async fn fetch(&self) -> Result<String>;
}

/// Plain HTTP GET against the watched URL.
pub struct HttpPageSource {
    client: Client,
    url: String,
}

impl HttpPageSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Build a source with its own client from the source settings.
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Ok(Self::new(create_page_client(config)?, config.url.clone()))
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AppError::fetch(&self.url, e))?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(AppError::fetch(
                &self.url,
                format!("unexpected status {status}"),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::fetch(&self.url, e))
    }
}
