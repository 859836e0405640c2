//! JSON webhook implementation of [`RemoteNotifier`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::config::RemoteConfig;
use crate::{AppError, Result};

use super::{RemoteNotifier, RemoteUpdate};

/// Posts each update as JSON to a configured URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Build a notifier from config; `None` when no URL is configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn from_config(config: &RemoteConfig) -> Result<Option<Self>> {
        let Some(url) = config.webhook_url.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Some(Self { client, url }))
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RemoteNotifier for WebhookNotifier {
    fn notify(&self, update: RemoteUpdate) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.client
                .post(&self.url)
                .json(&update)
                .send()
                .await
                .map_err(|err| AppError::Remote(format!("failed to post update: {err}")))?
                .error_for_status()
                .map_err(|err| AppError::Remote(format!("webhook rejected update: {err}")))?;
            Ok(())
        })
    }
}
