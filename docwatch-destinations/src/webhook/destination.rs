// Copyright 2025 Docwatch Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Webhook destination implementation.

use super::config::WebhookConfig;
use async_trait::async_trait;
use docwatch_core::destination::{Destination, DestinationError, DestinationMetadata};
use docwatch_core::event::NormalizedEvent;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use tracing::{debug, info};

/// Longest response body kept in a rejection error, in bytes.
const MAX_ERROR_BODY: usize = 1024;

/// Destination that POSTs each event to an HTTP endpoint.
///
/// The underlying [`reqwest::Client`] pools connections and is shared by
/// concurrent deliveries.
///
/// # Examples
///
/// ```rust,no_run
/// use docwatch_destinations::webhook::{WebhookConfig, WebhookDestination};
///
/// let config = WebhookConfig::builder()
///     .url("https://hooks.example.com/changes")
///     .build()
///     .unwrap();
///
/// let destination = WebhookDestination::new(config).unwrap();
/// assert_eq!(destination.url(), "https://hooks.example.com/changes");
/// ```
#[derive(Debug, Clone)]
pub struct WebhookDestination {
    client: Client,
    config: WebhookConfig,
}

impl WebhookDestination {
    /// Creates a webhook destination.
    ///
    /// # Errors
    ///
    /// Returns [`DestinationError::ConfigurationError`] if a configured
    /// header is not a valid HTTP header or the client cannot be built.
    pub fn new(config: WebhookConfig) -> Result<Self, DestinationError> {
        info!(url = %config.url, timeout = ?config.timeout, "Initializing webhook destination");

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).map_err(|e| {
                DestinationError::configuration(e.to_string(), Some("user_agent".to_string()))
            })?,
        );

        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                DestinationError::configuration(e.to_string(), Some(format!("headers.{name}")))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                DestinationError::configuration(e.to_string(), Some(format!("headers.{name}")))
            })?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| DestinationError::configuration(e.to_string(), Some("client".to_string())))?;

        Ok(Self { client, config })
    }

    /// The endpoint URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// The active configuration.
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }
}

#[async_trait]
impl Destination for WebhookDestination {
    async fn send_event(&self, event: &NormalizedEvent) -> Result<(), DestinationError> {
        let body = serde_json::to_vec(event)
            .map_err(|e| DestinationError::serialization(e, "failed to encode event"))?;

        let response = self
            .client
            .post(&self.config.url)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DestinationError::Timeout {
                        timeout: self.config.timeout,
                    }
                } else {
                    DestinationError::connection(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(
                status = status.as_u16(),
                collection = %event.collection,
                document_id = %event.document_id,
                "Webhook accepted event"
            );
            return Ok(());
        }

        let body = response
            .text()
            .await
            .ok()
            .filter(|text| !text.is_empty())
            .map(truncate_body);

        Err(DestinationError::rejected(status.as_u16(), body))
    }

    fn metadata(&self) -> DestinationMetadata {
        DestinationMetadata::new("Webhook", "webhook")
            .with_property("url", &self.config.url)
            .with_property("timeout_ms", self.config.timeout.as_millis().to_string())
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
