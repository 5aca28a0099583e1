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

//! Webhook destination configuration.

use std::time::Duration;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default `User-Agent` header value.
pub const DEFAULT_USER_AGENT: &str = concat!("docwatch/", env!("CARGO_PKG_VERSION"));

/// Configuration for the webhook destination.
///
/// # Examples
///
/// ```rust
/// use docwatch_destinations::webhook::WebhookConfig;
/// use std::time::Duration;
///
/// let config = WebhookConfig::builder()
///     .url("http://localhost:8080/hook")
///     .timeout(Duration::from_secs(2))
///     .build()
///     .unwrap();
///
/// assert_eq!(config.url, "http://localhost:8080/hook");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Endpoint receiving one POST per event (required, http or https).
    pub url: String,

    /// Per-request timeout (default: 10s).
    pub timeout: Duration,

    /// `User-Agent` header sent with every request.
    pub user_agent: String,

    /// Extra headers sent with every request, e.g. authorization.
    pub headers: Vec<(String, String)>,
}

impl WebhookConfig {
    /// Creates a new builder for `WebhookConfig`.
    #[must_use]
    pub fn builder() -> WebhookConfigBuilder {
        WebhookConfigBuilder::default()
    }
}

/// Builder for [`WebhookConfig`].
#[derive(Debug, Default)]
pub struct WebhookConfigBuilder {
    url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    headers: Vec<(String, String)>,
}

impl WebhookConfigBuilder {
    /// Sets the endpoint URL (required).
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the request timeout (default: 10s).
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the `User-Agent` header.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Adds a header sent with every request.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builds the `WebhookConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `url` is missing, empty, or not an absolute http(s) URL
    /// - `timeout` is zero
    /// - a header name is empty
    pub fn build(self) -> Result<WebhookConfig, String> {
        let url = self.url.ok_or("url is required")?;
        if url.trim().is_empty() {
            return Err("url cannot be empty".to_string());
        }

        let parsed = reqwest::Url::parse(&url).map_err(|e| format!("invalid url '{url}': {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!(
                "url scheme must be http or https, got '{}'",
                parsed.scheme()
            ));
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err("timeout must be greater than zero".to_string());
        }

        if self.headers.iter().any(|(name, _)| name.trim().is_empty()) {
            return Err("header names cannot be empty".to_string());
        }

        Ok(WebhookConfig {
            url,
            timeout,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            headers: self.headers,
        })
    }
}
