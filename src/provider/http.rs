//! HTTP/JSON provider client.
//!
//! This module implements [`ProviderApi`] against a REST-style provider
//! service. Failures are classified for the executor's retry policy:
//! rate limits, network errors, and 5xx responses are transient;
//! 4xx responses are permanent.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::Properties;
use crate::error::{GroundplanError, ProviderError, Result};

use super::api::{CreateRequest, DeleteRequest, ProviderApi, UpdateRequest};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Header carrying the idempotency token.
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Default retry-after when the provider rate limits without a hint.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// HTTP provider client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base URL of the provider service.
    base_url: String,
    /// Bearer token.
    token: String,
}

/// Create request body.
#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    resource_id: &'a str,
    properties: &'a Properties,
}

/// Update request body.
#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    properties: &'a Properties,
}

/// Create response body.
#[derive(Debug, Deserialize)]
struct CreatedBody {
    id: String,
}

/// Error response body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpProvider {
    /// Creates a new HTTP provider client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Builds the URL for a resource collection.
    fn collection_url(&self, kind: &str) -> String {
        format!("{}/resources/{kind}", self.base_url)
    }

    /// Builds the URL for a specific resource.
    fn resource_url(&self, kind: &str, external_id: &str) -> String {
        format!("{}/resources/{kind}/{external_id}", self.base_url)
    }

    /// Converts a non-success response into a classified provider error.
    async fn error_from_response(response: Response) -> GroundplanError {
        let status = response.status();

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body
                .error
                .or(body.message)
                .unwrap_or_else(|| String::from("no error detail")),
            Err(_) => String::from("no error detail"),
        };

        let provider_err = match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            },
            StatusCode::NOT_FOUND => ProviderError::NotFound {
                external_id: message,
            },
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                ProviderError::ValidationRejected { message }
            }
            _ => ProviderError::api_error(status.as_u16(), message),
        };

        GroundplanError::Provider(provider_err)
    }

    /// Sends a request, mapping transport failures to network errors.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let response = request
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| {
                GroundplanError::Provider(ProviderError::network(format!("Request failed: {e}")))
            })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            debug!("Provider returned status {}", response.status());
            Err(Self::error_from_response(response).await)
        }
    }
}

#[async_trait]
impl ProviderApi for HttpProvider {
    async fn create(&self, request: CreateRequest) -> Result<String> {
        trace!(
            "POST {} (resource {})",
            self.collection_url(&request.kind),
            request.resource_id
        );

        let body = CreateBody {
            resource_id: &request.resource_id,
            properties: &request.properties,
        };

        let response = self
            .send(
                self.client
                    .post(self.collection_url(&request.kind))
                    .header(IDEMPOTENCY_HEADER, &request.idempotency_token)
                    .json(&body),
            )
            .await?;

        let created: CreatedBody = response.json().await.map_err(|e| {
            GroundplanError::Provider(ProviderError::InvalidResponse {
                message: format!("Failed to parse create response: {e}"),
            })
        })?;

        if created.id.is_empty() {
            return Err(GroundplanError::Provider(ProviderError::InvalidResponse {
                message: String::from("Provider returned an empty external id"),
            }));
        }

        Ok(created.id)
    }

    async fn update(&self, request: UpdateRequest) -> Result<()> {
        trace!("PUT {}", self.resource_url(&request.kind, &request.external_id));

        let body = UpdateBody {
            properties: &request.properties,
        };

        self.send(
            self.client
                .put(self.resource_url(&request.kind, &request.external_id))
                .header(IDEMPOTENCY_HEADER, &request.idempotency_token)
                .json(&body),
        )
        .await?;

        Ok(())
    }

    async fn delete(&self, request: DeleteRequest) -> Result<()> {
        trace!(
            "DELETE {}",
            self.resource_url(&request.kind, &request.external_id)
        );

        self.send(
            self.client
                .delete(self.resource_url(&request.kind, &request.external_id))
                .header(IDEMPOTENCY_HEADER, &request.idempotency_token),
        )
        .await?;

        Ok(())
    }
}
