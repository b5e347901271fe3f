//! Telecare billing HTTP client implementation.

use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, InitiatePaymentRequest, Plan, PlanId, PlanList, Subscription, Transaction,
    TransactionPage, UserId,
};

/// Telecare billing API client.
///
/// Opens checkouts and reads back ledger and subscription state for the app backend.
#[derive(Debug, Clone)]
pub struct BillingClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl BillingClient {
    /// Create a new billing client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the billing service (e.g., `"http://telecare-billing:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the base URL or key is empty, or the HTTP
    /// client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new billing client with custom options.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the base URL or key is empty, or the HTTP
    /// client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let api_key = api_key.into();
        if base_url.is_empty() {
            return Err(ClientError::Configuration("base URL is empty".into()));
        }
        if api_key.is_empty() {
            return Err(ClientError::Configuration("API key is empty".into()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            service_name: options.service_name,
        })
    }

    /// Open a checkout for `user_id` buying `plan_id`.
    ///
    /// The returned transaction's `reference` must be passed to the gateway as `tx_ref`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownUser`] or [`ClientError::PlanNotFound`] when either side
    /// is unknown, or another error if the request fails.
    pub async fn initiate_payment(
        &self,
        user_id: UserId,
        plan_id: PlanId,
    ) -> Result<Transaction, ClientError> {
        let url = format!("{}/v1/payments/initiate", self.base_url);
        let request = InitiatePaymentRequest { user_id, plan_id };

        let response = self.authed(self.client.post(&url)).json(&request).send().await?;

        tracing::debug!(user_id = %user_id, plan_id = %plan_id, "Checkout requested");
        self.handle_response(response).await
    }

    /// Look up a ledger row by gateway reference.
    ///
    /// Returns `Ok(None)` when the service has no row for `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_transaction(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, ClientError> {
        let url = format!("{}/v1/payments/{reference}", self.base_url);

        let response = self.authed(self.client.get(&url)).send().await?;

        self.handle_optional(response).await
    }

    /// List a user's payments, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<TransactionPage, ClientError> {
        let url = format!("{}/v1/payments", self.base_url);

        let response = self
            .authed(self.client.get(&url))
            .query(&[
                ("user_id", user_id.get().to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Fetch the user's subscription.
    ///
    /// Returns `Ok(None)` when the user has never had one.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn current_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, ClientError> {
        let url = format!("{}/v1/subscriptions/{user_id}/current", self.base_url);

        let response = self.authed(self.client.get(&url)).send().await?;

        self.handle_optional(response).await
    }

    /// List the plan catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_plans(&self) -> Result<Vec<Plan>, ClientError> {
        let url = format!("{}/v1/plans", self.base_url);

        let response = self.authed(self.client.get(&url)).send().await?;

        let list: PlanList = self.handle_response(response).await?;
        Ok(list.plans)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
    }

    /// Like [`Self::handle_response`], with 404 mapped to `None`.
    async fn handle_optional<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Option<T>, ClientError> {
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let code = api_error.error.code.as_str();
                let message = api_error.error.message;
                let retryable = api_error
                    .error
                    .details
                    .as_ref()
                    .and_then(|d| d.get("retryable"))
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);

                match code {
                    "not_found" if message.starts_with("unknown user") => {
                        Err(ClientError::UnknownUser { message })
                    }
                    "not_found" if message.starts_with("plan not found") => {
                        Err(ClientError::PlanNotFound { message })
                    }
                    _ if retryable => Err(ClientError::Retryable { message }),
                    _ => Err(ClientError::Api {
                        code: code.to_string(),
                        message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) if status.is_server_error() => Err(ClientError::Retryable {
                message: format!("HTTP {status}"),
            }),
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_trims_trailing_slash() {
        let client = BillingClient::new("http://localhost:8080/", "test-api-key").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn client_options() {
        let options = ClientOptions::with_service_name("telecare-app");
        let client = BillingClient::with_options("http://localhost:8080", "key", options).unwrap();
        assert_eq!(client.service_name, "telecare-app");
    }

    #[test]
    fn empty_configuration_is_rejected() {
        assert!(matches!(
            BillingClient::new("", "key"),
            Err(ClientError::Configuration(_))
        ));
        assert!(matches!(
            BillingClient::new("http://localhost:8080", ""),
            Err(ClientError::Configuration(_))
        ));
    }
}
