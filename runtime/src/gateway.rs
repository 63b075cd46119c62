//! HTTP payment gateway client.
//!
//! Posts session requests as JSON to `{api_url}/checkout/sessions` with a
//! bearer secret key.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use boxoffice_core::{
    CheckoutSession, CheckoutSessionRequest, GatewayError, GatewayResult, PaymentGateway,
};

/// Hosted-checkout gateway reached over HTTPS.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    api_url: String,
    secret_key: String,
}

impl std::fmt::Debug for HttpPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentGateway")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

impl HttpPaymentGateway {
    /// Create a client for `api_url` authenticating with `secret_key`.
    ///
    /// `timeout` bounds each HTTP request.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] if the HTTP client cannot be
    /// built (TLS backend initialisation).
    pub fn new(
        api_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }
}

impl PaymentGateway for HttpPaymentGateway {
    fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<CheckoutSession>> + Send>> {
        let client = self.client.clone();
        let url = format!("{}/checkout/sessions", self.api_url);
        let secret_key = self.secret_key.clone();

        Box::pin(async move {
            let response = client
                .post(&url)
                .bearer_auth(&secret_key)
                .header("idempotency-key", &request.client_reference_id)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        GatewayError::Timeout
                    } else {
                        GatewayError::Unavailable {
                            message: e.to_string(),
                        }
                    }
                })?;

            let status = response.status();
            if status.is_success() {
                let body = response.json::<SessionResponse>().await.map_err(|e| {
                    GatewayError::Unavailable {
                        message: format!("unreadable session response: {e}"),
                    }
                })?;
                tracing::debug!(session_id = %body.id, "Gateway session opened");
                return Ok(CheckoutSession {
                    session_id: body.id,
                    url: body.url,
                });
            }

            let message = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                tracing::warn!(status = status.as_u16(), "Gateway unavailable");
                Err(GatewayError::Unavailable {
                    message: format!("{status}: {message}"),
                })
            } else {
                tracing::error!(status = status.as_u16(), %message, "Gateway rejected session");
                Err(GatewayError::Rejected {
                    status: status.as_u16(),
                    message,
                })
            }
        })
    }
}
