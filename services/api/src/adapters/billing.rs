//! services/api/src/adapters/billing.rs
//!
//! The `BillingService` port over the billing backend's two HTTP endpoints.
//! The backend talks to the payments provider; this side only asks it for
//! checkout and customer-portal sessions.

use async_trait::async_trait;
use custodyx_core::ports::{BillingService, CheckoutSession, PortError, PortResult, PortalSession};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutRequest<'a> {
    price_id: &'a str,
    user_id: Uuid,
    success_url: String,
    cancel_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PortalRequest<'a> {
    customer_id: &'a str,
    return_url: &'a str,
}

pub struct HttpBillingAdapter {
    client: Client,
    base_url: String,
    app_origin: String,
}

impl HttpBillingAdapter {
    pub fn new(base_url: impl Into<String>, app_origin: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into(),
            app_origin: app_origin.into(),
        }
    }

    /// Posts `body` and decodes the reply. A reply carrying an `error` field is
    /// a failure whatever its status code.
    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> PortResult<T> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(%url, "Billing request failed: {}", e);
                PortError::Unexpected(e.to_string())
            })?;

        let status = response.status();
        let reply: Value = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("unreadable billing reply: {}", e)))?;

        if let Some(message) = reply.get("error").and_then(Value::as_str) {
            error!(%url, %status, "Billing backend refused: {}", message);
            return Err(PortError::Unexpected(message.to_string()));
        }
        if !status.is_success() {
            return Err(PortError::Unexpected(format!("billing backend answered {}", status)));
        }
        serde_json::from_value(reply)
            .map_err(|e| PortError::Unexpected(format!("unexpected billing reply: {}", e)))
    }
}

#[async_trait]
impl BillingService for HttpBillingAdapter {
    async fn create_checkout_session(
        &self,
        price_id: &str,
        user_id: Uuid,
    ) -> PortResult<CheckoutSession> {
        let request = CheckoutRequest {
            price_id,
            user_id,
            success_url: format!("{}/success", self.app_origin),
            cancel_url: format!("{}/pricing", self.app_origin),
        };
        self.post("create-checkout-session", &request).await
    }

    async fn create_portal_session(&self, customer_id: &str) -> PortResult<PortalSession> {
        let request = PortalRequest {
            customer_id,
            return_url: &self.app_origin,
        };
        self.post("create-portal-session", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::json;

    /// Serves a stand-in billing backend and returns its base URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", address)
    }

    #[tokio::test]
    async fn checkout_sends_the_return_urls() {
        let app = Router::new().route(
            "/api/create-checkout-session",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["priceId"], "price_plus");
                assert_eq!(body["successUrl"], "http://app.test/success");
                assert_eq!(body["cancelUrl"], "http://app.test/pricing");
                Json(json!({ "id": "cs_123", "url": "https://pay.test/cs_123" }))
            }),
        );
        let billing = HttpBillingAdapter::new(serve(app).await, "http://app.test");

        let session = billing
            .create_checkout_session("price_plus", Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(session.id, "cs_123");
        assert_eq!(session.url.as_deref(), Some("https://pay.test/cs_123"));
    }

    #[tokio::test]
    async fn an_error_field_fails_the_call() {
        let app = Router::new().route(
            "/api/create-portal-session",
            post(|| async { Json(json!({ "error": "No such customer" })) }),
        );
        let billing = HttpBillingAdapter::new(serve(app).await, "http://app.test");

        let err = billing.create_portal_session("cus_missing").await.unwrap_err();

        assert!(matches!(err, PortError::Unexpected(message) if message == "No such customer"));
    }
}
