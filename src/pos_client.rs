//! HTTP client for the POS REST API.
//!
//! Authenticated with a bearer API key. Every non-2xx response, transport
//! failure or undecodable body surfaces as a [`PosError`].

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{trace, warn};
use zeroize::Zeroizing;

use crate::config::PosConfig;
use crate::error::PosError;
use crate::ids::PosId;
use crate::model::{NewCustomer, OrderStatus};
use crate::pos::{PosClient, PosCustomer, PosMenu, PosOrder, PosOrderItem, PosSite};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the POS base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn transport_error(url: &str, err: &reqwest::Error) -> PosError {
    let message = if err.is_connect() {
        "connection failed".to_string()
    } else if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_builder() {
        "invalid URL".to_string()
    } else {
        err.to_string()
    };
    PosError::Transport {
        url: url.to_string(),
        message,
    }
}

fn status_message(status: StatusCode) -> &'static str {
    match status.as_u16() {
        401 => "API key is invalid or expired",
        403 => "API key not authorized for this resource",
        404 => "not found",
        s if s >= 500 => "POS server error",
        _ => "unexpected response",
    }
}

/// Prefer the POS's own error message when the body carries one.
fn status_error(status: StatusCode, body_text: &str) -> PosError {
    let body = body_text.trim();
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                status_message(status).to_string()
            } else {
                body.to_string()
            }
        });
    PosError::Status {
        status: status.as_u16(),
        body: detail,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpPosClient {
    client: Client,
    base_url: String,
    api_key: Zeroizing<String>,
}

impl HttpPosClient {
    pub fn new(config: &PosConfig) -> Result<Self, PosError> {
        let base_url = normalize_base_url(&config.base_url);
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| transport_error(&base_url, &e))?;
        Ok(Self {
            client,
            base_url,
            api_key: Zeroizing::new(config.api_key().to_string()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send a request and return the raw body text of a 2xx response.
    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<String, PosError> {
        self.send_with_query(method, path, &[], body).await
    }

    async fn send_with_query(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<String, PosError> {
        let url = self.url(path);
        trace!(%method, %url, "pos request");

        let mut req = self
            .client
            .request(method, &url)
            .bearer_auth(self.api_key.as_str())
            .header("Accept", "application/json");
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await.map_err(|e| transport_error(&url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.map_err(|e| transport_error(&url, &e))?;

        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "pos request failed");
            return Err(status_error(status, &body_text));
        }
        Ok(body_text)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, PosError> {
        let text = self.send(method, path, body).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn set_status(&self, order_id: PosId, status: OrderStatus) -> Result<String, PosError> {
        self.send(
            Method::PUT,
            &format!("/orders/{order_id}/status"),
            Some(json!({ "status": status })),
        )
        .await
    }
}

#[async_trait]
impl PosClient for HttpPosClient {
    async fn get_all_sites(&self) -> Result<Vec<PosSite>, PosError> {
        self.fetch(Method::GET, "/sites", None).await
    }

    async fn get_menu_for_site(&self, site_id: PosId) -> Result<PosMenu, PosError> {
        self.fetch(Method::GET, &format!("/sites/{site_id}/menu"), None)
            .await
    }

    async fn get_order(&self, order_id: PosId) -> Result<PosOrder, PosError> {
        self.fetch(Method::GET, &format!("/orders/{order_id}"), None)
            .await
    }

    async fn create_order_for_pager(
        &self,
        site_id: PosId,
        pager_number: i64,
    ) -> Result<PosOrder, PosError> {
        self.fetch(
            Method::POST,
            &format!("/sites/{site_id}/orders"),
            Some(json!({ "pager_number": pager_number.to_string() })),
        )
        .await
    }

    async fn link_order_with_table(
        &self,
        order_id: PosId,
        table_name: &str,
    ) -> Result<(), PosError> {
        self.send(
            Method::PUT,
            &format!("/orders/{order_id}/table"),
            Some(json!({ "table": table_name })),
        )
        .await
        .map(|_| ())
    }

    async fn set_order_notes(&self, order_id: PosId, notes: &str) -> Result<(), PosError> {
        self.send(
            Method::PUT,
            &format!("/orders/{order_id}/notes"),
            Some(json!({ "notes": notes })),
        )
        .await
        .map(|_| ())
    }

    async fn put_order_on_hold(&self, order_id: PosId) -> Result<(), PosError> {
        self.set_status(order_id, OrderStatus::OnHold)
            .await
            .map(|_| ())
    }

    async fn complete_order(&self, order_id: PosId) -> Result<(), PosError> {
        self.set_status(order_id, OrderStatus::Complete)
            .await
            .map(|_| ())
    }

    async fn reject_order(&self, order_id: PosId) -> Result<PosOrder, PosError> {
        let text = self.set_status(order_id, OrderStatus::Rejected).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn delete_line_item(&self, order_id: PosId, line_id: PosId) -> Result<(), PosError> {
        self.send(
            Method::DELETE,
            &format!("/orders/{order_id}/lines/{line_id}"),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn create_order(
        &self,
        site_id: PosId,
        items: &[PosOrderItem],
    ) -> Result<PosOrder, PosError> {
        self.fetch(
            Method::POST,
            &format!("/sites/{site_id}/orders"),
            Some(json!({ "items": items })),
        )
        .await
    }

    async fn add_items_to_order(
        &self,
        order_id: PosId,
        items: &[PosOrderItem],
    ) -> Result<PosOrder, PosError> {
        self.fetch(
            Method::POST,
            &format!("/orders/{order_id}/lines"),
            Some(json!({ "items": items })),
        )
        .await
    }

    async fn get_customer_by_email(&self, email: &str) -> Result<Option<PosCustomer>, PosError> {
        let text = self
            .send_with_query(Method::GET, "/customers", &[("email", email)], None)
            .await?;
        let customers: Vec<PosCustomer> = serde_json::from_str(&text)?;
        Ok(customers.into_iter().find(|c| c.email.eq_ignore_ascii_case(email)))
    }

    async fn create_customer(&self, customer: &NewCustomer) -> Result<PosCustomer, PosError> {
        self.fetch(Method::POST, "/customers", Some(json!(customer)))
            .await
    }

    async fn add_customer_to_order(
        &self,
        order_id: PosId,
        customer_id: PosId,
    ) -> Result<(), PosError> {
        self.send(
            Method::PUT,
            &format!("/orders/{order_id}/customer"),
            Some(json!({ "customer_id": customer_id })),
        )
        .await
        .map(|_| ())
    }
}
