//! Where products are pushed.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::model::ProductDraft;

#[derive(Debug, Error)]
pub enum StorefrontError {
    #[error("storefront request failed: {0}")]
    Transport(String),
    #[error("storefront answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected storefront response: {0}")]
    Decode(String),
    #[error("storefront temporarily unavailable: {0}")]
    Outage(String),
}

impl StorefrontError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Outage(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "storefront_transport",
            Self::Status { status, .. } if *status == 429 => "storefront_throttled",
            Self::Status { .. } => "storefront_status",
            Self::Decode(_) => "storefront_decode",
            Self::Outage(_) => "storefront_outage",
        }
    }
}

#[async_trait]
pub trait Storefront: Send + Sync {
    /// Creates the product and returns the storefront's id for it.
    async fn create_product(&self, product: &ProductDraft) -> Result<String, StorefrontError>;

    fn name(&self) -> &'static str;
}

/// Shopify Admin REST API.
pub struct ShopifyStorefront {
    client: Client,
    base_url: String,
    api_version: String,
    access_token: SecretString,
}

#[derive(Debug, Deserialize)]
struct CreatedProduct {
    product: CreatedProductBody,
}

#[derive(Debug, Deserialize)]
struct CreatedProductBody {
    id: Value,
}

impl ShopifyStorefront {
    pub fn new(
        base_url: &str,
        api_version: impl Into<String>,
        access_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, StorefrontError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| StorefrontError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            access_token,
        })
    }

    fn products_url(&self) -> String {
        format!("{}/admin/api/{}/products.json", self.base_url, self.api_version)
    }
}

#[async_trait]
impl Storefront for ShopifyStorefront {
    async fn create_product(&self, product: &ProductDraft) -> Result<String, StorefrontError> {
        let response = self
            .client
            .post(self.products_url())
            .header("X-Shopify-Access-Token", self.access_token.expose_secret())
            .json(&json!({ "product": product }))
            .send()
            .await
            .map_err(|error| StorefrontError::Transport(error.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| StorefrontError::Transport(error.without_url().to_string()))?;
        if status != StatusCode::CREATED && status != StatusCode::OK {
            return Err(StorefrontError::Status { status: status.as_u16(), body });
        }

        let created: CreatedProduct =
            serde_json::from_str(&body).map_err(|error| StorefrontError::Decode(error.to_string()))?;
        Ok(match created.product.id {
            Value::String(id) => id,
            other => other.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "shopify"
    }
}

/// Products kept in memory, keyed by title so repeated pushes are idempotent.
pub struct InMemoryStorefront {
    latency: Duration,
    products: Mutex<BTreeMap<String, (String, ProductDraft)>>,
}

impl InMemoryStorefront {
    pub fn new(latency: Duration) -> Self {
        Self { latency, products: Mutex::new(BTreeMap::new()) }
    }

    pub async fn products(&self) -> Vec<ProductDraft> {
        self.products.lock().await.values().map(|(_, product)| product.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.products.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.products.lock().await.is_empty()
    }
}

#[async_trait]
impl Storefront for InMemoryStorefront {
    async fn create_product(&self, product: &ProductDraft) -> Result<String, StorefrontError> {
        tokio::time::sleep(self.latency).await;
        let mut products = self.products.lock().await;
        let next_id = format!("mem-{}", products.len() + 1);
        let (id, stored) =
            products.entry(product.title.clone()).or_insert_with(|| (next_id, product.clone()));
        *stored = product.clone();
        Ok(id.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::{InMemoryStorefront, ShopifyStorefront, Storefront, StorefrontError};
    use crate::model::{ProductDraft, ProductStatus, Variant};

    fn draft(title: &str, price: &str) -> ProductDraft {
        ProductDraft {
            title: title.to_string(),
            status: ProductStatus::Active,
            variants: vec![Variant { price: price.to_string() }],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_memory_storefront_upserts_by_title() {
        let storefront = InMemoryStorefront::new(Duration::from_secs(1));
        let first = storefront.create_product(&draft("Blue Mug", "12.50")).await.expect("push");
        let other = storefront.create_product(&draft("Tea Towel", "4")).await.expect("push");
        let again = storefront.create_product(&draft("Blue Mug", "13.00")).await.expect("repush");

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(storefront.len().await, 2);
        let products = storefront.products().await;
        assert_eq!(products[0].variants[0].price, "13.00");
    }

    #[test]
    fn shopify_products_url_uses_api_version() {
        let storefront = ShopifyStorefront::new(
            "https://shop.example.com/",
            "2024-01",
            SecretString::from("shpat-token".to_string()),
            Duration::from_secs(5),
        )
        .expect("client");
        assert_eq!(
            storefront.products_url(),
            "https://shop.example.com/admin/api/2024-01/products.json"
        );
    }

    #[test]
    fn throttling_and_server_errors_are_retryable_client_errors_are_not() {
        assert!(StorefrontError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(StorefrontError::Status { status: 502, body: String::new() }.is_retryable());
        assert!(StorefrontError::Transport("reset".to_string()).is_retryable());
        assert!(!StorefrontError::Status { status: 422, body: String::new() }.is_retryable());
        assert!(!StorefrontError::Decode("no id".to_string()).is_retryable());
    }
}
