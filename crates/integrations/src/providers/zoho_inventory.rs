use futures::future::try_join_all;
use serde_json::Value;

use crate::client::{ClientOptions, ResilientClient};
use crate::errors::IntegrationError;

/// Zoho Inventory v1 API. Every call is scoped to the configured organization.
pub struct ZohoInventoryClient {
    client: ResilientClient,
}

impl ZohoInventoryClient {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    pub fn options(organization_id: &str) -> ClientOptions {
        ClientOptions {
            auth_scheme: "Zoho-oauthtoken".to_string(),
            default_query: vec![("organization_id".to_string(), organization_id.to_string())],
            empty_result_statuses: Vec::new(),
        }
    }

    /// One page of active end products, as returned (`items` plus `page_context`).
    pub async fn get_items(&self, page: u32, per_page: u32) -> Result<Value, IntegrationError> {
        let params = vec![
            ("page".to_string(), page.to_string()),
            ("per_page".to_string(), per_page.to_string()),
            ("status".to_string(), "active".to_string()),
            ("cf_end_product".to_string(), "true".to_string()),
        ];
        let response = self.client.get("/items", params).await?;
        self.expect_object(response.body)
    }

    /// `search_text` matches partially, so only an exact SKU match counts.
    pub async fn get_stock(&self, sku: &str) -> Result<Option<Value>, IntegrationError> {
        let response =
            self.client.get("/items", vec![("search_text".to_string(), sku.to_string())]).await?;
        let items = response.body.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(items.into_iter().find(|item| item.get("sku").and_then(Value::as_str) == Some(sku)))
    }

    /// Looks up every SKU concurrently. Unknown SKUs are left out of the result.
    pub async fn get_stock_bulk(&self, skus: &[String]) -> Result<Vec<Value>, IntegrationError> {
        let lookups = skus.iter().map(|sku| self.get_stock(sku));
        let found = try_join_all(lookups).await?;
        Ok(found.into_iter().flatten().collect())
    }

    pub async fn create_sale_order(&self, order: Value) -> Result<Value, IntegrationError> {
        let response = self.client.post("/salesorders", order).await?;
        self.expect_object(response.body)
    }

    pub async fn get_sale_order(&self, order_id: &str) -> Result<Option<Value>, IntegrationError> {
        match self.client.get(&format!("/salesorders/{order_id}"), Vec::new()).await {
            Ok(response) => self.expect_object(response.body).map(Some),
            Err(IntegrationError::Request { status: 404, .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn expect_object(&self, body: Value) -> Result<Value, IntegrationError> {
        if body.is_object() {
            Ok(body)
        } else {
            Err(IntegrationError::UnexpectedResponse {
                provider: self.client.provider().to_string(),
                message: "expected a JSON object".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    use treejar_core::domain::token::ProviderId;

    use super::ZohoInventoryClient;
    use crate::client::{Credentials, ResilientClient, RetryPolicy};
    use crate::errors::{IntegrationError, TransportFailure};
    use crate::transport::{OutboundRequest, ProviderResponse, ProviderTransport};

    /// Answers by path and `search_text`, recording every request.
    #[derive(Default)]
    struct RoutedTransport {
        routes: HashMap<String, ProviderResponse>,
        requests: Mutex<Vec<OutboundRequest>>,
    }

    #[async_trait]
    impl ProviderTransport for RoutedTransport {
        async fn send(
            &self,
            request: OutboundRequest,
        ) -> Result<ProviderResponse, TransportFailure> {
            let search = request
                .query
                .iter()
                .find(|(name, _)| name == "search_text")
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            let key = format!("{}?{}", request.path, search);
            self.requests.lock().await.push(request);
            Ok(self
                .routes
                .get(&key)
                .cloned()
                .unwrap_or(ProviderResponse { status: 404, body: json!({ "code": 1002 }) }))
        }
    }

    fn inventory(routes: Vec<(&str, ProviderResponse)>) -> (ZohoInventoryClient, Arc<RoutedTransport>) {
        let transport = Arc::new(RoutedTransport {
            routes: routes.into_iter().map(|(key, response)| (key.to_owned(), response)).collect(),
            requests: Mutex::new(Vec::new()),
        });
        let client = ResilientClient::new(
            ProviderId::new("zoho_inventory"),
            Credentials::Static("token".to_owned().into()),
            transport.clone(),
            RetryPolicy::default(),
        )
        .with_options(ZohoInventoryClient::options("20071"));
        (ZohoInventoryClient::new(client), transport)
    }

    fn ok(body: Value) -> ProviderResponse {
        ProviderResponse { status: 200, body }
    }

    #[tokio::test]
    async fn stock_lookup_requires_exact_sku() {
        let (inventory, transport) = inventory(vec![(
            "/items?TJ-10",
            ok(json!({ "items": [{ "sku": "TJ-100", "stock_on_hand": 3 }, { "sku": "TJ-10", "stock_on_hand": 7 }] })),
        )]);

        let item = inventory.get_stock("TJ-10").await.expect("lookup").expect("found");

        assert_eq!(item["stock_on_hand"], 7);
        let requests = transport.requests.lock().await;
        assert!(requests[0].query.contains(&("organization_id".to_owned(), "20071".to_owned())));
    }

    #[tokio::test]
    async fn bulk_lookup_drops_missing_skus() {
        let (inventory, transport) = inventory(vec![
            ("/items?A-1", ok(json!({ "items": [{ "sku": "A-1" }] }))),
            ("/items?B-2", ok(json!({ "items": [{ "sku": "B-22" }] }))),
            ("/items?C-3", ok(json!({ "items": [{ "sku": "C-3" }] }))),
        ]);

        let found = inventory
            .get_stock_bulk(&["A-1".to_owned(), "B-2".to_owned(), "C-3".to_owned()])
            .await
            .expect("bulk");

        assert_eq!(found, vec![json!({ "sku": "A-1" }), json!({ "sku": "C-3" })]);
        assert_eq!(transport.requests.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn missing_sale_order_is_none() {
        let (inventory, _) = inventory(Vec::new());

        let order = inventory.get_sale_order("SO-404").await.expect("lookup");

        assert_eq!(order, None);
    }

    #[tokio::test]
    async fn server_error_on_sale_order_propagates() {
        let (inventory, _) = inventory(vec![(
            "/salesorders/SO-1?",
            ProviderResponse { status: 500, body: json!({ "message": "boom" }) },
        )]);

        let error = inventory.get_sale_order("SO-1").await.expect_err("should fail");

        assert!(matches!(error, IntegrationError::Request { status: 500, .. }));
    }
}
