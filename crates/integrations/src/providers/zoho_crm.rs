use serde_json::{json, Value};

use crate::client::{ClientOptions, ResilientClient};
use crate::errors::IntegrationError;
use crate::providers::first_data_record;

/// Zoho CRM v7 records API. Payloads stay untyped JSON.
pub struct ZohoCrmClient {
    client: ResilientClient,
}

impl ZohoCrmClient {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    pub fn options() -> ClientOptions {
        ClientOptions {
            auth_scheme: "Zoho-oauthtoken".to_string(),
            default_query: Vec::new(),
            empty_result_statuses: vec![204],
        }
    }

    pub async fn find_contact_by_phone(&self, phone: &str) -> Result<Option<Value>, IntegrationError> {
        let response = self
            .client
            .get("/Contacts/search", vec![("phone".to_string(), phone.to_string())])
            .await?;
        if response.status == 204 {
            return Ok(None);
        }
        Ok(first_data_record(&response.body))
    }

    pub async fn create_contact(&self, record: Value) -> Result<Value, IntegrationError> {
        self.write_record("/Contacts", record, false).await
    }

    pub async fn create_deal(&self, record: Value) -> Result<Value, IntegrationError> {
        self.write_record("/Deals", record, false).await
    }

    pub async fn update_deal(&self, deal_id: &str, record: Value) -> Result<Value, IntegrationError> {
        self.write_record(&format!("/Deals/{deal_id}"), record, true).await
    }

    async fn write_record(
        &self,
        path: &str,
        record: Value,
        update: bool,
    ) -> Result<Value, IntegrationError> {
        let payload = json!({ "data": [record] });
        let response = if update {
            self.client.put(path, payload).await?
        } else {
            self.client.post(path, payload).await?
        };
        Ok(first_data_record(&response.body).unwrap_or(response.body))
    }
}
