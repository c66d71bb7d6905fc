//! ClearBlade platform REST client and the config store built on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::RemoteAdapterConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::store::{
    enabled_filters, first_adapter_config, ConfigStore, ADAPTER_CONFIG_COLLECTION,
    FILTER_COLLECTION,
};

pub const DEFAULT_PLATFORM_URL: &str = "http://localhost:9000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const HEADER_SYSTEM_KEY: &str = "ClearBlade-SystemKey";
const HEADER_SYSTEM_SECRET: &str = "ClearBlade-SystemSecret";
const HEADER_DEVICE_TOKEN: &str = "ClearBlade-DeviceToken";

/// Credentials of the edge device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCredentials {
    pub system_key: String,
    pub system_secret: String,
    pub device_name: String,
    pub active_key: String,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(rename = "deviceToken")]
    device_token: String,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    #[serde(rename = "DATA", default)]
    data: Vec<Value>,
}

/// Device-authenticated client for the platform REST API.
pub struct PlatformClient {
    client: Client,
    base_url: String,
    credentials: DeviceCredentials,
    token: RwLock<Option<String>>,
}

impl PlatformClient {
    pub fn new(base_url: &str, credentials: DeviceCredentials) -> AdapterResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::config(format!("Unable to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            token: RwLock::new(None),
        })
    }

    pub fn credentials(&self) -> &DeviceCredentials {
        &self.credentials
    }

    /// Token from the last successful [`authenticate`](Self::authenticate).
    pub fn device_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Authenticate the device and store its token.
    pub async fn authenticate(&self) -> AdapterResult<String> {
        let url = format!(
            "{}/api/v/2/devices/{}/auth",
            self.base_url, self.credentials.system_key
        );
        let body = serde_json::json!({
            "deviceName": self.credentials.device_name,
            "activeKey": self.credentials.active_key,
        });

        let response = self
            .client
            .post(&url)
            .header(HEADER_SYSTEM_KEY, &self.credentials.system_key)
            .header(HEADER_SYSTEM_SECRET, &self.credentials.system_secret)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::broker(format!("Authentication request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AdapterError::broker(format!(
                "Authentication rejected: {}",
                response.status()
            )));
        }

        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::broker(format!("Malformed authentication response: {}", e)))?;

        info!("Device {} authenticated", self.credentials.device_name);
        *self.token.write() = Some(auth.device_token.clone());
        Ok(auth.device_token)
    }

    /// Rows of the collection `name`.
    pub async fn collection(&self, name: &str) -> AdapterResult<Vec<Value>> {
        let token = self
            .device_token()
            .ok_or_else(|| AdapterError::config("Device is not authenticated"))?;
        let url = format!(
            "{}/api/v/1/collection/{}/{}",
            self.base_url, self.credentials.system_key, name
        );

        let response = self
            .client
            .get(&url)
            .header(HEADER_SYSTEM_KEY, &self.credentials.system_key)
            .header(HEADER_SYSTEM_SECRET, &self.credentials.system_secret)
            .header(HEADER_DEVICE_TOKEN, token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| AdapterError::config(format!("Query of {} failed: {}", name, e)))?;

        if !response.status().is_success() {
            return Err(AdapterError::config(format!(
                "Query of {} returned {}",
                name,
                response.status()
            )));
        }

        let collection: CollectionResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::config(format!("Malformed {} response: {}", name, e)))?;
        debug!("Collection {} returned {} rows", name, collection.data.len());
        Ok(collection.data)
    }
}

/// [`ConfigStore`] reading the filter and adapter-config collections.
pub struct PlatformConfigStore {
    client: Arc<PlatformClient>,
}

impl PlatformConfigStore {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigStore for PlatformConfigStore {
    async fn filters(&self) -> AdapterResult<Vec<String>> {
        let rows = self.client.collection(FILTER_COLLECTION).await?;
        enabled_filters(&rows)
    }

    async fn adapter_config(&self) -> AdapterResult<Option<RemoteAdapterConfig>> {
        let rows = self.client.collection(ADAPTER_CONFIG_COLLECTION).await?;
        first_adapter_config(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> DeviceCredentials {
        DeviceCredentials {
            system_key: "key".into(),
            system_secret: "secret".into(),
            device_name: "edge1".into(),
            active_key: "pass".into(),
        }
    }

    #[tokio::test]
    async fn test_collection_requires_token() {
        let client = PlatformClient::new("http://localhost:9000/", credentials()).unwrap();
        assert_eq!(client.base_url, "http://localhost:9000");
        assert!(client.device_token().is_none());
        assert!(matches!(
            client.collection(FILTER_COLLECTION).await,
            Err(AdapterError::Config(_))
        ));
    }

    #[test]
    fn test_collection_response_shape() {
        let parsed: CollectionResponse =
            serde_json::from_str(r#"{"DATA":[{"ble_uuid":"180f","enabled":true}],"TOTAL":1}"#).unwrap();
        assert_eq!(enabled_filters(&parsed.data).unwrap(), vec!["180f".to_string()]);

        let auth: AuthResponse = serde_json::from_str(r#"{"deviceToken":"abc"}"#).unwrap();
        assert_eq!(auth.device_token, "abc");
    }
}
