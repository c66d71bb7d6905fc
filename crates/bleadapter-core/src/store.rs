//! Remote configuration store seam.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{FilterRow, RemoteAdapterConfig};
use crate::error::{AdapterError, AdapterResult};

/// Collection holding the device filter UUIDs.
pub const FILTER_COLLECTION: &str = "BLE_Device_Filters";
/// Collection holding the single adapter-config row.
pub const ADAPTER_CONFIG_COLLECTION: &str = "BLE_Adapter_Config";

/// Source of the per-window configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// UUIDs of the enabled filter rows, as stored.
    async fn filters(&self) -> AdapterResult<Vec<String>>;

    /// The adapter-config row, `None` when the collection is empty.
    async fn adapter_config(&self) -> AdapterResult<Option<RemoteAdapterConfig>>;
}

/// Enabled UUIDs of a filter collection.
pub fn enabled_filters(rows: &[Value]) -> AdapterResult<Vec<String>> {
    let mut uuids = Vec::new();
    for row in rows {
        let row: FilterRow = serde_json::from_value(row.clone())
            .map_err(|e| AdapterError::config(format!("Malformed filter row: {}", e)))?;
        if row.is_enabled() {
            uuids.push(row.ble_uuid);
        }
    }
    Ok(uuids)
}

/// First row of an adapter-config collection.
pub fn first_adapter_config(rows: &[Value]) -> AdapterResult<Option<RemoteAdapterConfig>> {
    let Some(row) = rows.first() else {
        return Ok(None);
    };
    serde_json::from_value(row.clone())
        .map(Some)
        .map_err(|e| AdapterError::config(format!("Malformed adapter config: {}", e)))
}
