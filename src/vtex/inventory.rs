use super::client::{VtexClient, vtex_headers};
use crate::error::SyncError;
use crate::table::{Record, as_text, lookup};
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Columns read from each lookup row.
pub const API_URL_FIELD: &str = "api_url";
pub const WAREHOUSE_ID_FIELD: &str = "warehouse_id";
pub const APP_KEY_FIELD: &str = "app_key";
pub const APP_TOKEN_FIELD: &str = "app_token";
/// Column spellings used by legacy lookup procedures, accepted as aliases.
const LEGACY_NAMES: [(&str, &str); 4] = [
    (API_URL_FIELD, "ApiCliente"),
    (WAREHOUSE_ID_FIELD, "warehouseId"),
    (APP_KEY_FIELD, "AppKey"),
    (APP_TOKEN_FIELD, "AppToken"),
];
/// Column attached to each row with the lookup outcome.
pub const TOTAL_QUANTITY_FIELD: &str = "total_quantity";

/// One inventory-balance request: endpoint, credentials and the warehouse
/// whose `totalQuantity` is wanted.
#[derive(Clone)]
pub struct InventoryLookup {
    pub api_url: String,
    pub warehouse_id: String,
    pub app_key: String,
    pub app_token: String,
}

impl fmt::Debug for InventoryLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InventoryLookup")
            .field("api_url", &self.api_url)
            .field("warehouse_id", &self.warehouse_id)
            .finish_non_exhaustive()
    }
}

impl InventoryLookup {
    pub fn from_record(record: &Record) -> Result<Self, SyncError> {
        let field = |name: &str| -> Result<String, SyncError> {
            let legacy = LEGACY_NAMES
                .iter()
                .find(|(field, _)| *field == name)
                .map(|(_, legacy)| *legacy);
            let names: Vec<&str> = std::iter::once(name).chain(legacy).collect();
            lookup(record, &names)
                .map(as_text)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| SyncError::validation(format!("lookup row is missing '{name}'")))
        };
        Ok(Self {
            api_url: field(API_URL_FIELD)?,
            warehouse_id: field(WAREHOUSE_ID_FIELD)?,
            app_key: field(APP_KEY_FIELD)?,
            app_token: field(APP_TOKEN_FIELD)?,
        })
    }
}

/// Result of a single lookup. Failures are data, not errors: one bad row
/// never aborts the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum InventoryOutcome {
    Quantity(Value),
    WarehouseNotFound(String),
    NoBalance,
    HttpStatus { status: u16, reason: String },
    Failed(String),
}

impl InventoryOutcome {
    pub fn is_quantity(&self) -> bool {
        matches!(self, Self::Quantity(_))
    }

    /// Cell value written back onto the row.
    pub fn to_cell(&self) -> Value {
        match self {
            Self::Quantity(value) => value.clone(),
            other => Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for InventoryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quantity(value) => f.write_str(&as_text(value)),
            Self::WarehouseNotFound(id) => write!(f, "No data for warehouseId {id}"),
            Self::NoBalance => f.write_str("No balance data returned by VTEX"),
            Self::HttpStatus { status, reason } => write!(f, "Error {status}: {reason}"),
            Self::Failed(message) => write!(f, "Exception occurred: {message}"),
        }
    }
}

impl VtexClient {
    /// Fetch one warehouse balance.
    pub async fn fetch_inventory(&self, lookup: &InventoryLookup) -> InventoryOutcome {
        let headers = match vtex_headers(&lookup.app_key, &lookup.app_token) {
            Ok(headers) => headers,
            Err(e) => return InventoryOutcome::Failed(e.to_string()),
        };

        let resp = match self.http.get(&lookup.api_url).headers(headers).send().await {
            Ok(resp) => resp,
            Err(e) => return InventoryOutcome::Failed(e.to_string()),
        };

        let status = resp.status();
        if status != StatusCode::OK {
            return InventoryOutcome::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            };
        }

        match resp.json::<Value>().await {
            Ok(data) => balance_for_warehouse(&data, &lookup.warehouse_id),
            Err(e) => InventoryOutcome::Failed(e.to_string()),
        }
    }

    /// Run every lookup with at most `concurrency` requests in flight.
    /// Outcomes come back in the order of `lookups`.
    pub async fn lookup_all(
        &self,
        lookups: &[Result<InventoryLookup, SyncError>],
        concurrency: usize,
    ) -> Vec<InventoryOutcome> {
        let total = lookups.len();
        let step = (total / 10).max(1);
        let done = AtomicUsize::new(0);
        info!(total, concurrency, "querying VTEX inventory per row");

        stream::iter(lookups)
            .map(|lookup| {
                let done = &done;
                async move {
                    let outcome = match lookup {
                        Ok(lookup) => self.fetch_inventory(lookup).await,
                        Err(e) => InventoryOutcome::Failed(e.to_string()),
                    };
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if finished % step == 0 || finished == total {
                        info!(finished, total, "inventory lookup progress");
                    }
                    debug!(?lookup, %outcome, "inventory lookup finished");
                    outcome
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Attach each row's balance (or failure marker) under
    /// [`TOTAL_QUANTITY_FIELD`]. Returns one row per input row, same order.
    pub async fn fetch_inventory_concurrently(
        &self,
        rows: Vec<Record>,
        concurrency: usize,
    ) -> Vec<Record> {
        let lookups: Vec<_> = rows.iter().map(InventoryLookup::from_record).collect();
        let outcomes = self.lookup_all(&lookups, concurrency).await;
        rows.into_iter()
            .zip(outcomes)
            .map(|(mut row, outcome)| {
                row.insert(TOTAL_QUANTITY_FIELD.to_string(), outcome.to_cell());
                row
            })
            .collect()
    }
}

fn balance_for_warehouse(data: &Value, warehouse_id: &str) -> InventoryOutcome {
    let Some(Value::Array(balance)) = data.get("balance") else {
        return InventoryOutcome::NoBalance;
    };
    balance
        .iter()
        .find(|entry| entry.get("warehouseId").map(as_text).as_deref() == Some(warehouse_id))
        .map(|entry| {
            InventoryOutcome::Quantity(
                entry
                    .get("totalQuantity")
                    .cloned()
                    .unwrap_or_else(|| Value::String("N/A".to_string())),
            )
        })
        .unwrap_or_else(|| InventoryOutcome::WarehouseNotFound(warehouse_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn picks_matching_warehouse() {
        let data = json!({ "balance": [
            { "warehouseId": "1_1", "totalQuantity": 3 },
            { "warehouseId": "2_1", "totalQuantity": 40 },
        ]});
        assert_eq!(
            balance_for_warehouse(&data, "2_1"),
            InventoryOutcome::Quantity(json!(40))
        );
    }

    #[test]
    fn missing_quantity_is_not_available() {
        let data = json!({ "balance": [{ "warehouseId": "1_1" }] });
        assert_eq!(balance_for_warehouse(&data, "1_1").to_string(), "N/A");
    }

    #[test]
    fn unknown_warehouse_and_missing_balance_are_markers() {
        let data = json!({ "balance": [{ "warehouseId": "1_1", "totalQuantity": 3 }] });
        assert_eq!(
            balance_for_warehouse(&data, "9_9").to_cell(),
            json!("No data for warehouseId 9_9")
        );
        assert_eq!(
            balance_for_warehouse(&json!({ "balance": {} }), "1_1").to_cell(),
            json!("No balance data returned by VTEX")
        );
    }

    #[test]
    fn lookup_row_requires_all_fields() {
        let record: Record = serde_json::from_value(json!({
            "api_url": "https://acct.example/api/logistics/pvt/inventory/skus/1",
            "warehouse_id": 7,
            "app_key": "key",
        }))
        .unwrap();
        let err = InventoryLookup::from_record(&record).unwrap_err();
        assert!(err.to_string().contains(APP_TOKEN_FIELD));
    }

    #[test]
    fn legacy_column_names_are_accepted() {
        let record: Record = serde_json::from_value(json!({
            "ApiCliente": "https://acct.example/x",
            "warehouseId": "1_1",
            "AppKey": "key",
            "AppToken": "token",
        }))
        .unwrap();
        let lookup = InventoryLookup::from_record(&record).unwrap();
        assert_eq!(lookup.api_url, "https://acct.example/x");
        assert_eq!(lookup.warehouse_id, "1_1");
        assert_eq!(lookup.app_token, "token");
    }

    #[test]
    fn numeric_warehouse_ids_are_read_as_text() {
        let record: Record = serde_json::from_value(json!({
            "api_url": "https://acct.example/x",
            "warehouse_id": 7,
            "app_key": "key",
            "app_token": "token",
        }))
        .unwrap();
        assert_eq!(InventoryLookup::from_record(&record).unwrap().warehouse_id, "7");
    }
}
