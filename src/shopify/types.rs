use crate::error::SyncError;
use crate::table::{Record, as_integer, as_text, lookup};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{error, info};

/// Columns a product row must carry to be pushed to Shopify.
pub const INVENTORY_ITEM_ID_FIELD: &str = "inventory_item_id";
pub const AVAILABLE_QUANTITY_FIELD: &str = "available_quantity";
pub const SKU_FIELD: &str = "sku";
/// Legacy procedures name the quantity `CantidadDisponible`.
const AVAILABLE_QUANTITY_FIELDS: &[&str] = &[AVAILABLE_QUANTITY_FIELD, "CantidadDisponible"];

/// Product as returned by `GET products.json`, reduced to what the sync needs.
#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    pub id: i64,
    pub title: String,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Variant {
    /// The key must be present; `null` is allowed.
    #[serde(deserialize_with = "nullable")]
    pub sku: Option<String>,
    pub inventory_item_id: i64,
}

fn nullable<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Option::deserialize(deserializer)
}

/// One row per variant, the flat shape exported to CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantRow {
    pub product_id: i64,
    pub title: String,
    pub sku: String,
    pub inventory_item_id: i64,
}

/// Flatten raw product records into one row per variant.
pub fn flatten_products(products: &[Value]) -> Result<Vec<VariantRow>, SyncError> {
    let mut rows = Vec::new();
    for raw in products {
        let product: Product = serde_json::from_value(raw.clone()).map_err(|e| {
            let id = raw.get("id").map(as_text).unwrap_or_default();
            error!(product_id = %id, error = %e, "unexpected product structure");
            SyncError::validation(format!("product {id} has an unexpected structure: {e}"))
        })?;
        rows.extend(product.variants.into_iter().map(|variant| VariantRow {
            product_id: product.id,
            title: product.title.clone(),
            sku: variant.sku.unwrap_or_default(),
            inventory_item_id: variant.inventory_item_id,
        }));
    }
    info!(products = products.len(), variants = rows.len(), "flattened product variants");
    Ok(rows)
}

/// Body of `POST inventory_levels/set.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryUpdate {
    pub inventory_item_id: i64,
    pub location_id: i64,
    pub available: i64,
}

impl InventoryUpdate {
    /// Validate a product row and build the update for `location_id`.
    /// Returns the update and the row's SKU for logging.
    pub fn from_row(row: &Record, location_id: i64) -> Result<(Self, String), SyncError> {
        if location_id <= 0 {
            return Err(SyncError::validation(format!(
                "location id must be a positive integer, got {location_id}"
            )));
        }
        let required: [(&str, &[&str]); 3] = [
            (INVENTORY_ITEM_ID_FIELD, &[INVENTORY_ITEM_ID_FIELD]),
            (AVAILABLE_QUANTITY_FIELD, AVAILABLE_QUANTITY_FIELDS),
            (SKU_FIELD, &[SKU_FIELD]),
        ];
        for (field, names) in required {
            if lookup(row, names).is_none() {
                return Err(SyncError::validation(format!(
                    "product row is missing required field '{field}'"
                )));
            }
        }

        let inventory_item_id = row
            .get(INVENTORY_ITEM_ID_FIELD)
            .and_then(as_integer)
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                SyncError::validation(format!(
                    "'{INVENTORY_ITEM_ID_FIELD}' must be a positive integer"
                ))
            })?;
        let available = lookup(row, AVAILABLE_QUANTITY_FIELDS)
            .and_then(as_integer)
            .ok_or_else(|| {
                SyncError::validation(format!("'{AVAILABLE_QUANTITY_FIELD}' must be an integer"))
            })?;
        let sku = row.get(SKU_FIELD).map(as_text).unwrap_or_default();

        Ok((
            Self {
                inventory_item_id,
                location_id,
                available,
            },
            sku,
        ))
    }
}

/// Parse a location id given as text (CLI, env). Only positive integers pass.
pub fn parse_location_id(text: &str) -> Result<i64, SyncError> {
    text.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            SyncError::validation(format!(
                "location id must be a positive integer, got '{text}'"
            ))
        })
}
