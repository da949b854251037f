//! Single-run entry routines. Each job opens what it needs, does its work
//! and releases its database connection on every path.

use crate::config::Config;
use crate::db::queries::{self, NotificationRecipients};
use crate::db::{
    ConnectionSettings, ConnectionState, Database, Engine, EngineSession, ProcedureRunner,
    SqlParam, TvpRows,
};
use crate::error::{ConfigError, SyncError};
use crate::export;
use crate::logging;
use crate::pacer::RequestPacer;
use crate::shopify::{ShopifyClient, VariantRow, flatten_products};
use crate::table::{Record, Table};
use crate::vtex::{OrderListParams, VtexClient};
use chrono::Local;
use serde_json::Value;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Page size requested from `products.json` (the API maximum).
pub const SHOPIFY_PAGE_LIMIT: u32 = 250;
pub const PUSH_STATUS_FIELD: &str = "push_status";
const VTEX_ORDERS_PATH: &str = "/api/oms/pvt/orders";

pub fn default_export_path(cfg: &Config, stem: &str) -> PathBuf {
    cfg.app
        .export_dir
        .join(format!("{stem}_{}.csv", Local::now().format("%Y%m%d_%H%M%S")))
}

/// Connect, run `SELECT 1`, close. Fails when the check did not pass.
pub async fn check_db(cfg: &Config) -> Result<ConnectionState, SyncError> {
    let settings = ConnectionSettings::from(&cfg.database);
    let mut db = Database::open(&settings).await?;
    // Engine sessions are not verified on open.
    let state = if matches!(db, Database::Engine(_)) {
        match db.query("SELECT 1", Vec::new()).await {
            Ok(_) => ConnectionState::Verified,
            Err(_) => ConnectionState::Failed,
        }
    } else {
        db.state()
    };
    close_quietly(&mut db).await;
    verified(state)
}

pub async fn run_procedure(
    cfg: &Config,
    procedure: &str,
    params: Vec<SqlParam>,
    export_to: Option<&Path>,
) -> Result<Table, SyncError> {
    let table = load_procedure(cfg, procedure, params).await?;
    if let Some(path) = export_to {
        export::write_table_csv(&table, path)?;
    }
    Ok(table)
}

pub async fn run_procedure_named(
    cfg: &Config,
    procedure: &str,
    params: Vec<(String, SqlParam)>,
    export_to: Option<&Path>,
) -> Result<Table, SyncError> {
    let mut session = engine_session(cfg).await?;
    let result = session.exec_procedure_named(procedure, params).await;
    dispose_quietly(&mut session).await;
    let table = result?;
    if let Some(path) = export_to {
        export::write_table_csv(&table, path)?;
    }
    Ok(table)
}

/// Send the rows of a pipe-delimited CSV file to `procedure` as the
/// table-valued parameter `@<param>` of type `table_type`. Header names
/// become the table columns; cells are sent as text.
pub async fn load_table(
    cfg: &Config,
    procedure: &str,
    param: &str,
    table_type: &str,
    input: &Path,
) -> Result<Table, SyncError> {
    let rows = read_tvp_rows(input)?;
    info!(path = %input.display(), rows = rows.rows.len(), "loaded table-valued parameter rows");
    let mut session = engine_session(cfg).await?;
    let result = session
        .exec_procedure_tvp(procedure, param, table_type, &rows)
        .await;
    dispose_quietly(&mut session).await;
    result
}

pub async fn notification_recipients(
    cfg: &Config,
    origin: &str,
) -> Result<NotificationRecipients, SyncError> {
    let settings = ConnectionSettings::from(&cfg.database);
    let mut db = Database::open(&settings).await?;
    let result = queries::notification_recipients(&mut db, origin).await;
    close_quietly(&mut db).await;
    let recipients = NotificationRecipients::from_table(&result?);
    info!(
        origin,
        to = recipients.to.len(),
        cc = recipients.cc.len(),
        bcc = recipients.bcc.len(),
        "notification recipients resolved"
    );
    Ok(recipients)
}

/// Read every product page, flatten to one row per variant and export.
pub async fn shopify_products(
    cfg: &Config,
    export_to: &Path,
) -> Result<Vec<VariantRow>, SyncError> {
    let client = shopify_client(cfg)?;
    let products = client
        .fetch_all_pages(&client.products_url(SHOPIFY_PAGE_LIMIT))
        .await?;
    let rows = flatten_products(&products)?;
    export::write_table_csv(&variants_table(&rows), export_to)?;
    Ok(rows)
}

pub async fn shopify_inventory_get(cfg: &Config, inventory_item_id: i64) -> Result<Value, SyncError> {
    let client = shopify_client(cfg)?;
    let level = client.get_inventory_level(inventory_item_id).await?;
    info!(inventory_item_id, level = %level, "inventory level fetched");
    Ok(level)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Push each product row returned by `procedure` to `location_id`. A failing
/// row is logged and counted; the rest of the batch still runs.
pub async fn shopify_push_inventory(
    cfg: &Config,
    procedure: &str,
    location_id: i64,
    report_to: Option<&Path>,
) -> Result<PushSummary, SyncError> {
    let client = shopify_client(cfg)?;
    let table = load_procedure(cfg, procedure, Vec::new()).await?;
    let (summary, report) = push_rows(&client, table.records(), location_id).await;

    info!(
        total = summary.total,
        updated = summary.updated,
        failed = summary.failed,
        "inventory push finished"
    );
    if let Some(path) = report_to {
        export::write_records_csv(&report, path)?;
    }
    Ok(summary)
}

/// Push rows one at a time, returning the summary and a report row per
/// input row with a [`PUSH_STATUS_FIELD`] column.
pub async fn push_rows(
    client: &ShopifyClient,
    rows: impl IntoIterator<Item = Record>,
    location_id: i64,
) -> (PushSummary, Vec<Record>) {
    let mut summary = PushSummary::default();
    let mut report = Vec::new();
    for mut row in rows {
        summary.total += 1;
        let status = match client.set_inventory_level(&row, location_id).await {
            Ok(_) => {
                summary.updated += 1;
                "ok".to_string()
            }
            Err(e) => {
                summary.failed += 1;
                e.to_string()
            }
        };
        row.insert(PUSH_STATUS_FIELD.to_string(), Value::String(status));
        report.push(row);
    }
    if summary.failed > 0 {
        warn!(failed = summary.failed, total = summary.total, "some inventory updates failed");
    }
    (summary, report)
}

pub async fn vtex_orders(cfg: &Config, days_back: i64, export_to: &Path) -> Result<usize, SyncError> {
    let vtex = cfg.vtex()?;
    if days_back < 0 {
        return Err(SyncError::validation(format!(
            "days back must not be negative, got {days_back}"
        )));
    }
    let client = VtexClient::new()?;
    let url = format!("{}{VTEX_ORDERS_PATH}", vtex.base_url.trim_end_matches('/'));
    let params = OrderListParams::last_days(days_back);
    info!(days_back, filter = ?params.creation_date, "listing VTEX orders");

    let orders = client
        .list_all(&url, &params.to_query(), &vtex.app_key, &vtex.app_token)
        .await;
    let records = to_records(orders);
    export::write_records_csv(&records, export_to)?;
    Ok(records.len())
}

pub async fn vtex_inventory(
    cfg: &Config,
    procedure: &str,
    export_to: &Path,
) -> Result<Vec<Record>, SyncError> {
    let table = load_procedure(cfg, procedure, Vec::new()).await?;
    let client = VtexClient::new()?;
    let rows = client
        .fetch_inventory_concurrently(table.records().collect(), cfg.app.vtex_concurrency)
        .await;
    export::write_records_csv(&rows, export_to)?;
    Ok(rows)
}

pub fn clean_logs(cfg: &Config) -> usize {
    let removed = logging::clean_old_logs(&cfg.app.log_dir, cfg.app.log_max_age());
    info!(removed, path = %cfg.app.log_dir.display(), "log cleanup finished");
    removed
}

pub async fn dedupe(cfg: &Config, procedure: &str) -> Result<u64, SyncError> {
    let mut session = engine_session(cfg).await?;
    let result = session.cleanup_duplicates(procedure).await;
    dispose_quietly(&mut session).await;
    result
}

async fn engine_session(cfg: &Config) -> Result<EngineSession, SyncError> {
    Engine::from_settings(&ConnectionSettings::from(&cfg.database))?
        .session()
        .await
}

async fn dispose_quietly(session: &mut EngineSession) {
    if let Err(e) = session.dispose().await {
        warn!(error = %e, "failed to dispose engine session");
    }
}

fn read_tvp_rows(path: &Path) -> Result<TvpRows, SyncError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(export::DELIMITER)
        .from_path(path)?;
    let columns = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = TvpRows::new(columns);
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|cell| {
                    if cell.is_empty() {
                        SqlParam::Null
                    } else {
                        SqlParam::from(cell)
                    }
                })
                .collect(),
        );
    }
    Ok(rows)
}

async fn load_procedure(
    cfg: &Config,
    procedure: &str,
    params: Vec<SqlParam>,
) -> Result<Table, SyncError> {
    let settings = ConnectionSettings::from(&cfg.database);
    let mut db = Database::open(&settings).await?;
    let result = db.exec_procedure(procedure, params).await;
    close_quietly(&mut db).await;
    result
}

async fn close_quietly<R: ProcedureRunner>(runner: &mut R) {
    if let Err(e) = runner.close().await {
        warn!(error = %e, "failed to close database connection");
    }
}

fn verified(state: ConnectionState) -> Result<ConnectionState, SyncError> {
    match state {
        ConnectionState::Verified => Ok(state),
        other => {
            error!(state = ?other, "database check did not pass");
            Err(SyncError::Unexpected(format!(
                "database check ended in state {other:?}"
            )))
        }
    }
}

fn shopify_client(cfg: &Config) -> Result<ShopifyClient, SyncError> {
    let shopify = cfg.shopify()?;
    let rate = NonZeroU32::new(cfg.app.shopify_requests_per_second).ok_or(
        ConfigError::Invalid {
            key: "APP_SHOPIFY_REQUESTS_PER_SECOND",
            reason: "must be at least 1".to_string(),
        },
    )?;
    ShopifyClient::new(shopify, RequestPacer::per_second(rate))
}

fn variants_table(rows: &[VariantRow]) -> Table {
    Table {
        columns: ["product_id", "title", "sku", "inventory_item_id"]
            .map(String::from)
            .to_vec(),
        rows: rows
            .iter()
            .map(|r| {
                vec![
                    Value::from(r.product_id),
                    Value::from(r.title.clone()),
                    Value::from(r.sku.clone()),
                    Value::from(r.inventory_item_id),
                ]
            })
            .collect(),
    }
}

/// Keep object entries; anything else is wrapped under a `value` column.
fn to_records(values: Vec<Value>) -> Vec<Record> {
    values
        .into_iter()
        .map(|value| match value {
            Value::Object(map) => map,
            other => Record::from_iter([("value".to_string(), other)]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn variants_table_keeps_column_order() {
        let table = variants_table(&[VariantRow {
            product_id: 1,
            title: "Tee".into(),
            sku: "TEE-S".into(),
            inventory_item_id: 11,
        }]);
        assert_eq!(table.columns, ["product_id", "title", "sku", "inventory_item_id"]);
        assert_eq!(table.rows[0][2], json!("TEE-S"));
    }

    #[test]
    fn non_object_listing_items_are_wrapped() {
        let records = to_records(vec![json!({ "orderId": "1" }), json!(5)]);
        assert_eq!(records[0]["orderId"], json!("1"));
        assert_eq!(records[1]["value"], json!(5));
    }

    #[test]
    fn tvp_rows_read_from_pipe_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stock.csv");
        std::fs::write(&path, "sku|qty\nA-1|4\nB-2|\n").unwrap();
        let rows = read_tvp_rows(&path).unwrap();
        assert_eq!(rows.columns, ["sku", "qty"]);
        assert_eq!(rows.rows[1], vec![SqlParam::from("B-2"), SqlParam::Null]);
    }

    #[test]
    fn only_verified_state_passes() {
        assert!(verified(ConnectionState::Verified).is_ok());
        assert!(verified(ConnectionState::Failed).is_err());
    }
}
