//! Command-line surface. Each subcommand maps to one routine in [`crate::jobs`].

use crate::db::SqlParam;
use crate::shopify::parse_location_id;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "storesync",
    about = "Single-run sync jobs between SQL Server, Shopify and VTEX",
    version
)]
pub struct Cli {
    /// Environment file loaded before configuration is read.
    #[arg(long, value_name = "PATH", default_value = ".env", env = "STORESYNC_ENV_FILE")]
    pub env_file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the database, run `SELECT 1` and disconnect.
    CheckDb,

    /// Execute a stored procedure and optionally export its result.
    RunProcedure {
        /// Procedure name, e.g. `[dbo].[stpr_Stock]`.
        #[arg(short, long)]
        procedure: String,

        /// Positional argument, repeatable. Integers and decimals written in
        /// canonical form are sent as numbers, anything else as text.
        #[arg(long = "param", value_name = "VALUE", value_parser = parse_param)]
        params: Vec<SqlParam>,

        /// Named argument `name=value`, repeatable. Uses an engine session.
        #[arg(long = "named", value_name = "NAME=VALUE", value_parser = parse_named_param, conflicts_with = "params")]
        named: Vec<(String, SqlParam)>,

        /// CSV file to write; nothing is exported when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Send a pipe-delimited file to a procedure as a table-valued parameter.
    LoadTable {
        #[arg(short, long)]
        procedure: String,

        /// Procedure parameter receiving the table, with or without `@`.
        #[arg(long)]
        param: String,

        /// User-defined table type of the parameter, e.g. `dbo.SkuList`.
        #[arg(long)]
        table_type: String,

        #[arg(short, long)]
        input: PathBuf,
    },

    /// Export every Shopify product variant.
    ShopifyProducts {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the inventory levels of one Shopify inventory item.
    ShopifyInventoryGet {
        #[arg(long, allow_negative_numbers = true)]
        inventory_item_id: i64,
    },

    /// Push available quantities from a procedure's rows to a Shopify location.
    ShopifyPushInventory {
        /// Procedure returning `sku`, `inventory_item_id` and
        /// `available_quantity` (or `CantidadDisponible`).
        #[arg(short, long)]
        procedure: String,

        #[arg(long, value_parser = parse_location)]
        location_id: i64,

        /// Per-row result report.
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Export VTEX orders created in the last N days.
    VtexOrders {
        #[arg(long, default_value_t = 8)]
        days_back: i64,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch VTEX warehouse balances for each row returned by a procedure.
    VtexInventory {
        /// Procedure returning `api_url`, `warehouse_id`, `app_key` and
        /// `app_token` (or `ApiCliente`, `warehouseId`, `AppKey`, `AppToken`).
        /// The balance is exported in a `total_quantity` column.
        #[arg(short, long)]
        procedure: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete log files older than `APP_LOG_MAX_AGE_MINUTES`.
    CleanLogs,

    /// Run a duplicate-row cleanup procedure and report the affected rows.
    Dedupe {
        #[arg(short, long)]
        procedure: String,
    },

    /// Show the notification recipients registered for an origin.
    Recipients {
        #[arg(long)]
        origin: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckDb => "check-db",
            Self::RunProcedure { .. } => "run-procedure",
            Self::LoadTable { .. } => "load-table",
            Self::ShopifyProducts { .. } => "shopify-products",
            Self::ShopifyInventoryGet { .. } => "shopify-inventory-get",
            Self::ShopifyPushInventory { .. } => "shopify-push-inventory",
            Self::VtexOrders { .. } => "vtex-orders",
            Self::VtexInventory { .. } => "vtex-inventory",
            Self::CleanLogs => "clean-logs",
            Self::Dedupe { .. } => "dedupe",
            Self::Recipients { .. } => "recipients",
        }
    }
}

fn parse_param(raw: &str) -> Result<SqlParam, String> {
    // `00123` and `1e3` stay text.
    match raw.parse::<i64>() {
        Ok(i) if i.to_string() == raw => return Ok(SqlParam::Int(i)),
        _ => {}
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f.to_string() == raw => Ok(SqlParam::Float(f)),
        _ => Ok(SqlParam::from(raw)),
    }
}

fn parse_named_param(raw: &str) -> Result<(String, SqlParam), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.trim().is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    Ok((name.trim().to_string(), parse_param(value)?))
}

fn parse_location(raw: &str) -> Result<i64, String> {
    parse_location_id(raw).map_err(|e| e.to_string())
}
