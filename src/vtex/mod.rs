//! VTEX OMS and logistics integration.
//!
//! - `filter.rs`: order-list query parameters and creation-date ranges
//! - `client.rs`: page-counter pager (errors end the walk, partial results kept)
//! - `inventory.rs`: bounded concurrent per-row inventory lookups

pub mod client;
pub mod filter;
pub mod inventory;

pub use client::{APP_KEY_HEADER, APP_TOKEN_HEADER, VtexClient, vtex_headers};
pub use filter::{OrderListParams, build_date_range_filter, build_date_range_filter_now};
pub use inventory::{InventoryLookup, InventoryOutcome, TOTAL_QUANTITY_FIELD};
