//! Shopify Admin REST integration.
//!
//! - `link.rs`: `Link` header pagination parsing
//! - `types.rs`: product/variant records and inventory update payloads
//! - `client.rs`: the HTTP client (paged product reads, inventory read/write)

pub mod client;
pub mod link;
pub mod types;

pub use client::{ACCESS_TOKEN_HEADER, ShopifyClient, shopify_headers};
pub use link::parse_link_header;
pub use types::{InventoryUpdate, Product, Variant, VariantRow, flatten_products, parse_location_id};
