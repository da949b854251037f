use super::link::parse_link_header;
use super::types::InventoryUpdate;
use crate::config::ShopifyConfig;
use crate::error::SyncError;
use crate::pacer::RequestPacer;
use crate::table::Record;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, LINK};
use serde_json::Value;
use tracing::{debug, error, info};

pub const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";
const PRODUCTS_KEY: &str = "products";

/// Build the authentication headers for the Admin REST API.
pub fn shopify_headers(access_token: &str) -> Result<HeaderMap, SyncError> {
    let mut headers = HeaderMap::new();
    let token = HeaderValue::from_str(access_token)
        .map_err(|e| SyncError::validation(format!("invalid access token header: {e}")))?;
    headers.insert(ACCESS_TOKEN_HEADER, token);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Ok(headers)
}

/// Shopify Admin REST client.
///
/// All calls are sequential and fail fast: any error is logged where it
/// happens and returned to the caller, nothing is retried. Inventory calls
/// wait on the [`RequestPacer`] first.
#[derive(Debug, Clone)]
pub struct ShopifyClient {
    http: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    pacer: RequestPacer,
}

impl ShopifyClient {
    pub fn new(cfg: &ShopifyConfig, pacer: RequestPacer) -> Result<Self, SyncError> {
        let headers = shopify_headers(&cfg.access_token)?;
        Self::with_headers(cfg.admin_base_url(), headers, pacer)
    }

    /// Client with caller-supplied headers; the access token is checked on
    /// every call rather than here.
    pub fn with_headers(
        base_url: impl Into<String>,
        headers: HeaderMap,
        pacer: RequestPacer,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("storesync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers,
            pacer,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// First page URL of the product listing.
    pub fn products_url(&self, limit: u32) -> String {
        format!("{}/products.json?limit={limit}", self.base_url)
    }

    /// Fetch one page of products. Returns the page's records and the
    /// `next` link, if the response carried one.
    pub async fn fetch_page(&self, url: &str) -> Result<(Vec<Value>, Option<String>), SyncError> {
        if url.trim().is_empty() {
            error!("empty page url");
            return Err(SyncError::validation("page url must not be empty"));
        }
        self.require_token()?;

        let resp = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .inspect_err(|e| error!(url, error = %e, "products request failed"))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            error!(url, status = %status, body = %body, "Shopify returned an error status");
            return Err(SyncError::Api { status, body });
        }

        let links = match resp.headers().get(LINK) {
            Some(value) => {
                let raw = value
                    .to_str()
                    .map_err(|e| SyncError::format(format!("link header is not ASCII: {e}")))?;
                Some(parse_link_header(raw)?)
            }
            None => None,
        };

        let mut data: Value = resp
            .json()
            .await
            .inspect_err(|e| error!(url, error = %e, "failed to decode products page"))?;
        let records = match data.get_mut(PRODUCTS_KEY).map(Value::take) {
            Some(Value::Array(records)) => records,
            _ => {
                error!(url, "page has no '{PRODUCTS_KEY}' array");
                return Err(SyncError::format(format!(
                    "unexpected page format at {url}: missing '{PRODUCTS_KEY}' array"
                )));
            }
        };

        let next = links.and_then(|mut links| links.remove("next"));
        debug!(url, count = records.len(), has_next = next.is_some(), "fetched products page");
        Ok((records, next))
    }

    /// Follow `next` links from `url` until exhausted, returning every
    /// record in request order. The first failing page aborts the walk.
    pub async fn fetch_all_pages(&self, url: &str) -> Result<Vec<Value>, SyncError> {
        let mut all = Vec::new();
        let mut current = Some(url.to_string());
        let mut pages = 0usize;

        while let Some(page_url) = current.take() {
            let (records, next) = self.fetch_page(&page_url).await?;
            pages += 1;
            info!(url = %page_url, count = records.len(), "collected products page");
            all.extend(records);
            current = next;
        }

        info!(pages, total = all.len(), "finished collecting products");
        Ok(all)
    }

    /// `GET inventory_levels.json?inventory_item_ids=<id>`.
    pub async fn get_inventory_level(&self, inventory_item_id: i64) -> Result<Value, SyncError> {
        if inventory_item_id <= 0 {
            error!(inventory_item_id, "invalid inventory item id");
            return Err(SyncError::validation(format!(
                "inventory item id must be a positive integer, got {inventory_item_id}"
            )));
        }
        self.require_token()?;

        let url = format!(
            "{}/inventory_levels.json?inventory_item_ids={inventory_item_id}",
            self.base_url
        );
        self.pacer.ready().await;
        let resp = self
            .http
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await
            .inspect_err(|e| error!(inventory_item_id, error = %e, "inventory read failed"))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            error!(inventory_item_id, status = %status, body = %body, "inventory read rejected");
            return Err(SyncError::Api { status, body });
        }
        Ok(resp.json().await?)
    }

    /// `POST inventory_levels/set.json` for one product row. Rows are never
    /// batched; every call is one request.
    pub async fn set_inventory_level(
        &self,
        row: &Record,
        location_id: i64,
    ) -> Result<Value, SyncError> {
        let (update, sku) = InventoryUpdate::from_row(row, location_id)
            .inspect_err(|e| error!(location_id, error = %e, "invalid inventory update input"))?;
        self.require_token()?;

        let url = format!("{}/inventory_levels/set.json", self.base_url);
        self.pacer.ready().await;
        let resp = self
            .http
            .post(&url)
            .headers(self.headers.clone())
            .json(&update)
            .send()
            .await
            .inspect_err(|e| {
                error!(
                    sku = %sku,
                    inventory_item_id = update.inventory_item_id,
                    location_id,
                    error = %e,
                    "inventory update request failed"
                )
            })?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            error!(
                sku = %sku,
                inventory_item_id = update.inventory_item_id,
                location_id,
                available = update.available,
                status = %status,
                body = %body,
                "inventory update rejected"
            );
            return Err(SyncError::Api { status, body });
        }

        info!(
            sku = %sku,
            inventory_item_id = update.inventory_item_id,
            location_id,
            available = update.available,
            "inventory level updated"
        );
        Ok(resp.json().await?)
    }

    fn require_token(&self) -> Result<(), SyncError> {
        let present = self
            .headers
            .get(ACCESS_TOKEN_HEADER)
            .is_some_and(|v| !v.is_empty());
        if present {
            Ok(())
        } else {
            error!("missing '{ACCESS_TOKEN_HEADER}' header");
            Err(SyncError::validation(format!(
                "missing '{ACCESS_TOKEN_HEADER}' header"
            )))
        }
    }
}
