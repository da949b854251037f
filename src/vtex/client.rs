use crate::error::SyncError;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;

pub const APP_KEY_HEADER: &str = "X-VTEX-API-AppKey";
pub const APP_TOKEN_HEADER: &str = "X-VTEX-API-AppToken";

pub fn vtex_headers(app_key: &str, app_token: &str) -> Result<HeaderMap, SyncError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        APP_KEY_HEADER,
        HeaderValue::from_str(app_key)
            .map_err(|e| SyncError::validation(format!("invalid app key header: {e}")))?,
    );
    headers.insert(
        APP_TOKEN_HEADER,
        HeaderValue::from_str(app_token)
            .map_err(|e| SyncError::validation(format!("invalid app token header: {e}")))?,
    );
    Ok(headers)
}

/// VTEX REST client. Stateless apart from the pooled HTTP client;
/// credentials are passed per call because inventory rows carry their own.
#[derive(Debug, Clone)]
pub struct VtexClient {
    pub(super) http: reqwest::Client,
}

impl VtexClient {
    pub fn new() -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("storesync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// Walk a page-counter listing starting at page 1, collecting each
    /// page's `list` until `paging.currentPage >= paging.pages`.
    ///
    /// Unlike the Shopify pager this never fails: a non-200 status, a
    /// transport error or an undecodable body is logged and whatever was
    /// collected so far is returned.
    pub async fn list_all(
        &self,
        base_url: &str,
        params: &[(String, String)],
        app_key: &str,
        app_token: &str,
    ) -> Vec<Value> {
        let mut all = Vec::new();
        let headers = match vtex_headers(app_key, app_token) {
            Ok(headers) => headers,
            Err(e) => {
                error!(url = base_url, error = %e, "cannot build VTEX headers");
                return all;
            }
        };

        let mut page: u64 = 1;
        loop {
            let url = match page_url(base_url, params, page) {
                Ok(url) => url,
                Err(e) => {
                    error!(url = base_url, error = %e, "invalid VTEX listing url");
                    break;
                }
            };

            let resp = match self.http.get(url.clone()).headers(headers.clone()).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    error!(url = %url, error = %e, "VTEX connection error");
                    break;
                }
            };

            let status = resp.status();
            if status != StatusCode::OK {
                let body = resp.text().await.unwrap_or_default();
                error!(url = %url, status = %status, body = %body, "VTEX listing returned an error status");
                break;
            }

            let data: Value = match resp.json().await {
                Ok(data) => data,
                Err(e) => {
                    error!(url = %url, error = %e, "VTEX listing body is not valid JSON");
                    break;
                }
            };

            if let Some(Value::Array(list)) = data.get("list") {
                debug!(page, count = list.len(), "collected VTEX page");
                all.extend(list.iter().cloned());
            }

            match next_page(&data) {
                PageStep::Next => page += 1,
                PageStep::Done => break,
                PageStep::Unknown => {
                    warn!(url = %url, "VTEX response has no paging.currentPage; stopping");
                    break;
                }
            }
        }

        info!(url = base_url, last_page = page, total = all.len(), "finished VTEX listing");
        all
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PageStep {
    Next,
    Done,
    Unknown,
}

fn next_page(data: &Value) -> PageStep {
    let paging = data.get("paging");
    let current = paging
        .and_then(|p| p.get("currentPage"))
        .and_then(Value::as_i64);
    let pages = paging
        .and_then(|p| p.get("pages"))
        .and_then(Value::as_i64)
        .unwrap_or(1);
    match current {
        Some(current) if current >= pages => PageStep::Done,
        Some(_) => PageStep::Next,
        None => PageStep::Unknown,
    }
}

fn page_url(base_url: &str, params: &[(String, String)], page: u64) -> Result<Url, SyncError> {
    let page = page.to_string();
    let pairs = params
        .iter()
        .filter(|(k, _)| k != "page")
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain(std::iter::once(("page", page.as_str())));
    Ok(Url::parse_with_params(base_url, pairs)?)
}
