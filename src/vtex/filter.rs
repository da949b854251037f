use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_ORDER_BY: &str = "authorizedDate,desc";
pub const DEFAULT_PER_PAGE: u32 = 100;
pub const DEFAULT_STATUSES: &str = "ready-for-handling,handling";

/// `f_creationDate` value covering `days_back` days up to `now`.
///
/// The start bound is `now - days_back` at 02:00:00.000Z and the end bound
/// is `now`'s date at 01:59:59.999Z. The end time of day is fixed and does
/// not follow `now`, so a range built at noon ends ten hours before `now`.
pub fn build_date_range_filter(days_back: i64, now: DateTime<Utc>) -> String {
    let start = now - Duration::days(days_back);
    format!(
        "creationDate:[{} TO {}]",
        start.format("%Y-%m-%dT02:00:00.000Z"),
        now.format("%Y-%m-%dT01:59:59.999Z")
    )
}

pub fn build_date_range_filter_now(days_back: i64) -> String {
    build_date_range_filter(days_back, Utc::now())
}

/// Query parameters for `GET /api/oms/pvt/orders/`. The page number is
/// added by the pager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderListParams {
    pub order_by: String,
    pub per_page: u32,
    pub statuses: String,
    pub creation_date: Option<String>,
}

impl OrderListParams {
    pub fn last_days(days_back: i64) -> Self {
        Self {
            creation_date: Some(build_date_range_filter_now(days_back)),
            ..Self::default()
        }
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("orderBy".to_string(), self.order_by.clone()),
            ("per_page".to_string(), self.per_page.to_string()),
            ("f_status".to_string(), self.statuses.clone()),
        ];
        if let Some(range) = &self.creation_date {
            query.push(("f_creationDate".to_string(), range.clone()));
        }
        query
    }
}

impl Default for OrderListParams {
    fn default() -> Self {
        Self {
            order_by: DEFAULT_ORDER_BY.to_string(),
            per_page: DEFAULT_PER_PAGE,
            statuses: DEFAULT_STATUSES.to_string(),
            creation_date: None,
        }
    }
}
