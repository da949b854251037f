//! SQL text builders for procedure calls.
//!
//! Procedure, parameter, table-type and column names are checked here
//! before they are templated into T-SQL. Values never are: every value is
//! sent as a bound `@Pn` parameter.

use crate::error::SyncError;
use serde_json::Value;
use std::borrow::Cow;
use tiberius::Query;

/// SQL Server rejects requests with more bound parameters than this.
pub const MAX_BOUND_PARAMS: usize = 2100;
/// Row-constructor limit of a single `INSERT ... VALUES`.
const MAX_VALUES_ROWS: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl SqlParam {
    /// Map a table cell onto a bindable value. Nested JSON is sent as text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn bind_to<'a>(&self, query: &mut Query<'a>) {
        match self {
            Self::Int(i) => query.bind(*i),
            Self::Float(f) => query.bind(*f),
            Self::Text(s) => query.bind(s.clone()),
            Self::Bool(b) => query.bind(*b),
            Self::Null => query.bind(Option::<String>::None),
        }
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Rows for a table-valued parameter. Every row must have one cell per
/// column, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TvpRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlParam>>,
}

impl TvpRows {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<SqlParam>) {
        self.rows.push(row);
    }

    fn bound_len(&self) -> usize {
        self.columns.len() * self.rows.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn query(&self) -> Query<'_> {
        let mut query = Query::new(Cow::Borrowed(self.sql.as_str()));
        for param in &self.params {
            param.bind_to(&mut query);
        }
        query
    }
}

/// Accepts `name`, `schema.name`, `[db].[schema].[name]` and so on, up to
/// four parts.
pub fn validate_object_name(name: &str) -> Result<&str, SyncError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SyncError::validation("object name must not be empty"));
    }
    let parts = split_qualified(trimmed)
        .ok_or_else(|| SyncError::validation(format!("invalid object name '{trimmed}'")))?;
    if parts.len() > 4 || !parts.iter().all(|p| is_name_part(p)) {
        return Err(SyncError::validation(format!(
            "invalid object name '{trimmed}'"
        )));
    }
    Ok(trimmed)
}

/// Parameter names with or without the leading `@`. Returns the bare name.
pub fn validate_param_name(name: &str) -> Result<&str, SyncError> {
    let bare = name.trim().trim_start_matches('@');
    if is_plain_identifier(bare) {
        Ok(bare)
    } else {
        Err(SyncError::validation(format!(
            "invalid parameter name '{name}'"
        )))
    }
}

/// `EXEC <name> @P1, @P2, ...`
pub fn exec_positional(name: &str, params: Vec<SqlParam>) -> Result<Statement, SyncError> {
    let name = validate_object_name(name)?;
    check_param_count(params.len())?;
    let placeholders = (1..=params.len())
        .map(|i| format!("@P{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = if placeholders.is_empty() {
        format!("EXEC {name}")
    } else {
        format!("EXEC {name} {placeholders}")
    };
    Ok(Statement { sql, params })
}

/// `EXEC <name> @a = @P1, @b = @P2, ...`
pub fn exec_named(name: &str, params: Vec<(String, SqlParam)>) -> Result<Statement, SyncError> {
    let name = validate_object_name(name)?;
    check_param_count(params.len())?;
    let mut assignments = Vec::with_capacity(params.len());
    let mut values = Vec::with_capacity(params.len());
    for (i, (param, value)) in params.into_iter().enumerate() {
        let param = validate_param_name(&param)?;
        assignments.push(format!("@{param} = @P{}", i + 1));
        values.push(value);
    }
    let sql = if assignments.is_empty() {
        format!("EXEC {name}")
    } else {
        format!("EXEC {name} {}", assignments.join(", "))
    };
    Ok(Statement { sql, params: values })
}

/// Batch that declares a table variable of `table_type`, fills it with
/// bound values and passes it to the procedure as `@<param>`:
///
/// ```sql
/// DECLARE @tvp dbo.SkuList;
/// INSERT INTO @tvp ([sku], [qty]) VALUES (@P1, @P2), (@P3, @P4);
/// EXEC dbo.stpr_Load @items = @tvp;
/// ```
pub fn exec_tvp(
    name: &str,
    param: &str,
    table_type: &str,
    tvp: &TvpRows,
) -> Result<Statement, SyncError> {
    let name = validate_object_name(name)?;
    let param = validate_param_name(param)?;
    let table_type = validate_object_name(table_type)?;
    if tvp.columns.is_empty() {
        return Err(SyncError::validation("table-valued parameter has no columns"));
    }
    if let Some(i) = tvp.rows.iter().position(|r| r.len() != tvp.columns.len()) {
        return Err(SyncError::validation(format!(
            "table-valued parameter row {i} has {} cells, expected {}",
            tvp.rows[i].len(),
            tvp.columns.len()
        )));
    }
    check_param_count(tvp.bound_len())?;

    let columns = tvp
        .columns
        .iter()
        .map(|c| quote_column(c))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");

    let mut sql = format!("DECLARE @tvp {table_type};\n");
    let mut next = 1usize;
    for chunk in tvp.rows.chunks(MAX_VALUES_ROWS) {
        let tuples = chunk
            .iter()
            .map(|row| {
                let cells = (0..row.len())
                    .map(|offset| format!("@P{}", next + offset))
                    .collect::<Vec<_>>()
                    .join(", ");
                next += row.len();
                format!("({cells})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!("INSERT INTO @tvp ({columns}) VALUES {tuples};\n"));
    }
    sql.push_str(&format!("EXEC {name} @{param} = @tvp;"));

    let params = tvp.rows.iter().flatten().cloned().collect();
    Ok(Statement { sql, params })
}

fn check_param_count(count: usize) -> Result<(), SyncError> {
    if count > MAX_BOUND_PARAMS {
        return Err(SyncError::validation(format!(
            "{count} bound values exceed the limit of {MAX_BOUND_PARAMS}"
        )));
    }
    Ok(())
}

fn quote_column(column: &str) -> Result<String, SyncError> {
    let column = column.trim();
    if column.is_empty() || column.contains(['[', ']']) {
        return Err(SyncError::validation(format!(
            "invalid column name '{column}'"
        )));
    }
    Ok(format!("[{column}]"))
}

/// Split on dots that are outside brackets. `None` on unbalanced brackets.
fn split_qualified(name: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_brackets = false;
    for (i, c) in name.char_indices() {
        match c {
            '[' if !in_brackets => in_brackets = true,
            ']' if in_brackets => in_brackets = false,
            '.' if !in_brackets => {
                parts.push(&name[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_brackets {
        return None;
    }
    parts.push(&name[start..]);
    Some(parts)
}

fn is_name_part(part: &str) -> bool {
    match part.strip_prefix('[').and_then(|p| p.strip_suffix(']')) {
        Some(inner) => !inner.is_empty() && !inner.contains(['[', ']']),
        None => is_plain_identifier(part),
    }
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '#' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '#' | '@'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_qualified_and_bracketed_names() {
        for name in [
            "stpr_Products",
            "dbo.stpr_Products",
            "[dbo].[stpr_Products]",
            "[Sales DB].dbo.[stpr Products]",
        ] {
            assert!(validate_object_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_injection_shaped_names() {
        for name in [
            "",
            "dbo.stpr; DROP TABLE x",
            "stpr--",
            "[dbo].[unterminated",
            "a.b.c.d.e",
            "dbo..stpr",
            "1stpr",
        ] {
            assert!(validate_object_name(name).is_err(), "{name}");
        }
    }

    #[test]
    fn positional_exec_binds_every_value() {
        let stmt = exec_positional("[dbo].[stpr_Stock]", vec![7.into(), "B-1".into()]).unwrap();
        assert_eq!(stmt.sql, "EXEC [dbo].[stpr_Stock] @P1, @P2");
        assert_eq!(stmt.params, vec![SqlParam::Int(7), SqlParam::Text("B-1".into())]);

        let bare = exec_positional("dbo.stpr_Stock", Vec::new()).unwrap();
        assert_eq!(bare.sql, "EXEC dbo.stpr_Stock");
    }

    #[test]
    fn named_exec_assigns_by_name() {
        let stmt = exec_named(
            "dbo.stpr_Orders",
            vec![
                ("@days".to_string(), 8.into()),
                ("store".to_string(), "main".into()),
            ],
        )
        .unwrap();
        assert_eq!(stmt.sql, "EXEC dbo.stpr_Orders @days = @P1, @store = @P2");
        assert_eq!(stmt.params.len(), 2);

        let err = exec_named("dbo.x", vec![("a b".to_string(), SqlParam::Null)]).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn tvp_batch_declares_fills_and_passes_table() {
        let mut tvp = TvpRows::new(vec!["sku".into(), "qty".into()]);
        tvp.push(vec!["A".into(), 1.into()]);
        tvp.push(vec!["B".into(), 2.into()]);
        let stmt = exec_tvp("dbo.stpr_Load", "@items", "dbo.SkuList", &tvp).unwrap();
        assert_eq!(
            stmt.sql,
            "DECLARE @tvp dbo.SkuList;\n\
             INSERT INTO @tvp ([sku], [qty]) VALUES (@P1, @P2), (@P3, @P4);\n\
             EXEC dbo.stpr_Load @items = @tvp;"
        );
        assert_eq!(stmt.params[2], SqlParam::Text("B".into()));
    }

    #[test]
    fn tvp_splits_inserts_at_row_limit() {
        let mut tvp = TvpRows::new(vec!["id".into()]);
        for i in 0..1500 {
            tvp.push(vec![SqlParam::Int(i)]);
        }
        let stmt = exec_tvp("dbo.p", "ids", "dbo.IdList", &tvp).unwrap();
        assert_eq!(stmt.sql.matches("INSERT INTO @tvp").count(), 2);
        assert!(stmt.sql.contains("(@P1001)"));
        assert_eq!(stmt.params.len(), 1500);
    }

    #[test]
    fn tvp_rejects_ragged_rows_and_oversized_batches() {
        let mut ragged = TvpRows::new(vec!["a".into(), "b".into()]);
        ragged.push(vec![SqlParam::Null]);
        assert!(exec_tvp("dbo.p", "t", "dbo.T", &ragged).is_err());

        let mut big = TvpRows::new(vec!["a".into(), "b".into(), "c".into()]);
        for _ in 0..701 {
            big.push(vec![SqlParam::Null, SqlParam::Null, SqlParam::Null]);
        }
        assert!(exec_tvp("dbo.p", "t", "dbo.T", &big).is_err());
    }

    #[test]
    fn json_cells_map_to_params() {
        assert_eq!(SqlParam::from_json(&json!(3)), SqlParam::Int(3));
        assert_eq!(SqlParam::from_json(&json!(2.5)), SqlParam::Float(2.5));
        assert_eq!(SqlParam::from_json(&json!(null)), SqlParam::Null);
        assert_eq!(SqlParam::from_json(&json!([1])), SqlParam::Text("[1]".into()));
    }
}
