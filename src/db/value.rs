use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Number, Value};
use tiberius::numeric::Numeric;
use tiberius::{ColumnData, FromSql, Row};

/// Convert one result row into table cells, in column order.
pub fn row_values(row: Row) -> Vec<Value> {
    row.into_iter().map(column_value).collect()
}

/// SQL value -> JSON cell. Decimals keep their exact text form, temporal
/// values are rendered as ISO-like text, binary as `0x`-prefixed hex.
pub fn column_value(data: ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I16(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I32(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I64(v) => v.map_or(Value::Null, Value::from),
        ColumnData::F32(v) => float(v.map(f64::from)),
        ColumnData::F64(v) => float(v),
        ColumnData::Bit(v) => v.map_or(Value::Null, Value::Bool),
        ColumnData::String(v) => v.map_or(Value::Null, |s| Value::String(s.into_owned())),
        ColumnData::Guid(v) => v.map_or(Value::Null, |g| Value::String(g.to_string())),
        ColumnData::Binary(v) => v.map_or(Value::Null, |b| Value::String(hex(&b))),
        ColumnData::Numeric(v) => match v {
            Some(n) if n.scale() == 0 => i64::try_from(n.value())
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(n.value().to_string())),
            Some(n) => Value::String(decimal_text(n)),
            None => Value::Null,
        },
        ColumnData::Xml(v) => v.map_or(Value::Null, |x| Value::String(x.into_owned().into_string())),
        ref temporal @ (ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_)) => text(NaiveDateTime::from_sql(temporal)),
        ref date @ ColumnData::Date(_) => text(NaiveDate::from_sql(date)),
        ref time @ ColumnData::Time(_) => text(NaiveTime::from_sql(time)),
        ref offset @ ColumnData::DateTimeOffset(_) => {
            match DateTime::<FixedOffset>::from_sql(offset) {
                Ok(Some(dt)) => Value::String(dt.to_rfc3339()),
                _ => Value::Null,
            }
        }
    }
}

fn float(v: Option<f64>) -> Value {
    v.and_then(Number::from_f64).map_or(Value::Null, Value::Number)
}

/// `Numeric`'s own `Display` misplaces the sign of negative fractions.
fn decimal_text(n: Numeric) -> String {
    let scale = 10u128.pow(u32::from(n.scale()));
    let abs = n.value().unsigned_abs();
    let sign = if n.value() < 0 { "-" } else { "" };
    format!(
        "{sign}{}.{:0width$}",
        abs / scale,
        abs % scale,
        width = usize::from(n.scale())
    )
}

fn text<T: ToString>(converted: tiberius::Result<Option<T>>) -> Value {
    match converted {
        Ok(Some(v)) => Value::String(v.to_string()),
        _ => Value::Null,
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::borrow::Cow;

    #[test]
    fn scalars_map_to_json() {
        assert_eq!(column_value(ColumnData::I32(Some(5))), json!(5));
        assert_eq!(column_value(ColumnData::I64(None)), Value::Null);
        assert_eq!(column_value(ColumnData::Bit(Some(true))), json!(true));
        assert_eq!(
            column_value(ColumnData::String(Some(Cow::Borrowed("SKU-1")))),
            json!("SKU-1")
        );
        assert_eq!(column_value(ColumnData::F64(Some(f64::NAN))), Value::Null);
    }

    #[test]
    fn decimals_keep_precision() {
        let qty = Numeric::new_with_scale(1250, 2);
        assert_eq!(column_value(ColumnData::Numeric(Some(qty))), json!("12.50"));
        let whole = Numeric::new_with_scale(42, 0);
        assert_eq!(column_value(ColumnData::Numeric(Some(whole))), json!(42));
        let negative = Numeric::new_with_scale(-1205, 2);
        assert_eq!(column_value(ColumnData::Numeric(Some(negative))), json!("-12.05"));
    }

    #[test]
    fn binary_is_hex() {
        let bytes = ColumnData::Binary(Some(Cow::Owned(vec![0x0a, 0xff])));
        assert_eq!(column_value(bytes), json!("0x0AFF"));
    }
}
