//! Row decoding
//!
//! Statements run through the text protocol, so every cell arrives as text and is
//! converted back to a JSON-native value using the column's reported type.

use crate::executor::{Record, RowSet};
use serde_json::Value;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};
use tracing::debug;

const INTEGER_TYPES: &[&str] = &[
    "TINYINT", "SMALLINT", "MEDIUMINT", "INT", "INTEGER", "BIGINT", "YEAR", "INT2", "INT4",
    "INT8", "OID",
];
const NUMERIC_TYPES: &[&str] = &[
    "FLOAT", "DOUBLE", "REAL", "DECIMAL", "NUMERIC", "FLOAT4", "FLOAT8",
];
const BOOLEAN_TYPES: &[&str] = &["BOOL", "BOOLEAN"];
const JSON_TYPES: &[&str] = &["JSON", "JSONB"];

pub fn mysql_row_set(rows: &[MySqlRow]) -> RowSet {
    let columns = rows.first().map(column_names).unwrap_or_default();
    let records = rows
        .iter()
        .map(|row| {
            decode_row(row, &columns, |row, idx| {
                row.try_get_unchecked::<Option<String>, _>(idx)
                    .or_else(|_| {
                        row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)
                            .map(|bytes| bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
                    })
            })
        })
        .collect();
    RowSet::new(columns, records)
}

pub fn pg_row_set(rows: &[PgRow]) -> RowSet {
    let columns = rows.first().map(column_names).unwrap_or_default();
    let records = rows
        .iter()
        .map(|row| decode_row(row, &columns, |row, idx| row.try_get_unchecked::<Option<String>, _>(idx)))
        .collect();
    RowSet::new(columns, records)
}

fn column_names<R: Row>(row: &R) -> Vec<String> {
    unique_names(row.columns().iter().map(|c| c.name()))
}

/// Record keys for the result columns; a repeated name such as the two `name`
/// columns of `SELECT e.name, d.name` becomes `name`, `name_2`.
pub fn unique_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for name in names {
        let mut key = name.to_string();
        let mut n = 1;
        while keys.contains(&key) {
            n += 1;
            key = format!("{}_{}", name, n);
        }
        if n > 1 {
            debug!(column = name, key = %key, "Renamed duplicate result column");
        }
        keys.push(key);
    }
    keys
}

fn decode_row<R, F>(row: &R, keys: &[String], text_at: F) -> Record
where
    R: Row,
    F: Fn(&R, usize) -> Result<Option<String>, sqlx::Error>,
{
    let mut record = Record::new();
    for ((idx, column), key) in row.columns().iter().enumerate().zip(keys) {
        let type_name = column.type_info().name().to_string();
        let value = match text_at(row, idx) {
            Ok(text) => typed_value(&type_name, text),
            Err(e) => {
                debug!(column = column.name(), error = %e, "Undecodable column value");
                Value::Null
            }
        };
        record.insert(key.clone(), value);
    }
    record
}

/// Convert the textual form of a cell into a JSON value based on its SQL type.
pub fn typed_value(type_name: &str, text: Option<String>) -> Value {
    let text = match text {
        Some(t) => t,
        None => return Value::Null,
    };
    let upper = type_name.to_uppercase();
    let base = upper.split_whitespace().next().unwrap_or_default();

    if INTEGER_TYPES.contains(&base) {
        if let Ok(n) = text.trim().parse::<i64>() {
            return Value::from(n);
        }
        if let Ok(n) = text.trim().parse::<u64>() {
            return Value::from(n);
        }
    } else if NUMERIC_TYPES.contains(&base) {
        if let Ok(n) = text.trim().parse::<serde_json::Number>() {
            return Value::Number(n);
        }
    } else if BOOLEAN_TYPES.contains(&base) {
        match text.trim().to_lowercase().as_str() {
            "t" | "true" | "1" => return Value::Bool(true),
            "f" | "false" | "0" => return Value::Bool(false),
            _ => {}
        }
    } else if JSON_TYPES.contains(&base) {
        if let Ok(v) = serde_json::from_str::<Value>(&text) {
            return v;
        }
    }

    Value::String(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integers_keep_numeric_type() {
        assert_eq!(typed_value("BIGINT", Some("42".into())), json!(42));
        assert_eq!(typed_value("INT4", Some("-7".into())), json!(-7));
        assert_eq!(
            typed_value("BIGINT UNSIGNED", Some("18446744073709551615".into())),
            json!(18446744073709551615u64)
        );
    }

    #[test]
    fn test_decimals_become_numbers() {
        assert_eq!(typed_value("DECIMAL", Some("12.50".into())), json!(12.5));
        assert_eq!(typed_value("NUMERIC", Some("3".into())), json!(3));
    }

    #[test]
    fn test_booleans_from_either_backend() {
        assert_eq!(typed_value("BOOL", Some("t".into())), json!(true));
        assert_eq!(typed_value("BOOLEAN", Some("0".into())), json!(false));
    }

    #[test]
    fn test_json_and_text_columns() {
        assert_eq!(
            typed_value("JSONB", Some(r#"{"a":1}"#.into())),
            json!({"a": 1})
        );
        assert_eq!(typed_value("VARCHAR", Some("42".into())), json!("42"));
        assert_eq!(typed_value("DATE", Some("2024-01-31".into())), json!("2024-01-31"));
    }

    #[test]
    fn test_duplicate_column_names_get_distinct_keys() {
        assert_eq!(
            unique_names(["name", "name", "id", "name"]),
            vec!["name", "name_2", "id", "name_3"]
        );
        assert_eq!(unique_names(["a", "a_2", "a"]), vec!["a", "a_2", "a_3"]);
    }

    #[test]
    fn test_null_and_unparseable() {
        assert_eq!(typed_value("INT", None), Value::Null);
        assert_eq!(typed_value("INT", Some("n/a".into())), json!("n/a"));
    }
}
