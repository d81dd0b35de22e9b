use crate::column::{Column, ColumnKind};
use crate::parse::json_kind;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use thiserror::Error;

/// One converted value, ready to be fed to the column type's input function.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl Cell {
    pub fn to_pg_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Integer(v) => Some(v.to_string()),
            Cell::Float(v) => Some(v.to_string()),
            Cell::Boolean(v) => Some(v.to_string()),
            Cell::Text(v) => Some(v.clone()),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("row is a JSON {0}, not an object")]
    NotAnObject(&'static str),
    #[error("column \"{column}\" expects {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("column \"{column}\" value {value} is out of range")]
    OutOfRange { column: String, value: String },
    #[error("column \"{column}\" value \"{value}\" is not a valid {expected}")]
    BadFormat {
        column: String,
        expected: &'static str,
        value: String,
    },
    #[error("column \"{column}\" value exceeds {max} characters")]
    TooLong { column: String, max: usize },
    #[error("value rejected by PostgreSQL: {0}")]
    Rejected(String),
}

/// Converts one generated JSON object into cells, one per column in
/// declaration order. Missing keys and JSON `null` become `Cell::Null`;
/// keys that match no column are ignored.
pub fn convert_row(value: &Value, columns: &[Column]) -> Result<Vec<Cell>, RowError> {
    let object = match value {
        Value::Object(o) => o,
        other => return Err(RowError::NotAnObject(json_kind(other))),
    };
    columns
        .iter()
        .map(|column| match object.get(&column.name) {
            None | Some(Value::Null) => Ok(Cell::Null),
            Some(v) => convert_value(v, column),
        })
        .collect()
}

fn convert_value(value: &Value, column: &Column) -> Result<Cell, RowError> {
    let mismatch = |expected: &'static str| RowError::TypeMismatch {
        column: column.name.clone(),
        expected,
        found: describe(value),
    };
    match column.kind {
        ColumnKind::SmallInt | ColumnKind::Integer | ColumnKind::BigInt => {
            let n = match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => n,
                _ => return Err(mismatch("integer")),
            };
            let (min, max) = column.kind.integer_range().unwrap_or((i64::MIN, i64::MAX));
            match n.as_i64() {
                Some(v) if v >= min && v <= max => Ok(Cell::Integer(v)),
                _ => Err(RowError::OutOfRange {
                    column: column.name.clone(),
                    value: n.to_string(),
                }),
            }
        }
        ColumnKind::Float => match value.as_f64() {
            Some(v) if value.is_number() => Ok(Cell::Float(v)),
            _ => Err(mismatch("number")),
        },
        // the number's own digits, not its f64 approximation
        ColumnKind::Numeric => match value {
            Value::Number(n) => Ok(Cell::Text(n.to_string())),
            _ => Err(mismatch("number")),
        },
        ColumnKind::Boolean => match value {
            Value::Bool(b) => Ok(Cell::Boolean(*b)),
            _ => Err(mismatch("boolean")),
        },
        ColumnKind::Date => {
            let s = value.as_str().ok_or_else(|| mismatch("string"))?;
            if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() {
                return Err(bad_format(column, "date (YYYY-MM-DD)", s));
            }
            Ok(Cell::Text(s.to_string()))
        }
        ColumnKind::Timestamp => {
            let s = value.as_str().ok_or_else(|| mismatch("string"))?;
            if !is_iso8601_timestamp(s) {
                return Err(bad_format(column, "ISO 8601 timestamp", s));
            }
            Ok(Cell::Text(s.to_string()))
        }
        ColumnKind::Text => {
            let s = value.as_str().ok_or_else(|| mismatch("string"))?;
            if let Some(max) = column.max_chars {
                if s.chars().count() > max {
                    return Err(RowError::TooLong {
                        column: column.name.clone(),
                        max,
                    });
                }
            }
            Ok(Cell::Text(s.to_string()))
        }
        ColumnKind::Other => match value {
            Value::String(s) => Ok(Cell::Text(s.clone())),
            other => Ok(Cell::Text(other.to_string())),
        },
    }
}

fn bad_format(column: &Column, expected: &'static str, value: &str) -> RowError {
    RowError::BadFormat {
        column: column.name.clone(),
        expected,
        value: value.to_string(),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Number(n) if n.is_f64() => "float",
        other => json_kind(other),
    }
}

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn is_iso8601_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NAIVE_TIMESTAMP_FORMATS
            .iter()
            .any(|f| NaiveDateTime::parse_from_str(s, f).is_ok())
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

#[derive(Debug)]
pub struct Skipped {
    pub index: usize,
    pub error: RowError,
    pub raw: String,
}

#[derive(Debug, Default)]
pub struct Materialized<T = Vec<Cell>> {
    pub rows: Vec<T>,
    pub skipped: Vec<Skipped>,
}

/// Converts generated elements in order until `max_rows` rows are kept.
///
/// Each converted row is handed to `accept`, which may still refuse it (the
/// database's own input functions are stricter than the checks above).
/// Refused and invalid elements are set aside instead of failing the whole
/// batch, and do not count toward `max_rows`. Elements after the last kept
/// row are not looked at.
pub fn materialize<T>(
    values: Vec<Value>,
    columns: &[Column],
    max_rows: usize,
    mut accept: impl FnMut(Vec<Cell>) -> Result<T, RowError>,
) -> Materialized<T> {
    let mut result = Materialized {
        rows: Vec::new(),
        skipped: Vec::new(),
    };
    for (index, value) in values.into_iter().enumerate() {
        if result.rows.len() >= max_rows {
            break;
        }
        match convert_row(&value, columns).and_then(&mut accept) {
            Ok(row) => result.rows.push(row),
            Err(error) => result.skipped.push(Skipped {
                index,
                error,
                raw: value.to_string(),
            }),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("id", "integer"),
            Column::new("score", "double precision"),
            Column::new("active", "boolean"),
            Column::new("name", "character varying(8)"),
            Column::new("born", "date"),
            Column::new("seen", "timestamp with time zone"),
            Column::new("meta", "jsonb"),
        ]
    }

    #[test]
    fn test_full_row() {
        let row = convert_row(
            &json!({
                "id": 7,
                "score": 2,
                "active": true,
                "name": "Ada",
                "born": "1815-12-10",
                "seen": "2024-03-01T12:30:00Z",
                "meta": {"tags": ["x"]},
                "unused": 1
            }),
            &columns(),
        )
        .unwrap();
        assert_eq!(
            row,
            vec![
                Cell::Integer(7),
                Cell::Float(2.0),
                Cell::Boolean(true),
                Cell::Text("Ada".to_string()),
                Cell::Text("1815-12-10".to_string()),
                Cell::Text("2024-03-01T12:30:00Z".to_string()),
                Cell::Text(r#"{"tags":["x"]}"#.to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_and_null_become_null() {
        let row = convert_row(&json!({"id": null}), &columns()).unwrap();
        assert!(row.iter().all(|c| *c == Cell::Null));
    }

    #[test]
    fn test_integer_rejects_float_and_string() {
        let cols = vec![Column::new("id", "int4")];
        assert_eq!(
            convert_row(&json!({"id": 1.5}), &cols),
            Err(RowError::TypeMismatch {
                column: "id".to_string(),
                expected: "integer",
                found: "float",
            })
        );
        assert!(convert_row(&json!({"id": "1"}), &cols).is_err());
        assert!(convert_row(&json!({"id": true}), &cols).is_err());
    }

    #[test]
    fn test_booleans_are_not_numbers() {
        let cols = vec![Column::new("n", "bigint"), Column::new("x", "real")];
        assert!(matches!(
            convert_row(&json!({"n": true}), &cols),
            Err(RowError::TypeMismatch { expected: "integer", found: "boolean", .. })
        ));
        assert!(matches!(
            convert_row(&json!({"x": false}), &cols),
            Err(RowError::TypeMismatch { expected: "number", found: "boolean", .. })
        ));
    }

    #[test]
    fn test_integer_width() {
        let cols = vec![Column::new("n", "smallint")];
        assert!(convert_row(&json!({"n": 32767}), &cols).is_ok());
        assert!(matches!(
            convert_row(&json!({"n": 40000}), &cols),
            Err(RowError::OutOfRange { .. })
        ));
        let cols = vec![Column::new("n", "bigint")];
        assert!(matches!(
            convert_row(&json!({"n": u64::MAX}), &cols),
            Err(RowError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_bad_dates_and_timestamps() {
        let cols = vec![Column::new("d", "date"), Column::new("t", "timestamp")];
        assert!(convert_row(&json!({"d": "10/12/1815"}), &cols).is_err());
        assert!(convert_row(&json!({"t": "yesterday"}), &cols).is_err());
        assert!(convert_row(&json!({"t": "2024-03-01 12:30:00.125"}), &cols).is_ok());
        assert!(convert_row(&json!({"t": "2024-03-01"}), &cols).is_ok());
    }

    #[test]
    fn test_varchar_length() {
        let cols = vec![Column::new("name", "character varying(3)")];
        assert!(convert_row(&json!({"name": "Bob"}), &cols).is_ok());
        assert_eq!(
            convert_row(&json!({"name": "Robert"}), &cols),
            Err(RowError::TooLong {
                column: "name".to_string(),
                max: 3,
            })
        );
    }

    #[test]
    fn test_non_object_row() {
        assert_eq!(
            convert_row(&json!([1, 2]), &columns()),
            Err(RowError::NotAnObject("array"))
        );
    }

    #[test]
    fn test_materialize_skips_and_truncates() {
        let cols = vec![Column::new("id", "integer")];
        let values = vec![
            json!({"id": 1}),
            json!("oops"),
            json!({"id": "three"}),
            json!({"id": 2}),
            json!({"id": 4}),
        ];
        let m = materialize(values, &cols, 2, Ok);
        assert_eq!(m.rows, vec![vec![Cell::Integer(1)], vec![Cell::Integer(2)]]);
        assert_eq!(m.skipped.len(), 2);
        assert_eq!(m.skipped[0].index, 1);
        assert_eq!(m.skipped[0].raw, "\"oops\"");
        assert_eq!(m.skipped[1].index, 2);
    }

    #[test]
    fn test_materialize_refused_rows_do_not_count() {
        let cols = vec![Column::new("u", "uuid")];
        let values = vec![
            json!({"u": "not-a-uuid"}),
            json!({"u": "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"}),
            json!({"u": "b0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"}),
        ];
        let m = materialize(values, &cols, 1, |row| match &row[0] {
            Cell::Text(s) if s.starts_with("not") => Err(RowError::Rejected(format!(
                "invalid input syntax for type uuid: \"{s}\""
            ))),
            _ => Ok(row),
        });
        assert_eq!(
            m.rows,
            vec![vec![Cell::Text("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11".to_string())]]
        );
        assert_eq!(m.skipped.len(), 1);
        assert_eq!(m.skipped[0].index, 0);
        assert_eq!(
            m.skipped[0].error.to_string(),
            "value rejected by PostgreSQL: invalid input syntax for type uuid: \"not-a-uuid\""
        );
    }

    #[test]
    fn test_numeric_keeps_digits() {
        let cols = vec![Column::new("n", "numeric(20,2)")];
        let value: Value = serde_json::from_str(r#"{"n": 12345678901234567.89}"#).unwrap();
        assert_eq!(
            convert_row(&value, &cols),
            Ok(vec![Cell::Text("12345678901234567.89".to_string())])
        );
        assert!(convert_row(&json!({"n": "12"}), &cols).is_err());
    }

    #[test]
    fn test_pg_text() {
        assert_eq!(Cell::Null.to_pg_text(), None);
        assert_eq!(Cell::Integer(-3).to_pg_text().as_deref(), Some("-3"));
        assert_eq!(Cell::Float(2.5).to_pg_text().as_deref(), Some("2.5"));
        assert_eq!(Cell::Boolean(false).to_pg_text().as_deref(), Some("false"));
    }
}
