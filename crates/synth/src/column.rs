/// Coarse classification of a column type, deciding which JSON values are
/// accepted for it and how it is described to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    SmallInt,
    Integer,
    BigInt,
    Float,
    Numeric,
    Boolean,
    Date,
    Timestamp,
    Text,
    Other,
}

impl ColumnKind {
    /// Classifies a type name as printed by `format_type` or written in DDL,
    /// e.g. `integer`, `int8`, `character varying(20)`,
    /// `timestamp(3) with time zone`.
    pub fn from_type_name(type_name: &str) -> Self {
        let (base, _) = split_typmod(type_name);
        match base.as_str() {
            "smallint" | "int2" => ColumnKind::SmallInt,
            "integer" | "int" | "int4" => ColumnKind::Integer,
            "bigint" | "int8" => ColumnKind::BigInt,
            "real" | "float4" | "double precision" | "float8" => ColumnKind::Float,
            "numeric" | "decimal" => ColumnKind::Numeric,
            "boolean" | "bool" => ColumnKind::Boolean,
            "date" => ColumnKind::Date,
            "timestamp"
            | "timestamptz"
            | "timestamp without time zone"
            | "timestamp with time zone" => ColumnKind::Timestamp,
            "text" | "varchar" | "character varying" | "char" | "character" | "bpchar"
            | "name" => ColumnKind::Text,
            _ => ColumnKind::Other,
        }
    }

    /// JSON type description used in the schema instruction.
    pub fn json_hint(self) -> &'static str {
        match self {
            ColumnKind::SmallInt | ColumnKind::Integer | ColumnKind::BigInt => "number (integer)",
            ColumnKind::Float | ColumnKind::Numeric => "number (float)",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Date => "string (YYYY-MM-DD format)",
            ColumnKind::Timestamp => "string (ISO 8601 format)",
            ColumnKind::Text | ColumnKind::Other => "string",
        }
    }

    /// Inclusive value range for integer kinds.
    pub fn integer_range(self) -> Option<(i64, i64)> {
        match self {
            ColumnKind::SmallInt => Some((i16::MIN as i64, i16::MAX as i64)),
            ColumnKind::Integer => Some((i32::MIN as i64, i32::MAX as i64)),
            ColumnKind::BigInt => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub type_name: String,
    pub kind: ColumnKind,
    /// Length bound of `varchar(n)` / `char(n)` columns.
    pub max_chars: Option<usize>,
}

impl Column {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let kind = ColumnKind::from_type_name(&type_name);
        let max_chars = match kind {
            ColumnKind::Text => {
                let (base, typmod) = split_typmod(&type_name);
                match base.as_str() {
                    "varchar" | "character varying" | "char" | "character" | "bpchar" => {
                        typmod.and_then(|m| m.trim().parse::<usize>().ok())
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        Self {
            name: name.into(),
            type_name,
            kind,
            max_chars,
        }
    }
}

/// Splits `character varying(20)` into (`character varying`, `Some("20")`).
/// The base name is lowercased with whitespace collapsed.
fn split_typmod(type_name: &str) -> (String, Option<String>) {
    let lower = type_name.trim().to_ascii_lowercase();
    let (base, typmod) = match (lower.find('('), lower.find(')')) {
        (Some(open), Some(close)) if open < close => {
            let base = format!("{}{}", &lower[..open], &lower[close + 1..]);
            (base, Some(lower[open + 1..close].to_string()))
        }
        _ => (lower, None),
    };
    let base = base.split_whitespace().collect::<Vec<_>>().join(" ");
    (base, typmod)
}
