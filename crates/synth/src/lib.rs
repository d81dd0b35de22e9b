//! Turns chat-completion replies into typed rows for a declared table.
pub mod column;
pub mod config;
pub mod parse;
pub mod row;
pub mod schema;

pub use column::{Column, ColumnKind};
pub use config::{check_option, ConfigError, Fallback, OptionCatalog, TableConfig};
pub use parse::{extract_rows, ParseError};
pub use row::{convert_row, materialize, Cell, Materialized, RowError, Skipped};
pub use schema::schema_instruction;
