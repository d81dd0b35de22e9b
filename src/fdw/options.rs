use crate::error::OpenAiFdwResult;
use crate::gucs::client::fallback;
use chat::prompt::generate_user_prompt;
use pgrx::pg_sys;
use pgrx::{PgList, PgTupleDesc};
use std::collections::HashMap;
use std::ffi::CStr;
use synth::{schema_instruction, Column, OptionCatalog, TableConfig};

// From Postgres source: src/include/catalog/pg_*.h
const FOREIGN_DATA_WRAPPER_RELATION_ID: u32 = 2328;
const FOREIGN_SERVER_RELATION_ID: u32 = 1417;
const USER_MAPPING_RELATION_ID: u32 = 1418;
const FOREIGN_TABLE_RELATION_ID: u32 = 3118;

pub fn catalog_from_oid(catalog: pg_sys::Oid) -> OptionCatalog {
    match catalog.as_u32() {
        FOREIGN_DATA_WRAPPER_RELATION_ID => OptionCatalog::Wrapper,
        FOREIGN_SERVER_RELATION_ID => OptionCatalog::Server,
        USER_MAPPING_RELATION_ID => OptionCatalog::UserMapping,
        FOREIGN_TABLE_RELATION_ID => OptionCatalog::Table,
        _ => OptionCatalog::Column,
    }
}

const WRAPPER_NAME: &CStr = c"openai_fdw";

/// Whether the foreign table's server belongs to this wrapper.
pub fn uses_openai_fdw(relid: pg_sys::Oid) -> bool {
    unsafe {
        let ftable = pg_sys::GetForeignTable(relid);
        let fserver = pg_sys::GetForeignServer((*ftable).serverid);
        let fdw = pg_sys::GetForeignDataWrapper((*fserver).fdwid);
        CStr::from_ptr((*fdw).fdwname) == WRAPPER_NAME
    }
}

/// Splits a validator entry `name=value`.
pub fn split_option(option: &str) -> (&str, &str) {
    option.split_once('=').unwrap_or((option, ""))
}

unsafe fn options_to_map(options: *mut pg_sys::List) -> HashMap<String, String> {
    let list = unsafe { PgList::<pg_sys::DefElem>::from_pg(options) };
    list.iter_ptr()
        .map(|def| unsafe {
            let name = CStr::from_ptr((*def).defname).to_string_lossy().into_owned();
            let value = CStr::from_ptr(pg_sys::defGetString(def))
                .to_string_lossy()
                .into_owned();
            (name, value)
        })
        .collect()
}

/// Effective options of a foreign table: table over server over GUCs.
pub fn table_config(relid: pg_sys::Oid) -> OpenAiFdwResult<TableConfig> {
    let (server, table) = unsafe {
        let ftable = pg_sys::GetForeignTable(relid);
        let fserver = pg_sys::GetForeignServer((*ftable).serverid);
        (
            options_to_map((*fserver).options),
            options_to_map((*ftable).options),
        )
    };
    Ok(TableConfig::from_options(&server, &table, fallback())?)
}

/// A live column of the scanned relation.
pub struct ScanColumn {
    /// Position in the tuple descriptor, dropped columns included.
    pub index: usize,
    pub column: Column,
    pub type_oid: pg_sys::Oid,
    pub typmod: i32,
}

pub unsafe fn scan_columns(tupdesc: pg_sys::TupleDesc) -> Vec<ScanColumn> {
    let tupdesc = unsafe { PgTupleDesc::from_pg_unchecked(tupdesc) };
    tupdesc
        .iter()
        .enumerate()
        .filter(|(_, attr)| !attr.is_dropped())
        .map(|(index, attr)| {
            let type_oid = attr.type_oid().value();
            let typmod = attr.type_mod();
            let type_name = unsafe {
                CStr::from_ptr(pg_sys::format_type_with_typemod(type_oid, typmod))
                    .to_string_lossy()
                    .into_owned()
            };
            ScanColumn {
                index,
                column: Column::new(attr.name(), type_name),
                type_oid,
                typmod,
            }
        })
        .collect()
}

pub fn user_prompt(config: &TableConfig, columns: &[Column]) -> String {
    let schema_info = schema_instruction(columns, config.max_rows);
    generate_user_prompt(&config.prompt, &schema_info)
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use super::*;
    use pgrx::prelude::*;

    #[pg_test]
    fn test_split_option() {
        assert_eq!(split_option("prompt=a=b"), ("prompt", "a=b"));
        assert_eq!(split_option("model"), ("model", ""));
    }

    #[pg_test]
    fn test_catalog_from_oid() {
        let oid = |n: u32| pg_sys::Oid::from(n);
        assert_eq!(catalog_from_oid(oid(1417)), OptionCatalog::Server);
        assert_eq!(catalog_from_oid(oid(3118)), OptionCatalog::Table);
        assert_eq!(catalog_from_oid(oid(1249)), OptionCatalog::Column);
    }
}
