mod options;
mod planner;
mod scan;

use crate::error::{OpenAiFdwError, OpenAiFdwResult, ReportUnwrap};
use pgrx::prelude::*;
use pgrx::{PgBox, PgRelation};
use synth::check_option;

#[pgrx::pg_extern(sql = "
    CREATE OR REPLACE FUNCTION openai_fdw_handler() RETURNS fdw_handler
    STRICT LANGUAGE c AS 'MODULE_PATHNAME', '@FUNCTION_NAME@';
")]
fn openai_fdw_handler() -> PgBox<pg_sys::FdwRoutine> {
    let mut routine =
        unsafe { PgBox::<pg_sys::FdwRoutine>::alloc_node(pg_sys::NodeTag::T_FdwRoutine) };

    routine.GetForeignRelSize = Some(planner::get_foreign_rel_size);
    routine.GetForeignPaths = Some(planner::get_foreign_paths);
    routine.GetForeignPlan = Some(planner::get_foreign_plan);

    routine.BeginForeignScan = Some(scan::begin_foreign_scan);
    routine.IterateForeignScan = Some(scan::iterate_foreign_scan);
    routine.ReScanForeignScan = Some(scan::re_scan_foreign_scan);
    routine.EndForeignScan = Some(scan::end_foreign_scan);
    routine.ExplainForeignScan = Some(scan::explain_foreign_scan);

    routine.into_pg_boxed()
}

#[pg_extern]
fn openai_fdw_validator(options: Vec<Option<String>>, catalog: Option<pg_sys::Oid>) {
    let Some(catalog) = catalog else {
        return;
    };
    let catalog = options::catalog_from_oid(catalog);
    for option in options.iter().flatten() {
        let (name, value) = options::split_option(option);
        check_option(catalog, name, value)
            .map_err(OpenAiFdwError::from)
            .report_unwrap();
    }
}

/// The user message a scan of `foreign_table` would send, schema
/// instruction included. Makes no request.
#[pg_extern(sql = "
    CREATE FUNCTION openai_fdw_prompt(foreign_table regclass) RETURNS text
    STABLE STRICT LANGUAGE c AS 'MODULE_PATHNAME', '@FUNCTION_NAME@';
")]
fn openai_fdw_prompt(foreign_table: pg_sys::Oid) -> String {
    prompt_for(foreign_table).report_unwrap()
}

fn prompt_for(relid: pg_sys::Oid) -> OpenAiFdwResult<String> {
    let rel = unsafe { PgRelation::with_lock(relid, pg_sys::AccessShareLock as pg_sys::LOCKMODE) };
    if unsafe { (*rel.rd_rel).relkind } as u8 != pg_sys::RELKIND_FOREIGN_TABLE {
        return Err(OpenAiFdwError::NotForeignTable(rel.name().to_string()));
    }
    if !options::uses_openai_fdw(relid) {
        return Err(OpenAiFdwError::ForeignWrapper(rel.name().to_string()));
    }
    let config = options::table_config(relid)?;
    let columns = unsafe { options::scan_columns(rel.rd_att) }
        .into_iter()
        .map(|c| c.column)
        .collect::<Vec<_>>();
    Ok(options::user_prompt(&config, &columns))
}

pgrx::extension_sql!(
    r#"
CREATE FOREIGN DATA WRAPPER openai_fdw
  HANDLER openai_fdw_handler
  VALIDATOR openai_fdw_validator;
"#,
    name = "openai_fdw_wrapper",
    requires = [openai_fdw_handler, openai_fdw_validator],
);

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use pgrx::prelude::*;

    fn create_server(options: &str) {
        Spi::run(&format!(
            "CREATE SERVER openai_test FOREIGN DATA WRAPPER openai_fdw OPTIONS ({options})"
        ))
        .unwrap();
    }

    fn explain(query: &str) -> Vec<String> {
        Spi::connect(|client| {
            client
                .select(&format!("EXPLAIN {query}"), None, None)
                .unwrap()
                .map(|row| row.get::<String>(1).unwrap().unwrap_or_default())
                .collect()
        })
    }

    #[pg_test]
    fn test_prompt_carries_schema() {
        create_server("api_key 'sk-test'");
        Spi::run(
            "CREATE FOREIGN TABLE planets (name text, moons integer, rocky boolean)
             SERVER openai_test OPTIONS (prompt 'List the planets of the solar system', max_rows '8')",
        )
        .unwrap();

        let prompt = Spi::get_one::<String>("SELECT openai_fdw_prompt('planets'::regclass)")
            .unwrap()
            .unwrap();
        assert!(prompt.starts_with("List the planets of the solar system\n\n"));
        assert!(prompt.contains(r#""moons": "number (integer)""#));
        assert!(prompt.contains(r#""rocky": <boolean>"#));
        assert!(prompt.contains("Return 8 rows maximum."));
    }

    #[pg_test]
    fn test_prompt_skips_dropped_columns() {
        create_server("api_key 'sk-test'");
        Spi::run(
            "CREATE FOREIGN TABLE people (name text, age integer, city text)
             SERVER openai_test OPTIONS (prompt 'people')",
        )
        .unwrap();
        Spi::run("ALTER FOREIGN TABLE people DROP COLUMN age").unwrap();

        let prompt = Spi::get_one::<String>("SELECT openai_fdw_prompt('people'::regclass)")
            .unwrap()
            .unwrap();
        assert!(!prompt.contains("\"age\""));
        assert!(prompt.contains(r#"{"name": <string>, "city": <string>}"#));
    }

    #[pg_test]
    fn test_explain_without_request() {
        create_server("api_key 'sk-test', base_url 'http://127.0.0.1:1'");
        Spi::run(
            "CREATE FOREIGN TABLE cities (name text, population bigint)
             SERVER openai_test OPTIONS (prompt 'Five large cities', model 'gpt-4o', max_rows '5')",
        )
        .unwrap();

        let plan = explain("SELECT * FROM cities WHERE population > 1000000 ORDER BY name").join("\n");
        assert!(plan.contains("Foreign Scan on cities"));
        assert!(plan.contains("OpenAI Model: gpt-4o"));
        assert!(plan.contains("Prompt: Five large cities"));
        assert!(plan.contains("Expected Columns: name, population"));
        assert!(plan.contains("Max Rows: 5"));
        assert!(plan.contains("Filter: (population > 1000000)"));
        assert!(plan.contains("Sort"));
    }

    #[pg_test]
    fn test_explain_truncates_long_prompt() {
        create_server("api_key 'sk-test'");
        let prompt = "p".repeat(120);
        Spi::run(&format!(
            "CREATE FOREIGN TABLE words (word text) SERVER openai_test OPTIONS (prompt '{prompt}')"
        ))
        .unwrap();

        let plan = explain("SELECT * FROM words").join("\n");
        assert!(plan.contains(&format!("Prompt: {}...", "p".repeat(100))));
        assert!(plan.contains("OpenAI Model: gpt-3.5-turbo"));
        assert!(plan.contains("Max Rows: 100"));
    }

    #[pg_test]
    fn test_guc_api_key_fallback() {
        create_server("model 'gpt-4o-mini'");
        Spi::run("CREATE FOREIGN TABLE colors (name text) SERVER openai_test OPTIONS (prompt 'colors')")
            .unwrap();
        Spi::run("SET LOCAL openai_fdw.api_key = 'sk-from-guc'").unwrap();

        let plan = explain("SELECT * FROM colors").join("\n");
        assert!(plan.contains("OpenAI Model: gpt-4o-mini"));
    }

    #[pg_test(error = "api_key is required for OpenAI FDW")]
    fn test_missing_api_key() {
        create_server("model 'gpt-4o'");
        Spi::run("CREATE FOREIGN TABLE colors (name text) SERVER openai_test OPTIONS (prompt 'colors')")
            .unwrap();
        Spi::run("SELECT * FROM colors").unwrap();
    }

    #[pg_test(error = "prompt is required for OpenAI FDW")]
    fn test_missing_prompt() {
        create_server("api_key 'sk-test'");
        Spi::run("CREATE FOREIGN TABLE colors (name text) SERVER openai_test").unwrap();
        Spi::run("SELECT * FROM colors").unwrap();
    }

    #[pg_test(
        error = "invalid option \"colour\" for foreign table. hint = valid options are: api_key, prompt, model, max_tokens, temperature, max_rows"
    )]
    fn test_validator_unknown_option() {
        create_server("api_key 'sk-test'");
        Spi::run("CREATE FOREIGN TABLE t (a int) SERVER openai_test OPTIONS (colour 'red')").unwrap();
    }

    #[pg_test(error = "invalid value \"0\" for option \"max_rows\". hint = should be a positive integer")]
    fn test_validator_bad_max_rows() {
        create_server("api_key 'sk-test', max_rows '0'");
    }

    #[pg_test(
        error = "invalid value \"3\" for option \"temperature\". hint = should be a number between 0 and 2"
    )]
    fn test_validator_bad_temperature() {
        create_server("api_key 'sk-test'");
        Spi::run("CREATE FOREIGN TABLE t (a int) SERVER openai_test OPTIONS (prompt 'p', temperature '3')")
            .unwrap();
    }

    #[pg_test(error = "invalid option \"api_key\" for user mapping. hint = valid options are: (none)")]
    fn test_validator_user_mapping() {
        create_server("api_key 'sk-test'");
        Spi::run("CREATE USER MAPPING FOR CURRENT_USER SERVER openai_test OPTIONS (api_key 'k')")
            .unwrap();
    }

    #[pg_test]
    fn test_prompt_signature_takes_regclass() {
        let args = Spi::get_one::<String>(
            "SELECT pg_get_function_identity_arguments('openai_fdw_prompt'::regproc)",
        )
        .unwrap();
        assert_eq!(args.as_deref(), Some("foreign_table regclass"));
    }

    #[pg_test(error = "\"elsewhere\" does not use the openai_fdw foreign-data wrapper")]
    fn test_prompt_rejects_other_wrapper() {
        Spi::run("CREATE FOREIGN DATA WRAPPER other_fdw").unwrap();
        Spi::run("CREATE SERVER other_server FOREIGN DATA WRAPPER other_fdw").unwrap();
        Spi::run(
            "CREATE FOREIGN TABLE elsewhere (a int) SERVER other_server OPTIONS (prompt 'p', api_key 'k')",
        )
        .unwrap();
        Spi::run("SELECT openai_fdw_prompt('elsewhere')").unwrap();
    }

    #[pg_test(error = "\"plain\" is not a foreign table")]
    fn test_prompt_rejects_plain_table() {
        Spi::run("CREATE TABLE plain (a int)").unwrap();
        Spi::run("SELECT openai_fdw_prompt('plain'::regclass)").unwrap();
    }
}
