use crate::error::{OpenAiFdwResult, ReportUnwrap};
use crate::fdw::options::{scan_columns, table_config, user_prompt, ScanColumn};
use crate::gucs::client::request_timeout;
use chat::openai::ChatRequest;
use chat::{chat_completion, ChatOptions};
use pgrx::pg_sys;
use pgrx::pg_sys::panic::CaughtError;
use pgrx::{debug1, pg_guard, warning, PgMemoryContexts, PgTryBuilder};
use std::ffi::{c_void, CString};
use std::os::raw::c_int;
use std::panic::AssertUnwindSafe;
use std::ptr::null;
use synth::{extract_rows, materialize, Cell, Column, RowError, TableConfig};

/// A column together with its type's input function.
struct ColumnInput {
    index: usize,
    column: Column,
    typioparam: pg_sys::Oid,
    typmod: i32,
    flinfo: pg_sys::FmgrInfo,
}

impl ColumnInput {
    unsafe fn new(scan: ScanColumn, cxt: pg_sys::MemoryContext) -> Self {
        let mut typinput = pg_sys::InvalidOid;
        let mut typioparam = pg_sys::InvalidOid;
        let mut flinfo = pg_sys::FmgrInfo::default();
        unsafe {
            pg_sys::getTypeInputInfo(scan.type_oid, &mut typinput, &mut typioparam);
            pg_sys::fmgr_info_cxt(typinput, &mut flinfo, cxt);
        }
        Self {
            index: scan.index,
            column: scan.column,
            typioparam,
            typmod: scan.typmod,
            flinfo,
        }
    }

    unsafe fn datum(&mut self, text: &str) -> pg_sys::Datum {
        // cstrings cannot carry NUL, and no PostgreSQL text value can either
        let text = CString::new(text.replace('\0', "")).unwrap_or_default();
        unsafe {
            pg_sys::InputFunctionCall(
                &mut self.flinfo,
                text.as_ptr() as *mut _,
                self.typioparam,
                self.typmod,
            )
        }
    }
}

/// Datums of one row in tuple-descriptor order of `ScanState::columns`;
/// `None` is SQL NULL.
type Row = Vec<Option<pg_sys::Datum>>;

struct ScanState {
    config: TableConfig,
    columns: Vec<ColumnInput>,
    /// Query memory context; converted datums must outlive each tuple.
    cxt: pg_sys::MemoryContext,
    /// Filled by the first `IterateForeignScan` call.
    rows: Option<Vec<Row>>,
    cursor: usize,
}

impl ScanState {
    fn column_defs(&self) -> Vec<Column> {
        self.columns.iter().map(|c| c.column.clone()).collect()
    }

    fn fetch(&mut self) -> OpenAiFdwResult<Vec<Row>> {
        let columns = self.column_defs();
        let config = &self.config;
        let request = ChatRequest::for_rows(
            config.model.clone(),
            user_prompt(config, &columns),
            config.max_tokens,
            config.temperature,
        );
        let options = ChatOptions {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            timeout: request_timeout(),
        };

        debug1!("Making OpenAI API request with model: {}", config.model);
        let content = chat_completion(&request, &options)?.try_pop_content()?;
        let values = extract_rows(&content)?;
        debug1!("Successfully parsed {} rows from OpenAI response", values.len());
        if values.is_empty() {
            warning!("No data returned from OpenAI API");
        }

        let cxt = self.cxt;
        let inputs = &mut self.columns;
        let materialized = materialize(values, &columns, config.max_rows, |cells| unsafe {
            input_row(inputs.as_mut_slice(), &cells, cxt)
        });
        for skipped in &materialized.skipped {
            warning!(
                "Skipping invalid row {}: {}. row = {}",
                skipped.index,
                skipped.error,
                skipped.raw
            );
        }
        Ok(materialized.rows)
    }
}

/// Runs every cell of a row through its column's input function. A value
/// PostgreSQL rejects rolls back only this row's subtransaction.
unsafe fn input_row(
    columns: &mut [ColumnInput],
    cells: &[Cell],
    cxt: pg_sys::MemoryContext,
) -> Result<Row, RowError> {
    unsafe {
        let old_context = pg_sys::CurrentMemoryContext;
        let old_owner = pg_sys::CurrentResourceOwner;

        pg_sys::BeginInternalSubTransaction(null());
        pg_sys::MemoryContextSwitchTo(cxt);

        PgTryBuilder::new(AssertUnwindSafe(|| {
            let row = columns
                .iter_mut()
                .zip(cells)
                .map(|(input, cell)| cell.to_pg_text().map(|text| input.datum(&text)))
                .collect::<Row>();

            pg_sys::ReleaseCurrentSubTransaction();
            pg_sys::MemoryContextSwitchTo(old_context);
            pg_sys::CurrentResourceOwner = old_owner;
            Ok(row)
        }))
        .catch_others(|e| {
            pg_sys::MemoryContextSwitchTo(old_context);
            pg_sys::RollbackAndReleaseCurrentSubTransaction();
            pg_sys::MemoryContextSwitchTo(old_context);
            pg_sys::CurrentResourceOwner = old_owner;

            let message = match e {
                CaughtError::PostgresError(ref report) | CaughtError::ErrorReport(ref report) => {
                    report.message().to_string()
                }
                CaughtError::RustPanic { ref ereport, .. } => ereport.message().to_string(),
            };
            Err(RowError::Rejected(message))
        })
        .execute()
    }
}

unsafe fn scan_state<'a>(node: *mut pg_sys::ForeignScanState) -> &'a mut ScanState {
    unsafe { &mut *((*node).fdw_state as *mut ScanState) }
}

unsafe fn exec_clear_tuple(slot: *mut pg_sys::TupleTableSlot) {
    unsafe {
        if let Some(clear) = (*(*slot).tts_ops).clear {
            clear(slot);
        }
    }
}

#[pg_guard]
pub unsafe extern "C" fn begin_foreign_scan(node: *mut pg_sys::ForeignScanState, _eflags: c_int) {
    unsafe {
        let rel = (*node).ss.ss_currentRelation;
        let config = table_config((*rel).rd_id).report_unwrap();
        let cxt = (*(*node).ss.ps.state).es_query_cxt;
        let columns = scan_columns((*rel).rd_att)
            .into_iter()
            .map(|c| ColumnInput::new(c, cxt))
            .collect();
        debug1!("OpenAI FDW initialized with model: {}", config.model);

        let state = ScanState {
            config,
            columns,
            cxt,
            rows: None,
            cursor: 0,
        };
        (*node).fdw_state =
            PgMemoryContexts::For(cxt).leak_and_drop_on_delete(state) as *mut c_void;
    }
}

#[pg_guard]
pub unsafe extern "C" fn iterate_foreign_scan(
    node: *mut pg_sys::ForeignScanState,
) -> *mut pg_sys::TupleTableSlot {
    unsafe {
        let state = scan_state(node);
        let slot = (*node).ss.ss_ScanTupleSlot;
        exec_clear_tuple(slot);

        if state.rows.is_none() {
            let rows = state.fetch().report_unwrap();
            state.rows = Some(rows);
        }
        let ScanState {
            columns,
            rows,
            cursor,
            ..
        } = state;
        let Some(row) = rows.as_ref().and_then(|rows| rows.get(*cursor)) else {
            return slot;
        };
        *cursor += 1;

        let natts = (*(*slot).tts_tupleDescriptor).natts as usize;
        let values = std::slice::from_raw_parts_mut((*slot).tts_values, natts);
        let nulls = std::slice::from_raw_parts_mut((*slot).tts_isnull, natts);
        values.fill(pg_sys::Datum::from(0usize));
        nulls.fill(true);
        for (input, datum) in columns.iter().zip(row) {
            if let Some(datum) = datum {
                values[input.index] = *datum;
                nulls[input.index] = false;
            }
        }
        pg_sys::ExecStoreVirtualTuple(slot);
        slot
    }
}

/// Rewinds over the rows already fetched; the API is not called again.
#[pg_guard]
pub unsafe extern "C" fn re_scan_foreign_scan(node: *mut pg_sys::ForeignScanState) {
    unsafe {
        scan_state(node).cursor = 0;
    }
}

#[pg_guard]
pub unsafe extern "C" fn end_foreign_scan(_node: *mut pg_sys::ForeignScanState) {
    // state is dropped together with the query memory context
}

#[pg_guard]
pub unsafe extern "C" fn explain_foreign_scan(
    node: *mut pg_sys::ForeignScanState,
    es: *mut pg_sys::ExplainState,
) {
    unsafe {
        let state = scan_state(node);
        let names = state
            .columns
            .iter()
            .map(|c| c.column.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        explain_text(es, "OpenAI Model", &state.config.model);
        explain_text(es, "Prompt", &state.config.prompt_preview());
        explain_text(es, "Expected Columns", &names);
        pg_sys::ExplainPropertyInteger(
            c"Max Rows".as_ptr(),
            null(),
            state.config.max_rows as i64,
            es,
        );
    }
}

unsafe fn explain_text(es: *mut pg_sys::ExplainState, label: &str, value: &str) {
    let label = CString::new(label).unwrap_or_default();
    let value = CString::new(value.replace('\0', "")).unwrap_or_default();
    unsafe {
        pg_sys::ExplainPropertyText(label.as_ptr(), value.as_ptr(), es);
    }
}

#[cfg(any(test, feature = "pg_test"))]
#[pgrx::pg_schema]
mod tests {
    use httpmock::Method::POST;
    use httpmock::{Mock, MockServer};
    use pgrx::prelude::*;
    use std::ffi::CStr;
    use std::sync::Mutex;

    static WARNINGS: Mutex<Vec<String>> = Mutex::new(Vec::new());

    #[pg_guard]
    unsafe extern "C" fn collect_warning(edata: *mut pg_sys::ErrorData) {
        unsafe {
            if (*edata).elevel == pg_sys::WARNING as i32 && !(*edata).message.is_null() {
                let message = CStr::from_ptr((*edata).message).to_string_lossy().into_owned();
                WARNINGS.lock().unwrap().push(message);
            }
        }
    }

    /// Runs `f` and returns the WARNING messages it raised.
    fn with_warnings<R>(f: impl FnOnce() -> R) -> (R, Vec<String>) {
        Spi::run("SET LOCAL log_min_messages = warning").unwrap();
        WARNINGS.lock().unwrap().clear();
        let previous = unsafe { pg_sys::emit_log_hook };
        unsafe { pg_sys::emit_log_hook = Some(collect_warning) };
        let result = f();
        unsafe { pg_sys::emit_log_hook = previous };
        let warnings = std::mem::take(&mut *WARNINGS.lock().unwrap());
        (result, warnings)
    }

    fn reply_with<'a>(server: &'a MockServer, content: &str) -> Mock<'a> {
        let body = serde_json::json!({
            "choices": [{
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        });
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(body.clone());
        })
    }

    fn create_table(server: &MockServer, columns: &str, options: &str) {
        Spi::run(&format!(
            "CREATE SERVER openai_mock FOREIGN DATA WRAPPER openai_fdw
             OPTIONS (api_key 'sk-test', base_url '{}')",
            server.base_url()
        ))
        .unwrap();
        Spi::run(&format!(
            "CREATE FOREIGN TABLE generated ({columns}) SERVER openai_mock OPTIONS ({options})"
        ))
        .unwrap();
    }

    fn agg(query: &str) -> Option<String> {
        Spi::get_one::<String>(query).unwrap()
    }

    #[pg_test]
    fn test_scan_typed_rows() {
        let server = MockServer::start();
        let mock = reply_with(
            &server,
            r#"```json
[
  {"name": "Earth", "moons": 1, "radius": 12345678901234567.89, "rocky": true,
   "found": "1543-01-01", "id": "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11", "extra": 1},
  {"name": "Venus", "moons": 0, "rocky": true, "radius": null}
]
```"#,
        );
        create_table(
            &server,
            "name varchar(5), moons integer, radius numeric(20,2), rocky boolean, found date, id uuid",
            "prompt 'planets'",
        );

        let rows = agg(
            "SELECT string_agg(concat_ws('|', name, moons, radius, rocky, found, id), ';' ORDER BY name)
             FROM generated",
        );
        mock.assert();
        assert_eq!(
            rows.as_deref(),
            Some(
                "Earth|1|12345678901234567.89|t|1543-01-01|a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11;\
                 Venus|0|t"
            )
        );
    }

    #[pg_test]
    fn test_scan_skips_values_postgres_rejects() {
        let server = MockServer::start();
        let mock = reply_with(
            &server,
            r#"[
  {"r": 1e39, "label": "a"},
  {"n": 12345.678, "label": "b"},
  {"d": "0000-01-01", "label": "c"},
  {"u": "not-a-uuid", "label": "d"},
  {"r": 1.5, "n": 123.45, "d": "2024-02-29", "u": "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11", "label": "e"},
  {"label": "f"}
]"#,
        );
        create_table(
            &server,
            "r real, n numeric(5,2), d date, u uuid, label text",
            "prompt 'values', max_rows '1'",
        );

        let (labels, warnings) =
            with_warnings(|| agg("SELECT string_agg(label, ',') FROM generated"));
        mock.assert();
        assert_eq!(labels.as_deref(), Some("e"));
        assert_eq!(warnings.len(), 4, "{warnings:?}");
        for (index, warning) in warnings.iter().enumerate() {
            assert!(
                warning.starts_with(&format!(
                    "Skipping invalid row {index}: value rejected by PostgreSQL: "
                )),
                "{warning}"
            );
        }
        assert!(warnings[3].contains("not-a-uuid"));
    }

    #[pg_test]
    fn test_scan_truncates_after_skipping() {
        let server = MockServer::start();
        let _mock = reply_with(&server, r#"[{"id": "x"}, {"id": 1}, {"id": 2}, {"id": 3}]"#);
        create_table(&server, "id integer", "prompt 'ids', max_rows '2'");

        let (ids, warnings) =
            with_warnings(|| agg("SELECT string_agg(id::text, ',' ORDER BY id) FROM generated"));
        assert_eq!(ids.as_deref(), Some("1,2"));
        assert_eq!(
            warnings,
            vec![r#"Skipping invalid row 0: column "id" expects integer, got string. row = {"id":"x"}"#]
        );
    }

    #[pg_test]
    fn test_scan_empty_array() {
        let server = MockServer::start();
        let _mock = reply_with(&server, "[]");
        create_table(&server, "id integer", "prompt 'nothing'");

        let (count, warnings) =
            with_warnings(|| Spi::get_one::<i64>("SELECT count(*) FROM generated").unwrap());
        assert_eq!(count, Some(0));
        assert_eq!(warnings, vec!["No data returned from OpenAI API"]);
    }

    #[pg_test]
    fn test_rescan_reuses_rows() {
        let server = MockServer::start();
        let mock = reply_with(&server, r#"[{"id": 1}, {"id": 2}, {"id": 3}]"#);
        create_table(&server, "id integer", "prompt 'ids'");

        let counts = agg(
            "SELECT string_agg(n::text, ',' ORDER BY g)
             FROM (SELECT g, (SELECT count(*) FROM generated WHERE id <> g) AS n
                   FROM generate_series(1, 3) g) s",
        );
        assert_eq!(counts.as_deref(), Some("2,2,2"));
        mock.assert_hits(1);
    }

    #[pg_test(error = "Expected JSON array, got: object")]
    fn test_scan_reply_not_an_array() {
        let server = MockServer::start();
        let _mock = reply_with(&server, r#"{"id": 1}"#);
        create_table(&server, "id integer", "prompt 'ids'");
        Spi::run("SELECT * FROM generated").unwrap();
    }

    #[pg_test(error = "Chat completion API returned HTTP 500. hint = upstream exploded")]
    fn test_scan_api_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(500).body("upstream exploded");
        });
        create_table(&server, "id integer", "prompt 'ids'");
        Spi::run("SELECT * FROM generated").unwrap();
    }
}
