use crate::error::ReportUnwrap;
use crate::fdw::options::table_config;
use pgrx::pg_guard;
use pgrx::pg_sys;
use std::ptr::null_mut;

// One HTTP round trip dominates everything else in the scan.
const API_STARTUP_COST: f64 = 10000.0;

#[pg_guard]
pub unsafe extern "C" fn get_foreign_rel_size(
    _root: *mut pg_sys::PlannerInfo,
    baserel: *mut pg_sys::RelOptInfo,
    foreigntableid: pg_sys::Oid,
) {
    let config = table_config(foreigntableid).report_unwrap();
    unsafe {
        (*baserel).rows = config.max_rows as f64;
    }
}

#[pg_guard]
pub unsafe extern "C" fn get_foreign_paths(
    root: *mut pg_sys::PlannerInfo,
    baserel: *mut pg_sys::RelOptInfo,
    _foreigntableid: pg_sys::Oid,
) {
    unsafe {
        let rows = (*baserel).rows;
        let startup_cost = API_STARTUP_COST;
        let total_cost = startup_cost + rows * pg_sys::cpu_tuple_cost;

        // No pathkeys: the rows come back in whatever order the model chose.
        #[cfg(any(feature = "pg14", feature = "pg15", feature = "pg16"))]
        let path = pg_sys::create_foreignscan_path(
            root,
            baserel,
            null_mut(),
            rows,
            startup_cost,
            total_cost,
            null_mut(),
            null_mut(),
            null_mut(),
            null_mut(),
        );
        #[cfg(feature = "pg17")]
        let path = pg_sys::create_foreignscan_path(
            root,
            baserel,
            null_mut(),
            rows,
            startup_cost,
            total_cost,
            null_mut(),
            null_mut(),
            null_mut(),
            null_mut(),
            null_mut(),
        );
        pg_sys::add_path(baserel, path as *mut pg_sys::Path);
    }
}

/// Every qual stays a local filter evaluated by the executor.
#[pg_guard]
pub unsafe extern "C" fn get_foreign_plan(
    _root: *mut pg_sys::PlannerInfo,
    baserel: *mut pg_sys::RelOptInfo,
    _foreigntableid: pg_sys::Oid,
    _best_path: *mut pg_sys::ForeignPath,
    tlist: *mut pg_sys::List,
    scan_clauses: *mut pg_sys::List,
    outer_plan: *mut pg_sys::Plan,
) -> *mut pg_sys::ForeignScan {
    unsafe {
        let scan_clauses = pg_sys::extract_actual_clauses(scan_clauses, false);
        pg_sys::make_foreignscan(
            tlist,
            scan_clauses,
            (*baserel).relid,
            null_mut(),
            null_mut(),
            null_mut(),
            null_mut(),
            outer_plan,
        )
    }
}
