//! PostgreSQL foreign data wrapper backed by the OpenAI chat completion API.
//!
//! A foreign table declares the columns it wants and a prompt; every scan
//! asks the model for a JSON array of matching rows.
use pgrx::prelude::*;

mod error;
mod fdw;
mod gucs;

pgrx::pg_module_magic!();

#[allow(non_snake_case)]
#[pg_guard]
pub unsafe extern "C" fn _PG_init() {
    unsafe {
        gucs::init();
    }
}
