pub mod client;

pub unsafe fn init() {
    unsafe {
        client::init();
        #[cfg(feature = "pg14")]
        pgrx::pg_sys::EmitWarningsOnPlaceholders(c"openai_fdw".as_ptr());
        #[cfg(any(feature = "pg15", feature = "pg16", feature = "pg17"))]
        pgrx::pg_sys::MarkGUCPrefixReserved(c"openai_fdw".as_ptr());
    }
}
