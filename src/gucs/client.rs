use crate::error::bad_guc_literal;
use pgrx::guc::{GucContext, GucFlags, GucRegistry, GucSetting};
use std::ffi::CStr;
use std::time::Duration;
use synth::config::Fallback;

fn parse(target: &'static GucSetting<Option<&'static CStr>>, name: &'static str) -> String {
    let value = match target.get() {
        Some(s) => s,
        None => bad_guc_literal(name, "should not be `NULL`"),
    };
    match value.to_str() {
        Ok(s) => s.to_string(),
        Err(_e) => bad_guc_literal(name, "should be a valid UTF-8 string"),
    }
}

/// Session-level values used when a foreign server or table leaves the
/// corresponding option unset.
pub fn fallback() -> Fallback {
    let api_key = match OPENAI_API_KEY.get() {
        Some(_) => Some(parse(&OPENAI_API_KEY, "openai_fdw.api_key")),
        None => None,
    };
    Fallback {
        api_key,
        base_url: parse(&OPENAI_BASE_URL, "openai_fdw.base_url"),
    }
}

pub fn request_timeout() -> Duration {
    Duration::from_secs(REQUEST_TIMEOUT.get() as u64)
}

static OPENAI_API_KEY: GucSetting<Option<&'static CStr>> =
    GucSetting::<Option<&'static CStr>>::new(None);

static OPENAI_BASE_URL: GucSetting<Option<&'static CStr>> =
    GucSetting::<Option<&'static CStr>>::new(Some(c"https://api.openai.com/v1"));

static REQUEST_TIMEOUT: GucSetting<i32> = GucSetting::<i32>::new(60);

pub unsafe fn init() {
    GucRegistry::define_string_guc(
        "openai_fdw.api_key",
        "The API key of OpenAI.",
        "Used when neither the foreign table nor its server sets the api_key option.",
        &OPENAI_API_KEY,
        GucContext::Userset,
        GucFlags::NO_SHOW_ALL,
    );
    GucRegistry::define_string_guc(
        "openai_fdw.base_url",
        "The base url of OpenAI or compatible server.",
        "Used when the foreign server does not set the base_url option.",
        &OPENAI_BASE_URL,
        GucContext::Userset,
        GucFlags::default(),
    );
    GucRegistry::define_int_guc(
        "openai_fdw.request_timeout",
        "Timeout of a chat completion request, in seconds.",
        "",
        &REQUEST_TIMEOUT,
        1,
        3600,
        GucContext::Userset,
        GucFlags::UNIT_S,
    );
}
