use chat::openai::ChatError;
use pgrx::pg_sys::panic::ErrorReport;
use pgrx::{error, PgLogLevel, PgSqlErrorCode};
use synth::{ConfigError, ParseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenAiFdwError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("\"{0}\" is not a foreign table")]
    NotForeignTable(String),

    #[error("\"{0}\" does not use the openai_fdw foreign-data wrapper")]
    ForeignWrapper(String),
}

impl From<OpenAiFdwError> for ErrorReport {
    fn from(value: OpenAiFdwError) -> Self {
        let code = match &value {
            OpenAiFdwError::Config(ConfigError::MissingOption(_)) => {
                PgSqlErrorCode::ERRCODE_FDW_OPTION_NAME_NOT_FOUND
            }
            OpenAiFdwError::Config(ConfigError::UnknownOption { .. }) => {
                PgSqlErrorCode::ERRCODE_FDW_INVALID_OPTION_NAME
            }
            OpenAiFdwError::Config(ConfigError::InvalidValue { .. }) => {
                PgSqlErrorCode::ERRCODE_FDW_INVALID_ATTRIBUTE_VALUE
            }
            OpenAiFdwError::Chat(ChatError::Transport { .. }) => {
                PgSqlErrorCode::ERRCODE_FDW_UNABLE_TO_ESTABLISH_CONNECTION
            }
            OpenAiFdwError::Chat(_) => PgSqlErrorCode::ERRCODE_FDW_ERROR,
            OpenAiFdwError::Parse(_) => PgSqlErrorCode::ERRCODE_FDW_INVALID_DATA_TYPE,
            OpenAiFdwError::NotForeignTable(_) | OpenAiFdwError::ForeignWrapper(_) => {
                PgSqlErrorCode::ERRCODE_WRONG_OBJECT_TYPE
            }
        };
        ErrorReport::new(code, format!("{value}"), "")
    }
}

pub type OpenAiFdwResult<T> = Result<T, OpenAiFdwError>;

/// Raises the error as a PostgreSQL `ERROR`, aborting the current statement.
pub trait ReportUnwrap<T> {
    fn report_unwrap(self) -> T;
}

impl<T, E: Into<ErrorReport>> ReportUnwrap<T> for Result<T, E> {
    fn report_unwrap(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => {
                let report: ErrorReport = e.into();
                report.report(PgLogLevel::ERROR);
                unreachable!()
            }
        }
    }
}

pub fn bad_guc_literal(key: &str, hint: &str) -> ! {
    error!(
        "\
Failed to parse a setting.
INFORMATION: key = {key}, hint = {hint}"
    );
}
