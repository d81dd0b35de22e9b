use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_ROWS: usize = 100;

const PROMPT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid option \"{name}\" for {catalog}. hint = valid options are: {valid}")]
    UnknownOption {
        name: String,
        catalog: OptionCatalog,
        valid: String,
    },
    #[error("invalid value \"{value}\" for option \"{name}\". hint = {hint}")]
    InvalidValue {
        name: String,
        value: String,
        hint: &'static str,
    },
    #[error("{0} is required for OpenAI FDW")]
    MissingOption(&'static str),
}

/// Catalog an option list belongs to, as passed to the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionCatalog {
    Wrapper,
    Server,
    UserMapping,
    Table,
    Column,
}

impl OptionCatalog {
    pub fn valid_options(self) -> &'static [&'static str] {
        match self {
            OptionCatalog::Server => &[
                "api_key",
                "base_url",
                "prompt",
                "model",
                "max_tokens",
                "temperature",
                "max_rows",
            ],
            OptionCatalog::Table => &[
                "api_key",
                "prompt",
                "model",
                "max_tokens",
                "temperature",
                "max_rows",
            ],
            OptionCatalog::Wrapper | OptionCatalog::UserMapping | OptionCatalog::Column => &[],
        }
    }
}

impl fmt::Display for OptionCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptionCatalog::Wrapper => "foreign-data wrapper",
            OptionCatalog::Server => "foreign server",
            OptionCatalog::UserMapping => "user mapping",
            OptionCatalog::Table => "foreign table",
            OptionCatalog::Column => "foreign table column",
        };
        f.write_str(s)
    }
}

/// Checks a single option at DDL time: the name must be accepted by the
/// catalog and the value must be well-formed.
pub fn check_option(catalog: OptionCatalog, name: &str, value: &str) -> Result<(), ConfigError> {
    let valid = catalog.valid_options();
    if !valid.contains(&name) {
        return Err(ConfigError::UnknownOption {
            name: name.to_string(),
            catalog,
            valid: if valid.is_empty() {
                "(none)".to_string()
            } else {
                valid.join(", ")
            },
        });
    }
    match name {
        "max_tokens" => parse_max_tokens(value).map(|_| ()),
        "max_rows" => parse_max_rows(value).map(|_| ()),
        "temperature" => parse_temperature(value).map(|_| ()),
        _ => non_empty(name, value).map(|_| ()),
    }
}

/// Values used when neither the table nor its server sets an option.
#[derive(Debug, Clone)]
pub struct Fallback {
    pub api_key: Option<String>,
    pub base_url: String,
}

/// Effective settings of one foreign table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    pub api_key: String,
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_rows: usize,
    pub base_url: String,
}

impl TableConfig {
    /// Table options take precedence over server options, which take
    /// precedence over `fallback`.
    pub fn from_options(
        server: &HashMap<String, String>,
        table: &HashMap<String, String>,
        fallback: Fallback,
    ) -> Result<Self, ConfigError> {
        let get = |name: &str| table.get(name).or_else(|| server.get(name));

        let api_key = match get("api_key").cloned().or(fallback.api_key) {
            Some(k) if !k.is_empty() => k,
            _ => return Err(ConfigError::MissingOption("api_key")),
        };
        let prompt = match get("prompt") {
            Some(p) if !p.is_empty() => p.clone(),
            _ => return Err(ConfigError::MissingOption("prompt")),
        };
        let model = match get("model") {
            Some(m) => non_empty("model", m)?,
            None => DEFAULT_MODEL.to_string(),
        };
        let max_tokens = match get("max_tokens") {
            Some(v) => parse_max_tokens(v)?,
            None => DEFAULT_MAX_TOKENS,
        };
        let temperature = match get("temperature") {
            Some(v) => parse_temperature(v)?,
            None => DEFAULT_TEMPERATURE,
        };
        let max_rows = match get("max_rows") {
            Some(v) => parse_max_rows(v)?,
            None => DEFAULT_MAX_ROWS,
        };
        let base_url = match server.get("base_url") {
            Some(u) => non_empty("base_url", u)?,
            None => fallback.base_url,
        };

        Ok(Self {
            api_key,
            prompt,
            model,
            max_tokens,
            temperature,
            max_rows,
            base_url,
        })
    }

    /// Prompt shortened for EXPLAIN output.
    pub fn prompt_preview(&self) -> String {
        if self.prompt.chars().count() > PROMPT_PREVIEW_CHARS {
            let head: String = self.prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
            format!("{head}...")
        } else {
            self.prompt.clone()
        }
    }
}

fn non_empty(name: &str, value: &str) -> Result<String, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            hint: "should not be empty",
        });
    }
    Ok(value.to_string())
}

fn parse_max_tokens(value: &str) -> Result<u32, ConfigError> {
    match value.trim().parse::<u32>() {
        Ok(v) if v >= 1 => Ok(v),
        _ => Err(ConfigError::InvalidValue {
            name: "max_tokens".to_string(),
            value: value.to_string(),
            hint: "should be a positive integer",
        }),
    }
}

fn parse_max_rows(value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<u32>() {
        Ok(v) if v >= 1 => Ok(v as usize),
        _ => Err(ConfigError::InvalidValue {
            name: "max_rows".to_string(),
            value: value.to_string(),
            hint: "should be a positive integer",
        }),
    }
}

fn parse_temperature(value: &str) -> Result<f32, ConfigError> {
    match value.trim().parse::<f32>() {
        Ok(v) if (0.0..=2.0).contains(&v) => Ok(v),
        _ => Err(ConfigError::InvalidValue {
            name: "temperature".to_string(),
            value: value.to_string(),
            hint: "should be a number between 0 and 2",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn fallback() -> Fallback {
        Fallback {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = TableConfig::from_options(
            &map(&[("api_key", "sk-test")]),
            &map(&[("prompt", "ten planets")]),
            fallback(),
        )
        .unwrap();
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.max_tokens, 2000);
        assert_eq!(cfg.temperature, 0.7);
        assert_eq!(cfg.max_rows, 100);
        assert_eq!(cfg.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_table_overrides_server() {
        let cfg = TableConfig::from_options(
            &map(&[
                ("api_key", "sk-server"),
                ("model", "gpt-4o"),
                ("max_rows", "50"),
                ("base_url", "http://localhost:8080/v1"),
            ]),
            &map(&[("prompt", "p"), ("max_rows", "5"), ("api_key", "sk-table")]),
            fallback(),
        )
        .unwrap();
        assert_eq!(cfg.api_key, "sk-table");
        assert_eq!(cfg.model, "gpt-4o");
        assert_eq!(cfg.max_rows, 5);
        assert_eq!(cfg.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_api_key_fallback_and_missing() {
        let mut fb = fallback();
        fb.api_key = Some("sk-guc".to_string());
        let cfg = TableConfig::from_options(&map(&[]), &map(&[("prompt", "p")]), fb).unwrap();
        assert_eq!(cfg.api_key, "sk-guc");

        let err = TableConfig::from_options(&map(&[]), &map(&[("prompt", "p")]), fallback());
        assert_eq!(err, Err(ConfigError::MissingOption("api_key")));
        assert_eq!(
            err.unwrap_err().to_string(),
            "api_key is required for OpenAI FDW"
        );
    }

    #[test]
    fn test_missing_prompt() {
        let err = TableConfig::from_options(&map(&[("api_key", "k")]), &map(&[]), fallback());
        assert_eq!(err, Err(ConfigError::MissingOption("prompt")));
    }

    #[test]
    fn test_bad_numbers() {
        let server = map(&[("api_key", "k"), ("prompt", "p")]);
        for (name, value) in [
            ("max_tokens", "0"),
            ("max_tokens", "many"),
            ("max_rows", "-1"),
            ("temperature", "2.5"),
            ("temperature", "warm"),
        ] {
            let r = TableConfig::from_options(&server, &map(&[(name, value)]), fallback());
            assert!(
                matches!(r, Err(ConfigError::InvalidValue { .. })),
                "{name}={value}"
            );
        }
    }

    #[test]
    fn test_check_option() {
        assert!(check_option(OptionCatalog::Table, "prompt", "hello").is_ok());
        assert!(check_option(OptionCatalog::Server, "base_url", "http://x").is_ok());
        assert!(check_option(OptionCatalog::Table, "temperature", "1.2").is_ok());
        assert!(matches!(
            check_option(OptionCatalog::Table, "base_url", "http://x"),
            Err(ConfigError::UnknownOption { .. })
        ));
        assert!(matches!(
            check_option(OptionCatalog::Wrapper, "api_key", "k"),
            Err(ConfigError::UnknownOption { .. })
        ));
        assert!(matches!(
            check_option(OptionCatalog::Server, "max_rows", "0"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            check_option(OptionCatalog::Table, "model", ""),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_prompt_preview() {
        let mut cfg = TableConfig::from_options(
            &map(&[("api_key", "k")]),
            &map(&[("prompt", "short prompt")]),
            fallback(),
        )
        .unwrap();
        assert_eq!(cfg.prompt_preview(), "short prompt");
        cfg.prompt = "x".repeat(150);
        let preview = cfg.prompt_preview();
        assert_eq!(preview.len(), 103);
        assert!(preview.ends_with("..."));
    }
}
