use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::Url;
use serde::Deserialize;

use crate::error::RegistryError;
use crate::fetcher::RetryPolicy;

pub const DEFAULT_RANGE: &str = "A1:Z100";
pub const DEFAULT_APPEND_RANGE: &str = "A1:F100";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const DEFAULT_SOURCE_URL: &str = "https://registrosanitario.ispch.gob.cl/";
pub const DEFAULT_SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4";
pub const DEFAULT_CREDENTIALS: &str = "credentials.json";
pub const DEFAULT_LOCAL_STORE: &str = "principios_activos_local.csv";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 60;

/// Optional JSON layer passed with `--config`. Environment values win over it.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default)]
    pub range_name: Option<String>,
    #[serde(default)]
    pub append_range: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub sheets_api_url: Option<String>,
    #[serde(default)]
    pub credentials_path: Option<String>,
    #[serde(default)]
    pub local_store_path: Option<String>,
    #[serde(default)]
    pub fetch_max_attempts: Option<u32>,
    #[serde(default)]
    pub fetch_retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub source_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub spreadsheet_id: String,
    pub range_name: String,
    pub append_range: String,
    pub scopes: Vec<String>,
    pub source_url: Url,
    pub sheets_api_url: Url,
    pub credentials_path: Utf8PathBuf,
    pub access_token: Option<String>,
    pub local_store_path: Utf8PathBuf,
    pub retry: RetryPolicy,
    pub source_timeout: Duration,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the optional JSON file, `.env` in the working directory and the
    /// process environment, then validates the result.
    pub fn resolve(path: Option<&str>) -> Result<Settings, RegistryError> {
        let layer = match path {
            Some(path) => Self::read_layer(Path::new(path))?,
            None => ConfigLayer::default(),
        };

        let dotenv = match fs::read_to_string(".env") {
            Ok(content) => parse_dotenv(&content),
            Err(_) => HashMap::new(),
        };

        Self::resolve_with(layer, |key| {
            std::env::var(key)
                .ok()
                .or_else(|| dotenv.get(key).cloned())
        })
    }

    pub fn read_layer(path: &Path) -> Result<ConfigLayer, RegistryError> {
        let content = fs::read_to_string(path).map_err(|err| {
            RegistryError::configuration("--config", format!("read {}: {err}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|err| RegistryError::configuration("--config", err.to_string()))
    }

    pub fn resolve_with<F>(layer: ConfigLayer, lookup: F) -> Result<Settings, RegistryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let spreadsheet_id = env("SPREADSHEET_ID")
            .or(layer.spreadsheet_id)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| RegistryError::configuration("SPREADSHEET_ID", "value is required"))?;

        let range_name = env("RANGE_NAME")
            .or(layer.range_name)
            .unwrap_or_else(|| DEFAULT_RANGE.to_string());
        let append_range = env("APPEND_RANGE")
            .or(layer.append_range)
            .unwrap_or_else(|| DEFAULT_APPEND_RANGE.to_string());

        let scopes: Vec<String> = match env("SCOPES") {
            Some(raw) => raw
                .split(',')
                .map(|scope| scope.trim().to_string())
                .filter(|scope| !scope.is_empty())
                .collect(),
            None => layer
                .scopes
                .unwrap_or_else(|| vec![DEFAULT_SCOPE.to_string()]),
        };
        if scopes.is_empty() {
            return Err(RegistryError::configuration(
                "SCOPES",
                "at least one scope is required",
            ));
        }

        let source_url = parse_url(
            "SOURCE_URL",
            env("SOURCE_URL")
                .or(layer.source_url)
                .as_deref()
                .unwrap_or(DEFAULT_SOURCE_URL),
        )?;
        let sheets_api_url = parse_url(
            "SHEETS_API_URL",
            env("SHEETS_API_URL")
                .or(layer.sheets_api_url)
                .as_deref()
                .unwrap_or(DEFAULT_SHEETS_API_URL),
        )?;

        let credentials_path = Utf8PathBuf::from(
            env("GOOGLE_CREDENTIALS")
                .or(layer.credentials_path)
                .unwrap_or_else(|| DEFAULT_CREDENTIALS.to_string()),
        );
        let access_token = env("SHEETS_ACCESS_TOKEN");
        let local_store_path = Utf8PathBuf::from(
            env("LOCAL_STORE_PATH")
                .or(layer.local_store_path)
                .unwrap_or_else(|| DEFAULT_LOCAL_STORE.to_string()),
        );

        let max_attempts = match env("FETCH_MAX_ATTEMPTS") {
            Some(raw) => parse_number::<u32>("FETCH_MAX_ATTEMPTS", &raw)?,
            None => layer.fetch_max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
        };
        if max_attempts == 0 {
            return Err(RegistryError::configuration(
                "FETCH_MAX_ATTEMPTS",
                "must be at least 1",
            ));
        }
        let retry_delay_ms = match env("FETCH_RETRY_DELAY_MS") {
            Some(raw) => parse_number::<u64>("FETCH_RETRY_DELAY_MS", &raw)?,
            None => layer.fetch_retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
        };
        let timeout_secs = match env("SOURCE_TIMEOUT_SECS") {
            Some(raw) => parse_number::<u64>("SOURCE_TIMEOUT_SECS", &raw)?,
            None => layer
                .source_timeout_secs
                .unwrap_or(DEFAULT_SOURCE_TIMEOUT_SECS),
        };
        if timeout_secs == 0 {
            return Err(RegistryError::configuration(
                "SOURCE_TIMEOUT_SECS",
                "must be at least 1",
            ));
        }

        Ok(Settings {
            spreadsheet_id,
            range_name,
            append_range,
            scopes,
            source_url,
            sheets_api_url,
            credentials_path,
            access_token,
            local_store_path,
            retry: RetryPolicy {
                max_attempts,
                delay: Duration::from_millis(retry_delay_ms),
            },
            source_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url, RegistryError> {
    let url = Url::parse(raw).map_err(|err| RegistryError::configuration(key, err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RegistryError::configuration(
            key,
            format!("unsupported scheme {}", url.scheme()),
        ));
    }
    Ok(url)
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, RegistryError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|err| RegistryError::configuration(key, format!("'{raw}': {err}")))
}

/// `KEY=VALUE` lines; `#` comments, an `export ` prefix and surrounding
/// quotes are accepted.
pub fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|rest| rest.strip_suffix('\''))
            })
            .unwrap_or(value);
        values.insert(key.trim().to_string(), value.to_string());
    }
    values
}
