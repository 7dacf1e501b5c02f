use std::fs;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::Settings;
use crate::domain::Record;
use crate::error::RegistryError;

/// Spreadsheet-backed copy of the registry cache. Implementations append
/// verbatim; deduplication is the caller's job.
pub trait RemoteStore: Send + Sync {
    fn read_range(&self) -> Result<Vec<Record>, RegistryError>;
    fn append_rows(&self, rows: &[Record]) -> Result<(), RegistryError>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct CredentialFile {
    access_token: Option<String>,
}

#[derive(Clone)]
pub struct SheetsHttpClient {
    client: Client,
    api_url: Url,
    spreadsheet_id: String,
    read_range: String,
    append_range: String,
    writable: bool,
}

impl SheetsHttpClient {
    pub fn new(settings: &Settings) -> Result<Self, RegistryError> {
        let token = match &settings.access_token {
            Some(token) => token.clone(),
            None => read_access_token(settings)?,
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("registry-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RegistryError::RemoteUnavailable(err.to_string()))?,
        );
        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| RegistryError::RemoteUnavailable("malformed access token".to_string()))?;
        bearer.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| RegistryError::RemoteUnavailable(err.to_string()))?;

        Ok(Self {
            client,
            api_url: settings.sheets_api_url.clone(),
            spreadsheet_id: settings.spreadsheet_id.clone(),
            read_range: settings.range_name.clone(),
            append_range: settings.append_range.clone(),
            writable: scopes_allow_write(&settings.scopes),
        })
    }

    fn values_url(&self, last_segment: &str) -> Result<Url, RegistryError> {
        values_url(&self.api_url, &self.spreadsheet_id, last_segment)
    }

    fn check_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, RegistryError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "spreadsheet request failed".to_string());
        Err(RegistryError::RemoteUnavailable(format!(
            "status {status}: {message}"
        )))
    }
}

impl RemoteStore for SheetsHttpClient {
    fn read_range(&self) -> Result<Vec<Record>, RegistryError> {
        let url = self.values_url(&self.read_range)?;
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| RegistryError::RemoteUnavailable(err.to_string()))?;
        let body: ValueRange = Self::check_status(response)?
            .json()
            .map_err(|err| RegistryError::RemoteUnavailable(err.to_string()))?;

        if body.values.is_empty() {
            tracing::info!("spreadsheet range {} is empty", self.read_range);
        }
        Ok(records_from_values(body.values))
    }

    fn append_rows(&self, rows: &[Record]) -> Result<(), RegistryError> {
        if rows.is_empty() {
            return Ok(());
        }
        if !self.writable {
            return Err(RegistryError::RemoteUnavailable(
                "configured scopes are read-only; append needs a read-write scope".to_string(),
            ));
        }

        let url = self.values_url(&format!("{}:append", self.append_range))?;
        let values: Vec<_> = rows.iter().map(Record::to_row).collect();
        let response = self
            .client
            .post(url)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": values }))
            .send()
            .map_err(|err| RegistryError::RemoteUnavailable(err.to_string()))?;
        Self::check_status(response)?;
        tracing::info!("appended {} row(s) to spreadsheet", rows.len());
        Ok(())
    }
}

fn read_access_token(settings: &Settings) -> Result<String, RegistryError> {
    let path = &settings.credentials_path;
    let content = fs::read_to_string(path.as_std_path()).map_err(|err| {
        RegistryError::RemoteUnavailable(format!("read credentials {path}: {err}"))
    })?;
    let credentials: CredentialFile = serde_json::from_str(&content).map_err(|err| {
        RegistryError::RemoteUnavailable(format!("parse credentials {path}: {err}"))
    })?;
    credentials
        .access_token
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            RegistryError::RemoteUnavailable(format!("credentials {path} carry no access_token"))
        })
}

pub fn values_url(api_url: &Url, spreadsheet_id: &str, last_segment: &str) -> Result<Url, RegistryError> {
    let mut url = api_url.clone();
    url.path_segments_mut()
        .map_err(|_| RegistryError::RemoteUnavailable(format!("invalid API url {api_url}")))?
        .pop_if_empty()
        .extend(["spreadsheets", spreadsheet_id, "values", last_segment]);
    Ok(url)
}

pub fn scopes_allow_write(scopes: &[String]) -> bool {
    scopes.iter().any(|scope| !scope.ends_with(".readonly"))
}

/// Converts raw sheet cells into records, dropping rows without an active
/// ingredient.
pub fn records_from_values(values: Vec<Vec<Value>>) -> Vec<Record> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(idx, row)| {
            let cells: Vec<String> = row.into_iter().map(cell_text).collect();
            match Record::from_row(&cells) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::debug!("skipping spreadsheet row {}: {err}", idx + 1);
                    None
                }
            }
        })
        .collect()
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
