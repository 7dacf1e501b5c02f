//! HTTP driver for the ISP registry search form (an ASP.NET WebForms page).

use std::fs;
use std::sync::LazyLock;
use std::time::Duration;

use camino::Utf8PathBuf;
use regex::Regex;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tempfile::TempDir;

use crate::domain::{RECORD_WIDTH, Record};
use crate::error::RegistryError;
use crate::fetcher::{SearchBackend, SearchSession};

pub const SEARCH_BY_INGREDIENT_FIELD: &str = "ctl00$ContentPlaceHolder1$chkTipoBusqueda$1";
pub const INGREDIENT_FIELD: &str = "ctl00$ContentPlaceHolder1$txtPrincipio";
pub const SEARCH_BUTTON_FIELD: &str = "ctl00$ContentPlaceHolder1$btnBuscar";
pub const RESULTS_GRID_ID: &str = "ctl00_ContentPlaceHolder1_gvDatosBusqueda";

static HIDDEN_INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<input\b[^>]*\btype\s*=\s*"hidden"[^>]*>"#).unwrap());
static ATTRIBUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)\b(name|value)\s*=\s*"([^"]*)""#).unwrap());
static GRID_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?is)<table\b[^>]*\bid\s*=\s*"{RESULTS_GRID_ID}"[^>]*>"#
    ))
    .unwrap()
});
static TABLE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<(/?)table\b[^>]*>").unwrap());
static ROW_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap());
static CELL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone)]
pub struct IspHttpBackend {
    base_url: Url,
    timeout: Duration,
}

impl IspHttpBackend {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        Self { base_url, timeout }
    }
}

impl SearchBackend for IspHttpBackend {
    type Session = IspSession;

    fn open(&self) -> Result<IspSession, RegistryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("registry-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RegistryError::SourceHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(self.timeout)
            .build()
            .map_err(|err| RegistryError::SourceHttp(err.to_string()))?;
        let download_dir = tempfile::Builder::new()
            .prefix("registry-sync-")
            .tempdir()
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        tracing::debug!("opened search session, downloads in {}", download_dir.path().display());

        Ok(IspSession {
            client,
            base_url: self.base_url.clone(),
            download_dir: Some(download_dir),
            page_fields: None,
            form: Vec::new(),
            results_html: None,
            downloads: 0,
        })
    }
}

pub struct IspSession {
    client: Client,
    base_url: Url,
    download_dir: Option<TempDir>,
    page_fields: Option<Vec<(String, String)>>,
    form: Vec<(String, String)>,
    results_html: Option<String>,
    downloads: usize,
}

impl IspSession {
    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<String, RegistryError> {
        let response = request
            .send()
            .map_err(|err| RegistryError::SourceHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "registry request failed".to_string());
            return Err(RegistryError::SourceStatus { status, message });
        }
        response
            .text()
            .map_err(|err| RegistryError::SourceHttp(err.to_string()))
    }

    fn post_search(&self) -> Result<String, RegistryError> {
        if self.form.is_empty() {
            return Err(RegistryError::SourceHttp(
                "search submitted before the form was filled".to_string(),
            ));
        }
        self.send(self.client.post(self.base_url.clone()).form(&self.form))
    }

    fn download_path(&self, ingredient: &str) -> Result<Utf8PathBuf, RegistryError> {
        let dir = self
            .download_dir
            .as_ref()
            .ok_or_else(|| RegistryError::Filesystem("search session already closed".to_string()))?;
        let dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|_| RegistryError::Filesystem("invalid download dir".to_string()))?;
        Ok(dir.join(format!("{}-{}.html", file_slug(ingredient), self.downloads)))
    }
}

impl SearchSession for IspSession {
    fn navigate(&mut self) -> Result<(), RegistryError> {
        let html = self.send(self.client.get(self.base_url.clone()))?;
        self.page_fields = Some(hidden_fields(&html));
        self.form.clear();
        self.results_html = None;
        Ok(())
    }

    fn fill_form(&mut self, ingredient: &str) -> Result<(), RegistryError> {
        let fields = self.page_fields.as_ref().ok_or_else(|| {
            RegistryError::SourceHttp("form filled before the search page loaded".to_string())
        })?;
        self.form = fields.clone();
        self.form
            .push((SEARCH_BY_INGREDIENT_FIELD.to_string(), "on".to_string()));
        self.form
            .push((INGREDIENT_FIELD.to_string(), ingredient.trim().to_string()));
        self.form
            .push((SEARCH_BUTTON_FIELD.to_string(), "Buscar".to_string()));
        Ok(())
    }

    fn submit(&mut self) -> Result<(), RegistryError> {
        self.results_html = Some(self.post_search()?);
        Ok(())
    }

    fn result_count(&mut self) -> Result<usize, RegistryError> {
        let html = self.results_html.as_deref().ok_or_else(|| {
            RegistryError::SourceHttp("results checked before submitting".to_string())
        })?;
        Ok(result_rows(html).len())
    }

    /// Saves the result page into the session's download directory and
    /// converts it. A repeated call re-submits the search first.
    fn download(&mut self, ingredient: &str) -> Result<Vec<Record>, RegistryError> {
        let html = match self.results_html.take() {
            Some(html) => html,
            None => self.post_search()?,
        };
        let path = self.download_path(ingredient)?;
        self.downloads += 1;
        fs::write(path.as_std_path(), html.as_bytes())
            .map_err(|err| RegistryError::Filesystem(format!("write {path}: {err}")))?;

        let saved = fs::read_to_string(path.as_std_path())
            .map_err(|err| RegistryError::Filesystem(format!("read {path}: {err}")))?;
        let records = records_from_page(&saved);
        if records.is_empty() {
            return Err(RegistryError::MalformedRecord(format!(
                "result page for {ingredient} had no readable rows"
            )));
        }
        Ok(records)
    }

    fn close(&mut self) -> Result<(), RegistryError> {
        self.page_fields = None;
        self.results_html = None;
        match self.download_dir.take() {
            Some(dir) => dir
                .close()
                .map_err(|err| RegistryError::Filesystem(err.to_string())),
            None => Ok(()),
        }
    }
}

/// Name/value pairs of every hidden input (`__VIEWSTATE` and friends).
pub fn hidden_fields(html: &str) -> Vec<(String, String)> {
    HIDDEN_INPUT_RE
        .find_iter(html)
        .filter_map(|tag| {
            let mut name = None;
            let mut value = String::new();
            for caps in ATTRIBUTE_RE.captures_iter(tag.as_str()) {
                match caps[1].to_ascii_lowercase().as_str() {
                    "name" => name = Some(decode_entities(&caps[2])),
                    _ => value = decode_entities(&caps[2]),
                }
            }
            name.map(|name| (name, value))
        })
        .collect()
}

/// Cell texts of each data row in the results grid. Header and pager rows
/// are dropped.
pub fn result_rows(html: &str) -> Vec<Vec<String>> {
    let Some(grid) = grid_body(html) else {
        return Vec::new();
    };
    ROW_RE
        .captures_iter(&grid)
        .map(|row| {
            CELL_RE
                .captures_iter(&row[1])
                .map(|cell| cell_text(&cell[1]))
                .collect::<Vec<_>>()
        })
        .filter(|cells| cells.len() > RECORD_WIDTH)
        .collect()
}

/// Markup between the grid's opening tag and its matching close, with any
/// nested table (the GridView pager) cut out.
fn grid_body(html: &str) -> Option<String> {
    let open = GRID_OPEN_RE.find(html)?;
    let mut body = String::new();
    let mut depth = 1usize;
    let mut cursor = open.end();
    for tag in TABLE_TAG_RE.find_iter(&html[open.end()..]) {
        let start = open.end() + tag.start();
        if depth == 1 {
            body.push_str(&html[cursor..start]);
        }
        cursor = open.end() + tag.end();
        if tag.as_str().starts_with("</") {
            depth -= 1;
            if depth == 0 {
                return Some(body);
            }
        } else {
            depth += 1;
        }
    }
    if depth == 1 {
        body.push_str(&html[cursor..]);
    }
    Some(body)
}

/// Grid columns 1..=6 hold the record; column 0 is the row selector.
pub fn records_from_page(html: &str) -> Vec<Record> {
    result_rows(html)
        .iter()
        .filter_map(|cells| match Record::from_row(&cells[1..=RECORD_WIDTH]) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!("skipping result row {:?}: {err}", cells[1]);
                None
            }
        })
        .collect()
}

fn cell_text(raw: &str) -> String {
    let without_tags = TAG_RE.replace_all(raw, " ");
    let decoded = decode_entities(&without_tags);
    SPACE_RE.replace_all(decoded.trim(), " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn file_slug(ingredient: &str) -> String {
    let slug: String = ingredient
        .trim()
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { '-' })
        .collect();
    if slug.is_empty() {
        "search".to_string()
    } else {
        slug
    }
}
