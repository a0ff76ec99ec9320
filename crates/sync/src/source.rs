//! Where spreadsheet rows come from.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not read sheet file `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("sheet data is malformed: {0}")]
    Parse(String),
    #[error("invalid sheets url: {0}")]
    Url(String),
    #[error("sheets request failed: {0}")]
    Transport(String),
    #[error("sheets api answered {status}: {body}")]
    Status { status: u16, body: String },
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Read { source, .. } => source.kind() != ErrorKind::NotFound,
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_) | Self::Url(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Read { .. } => "sheet_read",
            Self::Parse(_) => "sheet_parse",
            Self::Url(_) => "sheet_url",
            Self::Transport(_) => "sheet_transport",
            Self::Status { .. } => "sheet_status",
        }
    }
}

#[async_trait]
pub trait SheetSource: Send + Sync {
    /// Raw cell rows, header row excluded by the configured range.
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, SourceError>;

    fn describe(&self) -> String;
}

/// Shape of a Sheets `values` response.
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl ValueRange {
    fn into_rows(self) -> Vec<Vec<String>> {
        self.values
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| match cell {
                        Value::String(text) => text,
                        Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect()
    }
}

fn parse_value_range(body: &str) -> Result<Vec<Vec<String>>, SourceError> {
    serde_json::from_str::<ValueRange>(body)
        .map(ValueRange::into_rows)
        .map_err(|error| SourceError::Parse(error.to_string()))
}

/// Reads a JSON file shaped like the Sheets `values` response.
pub struct JsonFileSheetSource {
    path: PathBuf,
}

impl JsonFileSheetSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SheetSource for JsonFileSheetSource {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, SourceError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Read { path: self.path.clone(), source })?;
        parse_value_range(&body)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

pub struct SheetsApiSource {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    range: String,
    api_key: SecretString,
}

impl SheetsApiSource {
    pub fn new(
        base_url: &str,
        spreadsheet_id: impl Into<String>,
        range: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SourceError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            api_key,
        })
    }

    fn values_url(&self) -> Result<Url, SourceError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|error| SourceError::Url(error.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Url(format!("`{}` cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str(), "values", self.range.as_str()]);
        url.query_pairs_mut().append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }
}

#[async_trait]
impl SheetSource for SheetsApiSource {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, SourceError> {
        let response = self
            .client
            .get(self.values_url()?)
            .send()
            .await
            .map_err(|error| SourceError::Transport(error.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| SourceError::Transport(error.without_url().to_string()))?;
        if status != StatusCode::OK {
            return Err(SourceError::Status { status: status.as_u16(), body });
        }
        parse_value_range(&body)
    }

    fn describe(&self) -> String {
        format!("sheets:{}!{}", self.spreadsheet_id, self.range)
    }
}

/// Fixed rows, for demos and tests.
pub struct StaticSheetSource {
    rows: Vec<Vec<String>>,
}

impl StaticSheetSource {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl SheetSource for StaticSheetSource {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, SourceError> {
        Ok(self.rows.clone())
    }

    fn describe(&self) -> String {
        format!("static:{} rows", self.rows.len())
    }
}
