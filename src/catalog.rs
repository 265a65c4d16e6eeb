use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::book::BookRecord;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub request_timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog request timed out")]
    Timeout,
    #[error("catalog request failed with status {0}")]
    Status(reqwest::StatusCode),
    #[error("catalog transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("catalog payload malformed: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("catalog url invalid: {0}")]
    Url(#[from] url::ParseError),
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("catalog client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base).context("catalog: parse base url")?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.request_timeout.unwrap_or(DEFAULT_TIMEOUT))
                .build()
                .context("catalog: build http client")?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn section(&self, name: &str, limit: usize) -> Result<Vec<BookRecord>, CatalogError> {
        let url = self.section_url(name, limit, &cache_bust())?;
        self.fetch(url)
    }

    pub fn search(&self, query: &str) -> Result<Vec<BookRecord>, CatalogError> {
        let mut url = self.base_url.join("/api/books/search")?;
        url.query_pairs_mut().append_pair("q", query);
        self.fetch(url)
    }

    pub fn related(&self, title: &str, author: &str) -> Result<Vec<BookRecord>, CatalogError> {
        let mut url = self.base_url.join("/api/books/related")?;
        url.query_pairs_mut()
            .append_pair("title", title)
            .append_pair("author", author);
        self.fetch(url)
    }

    fn section_url(&self, name: &str, limit: usize, bust: &str) -> Result<Url, CatalogError> {
        let encoded = utf8_percent_encode(name, NON_ALPHANUMERIC);
        let mut url = self
            .base_url
            .join(&format!("/api/books/section/{encoded}"))?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("_", bust);
        Ok(url)
    }

    fn fetch(&self, url: Url) -> Result<Vec<BookRecord>, CatalogError> {
        debug!(%url, "catalog fetch");
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status));
        }

        let payload: Payload = response.json().map_err(|err| {
            if err.is_timeout() {
                CatalogError::Timeout
            } else {
                CatalogError::Decode(err)
            }
        })?;
        Ok(payload.into_records())
    }
}

fn transport_error(err: reqwest::Error) -> CatalogError {
    if err.is_timeout() {
        CatalogError::Timeout
    } else {
        CatalogError::Transport(err)
    }
}

// The search route answers with either a bare array or an {items} wrapper.
#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Wrapped {
        #[serde(default)]
        items: Vec<BookRecord>,
    },
    List(Vec<BookRecord>),
}

impl Payload {
    fn into_records(self) -> Vec<BookRecord> {
        match self {
            Payload::Wrapped { items } => items,
            Payload::List(records) => records,
        }
    }
}

fn cache_bust() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
        .to_string()
}
