//! Third Iron (LibKey/BrowZine) public API client.
//!
//! Two lookups are used:
//! - `GET {api}/articles/doi/{doi}?include=journal` - article plus its journal
//! - `GET {api}/journals?issns={issn}` - journal by ISSN
//!
//! Both answer with a `{ data, included }` envelope. There is no type tag, so
//! articles and journals are told apart by the keys they carry.

use crate::config::{ConfigResolver, API_ROOT};
use crate::error::{redact_tokens, LibKeyError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Request timeout for the bibliographic API
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Article payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArticleData {
    pub id: Option<i64>,
    pub doi: Option<String>,
    pub title: Option<String>,
    /// Direct PDF link
    pub full_text_file: Option<String>,
    /// Article landing page
    pub content_location: Option<String>,
    pub retraction_notice_url: Option<String>,
    pub expression_of_concern_notice_url: Option<String>,
    pub problematic_journal_article_notice_url: Option<String>,
    pub document_delivery_fulfillment_url: Option<String>,
    pub browzine_web_in_context_link: Option<String>,
    pub avoid_unpaywall_publisher_links: bool,
}

/// Journal payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JournalData {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub issn: Option<String>,
    pub cover_image_url: Option<String>,
    pub browzine_enabled: bool,
    pub browzine_web_link: Option<String>,
}

/// Payload discriminated by shape
#[derive(Debug, Clone, PartialEq)]
pub enum ApiData {
    Article(ArticleData),
    Journal(JournalData),
}

/// Parsed API envelope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResult {
    pub data: Option<ApiData>,
    /// First journal found in `included`
    pub included_journal: Option<JournalData>,
}

fn is_article_shape(obj: &serde_json::Map<String, Value>) -> bool {
    obj.contains_key("doi")
}

fn is_journal_shape(obj: &serde_json::Map<String, Value>) -> bool {
    ["issn", "coverImageUrl", "browzineEnabled"]
        .iter()
        .any(|k| obj.contains_key(*k))
}

fn first_object(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(value),
        _ => None,
    }
}

fn classify(value: &Value) -> Option<ApiData> {
    let obj = value.as_object()?;
    if is_article_shape(obj) {
        match serde_json::from_value(value.clone()) {
            Ok(article) => Some(ApiData::Article(article)),
            Err(e) => {
                debug!(error = %e, "Article-shaped payload did not deserialize");
                None
            }
        }
    } else if is_journal_shape(obj) {
        match serde_json::from_value(value.clone()) {
            Ok(journal) => Some(ApiData::Journal(journal)),
            Err(e) => {
                debug!(error = %e, "Journal-shaped payload did not deserialize");
                None
            }
        }
    } else {
        None
    }
}

impl ApiResult {
    /// Interpret a raw `{ data, included }` response body
    pub fn from_value(body: &Value) -> Self {
        let data = body.get("data").and_then(first_object).and_then(classify);

        let included_journal = body
            .get("included")
            .and_then(Value::as_array)
            .and_then(|items| {
                items.iter().find_map(|item| match classify(item) {
                    Some(ApiData::Journal(journal)) => Some(journal),
                    _ => None,
                })
            });

        Self {
            data,
            included_journal,
        }
    }

    pub fn article(&self) -> Option<&ArticleData> {
        match &self.data {
            Some(ApiData::Article(article)) => Some(article),
            _ => None,
        }
    }

    /// The journal itself, or the journal included with an article
    pub fn journal(&self) -> Option<&JournalData> {
        match &self.data {
            Some(ApiData::Journal(journal)) => Some(journal),
            _ => self.included_journal.as_ref(),
        }
    }
}

/// Bibliographic lookups used by the waterfall
#[async_trait]
pub trait LibraryApi: Send + Sync {
    /// Article by URL-encoded DOI, with its journal included
    async fn article_by_doi(&self, doi: &str) -> Result<Option<ApiResult>>;

    /// Journal by URL-encoded, comma-separated ISSNs
    async fn journal_by_issn(&self, issn: &str) -> Result<Option<ApiResult>>;
}

/// reqwest-backed Third Iron API client.
///
/// Library id and API key are read from the config on every call, so a
/// multicampus institution that resolves late is picked up without rebuilding.
pub struct ThirdIronClient {
    client: Client,
    config: Arc<ConfigResolver>,
    api_root: String,
}

impl ThirdIronClient {
    pub fn new(config: Arc<ConfigResolver>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("rustlibkey/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LibKeyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            api_root: API_ROOT.to_string(),
        })
    }

    /// Point the client at another API root (the part before `/libraries`)
    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self
    }

    /// Build `{api_root}/libraries/{id}/{path}` with the access token appended; `None` when unconfigured
    fn endpoint(&self, path: &str) -> Result<Option<Url>> {
        let (Some(library_id), Some(api_key)) = (self.config.library_id(), self.config.api_key()) else {
            debug!(path, "Library id or API key not configured, skipping lookup");
            return Ok(None);
        };

        let raw = format!(
            "{}/libraries/{}/{}",
            self.api_root.trim_end_matches('/'),
            library_id,
            path
        );
        let mut url =
            Url::parse(&raw).map_err(|e| LibKeyError::Config(format!("Invalid API URL: {}", e)))?;
        url.query_pairs_mut().append_pair("access_token", &api_key);
        Ok(Some(url))
    }

    async fn fetch(&self, url: Url) -> Result<Option<ApiResult>> {
        let redacted = redact_tokens(url.as_str());
        debug!(url = %redacted, "Third Iron API request");

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!(url = %redacted, "Third Iron API: no match");
            return Ok(None);
        }
        if !status.is_success() {
            warn!(url = %redacted, status = status.as_u16(), "Third Iron API error");
            return Err(LibKeyError::Api {
                code: status.as_u16(),
                message: format!("Third Iron API error: {}", status),
            });
        }

        let body = response.text().await?;
        let body: Value = serde_json::from_str(&body)?;
        let result = ApiResult::from_value(&body);
        if result.data.is_none() {
            debug!(url = %redacted, "Third Iron API: empty payload");
            return Ok(None);
        }
        Ok(Some(result))
    }
}

#[async_trait]
impl LibraryApi for ThirdIronClient {
    async fn article_by_doi(&self, doi: &str) -> Result<Option<ApiResult>> {
        if doi.is_empty() {
            return Ok(None);
        }
        let Some(url) = self.endpoint(&format!("articles/doi/{}?include=journal", doi))? else {
            return Ok(None);
        };
        self.fetch(url).await
    }

    async fn journal_by_issn(&self, issn: &str) -> Result<Option<ApiResult>> {
        if issn.is_empty() {
            return Ok(None);
        }
        let Some(url) = self.endpoint(&format!("journals?issns={}", issn))? else {
            return Ok(None);
        };
        self.fetch(url).await
    }
}
