//! Unpaywall open-access fallback.
//!
//! Consulted only when the Third Iron lookup produced no primary action. The
//! client returns up to four candidate URLs; [`unpaywall_action`] picks the
//! first one that is both present and enabled.

use crate::config::ConfigResolver;
use crate::error::{LibKeyError, Result};
use crate::waterfall::ButtonType;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Unpaywall API base URL
const UNPAYWALL_API_URL: &str = "https://api.unpaywall.org/v2";

/// Email sent when the settings do not name one
const DEFAULT_EMAIL: &str = "unpaywall@thirdiron.com";

/// Host type Unpaywall reports for publisher-hosted copies
const PUBLISHER_HOST_TYPE: &str = "publisher";

/// Candidate open-access links for one DOI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpaywallUrls {
    pub title: Option<String>,
    pub journal_name: Option<String>,
    #[serde(rename = "articlePDFUrl")]
    pub article_pdf_url: Option<String>,
    pub article_link_url: Option<String>,
    #[serde(rename = "manuscriptArticlePDFUrl")]
    pub manuscript_article_pdf_url: Option<String>,
    pub manuscript_article_link_url: Option<String>,
    /// `best_oa_location.host_type`, usually "publisher" or "repository"
    pub link_host_type: Option<String>,
}

/// Unpaywall-compatible lookup
#[async_trait]
pub trait UnpaywallClient: Send + Sync {
    /// Look up open-access links for an unencoded DOI
    async fn lookup(&self, doi: &str) -> Result<Option<UnpaywallUrls>>;
}

#[derive(Debug, Deserialize)]
struct UnpaywallResponse {
    title: Option<String>,
    journal_name: Option<String>,
    best_oa_location: Option<OaLocation>,
}

#[derive(Debug, Deserialize)]
struct OaLocation {
    url: Option<String>,
    url_for_pdf: Option<String>,
    url_for_landing_page: Option<String>,
    version: Option<String>,
    host_type: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl From<UnpaywallResponse> for UnpaywallUrls {
    fn from(response: UnpaywallResponse) -> Self {
        let mut urls = UnpaywallUrls {
            title: response.title,
            journal_name: response.journal_name,
            ..Default::default()
        };
        let Some(location) = response.best_oa_location else {
            return urls;
        };

        let pdf = non_empty(location.url_for_pdf);
        let link = non_empty(location.url_for_landing_page).or(non_empty(location.url));

        match location.version.as_deref() {
            Some("publishedVersion") => {
                urls.article_pdf_url = pdf;
                urls.article_link_url = link;
            }
            Some("acceptedVersion") => {
                urls.manuscript_article_pdf_url = pdf;
                urls.manuscript_article_link_url = link;
            }
            other => debug!(version = ?other, "Unpaywall location version not used"),
        }
        urls.link_host_type = location.host_type;
        urls
    }
}

/// reqwest-backed client for `api.unpaywall.org`
pub struct UnpaywallHttpClient {
    client: Client,
    base_url: Url,
    email: String,
}

impl UnpaywallHttpClient {
    pub fn new(email: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("rustlibkey/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| LibKeyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: parse_base_url(UNPAYWALL_API_URL)?,
            email: email.unwrap_or_else(|| DEFAULT_EMAIL.to_string()),
        })
    }

    /// Point the client at another Unpaywall-compatible API root
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    /// `{base}/{doi}` with every `/`-separated DOI part percent-encoded
    fn request_url(&self, doi: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LibKeyError::Config(format!("Unusable Unpaywall URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(doi.split('/'));
        Ok(url)
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| LibKeyError::Config(format!("Invalid Unpaywall URL {}: {}", raw, e)))
}

impl UnpaywallUrls {
    fn has_any_link(&self) -> bool {
        [
            &self.article_pdf_url,
            &self.article_link_url,
            &self.manuscript_article_pdf_url,
            &self.manuscript_article_link_url,
        ]
        .iter()
        .any(|url| url.is_some())
    }
}

#[async_trait]
impl UnpaywallClient for UnpaywallHttpClient {
    async fn lookup(&self, doi: &str) -> Result<Option<UnpaywallUrls>> {
        let url = self.request_url(doi)?;
        debug!(doi, url = %url, "Unpaywall request");

        let response = self
            .client
            .get(url)
            .query(&[("email", self.email.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(doi, "Unpaywall: DOI not found");
            return Ok(None);
        }
        if !response.status().is_success() {
            warn!(doi, status = response.status().as_u16(), "Unpaywall API error");
            return Err(LibKeyError::Api {
                code: response.status().as_u16(),
                message: format!("Unpaywall API error: {}", response.status()),
            });
        }

        let body = response.text().await?;
        let data: UnpaywallResponse = serde_json::from_str(&body)?;
        let urls = UnpaywallUrls::from(data);
        if !urls.has_any_link() {
            debug!(doi, "Unpaywall: no open-access location");
            return Ok(None);
        }
        Ok(Some(urls))
    }
}

/// Decode a percent-encoded DOI once.
///
/// Already-decoded input passes through. Malformed escapes (a `%` not
/// followed by two hex digits, or bytes that are not UTF-8) return the
/// trimmed input unchanged.
pub fn decode_doi(input: &str) -> String {
    let trimmed = input.trim();
    let bytes = trimmed.as_bytes();

    let well_formed = bytes.iter().enumerate().all(|(i, b)| {
        *b != b'%'
            || (bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit))
    });
    if !well_formed {
        debug!(doi = trimmed, "Malformed percent-encoding in DOI, using as-is");
        return trimmed.to_string();
    }

    match urlencoding::decode(trimmed) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            debug!(doi = trimmed, error = %e, "DOI did not decode to UTF-8, using as-is");
            trimmed.to_string()
        }
    }
}

/// First enabled Unpaywall action, or `None` when nothing qualifies.
///
/// Publisher-hosted copies are discarded when the article asks to avoid them.
pub fn unpaywall_action(
    urls: &UnpaywallUrls,
    avoid_publisher_links: bool,
    config: &ConfigResolver,
) -> Option<(ButtonType, String)> {
    if avoid_publisher_links && urls.link_host_type.as_deref() == Some(PUBLISHER_HOST_TYPE) {
        debug!("Unpaywall publisher link avoided");
        return None;
    }

    let candidates = [
        (
            ButtonType::UnpaywallDirectToPDF,
            &urls.article_pdf_url,
            config.show_unpaywall_direct_to_pdf_link(),
        ),
        (
            ButtonType::UnpaywallArticleLink,
            &urls.article_link_url,
            config.show_unpaywall_article_link(),
        ),
        (
            ButtonType::UnpaywallManuscriptPDF,
            &urls.manuscript_article_pdf_url,
            config.show_unpaywall_manuscript_pdf_link(),
        ),
        (
            ButtonType::UnpaywallManuscriptLink,
            &urls.manuscript_article_link_url,
            config.show_unpaywall_manuscript_article_link(),
        ),
    ];

    candidates
        .into_iter()
        .find_map(|(kind, url, enabled)| match url {
            Some(url) if enabled && !url.is_empty() => Some((kind, url.clone())),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::test_server;
    use axum::http::StatusCode as HttpStatus;
    use serde_json::json;

    const SICI_DOI: &str = "10.1002/(SICI)1097-0258(19980715)17:13<1525::AID-SIM819>3.0.CO;2-#";

    fn all_enabled() -> ConfigResolver {
        ConfigResolver::single_campus(Settings::from_pairs([
            ("articlePDFDownloadViaUnpaywallEnabled", "true"),
            ("articleLinkViaUnpaywallEnabled", "true"),
            ("articleAcceptedManuscriptPDFViaUnpaywallEnabled", "true"),
            ("articleAcceptedManuscriptArticleLinkViaUnpaywallEnabled", "true"),
        ]))
    }

    fn published(host_type: &str) -> UnpaywallUrls {
        UnpaywallUrls {
            article_pdf_url: Some("https://oa.example/pdf".to_string()),
            article_link_url: Some("https://oa.example/page".to_string()),
            link_host_type: Some(host_type.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_doi() {
        assert_eq!(decode_doi("10.1038%2Fx"), "10.1038/x");
        assert_eq!(decode_doi("10.1038/x"), "10.1038/x");
        assert_eq!(decode_doi("10.1038%2Gx"), "10.1038%2Gx");
        assert_eq!(decode_doi(" 10.1038%2Fx%"), "10.1038%2Fx%");
        assert_eq!(decode_doi("10.1038%FFx"), "10.1038%FFx");
    }

    #[test]
    fn test_priority_order() {
        let config = all_enabled();
        let action = unpaywall_action(&published("repository"), false, &config);
        assert_eq!(
            action,
            Some((ButtonType::UnpaywallDirectToPDF, "https://oa.example/pdf".to_string()))
        );

        let manuscript = UnpaywallUrls {
            manuscript_article_pdf_url: Some(String::new()),
            manuscript_article_link_url: Some("https://repo.example/am".to_string()),
            ..Default::default()
        };
        assert_eq!(
            unpaywall_action(&manuscript, false, &config),
            Some((ButtonType::UnpaywallManuscriptLink, "https://repo.example/am".to_string()))
        );
    }

    #[test]
    fn test_disabled_flag_skips_candidate() {
        let config = ConfigResolver::single_campus(Settings::from_pairs([(
            "articleLinkViaUnpaywallEnabled",
            "true",
        )]));
        assert_eq!(
            unpaywall_action(&published("repository"), false, &config),
            Some((ButtonType::UnpaywallArticleLink, "https://oa.example/page".to_string()))
        );
    }

    #[test]
    fn test_avoided_publisher_link_yields_nothing() {
        let config = all_enabled();
        assert_eq!(unpaywall_action(&published("publisher"), true, &config), None);
        assert!(unpaywall_action(&published("publisher"), false, &config).is_some());
        assert!(unpaywall_action(&published("repository"), true, &config).is_some());
    }

    #[test]
    fn test_response_mapping_by_version() {
        let response: UnpaywallResponse = serde_json::from_value(json!({
            "title": "Paper",
            "journal_name": "Journal",
            "best_oa_location": {
                "url": "https://repo.example/record",
                "url_for_pdf": "https://repo.example/am.pdf",
                "url_for_landing_page": null,
                "version": "acceptedVersion",
                "host_type": "repository"
            }
        }))
        .unwrap();

        let urls = UnpaywallUrls::from(response);
        assert_eq!(urls.article_pdf_url, None);
        assert_eq!(urls.manuscript_article_pdf_url.as_deref(), Some("https://repo.example/am.pdf"));
        assert_eq!(urls.manuscript_article_link_url.as_deref(), Some("https://repo.example/record"));
        assert_eq!(urls.link_host_type.as_deref(), Some("repository"));
    }

    #[test]
    fn test_request_url_keeps_doi_syntax_characters() {
        let client = UnpaywallHttpClient::new(None).unwrap();

        let url = client.request_url(SICI_DOI).unwrap();
        assert_eq!(url.fragment(), None);
        assert_eq!(url.query(), None);
        assert_eq!(
            url.path(),
            "/v2/10.1002/(SICI)1097-0258(19980715)17:13%3C1525::AID-SIM819%3E3.0.CO;2-%23"
        );

        let url = client.request_url("10.1000/a?b%c").unwrap();
        assert_eq!(url.as_str(), "https://api.unpaywall.org/v2/10.1000/a%3Fb%25c");
    }

    fn client_for(server: &test_server::CannedServer) -> UnpaywallHttpClient {
        UnpaywallHttpClient::new(Some("ops@library.example".to_string()))
            .unwrap()
            .with_base_url(&format!("{}/v2/", server.base_url))
            .unwrap()
    }

    #[tokio::test]
    async fn test_lookup_maps_best_location() {
        let server = test_server::serve(
            HttpStatus::OK,
            r#"{"title": "Paper", "best_oa_location": {"url_for_pdf": "https://oa.example/pdf", "version": "publishedVersion", "host_type": "publisher"}}"#,
        )
        .await;
        let client = client_for(&server);

        let urls = client.lookup(SICI_DOI).await.unwrap().unwrap();
        assert_eq!(urls.article_pdf_url.as_deref(), Some("https://oa.example/pdf"));
        assert_eq!(urls.link_host_type.as_deref(), Some("publisher"));

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("/v2/10.1002/(SICI)"));
        assert!(requests[0].ends_with("3.0.CO;2-%23?email=ops%40library.example"));
    }

    #[tokio::test]
    async fn test_lookup_not_found_is_none() {
        let server = test_server::serve(HttpStatus::NOT_FOUND, r#"{"error": true}"#).await;
        let client = client_for(&server);
        assert_eq!(client.lookup("10.1/missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lookup_without_location_is_none() {
        let server = test_server::serve(HttpStatus::OK, r#"{"title": "Closed", "best_oa_location": null}"#).await;
        let client = client_for(&server);
        assert_eq!(client.lookup("10.1/closed").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lookup_server_error_is_api_error() {
        let server = test_server::serve(HttpStatus::SERVICE_UNAVAILABLE, "").await;
        let client = client_for(&server);
        let result = client.lookup("10.1/x").await;
        assert!(matches!(result, Err(LibKeyError::Api { code: 503, .. })));
    }

    #[tokio::test]
    async fn test_lookup_malformed_body_is_json_error() {
        let server = test_server::serve(HttpStatus::OK, "<html>maintenance</html>").await;
        let client = client_for(&server);
        let result = client.lookup("10.1/x").await;
        assert!(matches!(result, Err(LibKeyError::Json(_))));
    }
}
