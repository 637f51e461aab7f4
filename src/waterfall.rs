//! The display waterfall.
//!
//! For one record: look it up in the Third Iron API, pick the single primary
//! action the configuration allows, fall back to Unpaywall when nothing
//! qualified, and independently pick a journal cover. Every failure on the
//! way degrades to "nothing to show"; [`DisplayWaterfall::display_info`]
//! cannot fail.

use crate::config::ConfigResolver;
use crate::libkey::{ApiData, ApiResult, ArticleData, JournalData, LibraryApi};
use crate::search_entity::{EntityType, SearchEntity};
use crate::unpaywall::{decode_doi, unpaywall_action, UnpaywallClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Kind of the primary action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonType {
    #[default]
    None,
    DirectToPDF,
    ArticleLink,
    Retraction,
    ExpressionOfConcern,
    ProblematicJournalArticle,
    DocumentDelivery,
    UnpaywallDirectToPDF,
    UnpaywallArticleLink,
    UnpaywallManuscriptPDF,
    UnpaywallManuscriptLink,
}

/// Where a primary action's URL came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaterfallSource {
    ThirdIron,
    UnpaywallPublished,
    UnpaywallManuscript,
}

impl ButtonType {
    pub fn source(self) -> Option<WaterfallSource> {
        match self {
            Self::None => None,
            Self::DirectToPDF
            | Self::ArticleLink
            | Self::Retraction
            | Self::ExpressionOfConcern
            | Self::ProblematicJournalArticle
            | Self::DocumentDelivery => Some(WaterfallSource::ThirdIron),
            Self::UnpaywallDirectToPDF | Self::UnpaywallArticleLink => {
                Some(WaterfallSource::UnpaywallPublished)
            }
            Self::UnpaywallManuscriptPDF | Self::UnpaywallManuscriptLink => {
                Some(WaterfallSource::UnpaywallManuscript)
            }
        }
    }

    /// Alert-type actions shown instead of a link
    pub fn is_alert(self) -> bool {
        matches!(
            self,
            Self::Retraction | Self::ExpressionOfConcern | Self::ProblematicJournalArticle
        )
    }
}

/// Resolved display state for one record.
///
/// The default value is the explicit "nothing to show" decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayDecision {
    pub entity_type: EntityType,
    pub main_button_type: ButtonType,
    pub main_url: String,
    pub secondary_url: String,
    pub show_secondary_button: bool,
    pub show_browzine_button: bool,
    pub browzine_url: String,
    pub cover_url: String,
}

impl DisplayDecision {
    /// A primary action kind with a URL is set
    pub fn has_primary_action(&self) -> bool {
        self.main_button_type != ButtonType::None && !self.main_url.is_empty()
    }

    fn with_primary(mut self, kind: ButtonType, url: String) -> Self {
        self.main_button_type = kind;
        self.main_url = url;
        self
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn is_default_cover(url: &str) -> bool {
    url.to_lowercase().contains("default")
}

/// Runs the lookup-and-decide pipeline for single records
#[derive(Clone)]
pub struct DisplayWaterfall {
    config: Arc<ConfigResolver>,
    api: Arc<dyn LibraryApi>,
    unpaywall: Arc<dyn UnpaywallClient>,
}

impl DisplayWaterfall {
    pub fn new(
        config: Arc<ConfigResolver>,
        api: Arc<dyn LibraryApi>,
        unpaywall: Arc<dyn UnpaywallClient>,
    ) -> Self {
        Self {
            config,
            api,
            unpaywall,
        }
    }

    pub fn config(&self) -> &Arc<ConfigResolver> {
        &self.config
    }

    /// Full decision for a record: primary/secondary action, BrowZine and cover
    pub async fn display_info(&self, entity: &SearchEntity) -> DisplayDecision {
        let enhance_buttons = entity.should_enhance_buttons();
        let enhance_cover = entity.should_enhance_cover();
        if !enhance_buttons && !enhance_cover {
            debug!("Record not eligible for enhancement");
            return DisplayDecision::default();
        }

        let response = self.lookup(entity).await;

        let mut decision = DisplayDecision::default();
        if enhance_buttons {
            decision = self.decide(response.as_ref());

            let doi = entity.doi();
            if !decision.has_primary_action() && self.config.is_unpaywall_enabled() && !doi.is_empty() {
                let avoid_publisher_links = response
                    .as_ref()
                    .and_then(ApiResult::article)
                    .is_some_and(|a| a.avoid_unpaywall_publisher_links);
                decision = self
                    .unpaywall_fallback(decision, &doi, avoid_publisher_links)
                    .await;
            }
        }

        if enhance_cover {
            decision.cover_url = self.cover_from(response.as_ref()).unwrap_or_default();
        }

        debug!(
            record_type = ?entity.entity_type(),
            entity_type = ?decision.entity_type,
            button = ?decision.main_button_type,
            source = ?decision.main_button_type.source(),
            browzine = decision.show_browzine_button,
            cover = !decision.cover_url.is_empty(),
            "Display decision"
        );
        decision
    }

    /// Cover image URL only, without the button waterfall
    pub async fn cover_url(&self, entity: &SearchEntity) -> Option<String> {
        if !entity.should_enhance_cover() {
            return None;
        }
        let response = self.lookup(entity).await;
        self.cover_from(response.as_ref())
    }

    /// Article by DOI, else journal by ISSN. Failures are logged and read as no data.
    async fn lookup(&self, entity: &SearchEntity) -> Option<ApiResult> {
        let doi = entity.doi();
        let issn = entity.issn();

        let (kind, result) = if entity.is_article() && !doi.is_empty() {
            ("article", self.api.article_by_doi(&doi).await)
        } else if !issn.is_empty() {
            ("journal", self.api.journal_by_issn(&issn).await)
        } else {
            return None;
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                warn!(lookup = kind, error = %e, "Third Iron lookup failed");
                None
            }
        }
    }

    /// Config-gated decision from a primary API response
    pub fn decide(&self, response: Option<&ApiResult>) -> DisplayDecision {
        let Some(response) = response else {
            return DisplayDecision::default();
        };
        match &response.data {
            Some(ApiData::Article(article)) => {
                self.article_decision(article, response.included_journal.as_ref())
            }
            Some(ApiData::Journal(journal)) => self.journal_decision(journal),
            None => DisplayDecision::default(),
        }
    }

    fn article_decision(&self, article: &ArticleData, journal: Option<&JournalData>) -> DisplayDecision {
        let config = &self.config;
        let mut decision = DisplayDecision {
            entity_type: EntityType::Article,
            ..Default::default()
        };

        let pdf = present(&article.full_text_file);
        let link = present(&article.content_location);

        let candidates = [
            (
                ButtonType::Retraction,
                present(&article.retraction_notice_url),
                config.show_retraction_watch(),
            ),
            (
                ButtonType::ExpressionOfConcern,
                present(&article.expression_of_concern_notice_url),
                config.show_expression_of_concern(),
            ),
            (
                ButtonType::ProblematicJournalArticle,
                present(&article.problematic_journal_article_notice_url),
                config.show_problematic_journal(),
            ),
            (ButtonType::DirectToPDF, pdf, config.show_direct_to_pdf_link()),
            (ButtonType::ArticleLink, link, config.show_article_link()),
            (
                ButtonType::DocumentDelivery,
                present(&article.document_delivery_fulfillment_url),
                config.show_document_delivery(),
            ),
        ];

        if let Some((kind, url)) = candidates
            .into_iter()
            .find_map(|(kind, url, enabled)| url.filter(|_| enabled).map(|u| (kind, u)))
        {
            decision = decision.with_primary(kind, url.to_string());
        }

        if decision.main_button_type == ButtonType::DirectToPDF
            && config.show_format_choice()
            && config.show_article_link()
        {
            if let Some(link) = link {
                decision.secondary_url = link.to_string();
                decision.show_secondary_button = true;
            }
        }

        let in_context = present(&article.browzine_web_in_context_link);
        let journal_enabled = journal.is_some_and(|j| j.browzine_enabled);
        if let (Some(url), true, true) = (in_context, journal_enabled, config.show_article_browzine()) {
            decision.show_browzine_button = true;
            decision.browzine_url = url.to_string();
        }

        decision
    }

    fn journal_decision(&self, journal: &JournalData) -> DisplayDecision {
        let mut decision = DisplayDecision {
            entity_type: EntityType::Journal,
            ..Default::default()
        };

        if let Some(url) = present(&journal.browzine_web_link) {
            if journal.browzine_enabled && self.config.show_journal_browzine() {
                decision.show_browzine_button = true;
                decision.browzine_url = url.to_string();
            }
        }
        decision
    }

    /// Replace the primary action with an Unpaywall one, keeping everything else.
    async fn unpaywall_fallback(
        &self,
        prior: DisplayDecision,
        doi: &str,
        avoid_publisher_links: bool,
    ) -> DisplayDecision {
        let decoded = decode_doi(doi);
        let urls = match self.unpaywall.lookup(&decoded).await {
            Ok(Some(urls)) => urls,
            Ok(None) => return prior,
            Err(e) => {
                warn!(doi = %decoded, error = %e, "Unpaywall lookup failed");
                return prior;
            }
        };

        match unpaywall_action(&urls, avoid_publisher_links, &self.config) {
            Some((kind, url)) => {
                debug!(doi = %decoded, button = ?kind, "Unpaywall action chosen");
                DisplayDecision {
                    entity_type: EntityType::Article,
                    secondary_url: String::new(),
                    show_secondary_button: false,
                    ..prior
                }
                .with_primary(kind, url)
            }
            None => prior,
        }
    }

    /// Usable cover image: present, not a placeholder, and enabled
    fn cover_from(&self, response: Option<&ApiResult>) -> Option<String> {
        let url = present(&response?.journal()?.cover_image_url)?;
        if is_default_cover(url) || !self.config.show_journal_cover_images() {
            return None;
        }
        Some(url.to_string())
    }
}
