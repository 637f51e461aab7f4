//! Stacked link lists.
//!
//! In the stacked view modes our actions and the host's own online links are
//! shown in one ordered list. In `NoStack` mode only the host's links are
//! rebuilt, filtered by our settings.

use crate::config::{ConfigResolver, ViewOption};
use crate::search_entity::EntityType;
use crate::translation::TranslationService;
use crate::waterfall::{ButtonType, DisplayDecision};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Path fragment of the host's link resolver
const LINK_RESOLVER_PATH: &str = "/view/action/uresolver.do";

/// Host view model, as far as link building needs it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrimoViewModel {
    pub online_links: Vec<OnlineLink>,
    pub direct_link: Option<String>,
}

/// One of the host's online access links
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnlineLink {
    pub url: String,
    /// "PDF", "HTML", "LinkResolver", ...
    #[serde(rename = "type")]
    pub link_type: String,
    pub display_text: Option<String>,
}

impl OnlineLink {
    fn is_link_resolver(&self) -> bool {
        self.link_type.eq_ignore_ascii_case("linkresolver") || self.url.contains(LINK_RESOLVER_PATH)
    }
}

/// Who produced a stack entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkSource {
    ThirdIron,
    Browzine,
    Primo,
}

/// One entry of a stacked dropdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackLink {
    pub source: LinkSource,
    pub label: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_button_type: Option<ButtonType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    pub show_secondary_button: bool,
}

/// (button, translation key, English text)
const BUTTON_TEXT: &[(ButtonType, &str, &str)] = &[
    (ButtonType::Retraction, "LibKey.articleRetractionWatchText", "Retracted Article"),
    (
        ButtonType::ExpressionOfConcern,
        "LibKey.articleExpressionOfConcernText",
        "Expression of Concern",
    ),
    (
        ButtonType::ProblematicJournalArticle,
        "LibKey.problematicJournalText",
        "Problematic Journal",
    ),
    (ButtonType::DirectToPDF, "LibKey.articlePDFDownloadLinkText", "Download PDF"),
    (ButtonType::ArticleLink, "LibKey.articleLinkText", "Read Article"),
    (
        ButtonType::DocumentDelivery,
        "LibKey.documentDeliveryFulfillmentText",
        "Request PDF",
    ),
    (
        ButtonType::UnpaywallDirectToPDF,
        "LibKey.articlePDFDownloadViaUnpaywallText",
        "Download PDF (via Unpaywall)",
    ),
    (
        ButtonType::UnpaywallArticleLink,
        "LibKey.articleLinkViaUnpaywallText",
        "Read Article (via Unpaywall)",
    ),
    (
        ButtonType::UnpaywallManuscriptPDF,
        "LibKey.articleAcceptedManuscriptPDFViaUnpaywallText",
        "Download PDF (Accepted Manuscript via Unpaywall)",
    ),
    (
        ButtonType::UnpaywallManuscriptLink,
        "LibKey.articleAcceptedManuscriptArticleLinkViaUnpaywallText",
        "Read Article (Accepted Manuscript via Unpaywall)",
    ),
];

const JOURNAL_BROWZINE: (&str, &str) = ("LibKey.journalBrowZineWebLinkText", "View Journal Contents");
const ARTICLE_BROWZINE: (&str, &str) = ("LibKey.articleBrowZineWebLinkText", "View Issue Contents");
const PRIMO_PDF: (&str, &str) = ("LibKey.primoPDFLinkText", "PDF");
const PRIMO_HTML: (&str, &str) = ("LibKey.primoHTMLLinkText", "Read Online");
const PRIMO_OTHER: (&str, &str) = ("LibKey.primoOnlineLinkText", "Available Online");

/// Localized labels for stack entries
#[derive(Debug, Clone, PartialEq)]
pub struct LinkLabels {
    buttons: HashMap<ButtonType, String>,
    journal_browzine: String,
    article_browzine: String,
    primo_pdf: String,
    primo_html: String,
    primo_other: String,
}

impl Default for LinkLabels {
    fn default() -> Self {
        Self {
            buttons: BUTTON_TEXT
                .iter()
                .map(|(kind, _, text)| (*kind, text.to_string()))
                .collect(),
            journal_browzine: JOURNAL_BROWZINE.1.to_string(),
            article_browzine: ARTICLE_BROWZINE.1.to_string(),
            primo_pdf: PRIMO_PDF.1.to_string(),
            primo_html: PRIMO_HTML.1.to_string(),
            primo_other: PRIMO_OTHER.1.to_string(),
        }
    }
}

impl LinkLabels {
    /// Current translations, English where a key is untranslated
    pub fn resolve(translations: &TranslationService) -> Self {
        let text = |(key, fallback): (&str, &str)| translations.instant_text(key, fallback);
        Self {
            buttons: BUTTON_TEXT
                .iter()
                .map(|(kind, key, fallback)| (*kind, text((*key, *fallback))))
                .collect(),
            journal_browzine: text(JOURNAL_BROWZINE),
            article_browzine: text(ARTICLE_BROWZINE),
            primo_pdf: text(PRIMO_PDF),
            primo_html: text(PRIMO_HTML),
            primo_other: text(PRIMO_OTHER),
        }
    }

    pub fn button(&self, kind: ButtonType) -> &str {
        self.buttons.get(&kind).map(String::as_str).unwrap_or_default()
    }

    pub fn browzine(&self, entity_type: EntityType) -> &str {
        match entity_type {
            EntityType::Journal => &self.journal_browzine,
            _ => &self.article_browzine,
        }
    }

    fn primo(&self, link: &OnlineLink) -> String {
        if let Some(text) = link.display_text.as_deref().filter(|t| !t.trim().is_empty()) {
            return text.to_string();
        }
        match link.link_type.to_uppercase().as_str() {
            "PDF" => self.primo_pdf.clone(),
            "HTML" => self.primo_html.clone(),
            _ => self.primo_other.clone(),
        }
    }
}

/// Host links, de-duplicated by URL.
///
/// Link-resolver entries are dropped when we already show a primary action
/// and the settings do not ask to keep them.
pub fn build_primo_links(
    view_model: &PrimoViewModel,
    decision: &DisplayDecision,
    config: &ConfigResolver,
    labels: &LinkLabels,
) -> Vec<StackLink> {
    let hide_resolver = decision.has_primary_action() && !config.show_link_resolver_link();
    let mut seen = HashSet::new();

    view_model
        .online_links
        .iter()
        .filter(|link| !link.url.trim().is_empty())
        .filter(|link| !(hide_resolver && link.is_link_resolver()))
        .filter(|link| seen.insert(link.url.clone()))
        .map(|link| StackLink {
            source: LinkSource::Primo,
            label: labels.primo(link),
            url: link.url.clone(),
            main_button_type: None,
            entity_type: None,
            show_secondary_button: false,
        })
        .collect()
}

fn third_iron_links(decision: &DisplayDecision, labels: &LinkLabels) -> Vec<StackLink> {
    let mut links = Vec::new();
    if decision.has_primary_action() {
        links.push(StackLink {
            source: LinkSource::ThirdIron,
            label: labels.button(decision.main_button_type).to_string(),
            url: decision.main_url.clone(),
            main_button_type: Some(decision.main_button_type),
            entity_type: Some(decision.entity_type),
            show_secondary_button: decision.show_secondary_button,
        });
    }
    if decision.show_secondary_button && !decision.secondary_url.is_empty() {
        links.push(StackLink {
            source: LinkSource::ThirdIron,
            label: labels.button(ButtonType::ArticleLink).to_string(),
            url: decision.secondary_url.clone(),
            main_button_type: Some(ButtonType::ArticleLink),
            entity_type: Some(decision.entity_type),
            show_secondary_button: false,
        });
    }
    links
}

fn browzine_link(decision: &DisplayDecision, labels: &LinkLabels) -> Option<StackLink> {
    (decision.show_browzine_button && !decision.browzine_url.is_empty()).then(|| StackLink {
        source: LinkSource::Browzine,
        label: labels.browzine(decision.entity_type).to_string(),
        url: decision.browzine_url.clone(),
        main_button_type: None,
        entity_type: Some(decision.entity_type),
        show_secondary_button: false,
    })
}

/// Merged stack for the stacked view modes.
///
/// Order: our actions, then BrowZine, then host links. In `SingleStack`
/// BrowZine is appended after the host links instead. The list is empty when
/// we have nothing of our own to add, leaving the host's links untouched.
pub fn build_combined_links(
    decision: &DisplayDecision,
    view_model: &PrimoViewModel,
    view_option: ViewOption,
    config: &ConfigResolver,
    labels: &LinkLabels,
) -> Vec<StackLink> {
    if view_option == ViewOption::NoStack {
        return Vec::new();
    }

    let ours = third_iron_links(decision, labels);
    let browzine = browzine_link(decision, labels);
    if ours.is_empty() && browzine.is_none() {
        return Vec::new();
    }
    let primo = build_primo_links(view_model, decision, config, labels);

    let ordered: Vec<StackLink> = match view_option {
        ViewOption::SingleStack => ours.into_iter().chain(primo).chain(browzine).collect(),
        _ => ours.into_iter().chain(browzine).chain(primo).collect(),
    };

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter(|link| seen.insert(link.url.clone()))
        .collect()
}
