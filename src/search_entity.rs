//! Host search records and their classification.
//!
//! A record is owned by the host and only ever read here. Identifiers are
//! extracted in the form the bibliographic API expects: both the DOI and the
//! ISSN come back URL-encoded.

use crate::host::RecordIdentity;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One search result or full-display record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchEntity {
    #[serde(default)]
    pub pnx: Pnx,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pnx {
    #[serde(default)]
    pub addata: AdData,
    #[serde(default)]
    pub display: PnxDisplay,
    #[serde(default)]
    pub control: Control,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PnxDisplay {
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default, rename = "type")]
    pub kind: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdData {
    #[serde(default)]
    pub issn: Vec<String>,
    #[serde(default)]
    pub eissn: Vec<String>,
    #[serde(default)]
    pub doi: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Control {
    #[serde(default)]
    pub recordid: Vec<String>,
}

/// What kind of entity a record resolves to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    #[default]
    Unknown,
    Article,
    Journal,
}

fn is_issn_shaped(value: &str) -> bool {
    static ISSN_SHAPE: OnceLock<Option<Regex>> = OnceLock::new();
    ISSN_SHAPE
        .get_or_init(|| Regex::new(r"\S{4}-\S{4}").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

/// Collapse an ISSN list into the API's `issns` form (hyphens stripped).
///
/// With several entries only ISSN-shaped tokens shorter than 10 characters
/// survive, joined by commas. A single entry is trimmed and loses its hyphen.
fn normalize_issns(values: &[String]) -> String {
    match values {
        [] => String::new(),
        [single] => single.trim().replacen('-', "", 1),
        many => many
            .iter()
            .filter(|v| v.len() < 10 && is_issn_shaped(v))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
            .trim()
            .replace('-', ""),
    }
}

impl SearchEntity {
    fn content_type(&self) -> Option<String> {
        self.pnx
            .display
            .kind
            .first()
            .map(|t| t.trim().to_lowercase())
    }

    /// Content type mentions "article"
    pub fn is_article(&self) -> bool {
        self.content_type().is_some_and(|t| t.contains("article"))
    }

    /// Content type mentions "journal"
    pub fn is_journal(&self) -> bool {
        self.content_type().is_some_and(|t| t.contains("journal"))
    }

    /// URL-encoded ISSN(s), falling back to eISSN; empty when none
    pub fn issn(&self) -> String {
        let mut issn = normalize_issns(&self.pnx.addata.issn);
        if issn.is_empty() {
            issn = normalize_issns(&self.pnx.addata.eissn);
        }
        urlencoding::encode(&issn).into_owned()
    }

    /// URL-encoded DOI; empty when none
    pub fn doi(&self) -> String {
        let doi = self
            .pnx
            .addata
            .doi
            .first()
            .map(|d| d.trim())
            .unwrap_or_default();
        urlencoding::encode(doi).into_owned()
    }

    /// Reserved for excluding records (e.g. print holdings); never set today
    pub fn is_filtered(&self) -> bool {
        false
    }

    /// Journals with an ISSN and articles with a DOI get buttons
    pub fn should_enhance_buttons(&self) -> bool {
        if self.is_filtered() {
            return false;
        }
        (self.is_journal() && !self.issn().is_empty())
            || (self.is_article() && !self.doi().is_empty())
    }

    /// Like buttons, plus ISSN-only articles
    pub fn should_enhance_cover(&self) -> bool {
        let has_issn = !self.issn().is_empty();
        let has_doi = !self.doi().is_empty();

        (self.is_article() && (has_doi || has_issn)) || (self.is_journal() && has_issn)
    }

    /// Entity type used for API routing and labels
    pub fn entity_type(&self) -> EntityType {
        if self.is_journal() && !self.issn().is_empty() {
            EntityType::Journal
        } else if self.is_article() && !self.doi().is_empty() {
            EntityType::Article
        } else {
            EntityType::Unknown
        }
    }
}

impl RecordIdentity for SearchEntity {
    fn record_id(&self) -> Option<&str> {
        self.pnx.control.recordid.first().map(String::as_str)
    }
}
