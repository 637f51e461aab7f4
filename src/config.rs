//! Module settings and the typed lookups built on them.
//!
//! Settings are a flat JSON object. In multicampus mode (`"mode": "multicampus"`)
//! every key is read as `<institution>.<key>`, matched case-insensitively, where
//! the institution name comes from the `LibKey.institutionName` translation.
//! There is no fallback to the unprefixed key in that mode.

use crate::error::{OptionExt, Result};
use crate::translation::Translator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Third Iron public API root
pub const API_ROOT: &str = "https://public-api.thirdiron.com/public/v1";

/// Translation key holding the institution name in multicampus mode
pub const INSTITUTION_NAME_KEY: &str = "LibKey.institutionName";

/// Keys that deserve a warning when missing from a multicampus configuration
const CRITICAL_KEYS: &[&str] = &["apiKey", "libraryId"];

/// Default settings path: `<config_dir>/rustlibkey/settings.json`
pub fn default_settings_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join("rustlibkey").join("settings.json"))
        .ok_or_config("Cannot determine config directory")
}

/// Flat key/value module settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: Map<String, Value>,
}

impl Settings {
    /// Build from an already-parsed JSON object
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Build from string pairs (convenient for flags written as `"true"`)
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        Self { values }
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        info!(path = ?path, keys = settings.values.len(), "Loaded settings");
        Ok(settings)
    }

    /// Raw value for an exact key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }
}

/// How the custom buttons are laid out next to the host's own links
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewOption {
    /// Host links only, rebuilt by us; our buttons stand alone
    NoStack,
    /// One merged stack plus a separate BrowZine button
    #[default]
    StackPlusBrowzine,
    /// Everything, BrowZine included, in one merged stack
    SingleStack,
}

impl ViewOption {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "no-stack" | "nostack" => Some(Self::NoStack),
            "stack-plus-browzine" | "stackplusbrowzine" => Some(Self::StackPlusBrowzine),
            "single-stack" | "singlestack" => Some(Self::SingleStack),
            _ => None,
        }
    }
}

/// Parse a raw setting as a JSON literal and accept only `true`.
fn is_true(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(raw)) => matches!(serde_json::from_str::<Value>(raw), Ok(Value::Bool(true))),
        _ => false,
    }
}

fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Namespace-aware settings lookup
pub struct ConfigResolver {
    settings: Settings,
    /// lowercased key -> key as written in the settings
    key_index: HashMap<String, String>,
    multicampus: bool,
    translator: Option<Arc<dyn Translator>>,
    /// Cached only once resolved; unresolved lookups retry on the next call
    institution: Mutex<Option<String>>,
    warned_missing_institution: AtomicBool,
    warned_keys: Mutex<HashSet<&'static str>>,
}

impl ConfigResolver {
    /// Create a resolver; `translator` supplies the institution name in multicampus mode
    pub fn new(settings: Settings, translator: Option<Arc<dyn Translator>>) -> Self {
        let key_index = settings
            .keys()
            .map(|k| (k.to_lowercase(), k.clone()))
            .collect();
        let multicampus = settings
            .get("mode")
            .and_then(Value::as_str)
            .is_some_and(|m| m.eq_ignore_ascii_case("multicampus"));

        debug!(
            mode = if multicampus { "multicampus" } else { "single-campus" },
            keys = settings.values.len(),
            "Config resolver created"
        );

        Self {
            settings,
            key_index,
            multicampus,
            translator,
            institution: Mutex::new(None),
            warned_missing_institution: AtomicBool::new(false),
            warned_keys: Mutex::new(HashSet::new()),
        }
    }

    /// Single-campus resolver without a translator
    pub fn single_campus(settings: Settings) -> Self {
        Self::new(settings, None)
    }

    pub fn is_multicampus(&self) -> bool {
        self.multicampus
    }

    /// Institution name, resolving it now if it was not available before
    pub fn institution_name(&self) -> Option<String> {
        let mut cached = self
            .institution
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if cached.is_none() {
            *cached = self.resolve_institution_name();
        }
        cached.clone()
    }

    fn resolve_institution_name(&self) -> Option<String> {
        let raw = self
            .translator
            .as_ref()
            .and_then(|t| t.instant(INSTITUTION_NAME_KEY));
        let normalized = raw.as_deref().map(str::trim).unwrap_or_default();
        let resolved = (!normalized.is_empty() && normalized != INSTITUTION_NAME_KEY)
            .then(|| normalized.to_string());

        debug!(raw = ?raw, resolved = ?resolved, "Resolving institution name");

        if resolved.is_none() && !self.warned_missing_institution.swap(true, Ordering::Relaxed) {
            warn!(
                translation_key = INSTITUTION_NAME_KEY,
                "Multicampus mode without a resolvable institution name; settings treated as unset"
            );
        }
        resolved
    }

    fn param(&self, name: &'static str) -> Option<&Value> {
        if !self.multicampus {
            return self.settings.get(name);
        }

        let institution = self.institution_name()?;
        let lookup = format!("{}.{}", institution, name).to_lowercase();
        let Some(actual_key) = self.key_index.get(&lookup) else {
            if CRITICAL_KEYS.contains(&name) {
                let mut warned = self
                    .warned_keys
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if warned.insert(name) {
                    warn!(
                        param = name,
                        institution = %institution,
                        expected_key = %lookup,
                        "Multicampus setting missing"
                    );
                }
            }
            return None;
        };
        self.settings.get(actual_key)
    }

    /// Boolean flag; `true` only for the JSON literal `true`
    pub fn get_bool(&self, name: &'static str) -> bool {
        is_true(self.param(name))
    }

    /// Text setting
    pub fn get_string(&self, name: &'static str) -> Option<String> {
        as_text(self.param(name)).filter(|s| !s.is_empty())
    }

    /// Any of the Unpaywall link types is enabled
    pub fn is_unpaywall_enabled(&self) -> bool {
        self.show_unpaywall_direct_to_pdf_link()
            || self.show_unpaywall_article_link()
            || self.show_unpaywall_manuscript_pdf_link()
            || self.show_unpaywall_manuscript_article_link()
    }

    pub fn show_direct_to_pdf_link(&self) -> bool {
        self.get_bool("articlePDFDownloadLinkEnabled")
    }

    pub fn show_article_link(&self) -> bool {
        self.get_bool("articleLinkEnabled")
    }

    pub fn show_format_choice(&self) -> bool {
        self.get_bool("showFormatChoice")
    }

    pub fn show_retraction_watch(&self) -> bool {
        self.get_bool("articleRetractionWatchEnabled")
    }

    pub fn show_expression_of_concern(&self) -> bool {
        self.get_bool("articleExpressionOfConcernEnabled")
    }

    pub fn show_problematic_journal(&self) -> bool {
        self.get_bool("problematicJournalEnabled")
    }

    pub fn show_document_delivery(&self) -> bool {
        self.get_bool("documentDeliveryFulfillmentEnabled")
    }

    pub fn show_unpaywall_direct_to_pdf_link(&self) -> bool {
        self.get_bool("articlePDFDownloadViaUnpaywallEnabled")
    }

    pub fn show_unpaywall_article_link(&self) -> bool {
        self.get_bool("articleLinkViaUnpaywallEnabled")
    }

    pub fn show_unpaywall_manuscript_pdf_link(&self) -> bool {
        self.get_bool("articleAcceptedManuscriptPDFViaUnpaywallEnabled")
    }

    pub fn show_unpaywall_manuscript_article_link(&self) -> bool {
        self.get_bool("articleAcceptedManuscriptArticleLinkViaUnpaywallEnabled")
    }

    pub fn show_journal_browzine(&self) -> bool {
        self.get_bool("journalBrowZineWebLinkTextEnabled")
    }

    pub fn show_article_browzine(&self) -> bool {
        self.get_bool("articleBrowZineWebLinkTextEnabled")
    }

    pub fn show_journal_cover_images(&self) -> bool {
        self.get_bool("journalCoverImagesEnabled")
    }

    pub fn show_link_resolver_link(&self) -> bool {
        self.get_bool("showLinkResolverLink")
    }

    pub fn library_id(&self) -> Option<String> {
        self.get_string("libraryId")
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
    }

    /// Library-scoped API root, `None` without a library id
    pub fn api_url(&self) -> Option<String> {
        self.library_id()
            .map(|id| format!("{}/libraries/{}", API_ROOT, id))
    }

    pub fn api_key(&self) -> Option<String> {
        self.get_string("apiKey")
    }

    /// Contact email sent to Unpaywall
    pub fn unpaywall_email(&self) -> Option<String> {
        self.get_string("unpaywallEmailAddressKey")
    }

    /// Layout mode; unknown values fall back to stack-plus-BrowZine
    pub fn view_option(&self) -> ViewOption {
        self.get_string("viewOption")
            .and_then(|raw| ViewOption::parse(&raw))
            .unwrap_or_default()
    }

    /// Every gated flag by settings key, for diagnostics
    pub fn flags(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("articlePDFDownloadLinkEnabled", self.show_direct_to_pdf_link()),
            ("articleLinkEnabled", self.show_article_link()),
            ("showFormatChoice", self.show_format_choice()),
            ("articleRetractionWatchEnabled", self.show_retraction_watch()),
            ("articleExpressionOfConcernEnabled", self.show_expression_of_concern()),
            ("problematicJournalEnabled", self.show_problematic_journal()),
            ("documentDeliveryFulfillmentEnabled", self.show_document_delivery()),
            ("articlePDFDownloadViaUnpaywallEnabled", self.show_unpaywall_direct_to_pdf_link()),
            ("articleLinkViaUnpaywallEnabled", self.show_unpaywall_article_link()),
            (
                "articleAcceptedManuscriptPDFViaUnpaywallEnabled",
                self.show_unpaywall_manuscript_pdf_link(),
            ),
            (
                "articleAcceptedManuscriptArticleLinkViaUnpaywallEnabled",
                self.show_unpaywall_manuscript_article_link(),
            ),
            ("journalBrowZineWebLinkTextEnabled", self.show_journal_browzine()),
            ("articleBrowZineWebLinkTextEnabled", self.show_article_browzine()),
            ("journalCoverImagesEnabled", self.show_journal_cover_images()),
            ("showLinkResolverLink", self.show_link_resolver_link()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::StaticTranslations;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn multicampus_settings() -> Settings {
        Settings::from_pairs([
            ("mode", "MultiCampus"),
            ("North.articleLinkEnabled", "true"),
            ("north.libraryId", "222"),
            ("NORTH.APIKEY", "secret"),
            ("articleLinkEnabled", "true"),
            ("South.articleLinkEnabled", "false"),
        ])
    }

    #[test]
    fn test_single_campus_reads_keys_directly() {
        let config = ConfigResolver::single_campus(Settings::from_pairs([
            ("articleLinkEnabled", "true"),
            ("articlePDFDownloadLinkEnabled", "false"),
            ("libraryId", "222"),
        ]));

        assert!(!config.is_multicampus());
        assert!(config.show_article_link());
        assert!(!config.show_direct_to_pdf_link());
        assert!(!config.show_retraction_watch());
        assert_eq!(
            config.api_url().as_deref(),
            Some("https://public-api.thirdiron.com/public/v1/libraries/222")
        );
    }

    #[test]
    fn test_boolean_parsing_accepts_only_json_true() {
        let settings = Settings::from_map(
            json!({
                "a": "true",
                "b": true,
                "c": "TRUE",
                "d": "1",
                "e": "\"true\"",
                "f": 1,
                "g": "not json"
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
        );
        let config = ConfigResolver::single_campus(settings);

        assert!(config.get_bool("a"));
        assert!(config.get_bool("b"));
        assert!(!config.get_bool("c"));
        assert!(!config.get_bool("d"));
        assert!(!config.get_bool("e"));
        assert!(!config.get_bool("f"));
        assert!(!config.get_bool("g"));
        assert!(!config.get_bool("missing"));
    }

    #[test]
    fn test_multicampus_unresolved_institution_then_resolved() {
        let translations = Arc::new(StaticTranslations::empty());
        let config = ConfigResolver::new(multicampus_settings(), Some(translations.clone()));

        assert!(config.is_multicampus());
        // no language table yet
        assert!(!config.show_article_link());
        assert_eq!(config.api_key(), None);

        // table loaded but the key is untranslated
        translations.load(HashMap::new());
        assert!(!config.show_article_link());

        translations.load(HashMap::from([(
            INSTITUTION_NAME_KEY.to_string(),
            " North ".to_string(),
        )]));
        assert!(config.show_article_link());
        assert_eq!(config.api_key().as_deref(), Some("secret"));
        assert_eq!(
            config.api_url().as_deref(),
            Some("https://public-api.thirdiron.com/public/v1/libraries/222")
        );
    }

    #[test]
    fn test_multicampus_has_no_unprefixed_fallback() {
        let translations = Arc::new(StaticTranslations::with_table(HashMap::from([(
            INSTITUTION_NAME_KEY.to_string(),
            "South".to_string(),
        )])));
        let config = ConfigResolver::new(multicampus_settings(), Some(translations));

        assert!(!config.show_article_link());
        assert_eq!(config.api_key(), None);
        assert_eq!(config.api_url(), None);
    }

    #[test]
    fn test_missing_critical_key_warned_once() {
        let translations = Arc::new(StaticTranslations::with_table(HashMap::from([(
            INSTITUTION_NAME_KEY.to_string(),
            "South".to_string(),
        )])));
        let config = ConfigResolver::new(multicampus_settings(), Some(translations));
        let warned = |config: &ConfigResolver| {
            let mut keys: Vec<_> = config.warned_keys.lock().unwrap().iter().copied().collect();
            keys.sort_unstable();
            keys
        };

        assert_eq!(config.api_key(), None);
        assert_eq!(config.api_key(), None);
        assert_eq!(warned(&config), vec!["apiKey"]);

        // non-critical keys never warn
        assert!(!config.show_article_link());
        assert_eq!(warned(&config), vec!["apiKey"]);

        assert_eq!(config.library_id(), None);
        assert_eq!(config.api_url(), None);
        assert_eq!(warned(&config), vec!["apiKey", "libraryId"]);
        assert!(!config.warned_missing_institution.load(Ordering::Relaxed));
    }

    #[test]
    fn test_unresolved_institution_warned_once() {
        let config = ConfigResolver::new(
            multicampus_settings(),
            Some(Arc::new(StaticTranslations::empty())),
        );
        assert_eq!(config.api_key(), None);
        assert!(config.warned_missing_institution.load(Ordering::Relaxed));
        // no institution means no prefixed lookup, so no per-key warning
        assert!(config.warned_keys.lock().unwrap().is_empty());
    }

    #[test]
    fn test_view_option_defaults() {
        let config = ConfigResolver::single_campus(Settings::from_pairs([("viewOption", "No-Stack")]));
        assert_eq!(config.view_option(), ViewOption::NoStack);

        let config = ConfigResolver::single_campus(Settings::from_pairs([("viewOption", "bogus")]));
        assert_eq!(config.view_option(), ViewOption::StackPlusBrowzine);

        let config = ConfigResolver::single_campus(Settings::default());
        assert_eq!(config.view_option(), ViewOption::StackPlusBrowzine);
    }

    #[test]
    fn test_unpaywall_enabled_by_any_flag() {
        let config = ConfigResolver::single_campus(Settings::from_pairs([(
            "articleAcceptedManuscriptArticleLinkViaUnpaywallEnabled",
            "true",
        )]));
        assert!(config.is_unpaywall_enabled());

        let config = ConfigResolver::single_campus(Settings::default());
        assert!(!config.is_unpaywall_enabled());
    }

    #[test]
    fn test_load_settings_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(file, r#"{{"articleLinkEnabled": "true", "libraryId": 222}}"#)?;

        let settings = Settings::load(file.path())?;
        let config = ConfigResolver::single_campus(settings);
        assert!(config.show_article_link());
        assert_eq!(config.get_string("libraryId").as_deref(), Some("222"));
        Ok(())
    }
}
