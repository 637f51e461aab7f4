//! Localized text lookup.
//!
//! The host owns the translation tables. This module only consumes them:
//! a [`Translator`] answers "text for key K", and [`TranslationService`] adds
//! the rule that a translation equal to its key means "not translated".

use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

/// Source of localized strings
pub trait Translator: Send + Sync {
    /// Current translation; `None` while no language table is loaded
    fn instant(&self, key: &str) -> Option<String>;

    /// Translation for `key`, re-emitted whenever the language changes
    fn stream(&self, key: &str) -> BoxStream<'static, String>;
}

/// In-memory translation tables that can be swapped at runtime.
///
/// Unknown keys translate to the key itself.
pub struct StaticTranslations {
    table: watch::Sender<Option<Arc<HashMap<String, String>>>>,
}

impl StaticTranslations {
    /// No language loaded yet
    pub fn empty() -> Self {
        let (table, _rx) = watch::channel(None);
        Self { table }
    }

    /// Start with a loaded language table
    pub fn with_table(table: HashMap<String, String>) -> Self {
        let translations = Self::empty();
        translations.load(table);
        translations
    }

    /// Swap the active language table
    pub fn load(&self, table: HashMap<String, String>) {
        debug!(keys = table.len(), "Translation table loaded");
        self.table.send_replace(Some(Arc::new(table)));
    }
}

impl Translator for StaticTranslations {
    fn instant(&self, key: &str) -> Option<String> {
        self.table
            .borrow()
            .as_ref()
            .map(|t| t.get(key).cloned().unwrap_or_else(|| key.to_string()))
    }

    fn stream(&self, key: &str) -> BoxStream<'static, String> {
        let key = key.to_string();
        WatchStream::new(self.table.subscribe())
            .filter_map(move |table| {
                let text = table.map(|t| t.get(&key).cloned().unwrap_or_else(|| key.clone()));
                futures::future::ready(text)
            })
            .boxed()
    }
}

/// Translation lookups with caller-supplied fallback text
#[derive(Clone)]
pub struct TranslationService {
    translator: Arc<dyn Translator>,
}

fn or_fallback(text: Option<String>, key: &str, fallback: &str) -> String {
    match text {
        Some(t) if !t.trim().is_empty() && t != key => t,
        _ => fallback.to_string(),
    }
}

impl TranslationService {
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        Self { translator }
    }

    /// Translated text as a stream, using `fallback` when the key is untranslated
    pub fn text(&self, key: &str, fallback: &str) -> BoxStream<'static, String> {
        let key = key.to_string();
        let fallback = fallback.to_string();
        self.translator
            .stream(&key)
            .map(move |text| or_fallback(Some(text), &key, &fallback))
            .boxed()
    }

    /// Current translated text, using `fallback` when unavailable
    pub fn instant_text(&self, key: &str, fallback: &str) -> String {
        or_fallback(self.translator.instant(key), key, fallback)
    }
}
