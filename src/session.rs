//! One-shot resolution of a single record through the full pipeline.
//!
//! Used by the CLI and the HTTP server: the record is placed on a host
//! handle and in the store's search results, then flows through the proxy,
//! the selection resolver and both enhancer pipelines exactly as it would on
//! a page.

use crate::enhancer::{ButtonsView, RecordEnhancer};
use crate::error::{OptionExt, Result};
use crate::host::{HostComponent, HostFeed, HostRecordProxy, RecordIdentity};
use crate::links::PrimoViewModel;
use crate::search_entity::SearchEntity;
use crate::selection::SelectionResolver;
use crate::store::HostStore;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Host handle holding a record and a view model feed
#[derive(Default)]
pub struct RecordHost {
    record: Mutex<Option<SearchEntity>>,
    view_model: Mutex<Option<HostFeed<PrimoViewModel>>>,
}

impl RecordHost {
    pub fn new(record: Option<SearchEntity>, view_model: Option<HostFeed<PrimoViewModel>>) -> Self {
        Self {
            record: Mutex::new(record),
            view_model: Mutex::new(view_model),
        }
    }

    pub fn set_record(&self, record: Option<SearchEntity>) {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = record;
    }

    pub fn set_view_model(&self, feed: Option<HostFeed<PrimoViewModel>>) {
        *self.view_model.lock().unwrap_or_else(PoisonError::into_inner) = feed;
    }
}

impl HostComponent for RecordHost {
    type Record = SearchEntity;
    type ViewModel = PrimoViewModel;

    fn record(&self) -> Option<SearchEntity> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn view_model(&self) -> Option<HostFeed<PrimoViewModel>> {
        self.view_model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Pipeline output for one record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub record_id: String,
    /// `None` when the record gets no buttons or nothing arrived in time
    pub buttons: Option<ButtonsView>,
    pub cover_url: Option<String>,
}

/// Resolve one record, waiting at most `wait` for each pipeline
pub async fn resolve_once(
    enhancer: &RecordEnhancer,
    record: SearchEntity,
    view_model: Option<PrimoViewModel>,
    wait: Duration,
) -> Result<Resolution> {
    let record_id = record
        .record_id()
        .map(str::to_owned)
        .ok_or_config("Record has no pnx.control.recordid")?;
    info!(record_id = %record_id, "Resolving record");

    let entity = serde_json::to_value(&record)?;
    let store = Arc::new(HostStore::new(json!({
        "searchResults": { "entities": { record_id.clone(): entity } }
    })));

    let feed = HostFeed::new();
    let host = Arc::new(RecordHost::new(Some(record), Some(feed.clone())));
    let mut proxy = HostRecordProxy::new();
    proxy.attach(Some(host));
    feed.publish(view_model.unwrap_or_default());

    let resolver: SelectionResolver<SearchEntity> = SelectionResolver::new(store);
    let mut buttons = enhancer.buttons(resolver.active(proxy.record_ids()), proxy.secondary_source());
    let mut covers = enhancer.covers(resolver.active(proxy.record_ids()));

    let (buttons, cover_url) = tokio::join!(
        timeout(wait, buttons.next()),
        timeout(wait, covers.next())
    );
    proxy.release();

    let buttons = match buttons {
        Ok(view) => view.flatten(),
        Err(_) => {
            debug!(record_id = %record_id, "Buttons pipeline timed out");
            None
        }
    };
    let cover_url = cover_url.ok().flatten().flatten();

    Ok(Resolution {
        record_id,
        buttons,
        cover_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LibKeyError;
    use crate::config::{ConfigResolver, Settings};
    use crate::enhancer::NoopHider;
    use crate::libkey::JournalData;
    use crate::links::{LinkLabels, OnlineLink};
    use crate::search_entity::fixtures::{journal, record};
    use crate::waterfall::fakes::{journal_response, some, FakeApi, FakeUnpaywall};
    use crate::waterfall::DisplayWaterfall;

    fn enhancer(pairs: &[(&str, &str)], api: FakeApi) -> RecordEnhancer {
        let config = Arc::new(ConfigResolver::single_campus(Settings::from_pairs(
            pairs.iter().copied(),
        )));
        let waterfall = DisplayWaterfall::new(config, Arc::new(api), Arc::new(FakeUnpaywall::default()));
        RecordEnhancer::new(waterfall, LinkLabels::default(), Arc::new(NoopHider))
    }

    #[tokio::test]
    async fn test_resolve_journal_end_to_end() {
        let api = FakeApi {
            journal: Some(journal_response(JournalData {
                cover_image_url: some("https://x/cover.jpg"),
                browzine_enabled: true,
                browzine_web_link: some("https://browzine.com/journals/1"),
                ..Default::default()
            })),
            ..Default::default()
        };
        let enhancer = enhancer(
            &[
                ("journalCoverImagesEnabled", "true"),
                ("journalBrowZineWebLinkTextEnabled", "true"),
            ],
            api,
        );

        let view_model = PrimoViewModel {
            online_links: vec![OnlineLink {
                url: "https://host.example/html".to_string(),
                link_type: "HTML".to_string(),
                display_text: None,
            }],
            direct_link: None,
        };
        let resolution = resolve_once(
            &enhancer,
            journal("j1", "1234-5678"),
            Some(view_model),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert_eq!(resolution.record_id, "j1");
        assert_eq!(resolution.cover_url.as_deref(), Some("https://x/cover.jpg"));
        let buttons = resolution.buttons.unwrap();
        assert!(!buttons.decision.has_primary_action());
        let urls: Vec<_> = buttons.combined_links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://browzine.com/journals/1", "https://host.example/html"]
        );
    }

    #[tokio::test]
    async fn test_record_without_id_is_rejected() {
        let enhancer = enhancer(&[], FakeApi::default());
        let result = resolve_once(&enhancer, SearchEntity::default(), None, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(LibKeyError::Config(_))));
    }

    #[tokio::test]
    async fn test_ineligible_record_resolves_to_nothing() {
        let enhancer = enhancer(&[], FakeApi::default());
        let resolution = resolve_once(&enhancer, record("b1", "book"), None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resolution.buttons, None);
        assert_eq!(resolution.cover_url, None);
    }
}
