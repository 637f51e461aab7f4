//! Record-driven presentation pipelines.
//!
//! Both pipelines are keyed on the active record stream and switch to the
//! latest record: when the record changes while a lookup is still in flight,
//! that lookup is dropped and its result can never reach the output.

use crate::config::ViewOption;
use crate::host::RecordIdentity;
use crate::links::{build_combined_links, build_primo_links, LinkLabels, PrimoViewModel, StackLink};
use crate::search_entity::SearchEntity;
use crate::streams::{combine_latest, distinct_by, switch_map, Replay};
use crate::waterfall::{DisplayDecision, DisplayWaterfall};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Host element holding the native online-access buttons
pub const ONLINE_AVAILABILITY_TAG: &str = "nde-online-availability";

/// Host element holding the native record thumbnail
pub const RECORD_IMAGE_TAG: &str = "nde-record-image";

/// Hides host elements next to the add-on
pub trait ElementHider: Send + Sync {
    /// Hide every element with `tag` in the component's scope; returns how many
    fn hide(&self, tag: &str) -> usize;
}

/// Hider for environments without a page
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHider;

impl ElementHider for NoopHider {
    fn hide(&self, tag: &str) -> usize {
        debug!(tag, "No page to hide elements in");
        0
    }
}

/// Everything the buttons component renders for one record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonsView {
    pub record_id: Option<String>,
    pub view_option: ViewOption,
    pub decision: DisplayDecision,
    /// Merged stack for the stacked view modes
    pub combined_links: Vec<StackLink>,
    /// Rebuilt host links for `NoStack`
    pub primo_links: Vec<StackLink>,
}

/// Performs a hide at most once per record id
#[derive(Clone, Default)]
struct HideOnce {
    last: Arc<Mutex<Option<String>>>,
}

impl HideOnce {
    fn run(&self, record_id: Option<&str>, hider: &dyn ElementHider, tag: &str) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.is_some() && last.as_deref() == record_id {
            return;
        }
        let removed = hider.hide(tag);
        debug!(record_id = ?record_id, tag, removed, "Host elements hidden");
        *last = record_id.map(str::to_owned);
    }
}

fn record_key(record: &SearchEntity) -> Option<String> {
    record.record_id().map(str::to_owned)
}

/// Present records that differ from the previous one by id
fn distinct_records(
    records: BoxStream<'static, Option<SearchEntity>>,
) -> BoxStream<'static, SearchEntity> {
    distinct_by(records.filter_map(future::ready), record_key).boxed()
}

/// Wires the waterfall to record and view model streams
#[derive(Clone)]
pub struct RecordEnhancer {
    waterfall: DisplayWaterfall,
    labels: Arc<LinkLabels>,
    hider: Arc<dyn ElementHider>,
}

impl RecordEnhancer {
    pub fn new(waterfall: DisplayWaterfall, labels: LinkLabels, hider: Arc<dyn ElementHider>) -> Self {
        Self {
            waterfall,
            labels: Arc::new(labels),
            hider,
        }
    }

    /// Button state per record.
    ///
    /// `None` for records that get no buttons. Otherwise one view per
    /// (decision, view model) pair for the current record.
    pub fn buttons(
        &self,
        records: BoxStream<'static, Option<SearchEntity>>,
        view_models: Replay<PrimoViewModel>,
    ) -> BoxStream<'static, Option<ButtonsView>> {
        let this = self.clone();
        let hide_once = HideOnce::default();

        switch_map(distinct_records(records), move |record| {
            if !record.should_enhance_buttons() {
                debug!(record_id = ?record_key(&record), "Buttons skipped for record");
                return stream::once(future::ready(None)).boxed();
            }

            let waterfall = this.waterfall.clone();
            let record_id = record_key(&record);
            let decision = stream::once(async move { waterfall.display_info(&record).await }).boxed();

            let this = this.clone();
            let hide_once = hide_once.clone();
            combine_latest(decision, view_models.subscribe())
                .map(move |(decision, view_model)| {
                    Some(this.assemble(record_id.clone(), decision, &view_model, &hide_once))
                })
                .boxed()
        })
    }

    fn assemble(
        &self,
        record_id: Option<String>,
        decision: DisplayDecision,
        view_model: &PrimoViewModel,
        hide_once: &HideOnce,
    ) -> ButtonsView {
        let config = self.waterfall.config();
        let view_option = config.view_option();

        let (combined_links, primo_links) = match view_option {
            ViewOption::NoStack => (
                Vec::new(),
                build_primo_links(view_model, &decision, config, &self.labels),
            ),
            _ => (
                build_combined_links(&decision, view_model, view_option, config, &self.labels),
                Vec::new(),
            ),
        };

        if view_option == ViewOption::NoStack || !combined_links.is_empty() {
            hide_once.run(record_id.as_deref(), self.hider.as_ref(), ONLINE_AVAILABILITY_TAG);
        }

        ButtonsView {
            record_id,
            view_option,
            decision,
            combined_links,
            primo_links,
        }
    }

    /// Usable cover URL per record, `None` when there is none
    pub fn covers(&self, records: BoxStream<'static, Option<SearchEntity>>) -> BoxStream<'static, Option<String>> {
        let this = self.clone();
        let hide_once = HideOnce::default();

        switch_map(distinct_records(records), move |record| {
            let this = this.clone();
            let hide_once = hide_once.clone();
            stream::once(async move {
                let cover = this.waterfall.cover_url(&record).await;
                if cover.is_some() {
                    hide_once.run(record.record_id(), this.hider.as_ref(), RECORD_IMAGE_TAG);
                }
                cover
            })
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigResolver, Settings};
    use crate::error::Result;
    use crate::libkey::{ApiData, ApiResult, ArticleData, JournalData, LibraryApi};
    use crate::search_entity::fixtures::{article, journal, record};
    use crate::waterfall::fakes::{journal_response, some, FakeApi, FakeUnpaywall};
    use crate::waterfall::ButtonType;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::timeout;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    const QUIET: Duration = Duration::from_millis(50);

    /// Answers article lookups only once the test opens the DOI's gate
    #[derive(Default)]
    struct GatedApi {
        gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    }

    impl GatedApi {
        fn gate(&self, doi: &str) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().insert(doi.to_string(), rx);
            tx
        }
    }

    #[async_trait]
    impl LibraryApi for GatedApi {
        async fn article_by_doi(&self, doi: &str) -> Result<Option<ApiResult>> {
            let gate = self.gates.lock().unwrap().remove(doi);
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(Some(ApiResult {
                data: Some(ApiData::Article(ArticleData {
                    doi: Some(doi.to_string()),
                    content_location: Some(format!("https://libkey.io/{}", doi)),
                    ..Default::default()
                })),
                included_journal: None,
            }))
        }

        async fn journal_by_issn(&self, _issn: &str) -> Result<Option<ApiResult>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct CountingHider {
        calls: AtomicUsize,
    }

    impl ElementHider for CountingHider {
        fn hide(&self, _tag: &str) -> usize {
            self.calls.fetch_add(1, Ordering::SeqCst);
            1
        }
    }

    fn settings(pairs: &[(&str, &str)]) -> Arc<ConfigResolver> {
        Arc::new(ConfigResolver::single_campus(Settings::from_pairs(
            pairs.iter().copied(),
        )))
    }

    fn enhancer(
        config: Arc<ConfigResolver>,
        api: Arc<dyn LibraryApi>,
        hider: Arc<dyn ElementHider>,
    ) -> RecordEnhancer {
        let waterfall = DisplayWaterfall::new(config, api, Arc::new(FakeUnpaywall::default()));
        RecordEnhancer::new(waterfall, LinkLabels::default(), hider)
    }

    fn view_models() -> Replay<PrimoViewModel> {
        let replay = Replay::new();
        replay.push(PrimoViewModel::default());
        replay
    }

    fn record_channel() -> (
        mpsc::UnboundedSender<Option<SearchEntity>>,
        BoxStream<'static, Option<SearchEntity>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, UnboundedReceiverStream::new(rx).boxed())
    }

    #[tokio::test]
    async fn test_stale_lookup_never_emitted_after_switch() {
        let api = Arc::new(GatedApi::default());
        let open_a = api.gate("10.1%2Fa");
        let open_b = api.gate("10.1%2Fb");
        let enhancer = enhancer(
            settings(&[("articleLinkEnabled", "true")]),
            api.clone(),
            Arc::new(NoopHider),
        );

        let (tx, records) = record_channel();
        let mut out = enhancer.buttons(records, view_models());

        tx.send(Some(article("a", "10.1/a"))).unwrap();
        assert!(timeout(QUIET, out.next()).await.is_err());

        tx.send(Some(article("b", "10.1/b"))).unwrap();
        let _ = open_a.send(());
        let _ = open_b.send(());

        let view = out.next().await.flatten().unwrap();
        assert_eq!(view.record_id.as_deref(), Some("b"));
        assert_eq!(view.decision.main_url, "https://libkey.io/10.1%2Fb");
        assert!(timeout(QUIET, out.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_ineligible_and_absent_records() {
        let enhancer = enhancer(settings(&[]), Arc::new(FakeApi::default()), Arc::new(NoopHider));
        let (tx, records) = record_channel();
        let mut out = enhancer.buttons(records, view_models());

        tx.send(None).unwrap();
        tx.send(Some(record("b1", "book"))).unwrap();
        assert_eq!(out.next().await, Some(None));
    }

    #[tokio::test]
    async fn test_same_record_id_is_processed_once() {
        let api = Arc::new(FakeApi::default());
        let enhancer = enhancer(settings(&[]), api.clone(), Arc::new(NoopHider));
        let (tx, records) = record_channel();
        let mut out = enhancer.buttons(records, view_models());

        tx.send(Some(article("a", "10.1/a"))).unwrap();
        assert!(out.next().await.is_some());

        let mut edited = article("a", "10.1/a");
        edited.pnx.display.title = vec!["edited".to_string()];
        tx.send(Some(edited)).unwrap();
        assert!(timeout(QUIET, out.next()).await.is_err());
        assert_eq!(api.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_host_buttons_hidden_once_per_record() {
        let api = Arc::new(GatedApi::default());
        let hider = Arc::new(CountingHider::default());
        let enhancer = enhancer(
            settings(&[("articleLinkEnabled", "true")]),
            api,
            hider.clone(),
        );

        let view_models = view_models();
        let (tx, records) = record_channel();
        let mut out = enhancer.buttons(records, view_models.clone());

        tx.send(Some(article("a", "10.1/a"))).unwrap();
        let view = out.next().await.flatten().unwrap();
        assert_eq!(view.decision.main_button_type, ButtonType::ArticleLink);
        assert_eq!(view.combined_links.len(), 1);

        view_models.push(PrimoViewModel {
            direct_link: some("https://host.example/full"),
            ..Default::default()
        });
        assert!(out.next().await.is_some());
        assert_eq!(hider.calls.load(Ordering::SeqCst), 1);

        tx.send(Some(article("b", "10.1/b"))).unwrap();
        assert!(out.next().await.is_some());
        assert_eq!(hider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_stack_hides_host_buttons_without_own_action() {
        let hider = Arc::new(CountingHider::default());
        let enhancer = enhancer(
            settings(&[("viewOption", "no-stack")]),
            Arc::new(GatedApi::default()),
            hider.clone(),
        );
        let (tx, records) = record_channel();
        let mut out = enhancer.buttons(records, view_models());

        tx.send(Some(article("a", "10.1/a"))).unwrap();
        let view = out.next().await.flatten().unwrap();
        assert_eq!(view.view_option, ViewOption::NoStack);
        assert!(view.combined_links.is_empty());
        assert_eq!(hider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_covers_follow_records() {
        let api = Arc::new(FakeApi {
            journal: Some(journal_response(JournalData {
                cover_image_url: some("https://x/cover.jpg"),
                ..Default::default()
            })),
            ..Default::default()
        });
        let hider = Arc::new(CountingHider::default());
        let enhancer = enhancer(
            settings(&[("journalCoverImagesEnabled", "true")]),
            api,
            hider.clone(),
        );
        let (tx, records) = record_channel();
        let mut covers = enhancer.covers(records);

        tx.send(Some(journal("j1", "1234-5678"))).unwrap();
        assert_eq!(covers.next().await, Some(Some("https://x/cover.jpg".to_string())));
        assert_eq!(hider.calls.load(Ordering::SeqCst), 1);

        tx.send(Some(record("b1", "book"))).unwrap();
        assert_eq!(covers.next().await, Some(None));
        assert_eq!(hider.calls.load(Ordering::SeqCst), 1);
    }
}
