//! Active record resolution.
//!
//! Two sources disagree about which record is on screen: the global store's
//! selected record id (full-display view) and the id derived from the host
//! component (list views). [`SelectionResolver::active`] reconciles them, the
//! more recently changed one winning, and looks the winner up in the store's
//! search results.

use crate::host::RecordIdentity;
use crate::store::{EntityMap, SelectionStore};
use crate::streams::distinct_by;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tracing::debug;

enum Input<R> {
    Selected(Option<String>),
    Fallback(Option<String>),
    Entities(EntityMap<R>),
}

/// Source of an id input, for recency stamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Selected,
    Fallback,
}

/// Latest value of one id source plus the tick at which it last changed
#[derive(Debug, Default)]
struct Stamped {
    value: Option<Option<String>>,
    changed_at: u64,
}

impl Stamped {
    /// The first value is not a change; it only marks the source as ready.
    fn update(&mut self, value: Option<String>, clock: &mut u64) {
        if let Some(previous) = &self.value {
            if *previous != value {
                *clock += 1;
                self.changed_at = *clock;
            }
        }
        self.value = Some(value);
    }
}

/// Per-subscription fold state
struct Recency<R> {
    clock: u64,
    selected: Stamped,
    fallback: Stamped,
    entities: Option<EntityMap<R>>,
}

impl<R: Clone> Recency<R> {
    fn new() -> Self {
        Self {
            clock: 0,
            selected: Stamped::default(),
            fallback: Stamped::default(),
            entities: None,
        }
    }

    fn apply(&mut self, input: Input<R>) {
        match input {
            Input::Selected(id) => self.selected.update(id, &mut self.clock),
            Input::Fallback(id) => self.fallback.update(id, &mut self.clock),
            Input::Entities(map) => self.entities = Some(map),
        }
    }

    /// `None` until every input has produced a value
    fn resolve(&self) -> Option<Option<R>> {
        let selected = self.selected.value.as_ref()?;
        let fallback = self.fallback.value.as_ref()?;
        let entities = self.entities.as_ref()?;

        let chosen = choose_id(
            selected.as_deref(),
            fallback.as_deref(),
            self.selected.changed_at,
            self.fallback.changed_at,
        );
        let record = chosen.and_then(|(id, _)| entities.get(id).cloned());

        debug!(
            selected = ?selected,
            fallback = ?fallback,
            chosen = ?chosen,
            found = record.is_some(),
            "Active record resolved"
        );
        Some(record)
    }
}

/// Pick between the two ids; equal stamps favour the selection store.
fn choose_id<'a>(
    selected: Option<&'a str>,
    fallback: Option<&'a str>,
    selected_changed_at: u64,
    fallback_changed_at: u64,
) -> Option<(&'a str, Source)> {
    match (selected, fallback) {
        (None, None) => None,
        (Some(s), None) => Some((s, Source::Selected)),
        (None, Some(f)) => Some((f, Source::Fallback)),
        (Some(s), Some(f)) if s == f => Some((s, Source::Selected)),
        (Some(s), Some(f)) => {
            if fallback_changed_at > selected_changed_at {
                Some((f, Source::Fallback))
            } else {
                Some((s, Source::Selected))
            }
        }
    }
}

/// Reconciles the selection store with a component's fallback id
pub struct SelectionResolver<R> {
    store: Arc<dyn SelectionStore<R>>,
}

impl<R> Clone for SelectionResolver<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<R> SelectionResolver<R>
where
    R: RecordIdentity + Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn SelectionStore<R>>) -> Self {
        Self { store }
    }

    /// The active record for one consumer.
    ///
    /// Emits only once the store and `fallback` have all produced a value,
    /// then again whenever the resolved record id changes. Every call builds
    /// its own recency state.
    pub fn active(&self, fallback: BoxStream<'static, Option<String>>) -> BoxStream<'static, Option<R>> {
        let inputs = stream::select_all(vec![
            self.store.selected_record_id().map(Input::Selected).boxed(),
            fallback.map(Input::Fallback).boxed(),
            self.store.search_entities().map(Input::Entities).boxed(),
        ]);

        let resolved = inputs
            .scan(Recency::new(), |state, input| {
                state.apply(input);
                future::ready(Some(state.resolve()))
            })
            .filter_map(future::ready);

        distinct_by(resolved, |record: &Option<R>| {
            record
                .as_ref()
                .and_then(|r| r.record_id().map(str::to_owned))
        })
        .boxed()
    }
}
