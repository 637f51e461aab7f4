//! Read-only view of the host's global state store.
//!
//! Only two key paths matter here: `activeView.selectedRecordId` and
//! `searchResults.entities`. Both are exposed as change-only streams.

use crate::search_entity::SearchEntity;
use crate::streams::distinct_by;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

/// Records keyed by record id
pub type EntityMap<R> = Arc<HashMap<String, R>>;

/// Source of the globally selected record and the loaded search results
pub trait SelectionStore<R>: Send + Sync {
    /// Selected record id, emitting only on change
    fn selected_record_id(&self) -> BoxStream<'static, Option<String>>;

    /// Id -> record mapping of the current search results
    fn search_entities(&self) -> BoxStream<'static, EntityMap<R>>;
}

/// Host state held as JSON and replaced wholesale by the host
pub struct HostStore {
    state: watch::Sender<Value>,
}

impl HostStore {
    pub fn new(state: Value) -> Self {
        let (state, _rx) = watch::channel(state);
        Self { state }
    }

    /// Store with nothing selected and no results
    pub fn empty() -> Self {
        Self::new(Value::Null)
    }

    /// Replace the whole state tree
    pub fn replace(&self, state: Value) {
        self.state.send_replace(state);
    }

    /// Set or clear `activeView.selectedRecordId`
    pub fn select(&self, record_id: Option<&str>) {
        self.state.send_modify(|state| {
            let id = record_id.map_or(Value::Null, |id| Value::String(id.to_string()));
            set_path(state, &["activeView", "selectedRecordId"], id);
        });
    }

    /// Insert or replace one entity under `searchResults.entities`
    pub fn upsert_entity(&self, record_id: &str, entity: Value) {
        self.state.send_modify(|state| {
            set_path(state, &["searchResults", "entities", record_id], entity);
        });
    }

    fn project<T, F>(&self, f: F) -> BoxStream<'static, T>
    where
        T: PartialEq + Clone + Send + 'static,
        F: Fn(&Value) -> T + Send + 'static,
    {
        let values = WatchStream::new(self.state.subscribe()).map(move |state| f(&state));
        distinct_by(values, Clone::clone).boxed()
    }
}

fn set_path(node: &mut Value, path: &[&str], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        set_path(child, rest, value);
    }
}

fn selected_id(state: &Value) -> Option<String> {
    state
        .pointer("/activeView/selectedRecordId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

fn raw_entities(state: &Value) -> Value {
    state
        .pointer("/searchResults/entities")
        .cloned()
        .unwrap_or(Value::Null)
}

fn parse_entities(raw: Value) -> EntityMap<SearchEntity> {
    let Value::Object(entries) = raw else {
        return Arc::new(HashMap::new());
    };

    let parsed = entries
        .into_iter()
        .filter_map(|(id, value)| match serde_json::from_value(value) {
            Ok(entity) => Some((id, entity)),
            Err(e) => {
                debug!(record_id = %id, error = %e, "Skipping unreadable search entity");
                None
            }
        })
        .collect();
    Arc::new(parsed)
}

impl SelectionStore<SearchEntity> for HostStore {
    fn selected_record_id(&self) -> BoxStream<'static, Option<String>> {
        self.project(selected_id)
    }

    fn search_entities(&self) -> BoxStream<'static, EntityMap<SearchEntity>> {
        self.project(raw_entities)
            .map(parse_entities)
            .boxed()
    }
}

impl Default for HostStore {
    fn default() -> Self {
        Self::empty()
    }
}
