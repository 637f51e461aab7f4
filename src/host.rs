//! Host record proxy.
//!
//! The host application hands every add-on component a mutable object. Its
//! fields may be replaced wholesale or mutated in place, and nothing tells us
//! when that happens. [`HostRecordProxy`] turns such an object into two stable
//! streams:
//!
//! - [`HostRecordProxy::records`] - the current record, emitted only when the
//!   derived record id changes
//! - [`HostRecordProxy::secondary`] - whatever the host's current view-model
//!   feed emits, transparently re-bound when the host swaps the feed
//!
//! Call [`attach`](HostRecordProxy::attach) when the host supplies a new
//! object, [`recheck`](HostRecordProxy::recheck) on every host update cycle and
//! [`release`](HostRecordProxy::release) when the component goes away.

use crate::streams::{distinct_by, Replay};
use futures::stream::{BoxStream, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of a host feed before slow receivers start lagging
const FEED_CAPACITY: usize = 16;

/// Anything carrying a stable record id.
pub trait RecordIdentity {
    /// Stable id used to de-duplicate records, `None` when unknown
    fn record_id(&self) -> Option<&str>;
}

/// Host-owned object reachable through field access only.
///
/// Implementations use interior mutability so the host can change the record
/// or the feed reference at any time.
pub trait HostComponent: Send + Sync + 'static {
    /// Record type read off the host
    type Record: RecordIdentity + Clone + Send + Sync + 'static;
    /// Items of the host's secondary stream
    type ViewModel: Clone + Send + Sync + 'static;

    /// Current record, if the host has one
    fn record(&self) -> Option<Self::Record>;

    /// Current secondary feed reference, if the host has one
    fn view_model(&self) -> Option<HostFeed<Self::ViewModel>>;
}

/// Error item sent through a host feed
#[derive(Debug, Clone, Error)]
#[error("host feed error: {0}")]
pub struct HostFeedError(pub String);

/// Multicast feed owned by the host.
///
/// Clones share the same channel; two handles are the "same reference" when
/// they share a channel.
pub struct HostFeed<V> {
    tx: broadcast::Sender<Result<V, HostFeedError>>,
}

impl<V> Clone for HostFeed<V> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<V: Clone + Send + 'static> HostFeed<V> {
    /// Create a new feed with no subscribers
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    /// Emit a value; returns the number of receivers that got it
    pub fn publish(&self, value: V) -> usize {
        self.tx.send(Ok(value)).unwrap_or(0)
    }

    /// Emit an error item
    pub fn fail(&self, message: impl Into<String>) -> usize {
        self.tx.send(Err(HostFeedError(message.into()))).unwrap_or(0)
    }

    /// Whether both handles refer to the same feed
    pub fn same_feed(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }

    fn subscribe(&self) -> broadcast::Receiver<Result<V, HostFeedError>> {
        self.tx.subscribe()
    }
}

impl<V: Clone + Send + 'static> Default for HostFeed<V> {
    fn default() -> Self {
        Self::new()
    }
}

struct Binding<V> {
    feed: HostFeed<V>,
    task: JoinHandle<()>,
}

/// Presents a host object as a record stream and a secondary stream.
pub struct HostRecordProxy<H: HostComponent> {
    host: Option<Arc<H>>,
    records: Replay<Option<H::Record>>,
    secondary: Replay<H::ViewModel>,
    /// Bumped on every rebind/release; forwarders publish only for their own generation.
    generation: Arc<Mutex<u64>>,
    binding: Option<Binding<H::ViewModel>>,
    /// `None` until the first record derivation
    last_record_id: Option<Option<String>>,
}

impl<H: HostComponent> HostRecordProxy<H> {
    /// Create a proxy with no host attached
    pub fn new() -> Self {
        Self {
            host: None,
            records: Replay::new(),
            secondary: Replay::new(),
            generation: Arc::new(Mutex::new(0)),
            binding: None,
            last_record_id: None,
        }
    }

    /// Replace the tracked host object and re-derive everything from it
    pub fn attach(&mut self, host: Option<Arc<H>>) {
        debug!(has_host = host.is_some(), "Host component attached");
        self.host = host;
        self.push_record_if_changed();
        self.bind_view_model();
    }

    /// Detect in-place mutations of the tracked host object
    pub fn recheck(&mut self) {
        self.push_record_if_changed();
        self.bind_view_model();
    }

    /// Records, replaying the latest one and emitting only on record id change
    pub fn records(&self) -> BoxStream<'static, Option<H::Record>> {
        self.records.subscribe()
    }

    /// Record ids derived from [`records`](Self::records)
    pub fn record_ids(&self) -> BoxStream<'static, Option<String>> {
        let ids = self
            .records
            .subscribe()
            .map(|record| record.and_then(|r| r.record_id().map(str::to_owned)));
        distinct_by(ids, Clone::clone).boxed()
    }

    /// Values forwarded from the host's current secondary feed
    pub fn secondary(&self) -> BoxStream<'static, H::ViewModel> {
        self.secondary.subscribe()
    }

    /// Shared handle to the forwarded secondary values
    pub fn secondary_source(&self) -> Replay<H::ViewModel> {
        self.secondary.clone()
    }

    /// Stop forwarding from the currently bound feed. Idempotent.
    pub fn release(&mut self) {
        self.bump_generation();
        if let Some(binding) = self.binding.take() {
            binding.task.abort();
            debug!("Host view model feed released");
        }
    }

    fn push_record_if_changed(&mut self) {
        let record = self.host.as_ref().and_then(|h| h.record());
        let record_id = record
            .as_ref()
            .and_then(|r| r.record_id())
            .map(str::to_owned);

        if self.last_record_id.as_ref() == Some(&record_id) {
            return;
        }

        debug!(record_id = ?record_id, "Host record changed");
        self.last_record_id = Some(record_id);
        self.records.push(record);
    }

    fn bind_view_model(&mut self) {
        let Some(feed) = self.host.as_ref().and_then(|h| h.view_model()) else {
            return;
        };
        if self
            .binding
            .as_ref()
            .is_some_and(|b| b.feed.same_feed(&feed))
        {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, host view model feed not bound");
            return;
        };

        // Invalidate the old forwarder before the new one can publish.
        let generation = self.bump_generation();
        if let Some(old) = self.binding.take() {
            old.task.abort();
        }

        let mut rx = feed.subscribe();
        let gate = Arc::clone(&self.generation);
        let secondary = self.secondary.clone();

        let task = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Ok(view_model)) => {
                        let current = gate.lock().unwrap_or_else(PoisonError::into_inner);
                        if *current != generation {
                            break;
                        }
                        secondary.push(view_model);
                    }
                    Ok(Err(e)) => {
                        debug!(error = %e, "Host view model feed error ignored");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Host view model feed lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        debug!(generation, "Host view model feed bound");
        self.binding = Some(Binding { feed, task });
    }

    fn bump_generation(&self) -> u64 {
        let mut current = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current += 1;
        *current
    }
}

impl<H: HostComponent> Default for HostRecordProxy<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HostComponent> Drop for HostRecordProxy<H> {
    fn drop(&mut self) {
        self.release();
    }
}
