//! Stream building blocks shared by the proxy, resolver and enhancer layers.
//!
//! - [`Replay`] - latest-value cell that replays to new subscribers
//! - [`distinct_by`] - per-subscription de-duplication on a derived key
//! - [`combine_latest`] - pairs of latest values once both sides have emitted
//! - [`switch_map`] - cancel-on-switch flattening of inner streams
//!
//! All state lives inside the returned streams, so independent subscribers
//! never share bookkeeping.

use futures::future::{self, Either};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Latest-value cell backed by a `watch` channel.
///
/// Subscribers first receive the current value (if one was pushed) and then
/// every later value. A slow subscriber only sees the newest value.
pub struct Replay<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Replay<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Replay<T> {
    /// Create an empty cell
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current value and notify subscribers
    pub fn push(&self, value: T) {
        self.tx.send_replace(Some(value));
    }

    /// Current value, if any
    pub fn latest(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Stream of values starting with the current one
    pub fn subscribe(&self) -> BoxStream<'static, T> {
        WatchStream::new(self.tx.subscribe())
            .filter_map(future::ready)
            .boxed()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Replay<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop items whose key equals the key of the previously forwarded item.
pub fn distinct_by<S, K, F>(input: S, mut key: F) -> impl Stream<Item = S::Item>
where
    S: Stream,
    K: PartialEq,
    F: FnMut(&S::Item) -> K,
{
    let mut last: Option<K> = None;
    input.filter_map(move |item| {
        let k = key(&item);
        let out = if last.as_ref() == Some(&k) {
            None
        } else {
            last = Some(k);
            Some(item)
        };
        future::ready(out)
    })
}

enum Side<A, B> {
    Left(A),
    Right(B),
}

/// Emit `(a, b)` with the latest value of each side, once both have emitted.
pub fn combine_latest<A, B>(
    a: BoxStream<'static, A>,
    b: BoxStream<'static, B>,
) -> BoxStream<'static, (A, B)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    stream::select(a.map(Side::Left), b.map(Side::Right))
        .scan(
            (None::<A>, None::<B>),
            |latest: &mut (Option<A>, Option<B>), side| {
                match side {
                    Side::Left(v) => latest.0 = Some(v),
                    Side::Right(v) => latest.1 = Some(v),
                }
                let pair = match (&latest.0, &latest.1) {
                    (Some(a), Some(b)) => Some((a.clone(), b.clone())),
                    _ => None,
                };
                future::ready(Some(pair))
            },
        )
        .filter_map(future::ready)
        .boxed()
}

struct SwitchState<I, T, F> {
    input: BoxStream<'static, I>,
    inner: Option<BoxStream<'static, T>>,
    input_done: bool,
    f: F,
}

enum Polled<I, T> {
    Input(Option<I>),
    Inner(Option<T>),
}

/// Map every input item to an inner stream and forward only the newest one.
///
/// A new input item drops the previous inner stream together with any future
/// it was awaiting, so a late result for a superseded item is never emitted.
/// Pending input always wins over a ready inner value.
pub fn switch_map<I, T, F>(input: BoxStream<'static, I>, f: F) -> BoxStream<'static, T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: FnMut(I) -> BoxStream<'static, T> + Send + 'static,
{
    let state = SwitchState {
        input,
        inner: None,
        input_done: false,
        f,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            let Some(mut inner) = st.inner.take() else {
                if st.input_done {
                    return None;
                }
                match st.input.next().await {
                    Some(item) => {
                        st.inner = Some((st.f)(item));
                        continue;
                    }
                    None => return None,
                }
            };

            if st.input_done {
                return match inner.next().await {
                    Some(value) => {
                        st.inner = Some(inner);
                        Some((value, st))
                    }
                    None => None,
                };
            }

            let polled = match future::select(st.input.next(), inner.next()).await {
                Either::Left((item, _)) => Polled::Input(item),
                Either::Right((value, _)) => Polled::Inner(value),
            };

            match polled {
                Polled::Input(Some(item)) => {
                    drop(inner);
                    st.inner = Some((st.f)(item));
                }
                Polled::Input(None) => {
                    st.input_done = true;
                    st.inner = Some(inner);
                }
                Polled::Inner(Some(value)) => {
                    st.inner = Some(inner);
                    return Some((value, st));
                }
                // inner finished; wait for the next input item
                Polled::Inner(None) => {}
            }
        }
    })
    .boxed()
}
