//! Shared watch fan-out used by every backend driver (spec §4.1 watch
//! guarantees, §5 backpressure: "the backend must drop the slow watcher
//! \[...\] rather than block other writers").

use corestate_api::label_query::{matches_all, LabelQuery};
use corestate_types::event::Event;
use corestate_types::resource::ResourcePointer;
use corestate_types::CoreError;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 64;

/// What a single subscription is watching: one pointer, or every resource
/// of a `(namespace, kind)`.
enum Scope {
    Pointer(ResourcePointer),
    Kind { namespace: String, kind: String, label_queries: Vec<LabelQuery> },
}

impl Scope {
    fn matches(&self, ptr: &ResourcePointer, labels: &corestate_types::resource::Labels) -> bool {
        match self {
            Scope::Pointer(p) => p == ptr,
            Scope::Kind { namespace, kind, label_queries } => {
                &ptr.namespace == namespace && &ptr.kind == kind && matches_all(label_queries, labels)
            }
        }
    }
}

struct Subscriber {
    id: u64,
    scope: Scope,
    sender: mpsc::Sender<Event>,
    /// A permit reserved at registration time so the terminal `Errored`
    /// event always has a slot to land in, even when the channel is
    /// otherwise full of events the subscriber hasn't drained.
    error_permit: Mutex<Option<mpsc::OwnedPermit<Event>>>,
}

impl Subscriber {
    /// Best-effort delivery of a terminal event through the reserved
    /// permit. A no-op once the permit has already been spent or the
    /// subscriber never had one reserved (channel was full at register
    /// time, which cannot happen with a freshly created channel, but a
    /// missing permit is treated as "can't notify" rather than unwrapped).
    fn deliver_terminal(&self, event: Event) {
        if let Some(permit) = self.error_permit.lock().unwrap().take() {
            let _ = permit.send(event);
        }
    }
}

/// Handle returned alongside a new subscription so the caller that just
/// registered it can deliver bootstrap replay (the `Created` backlog and
/// the single `Bootstrapped` sentinel) to that subscriber alone, instead
/// of through [`WatchRegistry::publish`], which would fan the replay out
/// to every other matching subscriber too.
#[derive(Clone)]
pub struct BootstrapHandle {
    sender: mpsc::Sender<Event>,
}

impl BootstrapHandle {
    /// Best-effort targeted delivery. The channel was just created for
    /// this subscriber alone, so this only fails if the caller has
    /// already dropped the receiver.
    pub fn deliver(&self, event: Event) {
        let _ = self.sender.try_send(event);
    }
}

/// A registry of active watch subscriptions for one backend instance.
///
/// Cheaply cloneable; every clone shares the same subscriber list.
#[derive(Clone)]
pub struct WatchRegistry {
    subscribers: std::sync::Arc<Mutex<Vec<Subscriber>>>,
    next_id: std::sync::Arc<AtomicU64>,
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self { subscribers: Default::default(), next_id: std::sync::Arc::new(AtomicU64::new(1)) }
    }
}

impl WatchRegistry {
    /// Subscribes to events for a single resource pointer. The returned
    /// [`BootstrapHandle`] delivers replay events to this subscription
    /// alone.
    pub fn subscribe_pointer(&self, ptr: ResourcePointer) -> (mpsc::Receiver<Event>, BootstrapHandle) {
        self.register(Scope::Pointer(ptr))
    }

    /// Subscribes to events for every resource of `(namespace, kind)`
    /// matching `label_queries`. The returned [`BootstrapHandle`] delivers
    /// replay events to this subscription alone.
    pub fn subscribe_kind(
        &self,
        namespace: impl Into<String>,
        kind: impl Into<String>,
        label_queries: Vec<LabelQuery>,
    ) -> (mpsc::Receiver<Event>, BootstrapHandle) {
        self.register(Scope::Kind { namespace: namespace.into(), kind: kind.into(), label_queries })
    }

    /// Subscribes to coalesced batches for `(namespace, kind)`. Events
    /// are drained as fast as they arrive and flushed either once
    /// `max_batch` events have accumulated or once no more are
    /// immediately available, preserving per-resource order within each
    /// batch (spec §5). The returned [`BootstrapHandle`] feeds the same
    /// underlying channel the batching task reads from, so replay events
    /// delivered through it arrive in the first batch.
    pub fn subscribe_kind_aggregated(
        &self,
        namespace: impl Into<String>,
        kind: impl Into<String>,
        label_queries: Vec<LabelQuery>,
        max_batch: usize,
    ) -> (mpsc::Receiver<Vec<Event>>, BootstrapHandle) {
        let (mut raw_rx, handle) =
            self.register(Scope::Kind { namespace: namespace.into(), kind: kind.into(), label_queries });
        let (batch_tx, batch_rx) = mpsc::channel(32);
        let max_batch = max_batch.max(1);
        tokio::spawn(async move {
            while let Some(first) = raw_rx.recv().await {
                let mut batch = vec![first];
                while batch.len() < max_batch {
                    match raw_rx.try_recv() {
                        Ok(ev) => batch.push(ev),
                        Err(_) => break,
                    }
                }
                if batch_tx.send(batch).await.is_err() {
                    break;
                }
            }
        });
        (batch_rx, handle)
    }

    /// Registers a new subscriber and returns its receiver together with
    /// a [`BootstrapHandle`] for delivering replay events to it alone. A
    /// permit is reserved out of the channel's capacity up front so a
    /// terminal `Errored` event is always guaranteed a slot later, even
    /// once the channel itself has filled up.
    fn register(&self, scope: Scope) -> (mpsc::Receiver<Event>, BootstrapHandle) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let error_permit = tx.clone().try_reserve_owned().ok();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = BootstrapHandle { sender: tx.clone() };
        self.subscribers
            .lock()
            .unwrap()
            .push(Subscriber { id, scope, sender: tx, error_permit: Mutex::new(error_permit) });
        (rx, handle)
    }

    /// Fans `event` out to every matching subscriber. A subscriber whose
    /// channel is full or closed is dropped rather than allowed to block
    /// the publisher, but not silently: its channel is sent a terminal
    /// `Errored` event first, through the permit reserved for it at
    /// registration, so it closes with `errored` per the watch guarantee
    /// instead of simply disappearing. A panic while matching a
    /// subscriber's scope or sending its event is caught and handled the
    /// same way, so one bad label query can't take down delivery to the
    /// rest of the subscribers (spec §7).
    pub fn publish(&self, ptr: &ResourcePointer, labels: &corestate_types::resource::Labels, event: Event) {
        let mut dead = Vec::new();
        {
            let subs = self.subscribers.lock().unwrap();
            for sub in subs.iter() {
                let matches = match std::panic::catch_unwind(AssertUnwindSafe(|| sub.scope.matches(ptr, labels))) {
                    Ok(m) => m,
                    Err(_) => {
                        dead.push(sub.id);
                        sub.deliver_terminal(Event::errored(CoreError::Internal(anyhow::anyhow!(
                            "panic while matching watch scope, subscriber dropped"
                        ))));
                        continue;
                    }
                };
                if !matches {
                    continue;
                }
                match std::panic::catch_unwind(AssertUnwindSafe(|| sub.sender.try_send(event.clone()))) {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        dead.push(sub.id);
                        sub.deliver_terminal(Event::errored(CoreError::Internal(anyhow::anyhow!(
                            "watch channel closed or full, subscriber dropped"
                        ))));
                    }
                    Err(_) => {
                        dead.push(sub.id);
                        sub.deliver_terminal(Event::errored(CoreError::Internal(anyhow::anyhow!(
                            "panic while delivering watch event, subscriber dropped"
                        ))));
                    }
                }
            }
        }
        if dead.is_empty() {
            return;
        }
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|s| !dead.contains(&s.id));
    }

    /// Removes every subscription; used when a driver shuts down.
    pub fn clear(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corestate_types::event::EventKind;
    use corestate_types::resource::Resource;

    fn res(ns: &str, kind: &str, id: &str) -> Resource {
        Resource::new(ResourcePointer::new(ns, kind, id), b"payload".to_vec())
    }

    #[tokio::test]
    async fn bootstrap_handle_targets_only_the_new_subscriber() {
        let reg = WatchRegistry::default();
        let (mut first_rx, _h1) = reg.subscribe_kind("default", "Cluster", vec![]);
        let (mut second_rx, h2) = reg.subscribe_kind("default", "Cluster", vec![]);

        h2.deliver(Event::created(res("default", "Cluster", "c1")));
        h2.deliver(Event::bootstrapped());

        let got = second_rx.recv().await.unwrap();
        assert_eq!(got.kind, EventKind::Created);
        let got = second_rx.recv().await.unwrap();
        assert_eq!(got.kind, EventKind::Bootstrapped);

        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_delivers_a_matching_event_once() {
        let reg = WatchRegistry::default();
        let (mut rx, _h) = reg.subscribe_kind("default", "Cluster", vec![]);
        let r = res("default", "Cluster", "c1");
        reg.publish(&r.ptr, &r.labels, Event::created(r));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, EventKind::Created);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_with_a_terminal_errored_event() {
        let reg = WatchRegistry::default();
        let ptr = ResourcePointer::new("default", "Cluster", "c1");
        let (mut rx, _h) = reg.subscribe_pointer(ptr.clone());
        let labels = corestate_types::resource::Labels::default();

        // One slot of the channel's capacity is reserved at registration
        // for the terminal event, so only `CHANNEL_CAPACITY - 1` normal
        // sends fit before the channel reports full.
        for _ in 0..CHANNEL_CAPACITY - 1 {
            reg.publish(&ptr, &labels, Event::bootstrapped());
        }
        // One more push finds the channel full and drops the subscriber.
        reg.publish(&ptr, &labels, Event::bootstrapped());

        for _ in 0..CHANNEL_CAPACITY - 1 {
            let ev = rx.recv().await.unwrap();
            assert_eq!(ev.kind, EventKind::Bootstrapped);
        }
        let last = rx.recv().await.unwrap();
        assert_eq!(last.kind, EventKind::Errored);
        assert!(last.error.is_some());
        assert!(rx.recv().await.is_none());

        // The dropped subscriber no longer receives further events.
        reg.publish(&ptr, &labels, Event::bootstrapped());
        assert_eq!(reg.subscribers.lock().unwrap().len(), 0);
    }
}
