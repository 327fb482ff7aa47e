//! In-process pub/sub registries for live updates, conflicts, and presence.
//!
//! Callbacks are invoked synchronously, in registration order, on the
//! task that produced the event; no batching or debouncing happens at
//! this layer.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lotview_common::sync::lock;

use crate::protocol::{LiveUpdate, UpdateKind};

static SUB_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_sub_id() -> u64 {
    SUB_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle returned from every subscribe call.
///
/// `unsubscribe` is idempotent: calling it twice is a no-op and never
/// affects other subscribers. Dropping the handle does NOT unsubscribe;
/// registrations live until explicitly cancelled or the service is torn
/// down.
#[must_use = "dropping a Subscription does not unsubscribe; keep it to cancel later"]
pub struct Subscription {
    cancel: Arc<dyn Fn() + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new(cancel: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self { cancel }
    }

    pub fn unsubscribe(&self) {
        (self.cancel)();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// An ordered list of callbacks, keyed by subscription id.
pub(crate) struct Listeners<T: ?Sized> {
    entries: Vec<(u64, Arc<T>)>,
}

impl<T: ?Sized> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, id: u64, callback: Arc<T>) {
        self.entries.push((id, callback));
    }

    /// Remove by id. Returns false when the id was already gone.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entries.iter().map(|(_, cb)| cb)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

pub(crate) type UpdateCallback = dyn Fn(&LiveUpdate) + Send + Sync;

/// Where an update subscription was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateBucket {
    Kind(UpdateKind),
    All,
}

/// Registry of live-update subscribers: one bucket per update kind plus
/// an "all" bucket that receives every dispatched update. Kinds are not
/// hierarchical: a kind subscriber sees only its kind, an "all"
/// subscriber sees everything.
pub(crate) struct UpdateRegistry {
    by_kind: HashMap<UpdateKind, Listeners<UpdateCallback>>,
    all: Listeners<UpdateCallback>,
}

impl UpdateRegistry {
    pub(crate) fn new() -> Self {
        Self {
            by_kind: HashMap::new(),
            all: Listeners::new(),
        }
    }

    pub(crate) fn add(&mut self, bucket: UpdateBucket, id: u64, callback: Arc<UpdateCallback>) {
        match bucket {
            UpdateBucket::Kind(kind) => self
                .by_kind
                .entry(kind)
                .or_insert_with(Listeners::new)
                .add(id, callback),
            UpdateBucket::All => self.all.add(id, callback),
        }
    }

    pub(crate) fn remove(&mut self, bucket: UpdateBucket, id: u64) -> bool {
        match bucket {
            UpdateBucket::Kind(kind) => self
                .by_kind
                .get_mut(&kind)
                .is_some_and(|listeners| listeners.remove(id)),
            UpdateBucket::All => self.all.remove(id),
        }
    }

    /// The callbacks an update of this kind reaches: the kind's bucket,
    /// then the "all" bucket, each in registration order.
    fn callbacks_for(&self, kind: UpdateKind) -> Vec<Arc<UpdateCallback>> {
        let mut callbacks = Vec::new();
        if let Some(listeners) = self.by_kind.get(&kind) {
            callbacks.extend(listeners.iter().cloned());
        }
        callbacks.extend(self.all.iter().cloned());
        callbacks
    }

    pub(crate) fn clear(&mut self) {
        self.by_kind.clear();
        self.all.clear();
    }
}

/// Deliver one update to every reachable subscriber, synchronously and
/// in registration order. The registry lock is released before the first
/// callback runs so a callback may subscribe or unsubscribe.
pub(crate) fn dispatch(registry: &Arc<Mutex<UpdateRegistry>>, update: &LiveUpdate) {
    let callbacks = lock(registry).callbacks_for(update.kind);
    for callback in callbacks {
        callback(update);
    }
}

/// Build the idempotent cancel handle for an update subscription.
pub(crate) fn update_subscription(
    registry: &Arc<Mutex<UpdateRegistry>>,
    bucket: UpdateBucket,
    id: u64,
) -> Subscription {
    let registry = Arc::clone(registry);
    Subscription::new(Arc::new(move || {
        lock(&registry).remove(bucket, id);
    }))
}

/// Build the idempotent cancel handle for a plain listener list.
pub(crate) fn listener_subscription<T: ?Sized + Send + Sync + 'static>(
    listeners: &Arc<Mutex<Listeners<T>>>,
    id: u64,
) -> Subscription {
    let listeners = Arc::clone(listeners);
    Subscription::new(Arc::new(move || {
        lock(&listeners).remove(id);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UpdateOrigin;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn update(kind: UpdateKind) -> LiveUpdate {
        LiveUpdate::new(kind, "cars", "car-1", json!({}), UpdateOrigin::System)
    }

    #[test]
    fn kind_bucket_then_all_bucket_in_registration_order() {
        let registry = Arc::new(Mutex::new(UpdateRegistry::new()));
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, bucket) in [
            ("all-1", UpdateBucket::All),
            ("kind-1", UpdateBucket::Kind(UpdateKind::CarRecord)),
            ("kind-2", UpdateBucket::Kind(UpdateKind::CarRecord)),
            ("all-2", UpdateBucket::All),
        ] {
            let order = Arc::clone(&order);
            lock(&registry).add(
                bucket,
                next_sub_id(),
                Arc::new(move |_: &LiveUpdate| order.lock().unwrap().push(label)),
            );
        }

        dispatch(&registry, &update(UpdateKind::CarRecord));
        assert_eq!(
            *order.lock().unwrap(),
            vec!["kind-1", "kind-2", "all-1", "all-2"]
        );
    }

    #[test]
    fn kind_subscribers_do_not_see_other_kinds() {
        let registry = Arc::new(Mutex::new(UpdateRegistry::new()));
        let car_hits = Arc::new(AtomicUsize::new(0));
        let all_hits = Arc::new(AtomicUsize::new(0));

        {
            let car_hits = Arc::clone(&car_hits);
            lock(&registry).add(
                UpdateBucket::Kind(UpdateKind::CarRecord),
                next_sub_id(),
                Arc::new(move |_| {
                    car_hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        {
            let all_hits = Arc::clone(&all_hits);
            lock(&registry).add(
                UpdateBucket::All,
                next_sub_id(),
                Arc::new(move |_| {
                    all_hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        dispatch(&registry, &update(UpdateKind::Schedule));
        assert_eq!(car_hits.load(Ordering::SeqCst), 0);
        assert_eq!(all_hits.load(Ordering::SeqCst), 1);

        dispatch(&registry, &update(UpdateKind::CarRecord));
        assert_eq!(car_hits.load(Ordering::SeqCst), 1);
        assert_eq!(all_hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_isolated() {
        let registry = Arc::new(Mutex::new(UpdateRegistry::new()));
        let kept_hits = Arc::new(AtomicUsize::new(0));
        let dropped_hits = Arc::new(AtomicUsize::new(0));

        let dropped_id = next_sub_id();
        {
            let dropped_hits = Arc::clone(&dropped_hits);
            lock(&registry).add(
                UpdateBucket::Kind(UpdateKind::CarRecord),
                dropped_id,
                Arc::new(move |_| {
                    dropped_hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        {
            let kept_hits = Arc::clone(&kept_hits);
            lock(&registry).add(
                UpdateBucket::Kind(UpdateKind::CarRecord),
                next_sub_id(),
                Arc::new(move |_| {
                    kept_hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        let sub = update_subscription(
            &registry,
            UpdateBucket::Kind(UpdateKind::CarRecord),
            dropped_id,
        );
        sub.unsubscribe();
        sub.unsubscribe(); // second call must be a no-op

        dispatch(&registry, &update(UpdateKind::CarRecord));
        assert_eq!(dropped_hits.load(Ordering::SeqCst), 0);
        assert_eq!(kept_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_remove_reports_whether_present() {
        let mut listeners: Listeners<dyn Fn() + Send + Sync> = Listeners::new();
        listeners.add(7, Arc::new(|| {}));
        assert!(listeners.remove(7));
        assert!(!listeners.remove(7));
        assert_eq!(listeners.iter().count(), 0);
    }

    #[test]
    fn clear_drops_every_bucket() {
        let registry = Arc::new(Mutex::new(UpdateRegistry::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        for bucket in [UpdateBucket::Kind(UpdateKind::Inventory), UpdateBucket::All] {
            let hits = Arc::clone(&hits);
            lock(&registry).add(
                bucket,
                next_sub_id(),
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        lock(&registry).clear();
        dispatch(&registry, &update(UpdateKind::Inventory));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
