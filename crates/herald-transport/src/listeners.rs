//! Listener registry with explicit subscription handles.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// A registered event callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    entries: Vec<(u64, Listener<E>)>,
}

/// Set of listeners for one event type.
///
/// Listeners run on the dispatching task, outside the registry lock, so a
/// listener may add or remove listeners without deadlocking.
pub struct ListenerSet<E> {
    inner: Arc<Mutex<Registry<E>>>,
}

impl<E> Clone for ListenerSet<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<E> std::fmt::Debug for ListenerSet<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.inner.lock().entries.len())
            .finish()
    }
}

impl<E: 'static> ListenerSet<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn add(&self, listener: Listener<E>) -> Subscription {
        let id = {
            let mut registry = self.inner.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, listener));
            id
        };

        let registry: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Invoke every registered listener with `event`, in registration order.
    pub fn dispatch(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle that keeps a listener registered.
#[must_use = "dropping a Subscription removes its listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Listener<u32>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let listener: Listener<u32> = Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    #[test]
    fn dispatch_reaches_all_listeners() {
        let set = ListenerSet::new();
        let (a, la) = counter();
        let (b, lb) = counter();
        let _sa = set.add(la);
        let _sb = set.add(lb);

        set.dispatch(&1);
        set.dispatch(&2);

        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let set = ListenerSet::new();
        let (count, listener) = counter();
        let sub = set.add(listener);

        set.dispatch(&1);
        sub.unsubscribe();
        set.dispatch(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn dropping_subscription_removes_listener() {
        let set = ListenerSet::new();
        let (count, listener) = counter();
        {
            let _sub = set.add(listener);
            assert_eq!(set.len(), 1);
        }
        set.dispatch(&1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn subscription_outliving_set_is_harmless() {
        let set = ListenerSet::new();
        let (_count, listener) = counter();
        let sub = set.add(listener);
        drop(set);
        sub.unsubscribe();
    }

    #[test]
    fn listener_may_unsubscribe_others_during_dispatch() {
        let set: ListenerSet<u32> = ListenerSet::new();
        let (count, listener) = counter();
        let victim = Arc::new(Mutex::new(Some(set.add(listener))));

        let v = Arc::clone(&victim);
        let _killer = set.add(Arc::new(move |_| {
            v.lock().take();
        }));

        // The victim was snapshotted before the killer ran, so it sees this one.
        set.dispatch(&1);
        set.dispatch(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 1);
    }
}
