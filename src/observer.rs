//! Typed observer lists
//!
//! Profile tables, property caches and the engines publish change events
//! through an [`ObserverList`]. Listeners are registered with `subscribe`,
//! which returns an id that removes them again with `unsubscribe`.

use std::fmt;
use std::sync::Arc;

/// Handle returned by [`ObserverList::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered list of listeners for events of type `E`
pub struct ObserverList<E> {
    next_id: u64,
    listeners: Vec<(ObserverId, Listener<E>)>,
}

impl<E> ObserverList<E> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            listeners: Vec::new(),
        }
    }

    /// Register a listener; it is called for every event until unsubscribed
    pub fn subscribe<F>(&mut self, listener: F) -> ObserverId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if the id was unknown.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// Deliver `event` to every listener in registration order
    pub fn notify(&self, event: &E) {
        for (_, listener) in &self.listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E> Default for ObserverList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ObserverList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_subscribe_notify_unsubscribe() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut list = ObserverList::<u32>::new();

        let sink = seen.clone();
        let first = list.subscribe(move |v| sink.lock().push(*v));
        let sink = seen.clone();
        let second = list.subscribe(move |v| sink.lock().push(v * 10));
        assert_ne!(first, second);

        list.notify(&1);
        assert_eq!(*seen.lock(), vec![1, 10]);

        assert!(list.unsubscribe(first));
        assert!(!list.unsubscribe(first));
        list.notify(&2);
        assert_eq!(*seen.lock(), vec![1, 10, 20]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_ids_not_reused() {
        let mut list = ObserverList::<()>::new();
        let a = list.subscribe(|_| {});
        list.unsubscribe(a);
        let b = list.subscribe(|_| {});
        assert_ne!(a, b);
    }
}
