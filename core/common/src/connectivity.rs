//! Process-wide online/offline signal with change notification.
//!
//! The monitor has a single writer (whatever translates platform
//! connectivity events into [`ConnectivityMonitor::report`]) and any number
//! of readers. Readers either poll the accessor, register an in-process
//! observer callback, or hold a [`watch::Receiver`] for use from other tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Connectivity as last reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(self) -> bool {
        self == Connectivity::Online
    }
}

/// Observer callback, invoked on every transition with the new state.
pub type ConnectivityCallback = Arc<dyn Fn(Connectivity) + Send + Sync>;

struct ObserverRegistry {
    callbacks: RwLock<HashMap<u64, ConnectivityCallback>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    fn remove(&self, id: u64) -> bool {
        let mut callbacks = self.callbacks.write().unwrap();
        callbacks.remove(&id).is_some()
    }
}

/// Injectable connectivity service.
pub struct ConnectivityMonitor {
    state: watch::Sender<Connectivity>,
    observers: Arc<ObserverRegistry>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the runtime's current signal.
    pub fn new(initial: Connectivity) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            observers: Arc::new(ObserverRegistry {
                callbacks: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Convenience constructor for an online monitor.
    pub fn online() -> Self {
        Self::new(Connectivity::Online)
    }

    /// Convenience constructor for an offline monitor.
    pub fn offline() -> Self {
        Self::new(Connectivity::Offline)
    }

    /// Current connectivity.
    pub fn status(&self) -> Connectivity {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    pub fn is_offline(&self) -> bool {
        !self.is_online()
    }

    /// Record a platform connectivity event.
    ///
    /// Returns `true` when the event was a transition. Repeated reports of
    /// the current state are ignored and notify nobody.
    pub fn report(&self, status: Connectivity) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if !changed {
            debug!("Connectivity unchanged ({:?})", status);
            return false;
        }

        match status {
            Connectivity::Online => info!("Connectivity restored"),
            Connectivity::Offline => warn!("Connectivity lost, switching to offline mode"),
        }

        // Snapshot the callbacks so observers may unsubscribe from inside
        // their own callback.
        let callbacks: Vec<ConnectivityCallback> = {
            let callbacks = self.observers.callbacks.read().unwrap();
            callbacks.values().cloned().collect()
        };
        for callback in callbacks {
            callback(status);
        }

        true
    }

    /// Register an in-process observer.
    ///
    /// The observer stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Connectivity) + Send + Sync + 'static,
    {
        let id = self.observers.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers
            .callbacks
            .write()
            .unwrap()
            .insert(id, Arc::new(callback));

        Subscription {
            id,
            registry: Arc::downgrade(&self.observers),
        }
    }

    /// Receiver for listeners running in other tasks.
    pub fn watch(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Number of registered in-process observers.
    pub fn observer_count(&self) -> usize {
        self.observers.callbacks.read().unwrap().len()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::online()
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("status", &self.status())
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Handle for a registered observer. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes the observer"]
pub struct Subscription {
    id: u64,
    registry: Weak<ObserverRegistry>,
}

impl Subscription {
    /// Remove the observer. Safe to call any number of times.
    ///
    /// Returns `true` only for the call that actually removed it.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.id),
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn test_seeded_state() {
        assert!(ConnectivityMonitor::online().is_online());
        assert!(ConnectivityMonitor::offline().is_offline());
    }

    #[test]
    fn test_observers_notified_on_transition_only() {
        let monitor = ConnectivityMonitor::online();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let _sub = monitor.subscribe(move |status| seen_clone.lock().unwrap().push(status));

        assert!(!monitor.report(Connectivity::Online));
        assert!(monitor.report(Connectivity::Offline));
        assert!(!monitor.report(Connectivity::Offline));
        assert!(monitor.report(Connectivity::Online));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Connectivity::Offline, Connectivity::Online]
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let monitor = ConnectivityMonitor::online();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let sub = monitor.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(monitor.observer_count(), 1);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert_eq!(monitor.observer_count(), 0);

        monitor.report(Connectivity::Offline);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Dropping after an explicit unsubscribe is also fine.
        drop(sub);
        assert_eq!(monitor.observer_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let monitor = ConnectivityMonitor::online();
        {
            let _a = monitor.subscribe(|_| {});
            let _b = monitor.subscribe(|_| {});
            assert_eq!(monitor.observer_count(), 2);
        }
        assert_eq!(monitor.observer_count(), 0);
    }

    #[test]
    fn test_subscription_outlives_monitor() {
        let monitor = ConnectivityMonitor::online();
        let sub = monitor.subscribe(|_| {});
        drop(monitor);
        assert!(!sub.unsubscribe());
    }

    #[tokio::test]
    async fn test_watch_receiver_sees_transitions() {
        let monitor = ConnectivityMonitor::online();
        let mut rx = monitor.watch();

        monitor.report(Connectivity::Offline);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Offline);
    }
}
