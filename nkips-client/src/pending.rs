//! Commands waiting for the router to confirm a crosspoint.

use nkips_core::CrossPointState;
use nkips_protocol::Level;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

type Key = (Level, u16);
type Waiters = Vec<oneshot::Sender<CrossPointState>>;

/// Waiters keyed by (level, destination).
///
/// Every waiter registered for a key is resolved by the first change the
/// router reports for that key, whatever its source.
#[derive(Debug, Default)]
pub struct PendingTable {
    waiters: Mutex<HashMap<Key, Waiters>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for the next change of `destination` on `level`.
    pub fn register(&self, level: Level, destination: u16) -> Confirmation<'_> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .entry((level, destination))
            .or_default()
            .push(tx);
        Confirmation {
            table: self,
            key: (level, destination),
            rx,
        }
    }

    /// Resolves every waiter of the key. Returns how many were still
    /// listening.
    pub fn resolve(&self, level: Level, destination: u16, state: &CrossPointState) -> usize {
        let Some(waiters) = self.waiters.lock().remove(&(level, destination)) else {
            return 0;
        };

        waiters
            .into_iter()
            .filter_map(|waiter| waiter.send(state.clone()).ok())
            .count()
    }

    /// Drops every waiter; their receivers see a closed channel.
    pub fn clear(&self) {
        self.waiters.lock().clear();
    }

    /// Number of keys with at least one registered waiter.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes closed waiters of a key, and the key once it has none.
    fn prune(&self, key: Key) {
        let mut waiters = self.waiters.lock();
        if let Some(entry) = waiters.get_mut(&key) {
            entry.retain(|waiter| !waiter.is_closed());
            if entry.is_empty() {
                waiters.remove(&key);
            }
        }
    }
}

/// A registered waiter. Dropping it before it resolves unregisters it.
#[derive(Debug)]
pub struct Confirmation<'a> {
    table: &'a PendingTable,
    key: Key,
    rx: oneshot::Receiver<CrossPointState>,
}

impl Confirmation<'_> {
    /// Waits for the router to report the key.
    pub async fn wait(&mut self) -> Result<CrossPointState, oneshot::error::RecvError> {
        (&mut self.rx).await
    }
}

impl Drop for Confirmation<'_> {
    fn drop(&mut self) {
        self.rx.close();
        self.table.prune(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nkips_core::{LabelStore, RoutingMatrix};

    fn view(destination: u16) -> CrossPointState {
        CrossPointState::compose(&RoutingMatrix::new(8, 8, 1), &LabelStore::new(), destination)
    }

    #[tokio::test]
    async fn test_all_waiters_of_a_key_resolve_together() {
        let table = PendingTable::new();
        let mut first = table.register(Level::MdVideo, 3);
        let mut second = table.register(Level::MdVideo, 3);
        let other = table.register(Level::SdiVideo, 3);

        assert_eq!(table.resolve(Level::MdVideo, 3, &view(3)), 2);
        assert_eq!(first.wait().await.unwrap().id, 3);
        assert_eq!(second.wait().await.unwrap().id, 3);

        assert_eq!(table.len(), 1);
        drop(other);
        assert!(table.is_empty());
    }

    #[test]
    fn test_resolve_without_waiters() {
        let table = PendingTable::new();
        assert_eq!(table.resolve(Level::MdVideo, 1, &view(1)), 0);
    }

    #[test]
    fn test_dropped_waiters_unregister() {
        let table = PendingTable::new();
        drop(table.register(Level::MdVideo, 2));
        assert!(table.is_empty());

        let live = table.register(Level::MdVideo, 2);
        let gone = table.register(Level::MdVideo, 2);
        drop(gone);
        assert_eq!(table.waiters.lock()[&(Level::MdVideo, 2)].len(), 1);

        assert_eq!(table.resolve(Level::MdVideo, 2, &view(2)), 1);
        drop(live);
        assert!(table.is_empty());
    }

    #[test]
    fn test_unresolved_waiters_leave_no_keys() {
        let table = PendingTable::new();
        for destination in 100..600 {
            let _waiter = table.register(Level::MdVideo, destination);
        }
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_clear_closes_receivers() {
        let table = PendingTable::new();
        let mut waiter = table.register(Level::AesAudio1, 5);
        table.clear();
        assert!(waiter.wait().await.is_err());
    }
}
