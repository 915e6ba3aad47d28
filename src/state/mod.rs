//! Observable state containers.
//!
//! The session and scanner publish their state through `StateCell`s; the UI
//! layer reads and subscribes but never writes.

use tokio::sync::watch;

/// A single observable value with replay-latest semantics.
///
/// Late subscribers read the current value immediately via `borrow()` on the
/// receiver; `changed().await` wakes on every later `set`. Writes go through
/// even when nobody is subscribed. Clones share the same underlying value.
#[derive(Clone)]
pub struct StateCell<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> StateCell<T> {
    /// Create a cell holding `initial`.
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the current value and notify subscribers.
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Mutate the current value in place and notify subscribers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    /// Subscribe to the cell. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_without_subscribers() {
        let cell = StateCell::new(0u32);
        cell.set(7);
        assert_eq!(cell.get(), 7);
    }

    #[test]
    fn test_late_subscriber_sees_latest() {
        let cell = StateCell::new("old".to_string());
        cell.set("new".to_string());

        let rx = cell.subscribe();
        assert_eq!(*rx.borrow(), "new");
    }

    #[test]
    fn test_update_in_place() {
        let cell = StateCell::new(vec![1, 2]);
        cell.update(|v| v.push(3));
        assert_eq!(cell.get(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_subscriber_wakes_on_change() {
        let cell = StateCell::new(0u32);
        let mut rx = cell.subscribe();

        cell.set(42);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 42);
    }
}
