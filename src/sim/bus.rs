//! Same-instant publish/subscribe, distinct from the delayed scheduler
//! channel. Subscribers are plain addresses; the firing site resolves them
//! and calls each handler synchronously, so no callbacks are captured.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
pub struct Bus<K, S> {
    listeners: HashMap<K, Vec<S>>,
}

impl<K: Eq + Hash, S: Copy> Bus<K, S> {
    pub fn new() -> Bus<K, S> {
        Bus { listeners: HashMap::new() }
    }

    pub fn add_listener(&mut self, kind: K, subscriber: S) {
        self.listeners.entry(kind).or_insert_with(Vec::new).push(subscriber);
    }

    /// Registration-order snapshot of the subscribers for `kind`.
    pub fn targets(&self, kind: K) -> Vec<S> {
        self.listeners.get(&kind).cloned().unwrap_or_default()
    }
}

impl<K: Eq + Hash, S: Copy> Default for Bus<K, S> {
    fn default() -> Self {
        Bus::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_keep_registration_order() {
        let mut bus: Bus<u8, usize> = Bus::new();
        bus.add_listener(0, 2);
        bus.add_listener(0, 0);
        bus.add_listener(1, 1);
        assert_eq!(bus.targets(0), vec![2, 0]);
        assert_eq!(bus.targets(1), vec![1]);
        assert!(bus.targets(7).is_empty());
    }
}
