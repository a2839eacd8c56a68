//! Per-socket association store.
//!
//! Lookups happen on every read from the network thread; inserts and removes
//! are rare and may come from worker threads finishing an asynchronous open.
//! A reader/writer lock over a plain map matches that access pattern.
//! Entries are handed out as owned `Arc`s so a removal never invalidates a
//! handle a reader is still holding.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::transport::SocketId;

pub struct SocketMap<T> {
    inner: RwLock<HashMap<SocketId, Arc<T>>>,
}

impl<T> Default for SocketMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SocketMap<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, socket: SocketId) -> Option<Arc<T>> {
        self.inner.read().get(&socket).cloned()
    }

    pub fn contains(&self, socket: SocketId) -> bool {
        self.inner.read().contains_key(&socket)
    }

    /// Insert a fresh value, returning the one it replaced.
    pub fn insert(&self, socket: SocketId, value: T) -> Option<Arc<T>> {
        self.exchange(socket, Arc::new(value))
    }

    /// Swap in `value` and return the previous association.
    pub fn exchange(&self, socket: SocketId, value: Arc<T>) -> Option<Arc<T>> {
        self.inner.write().insert(socket, value)
    }

    pub fn remove(&self, socket: SocketId) -> Option<Arc<T>> {
        self.inner.write().remove(&socket)
    }

    /// Return the existing entry or build and insert one.
    ///
    /// `create` runs without the lock held; if another thread wins the race
    /// its value is kept and ours is dropped.
    pub fn get_or_try_insert_with<E>(
        &self,
        socket: SocketId,
        create: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        if let Some(existing) = self.get(socket) {
            return Ok(existing);
        }

        let fresh = Arc::new(create()?);
        let mut map = self.inner.write();
        Ok(map.entry(socket).or_insert(fresh).clone())
    }

    /// Infallible form of [`SocketMap::get_or_try_insert_with`].
    pub fn get_or_insert_with(&self, socket: SocketId, create: impl FnOnce() -> T) -> Arc<T> {
        if let Some(existing) = self.get(socket) {
            return existing;
        }
        let fresh = Arc::new(create());
        self.inner.write().entry(socket).or_insert(fresh).clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn sockets(&self) -> Vec<SocketId> {
        self.inner.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_returns_previous_entry() {
        let map = SocketMap::new();
        assert!(map.insert(SocketId(1), "first").is_none());

        let previous = map.exchange(SocketId(1), Arc::new("second")).unwrap();
        assert_eq!(*previous, "first");
        assert_eq!(*map.get(SocketId(1)).unwrap(), "second");
    }

    #[test]
    fn get_or_try_insert_keeps_existing() {
        let map = SocketMap::new();
        map.insert(SocketId(7), 1u32);

        let value = map
            .get_or_try_insert_with::<()>(SocketId(7), || Ok(2))
            .unwrap();
        assert_eq!(*value, 1);

        let err = map.get_or_try_insert_with(SocketId(8), || Err("boom"));
        assert_eq!(err.unwrap_err(), "boom");
        assert!(!map.contains(SocketId(8)));
    }
}
