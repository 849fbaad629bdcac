//! Registry of attached boards.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{Error, Result};

/// Opaque identifier of an attached board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Creates an identifier from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Identifier of the USB device at `address` on `bus`.
    pub const fn usb(bus: u8, address: u8) -> Self {
        Self(((bus as u64) << 8) | address as u64)
    }

    /// Raw value.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:03}-{:03}", self.0 >> 8, self.0 & 0xff)
    }
}

/// Boards attached to this host, keyed by [`DeviceId`].
///
/// A board is inserted when it attaches and removed when it detaches.
pub struct Registry<D> {
    boards: Mutex<HashMap<DeviceId, Arc<D>>>,
}

impl<D> fmt::Debug for Registry<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Registry").field("boards", &self.ids()).finish()
    }
}

impl<D> Default for Registry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Registry<D> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { boards: Mutex::new(HashMap::new()) }
    }

    fn boards(&self) -> MutexGuard<'_, HashMap<DeviceId, Arc<D>>> {
        self.boards.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an attached board.
    pub fn attach(&self, id: DeviceId, board: D) -> Result<Arc<D>> {
        let mut boards = self.boards();

        if boards.contains_key(&id) {
            return Err(Error::AlreadyAttached(id));
        }

        let board = Arc::new(board);
        boards.insert(id, board.clone());
        tracing::debug!("board {id} attached");

        Ok(board)
    }

    /// Removes a detached board.
    ///
    /// Operations still holding the board complete on their own reference.
    pub fn detach(&self, id: DeviceId) -> Result<Arc<D>> {
        let board = self.boards().remove(&id).ok_or(Error::NotAttached(id))?;
        tracing::debug!("board {id} detached");
        Ok(board)
    }

    /// Resolves an identifier to its board.
    pub fn get(&self, id: DeviceId) -> Result<Arc<D>> {
        self.boards().get(&id).cloned().ok_or(Error::NotAttached(id))
    }

    /// Whether a board with this identifier is attached.
    pub fn contains(&self, id: DeviceId) -> bool {
        self.boards().contains_key(&id)
    }

    /// Identifiers of all attached boards in ascending order.
    pub fn ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.boards().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of attached boards.
    pub fn len(&self) -> usize {
        self.boards().len()
    }

    /// Whether no board is attached.
    pub fn is_empty(&self) -> bool {
        self.boards().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn attach_and_detach() {
        let registry = Registry::new();
        let id = DeviceId::usb(1, 7);

        registry.attach(id, "board").unwrap();
        assert!(registry.contains(id));
        assert_eq!(*registry.get(id).unwrap(), "board");
        assert!(matches!(registry.attach(id, "other"), Err(Error::AlreadyAttached(other)) if other == id));

        assert_eq!(*registry.detach(id).unwrap(), "board");
        assert!(registry.is_empty());
        assert!(matches!(registry.get(id), Err(Error::NotAttached(_))));
        assert!(matches!(registry.detach(id), Err(Error::NotAttached(_))));
    }

    #[test]
    fn ids_are_sorted() {
        let registry = Registry::new();
        registry.attach(DeviceId::usb(2, 1), ()).unwrap();
        registry.attach(DeviceId::usb(1, 9), ()).unwrap();
        assert_eq!(registry.ids(), vec![DeviceId::usb(1, 9), DeviceId::usb(2, 1)]);
        assert_eq!(DeviceId::usb(1, 9).to_string(), "001-009");
    }
}
