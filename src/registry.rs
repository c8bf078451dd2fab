//! Simultaneously open connections addressable by 1-based index or alias.
//!
//! Indices are handed out monotonically and never reused until [`ConnectionRegistry::close_all`]
//! resets the counter, so an index captured before opening or closing other
//! connections keeps pointing at the same session.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;

use crate::error::{CloseFailure, DriverError, SqlSessionError};

/// The capability the registry needs from what it stores.
#[async_trait]
pub trait ManagedConnection: Send + Sync {
    async fn close(&self) -> Result<(), DriverError>;
}

/// Switch target: a connection index or the alias given at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionKey {
    Index(usize),
    Alias(String),
}

impl From<usize> for ConnectionKey {
    fn from(index: usize) -> Self {
        ConnectionKey::Index(index)
    }
}

impl From<&str> for ConnectionKey {
    fn from(alias: &str) -> Self {
        ConnectionKey::Alias(alias.to_string())
    }
}

impl From<String> for ConnectionKey {
    fn from(alias: String) -> Self {
        ConnectionKey::Alias(alias)
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKey::Index(index) => write!(f, "{index}"),
            ConnectionKey::Alias(alias) => f.write_str(alias),
        }
    }
}

const LEASE_OPEN: u8 = 0;
const LEASE_RELEASED: u8 = 1;
const LEASE_REVOKED: u8 = 2;

/// Claim a lazily consumed result holds on its connection.
///
/// Revoked when the registry switches away from or closes that connection.
#[derive(Debug, Clone)]
pub struct StreamLease {
    index: usize,
    state: Arc<AtomicU8>,
}

impl StreamLease {
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.state.load(Ordering::Acquire) == LEASE_REVOKED
    }

    /// Give the lease back once the stream is drained or closed.
    pub fn release(&self) {
        let _ = self.state.compare_exchange(
            LEASE_OPEN,
            LEASE_RELEASED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn revoke(&self) {
        if self
            .state
            .compare_exchange(LEASE_OPEN, LEASE_REVOKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(index = self.index, "revoked open result stream");
        }
    }

    fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == LEASE_OPEN
    }
}

struct Slot<H> {
    handle: H,
    alias: Option<String>,
    leases: Vec<StreamLease>,
}

impl<H> Slot<H> {
    fn revoke_leases(&mut self) {
        for lease in self.leases.drain(..) {
            lease.revoke();
        }
    }
}

pub struct ConnectionRegistry<H> {
    slots: BTreeMap<usize, Slot<H>>,
    aliases: HashMap<String, usize>,
    last_index: usize,
    current: Option<usize>,
}

impl<H> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
            aliases: HashMap::new(),
            last_index: 0,
            current: None,
        }
    }
}

impl<H: ManagedConnection> ConnectionRegistry<H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns `DuplicateAlias` when the alias already names a live connection.
    pub fn ensure_alias_free(&self, alias: Option<&str>) -> Result<(), SqlSessionError> {
        match alias {
            Some(alias) if self.aliases.contains_key(alias) => {
                Err(SqlSessionError::DuplicateAlias(alias.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Store `handle` under the next index and make it current.
    ///
    /// # Errors
    /// Returns `DuplicateAlias` when the alias is taken; the handle is not stored.
    pub fn register(&mut self, handle: H, alias: Option<&str>) -> Result<usize, SqlSessionError> {
        self.ensure_alias_free(alias)?;
        self.revoke_current_leases();
        self.last_index += 1;
        let index = self.last_index;
        if let Some(alias) = alias {
            self.aliases.insert(alias.to_string(), index);
        }
        self.slots.insert(
            index,
            Slot {
                handle,
                alias: alias.map(str::to_string),
                leases: Vec::new(),
            },
        );
        self.current = Some(index);
        Ok(index)
    }

    /// Make another connection current and return the index that was current before.
    ///
    /// # Errors
    /// Returns `UnknownConnection` when neither a live index nor an alias matches.
    pub fn switch(&mut self, key: &ConnectionKey) -> Result<Option<usize>, SqlSessionError> {
        let target = self.resolve(key)?;
        let previous = self.current;
        if previous != Some(target) {
            self.revoke_current_leases();
            self.current = Some(target);
        }
        Ok(previous)
    }

    /// Put back an index previously returned by [`switch`](Self::switch).
    ///
    /// `None` leaves the registry without a current connection. An index that has been
    /// closed in the meantime is reported as unknown.
    ///
    /// # Errors
    /// Returns `UnknownConnection` when `previous` is no longer live.
    pub fn restore(&mut self, previous: Option<usize>) -> Result<(), SqlSessionError> {
        match previous {
            Some(index) => self.switch(&ConnectionKey::Index(index)).map(|_| ()),
            None => {
                self.revoke_current_leases();
                self.current = None;
                Ok(())
            }
        }
    }

    fn resolve(&self, key: &ConnectionKey) -> Result<usize, SqlSessionError> {
        let index = match key {
            ConnectionKey::Index(index) => Some(*index),
            ConnectionKey::Alias(alias) => self
                .aliases
                .get(alias)
                .copied()
                .or_else(|| alias.trim().parse::<usize>().ok()),
        };
        index
            .filter(|index| self.slots.contains_key(index))
            .ok_or_else(|| SqlSessionError::UnknownConnection(key.to_string()))
    }

    /// # Errors
    /// Returns `NoActiveConnection` when nothing is current.
    pub fn current(&self) -> Result<(usize, &H), SqlSessionError> {
        self.current
            .and_then(|index| self.slots.get(&index).map(|slot| (index, &slot.handle)))
            .ok_or(SqlSessionError::NoActiveConnection)
    }

    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Hand out a lease on the current connection for a lazily consumed result.
    ///
    /// # Errors
    /// Returns `NoActiveConnection` when nothing is current.
    pub fn issue_lease(&mut self) -> Result<StreamLease, SqlSessionError> {
        let index = self.current.ok_or(SqlSessionError::NoActiveConnection)?;
        let slot = self
            .slots
            .get_mut(&index)
            .ok_or(SqlSessionError::NoActiveConnection)?;
        slot.leases.retain(StreamLease::is_open);
        let lease = StreamLease {
            index,
            state: Arc::new(AtomicU8::new(LEASE_OPEN)),
        };
        slot.leases.push(lease.clone());
        Ok(lease)
    }

    fn revoke_current_leases(&mut self) {
        if let Some(slot) = self.current.and_then(|index| self.slots.get_mut(&index)) {
            slot.revoke_leases();
        }
    }

    /// Close the current connection; other entries keep their indices.
    ///
    /// # Errors
    /// Returns `NoActiveConnection` when nothing is current, or `CloseFailed` when the
    /// driver refuses to close. The entry is removed either way.
    pub async fn close_current(&mut self) -> Result<(), SqlSessionError> {
        let index = self.current.ok_or(SqlSessionError::NoActiveConnection)?;
        let mut slot = self
            .slots
            .remove(&index)
            .ok_or(SqlSessionError::NoActiveConnection)?;
        self.current = None;
        if let Some(alias) = slot.alias.as_deref() {
            self.aliases.remove(alias);
        }
        slot.revoke_leases();
        slot.handle.close().await.map_err(|error| {
            tracing::warn!(index, "failed to close connection: {error}");
            SqlSessionError::CloseFailed(vec![CloseFailure { index, error }])
        })
    }

    /// Close every connection and reset numbering so the next one is index 1.
    ///
    /// Every close is attempted; failures are logged and returned together.
    ///
    /// # Errors
    /// Returns `CloseFailed` listing every connection that failed to close.
    pub async fn close_all(&mut self) -> Result<(), SqlSessionError> {
        let slots = std::mem::take(&mut self.slots);
        self.aliases.clear();
        self.last_index = 0;
        self.current = None;

        let mut failures = Vec::new();
        for (index, mut slot) in slots {
            slot.revoke_leases();
            if let Err(error) = slot.handle.close().await {
                tracing::warn!(index, "failed to close connection: {error}");
                failures.push(CloseFailure { index, error });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SqlSessionError::CloseFailed(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    #[derive(Default)]
    struct FakeHandle {
        closed: Arc<AtomicBool>,
        fail_close: bool,
    }

    #[async_trait]
    impl ManagedConnection for FakeHandle {
        async fn close(&self) -> Result<(), DriverError> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                Err(DriverError::Database("close refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn registry_with(n: usize) -> ConnectionRegistry<FakeHandle> {
        let mut registry = ConnectionRegistry::new();
        for _ in 0..n {
            registry.register(FakeHandle::default(), None).unwrap();
        }
        registry
    }

    #[test]
    fn indices_are_sequential_from_one() {
        let mut registry = ConnectionRegistry::new();
        let indices: Vec<usize> = (0..4)
            .map(|_| registry.register(FakeHandle::default(), None).unwrap())
            .collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert_eq!(registry.current_index(), Some(4));
    }

    #[tokio::test]
    async fn close_all_restarts_numbering() {
        let mut registry = registry_with(3);
        registry.close_all().await.unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.current(),
            Err(SqlSessionError::NoActiveConnection)
        ));
        assert_eq!(registry.register(FakeHandle::default(), None).unwrap(), 1);
    }

    #[test]
    fn switch_returns_previous_and_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        registry.register(FakeHandle::default(), Some("bis")).unwrap();
        registry
            .register(FakeHandle::default(), Some("bis_dcs"))
            .unwrap();

        assert_eq!(registry.switch(&"bis".into()).unwrap(), Some(2));
        assert_eq!(registry.switch(&"bis".into()).unwrap(), Some(1));
        assert_eq!(registry.current_index(), Some(1));
        assert_eq!(registry.switch(&ConnectionKey::Index(2)).unwrap(), Some(1));
        assert_eq!(registry.switch(&"1".into()).unwrap(), Some(2));
    }

    #[test]
    fn switch_to_unknown_target_fails() {
        let mut registry = registry_with(2);
        assert!(matches!(
            registry.switch(&"nope".into()),
            Err(SqlSessionError::UnknownConnection(key)) if key == "nope"
        ));
        assert!(matches!(
            registry.switch(&ConnectionKey::Index(3)),
            Err(SqlSessionError::UnknownConnection(_))
        ));
        assert!(matches!(
            registry.switch(&ConnectionKey::Index(0)),
            Err(SqlSessionError::UnknownConnection(_))
        ));
        assert_eq!(registry.current_index(), Some(2));
    }

    #[test]
    fn duplicate_alias_is_rejected() {
        let mut registry = ConnectionRegistry::new();
        registry.register(FakeHandle::default(), Some("a")).unwrap();
        assert!(matches!(
            registry.register(FakeHandle::default(), Some("a")),
            Err(SqlSessionError::DuplicateAlias(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn close_current_keeps_other_indices() {
        let mut registry = registry_with(3);
        registry.switch(&ConnectionKey::Index(2)).unwrap();
        registry.close_current().await.unwrap();
        assert_eq!(registry.current_index(), None);
        assert!(registry.switch(&ConnectionKey::Index(2)).is_err());
        assert_eq!(registry.switch(&ConnectionKey::Index(3)).unwrap(), None);
        assert_eq!(registry.register(FakeHandle::default(), None).unwrap(), 4);
    }

    #[tokio::test]
    async fn close_all_attempts_every_handle() {
        let mut registry = ConnectionRegistry::new();
        let flags: Vec<Arc<AtomicBool>> = (0..3).map(|_| Arc::new(AtomicBool::new(false))).collect();
        for (i, flag) in flags.iter().enumerate() {
            let handle = FakeHandle {
                closed: Arc::clone(flag),
                fail_close: i == 0,
            };
            registry.register(handle, None).unwrap();
        }
        match registry.close_all().await {
            Err(SqlSessionError::CloseFailed(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
            }
            other => panic!("expected CloseFailed, got {other:?}"),
        }
        assert!(flags.iter().all(|flag| flag.load(Ordering::SeqCst)));
        assert!(registry.is_empty());
    }

    #[test]
    fn switching_away_revokes_leases() {
        let mut registry = registry_with(2);
        let lease = registry.issue_lease().unwrap();
        assert_eq!(lease.index(), 2);
        registry.switch(&ConnectionKey::Index(2)).unwrap();
        assert!(!lease.is_revoked());
        registry.switch(&ConnectionKey::Index(1)).unwrap();
        assert!(lease.is_revoked());

        let released = registry.issue_lease().unwrap();
        released.release();
        registry.switch(&ConnectionKey::Index(2)).unwrap();
        assert!(!released.is_revoked());
    }
}
