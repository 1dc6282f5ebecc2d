//! Correlates platform callbacks with the operations waiting for them.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_lock::Mutex;
use uuid::Uuid;

use crate::async_util::with_timeout;
use crate::error::{Error, ErrorKind};
use crate::{RawEvent, Result};

/// Identifies what a pending operation is waiting for.
///
/// The platform callbacks carry no request identifier, so operations waiting under
/// the same key are resolved in the order they were registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKey {
    DiscoverServices,
    DiscoverCharacteristics(Uuid),
    ReadValue(Uuid, Uuid),
    WriteValue(Uuid, Uuid),
    NotifyState(Uuid, Uuid),
    ReadRssi,
    ReadyToSend,
}

impl OperationKey {
    /// The service an operation under this key depends on, if any.
    pub fn service(&self) -> Option<Uuid> {
        match self {
            Self::DiscoverCharacteristics(service)
            | Self::ReadValue(service, _)
            | Self::WriteValue(service, _)
            | Self::NotifyState(service, _) => Some(*service),
            Self::DiscoverServices | Self::ReadRssi | Self::ReadyToSend => None,
        }
    }

    /// The key of the operation that `event` completes, if any.
    pub fn for_event(event: &RawEvent) -> Option<Self> {
        Some(match event {
            RawEvent::ServicesDiscovered { .. } => Self::DiscoverServices,
            RawEvent::CharacteristicsDiscovered { service, .. } => {
                Self::DiscoverCharacteristics(*service)
            }
            RawEvent::ValueUpdated {
                service,
                characteristic,
                ..
            } => Self::ReadValue(*service, *characteristic),
            RawEvent::ValueWritten {
                service,
                characteristic,
                ..
            } => Self::WriteValue(*service, *characteristic),
            RawEvent::NotifyStateChanged {
                service,
                characteristic,
                ..
            } => Self::NotifyState(*service, *characteristic),
            RawEvent::RssiRead { .. } => Self::ReadRssi,
            RawEvent::ReadyToSendWriteWithoutResponse => Self::ReadyToSend,
            RawEvent::NameChanged { .. }
            | RawEvent::ServicesInvalidated { .. }
            | RawEvent::Disconnected { .. } => return None,
        })
    }
}

struct Slot {
    id: u64,
    sender: Sender<Result<RawEvent>>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    slots: HashMap<OperationKey, VecDeque<Slot>>,
    closed: bool,
}

impl RegistryInner {
    fn remove(&mut self, key: &OperationKey, id: u64) -> bool {
        let Some(queue) = self.slots.get_mut(key) else {
            return false;
        };
        let len_before = queue.len();
        queue.retain(|slot| slot.id != id);
        let removed = queue.len() != len_before;
        if queue.is_empty() {
            self.slots.remove(key);
        }
        removed
    }
}

/// Map from [OperationKey] to the single-assignment result slots waiting under it.
pub(crate) struct PendingRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    timeout: Option<Duration>,
}

impl PendingRegistry {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            timeout,
        }
    }

    /// Registers a slot under `key`. Call this *before* issuing the platform call that
    /// produces the awaited callback.
    ///
    /// If the registry was closed by [PendingRegistry::fail_all], the returned slot is
    /// already failed with [ErrorKind::PeripheralDisconnected].
    pub fn register(&self, key: OperationKey) -> Pending {
        let (sender, receiver) = async_channel::bounded(1);
        let mut inner = self.inner.lock_blocking();
        let id = inner.next_id;
        inner.next_id += 1;
        if inner.closed {
            let _ = sender.try_send(Err(ErrorKind::PeripheralDisconnected.into()));
        } else {
            inner
                .slots
                .entry(key)
                .or_default()
                .push_back(Slot { id, sender });
        }
        Pending {
            key,
            id,
            receiver,
            registry: Arc::downgrade(&self.inner),
            timeout: self.timeout,
        }
    }

    /// Resolves the oldest slot waiting under `key`, removing it. Returns `false` if
    /// nothing was waiting.
    pub fn resolve(&self, key: &OperationKey, result: Result<RawEvent>) -> bool {
        let slot = {
            let mut inner = self.inner.lock_blocking();
            let Some(queue) = inner.slots.get_mut(key) else {
                return false;
            };
            let slot = queue.pop_front();
            if queue.is_empty() {
                inner.slots.remove(key);
            }
            slot
        };
        match slot {
            Some(slot) => {
                // the receiver may be gone if the waiter was dropped concurrently.
                let _ = slot.sender.try_send(result);
                true
            }
            None => false,
        }
    }

    /// Resolves every slot waiting under `key` with a clone of `event`. Returns how
    /// many were waiting.
    pub fn resolve_all(&self, key: &OperationKey, event: &RawEvent) -> usize {
        let queue = self.inner.lock_blocking().slots.remove(key);
        let slots = queue.unwrap_or_default();
        let count = slots.len();
        for slot in slots {
            let _ = slot.sender.try_send(Ok(event.clone()));
        }
        count
    }

    /// Fails the slots whose key matches `pred` with the error built by `err`,
    /// leaving the registry open.
    pub fn fail_matching(
        &self,
        mut pred: impl FnMut(&OperationKey) -> bool,
        err: impl Fn() -> Error,
    ) -> usize {
        let slots: Vec<Slot> = {
            let mut inner = self.inner.lock_blocking();
            let keys: Vec<OperationKey> = inner.slots.keys().copied().filter(|k| pred(k)).collect();
            keys.iter()
                .filter_map(|key| inner.slots.remove(key))
                .flatten()
                .collect()
        };
        for slot in &slots {
            let _ = slot.sender.try_send(Err(err()));
        }
        slots.len()
    }

    /// Fails every waiting slot with `kind` and refuses new registrations.
    pub fn fail_all(&self, kind: ErrorKind) -> usize {
        let slots = {
            let mut inner = self.inner.lock_blocking();
            inner.closed = true;
            std::mem::take(&mut inner.slots)
        };
        let mut count = 0;
        for slot in slots.into_values().flatten() {
            let _ = slot.sender.try_send(Err(kind.into()));
            count += 1;
        }
        count
    }

    /// Removes every waiting slot; their waiters fail with [ErrorKind::OperationCancelled].
    pub fn cancel_all(&self) -> usize {
        let slots = std::mem::take(&mut self.inner.lock_blocking().slots);
        slots.into_values().map(|queue| queue.len()).sum()
    }

    /// Keys of all waiting slots, one entry per slot.
    pub fn pending_keys(&self) -> Vec<OperationKey> {
        let inner = self.inner.lock_blocking();
        inner
            .slots
            .iter()
            .flat_map(|(key, queue)| std::iter::repeat(*key).take(queue.len()))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_blocking().closed
    }
}

/// A registered slot, owned by the task waiting for it.
///
/// Dropping it before it resolves is a cancellation: the registry entry is removed so
/// that a later callback is not consumed on behalf of a waiter that is gone.
pub(crate) struct Pending {
    key: OperationKey,
    id: u64,
    receiver: Receiver<Result<RawEvent>>,
    registry: Weak<Mutex<RegistryInner>>,
    timeout: Option<Duration>,
}

impl Pending {
    pub fn key(&self) -> OperationKey {
        self.key
    }

    /// Waits for the slot to be resolved.
    pub async fn wait(self) -> Result<RawEvent> {
        match with_timeout(self.receiver.recv(), self.timeout).await {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(ErrorKind::OperationCancelled.into()),
            None => {
                log::debug!("{:?} timed out", self.key());
                Err(ErrorKind::Timeout.into())
            }
        }
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.lock_blocking().remove(&self.key, self.id) {
                log::trace!("pending {:?} withdrawn", self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::{block_on, poll_once};

    fn rssi(rssi: i16) -> RawEvent {
        RawEvent::RssiRead { rssi, error: None }
    }

    #[test]
    fn first_registered_slot_is_resolved_first() {
        let registry = PendingRegistry::new(None);
        let first = registry.register(OperationKey::ReadRssi);
        let second = registry.register(OperationKey::ReadRssi);
        assert!(registry.resolve(&OperationKey::ReadRssi, Ok(rssi(-40))));
        assert_eq!(registry.pending_keys(), vec![OperationKey::ReadRssi]);
        assert!(registry.resolve(&OperationKey::ReadRssi, Ok(rssi(-50))));
        assert!(!registry.resolve(&OperationKey::ReadRssi, Ok(rssi(-60))));
        assert_eq!(block_on(first.wait()).unwrap(), rssi(-40));
        assert_eq!(block_on(second.wait()).unwrap(), rssi(-50));
    }

    #[test]
    fn slots_under_other_keys_are_untouched() {
        let registry = PendingRegistry::new(None);
        let a = Uuid::from_u128(0xa);
        let b = Uuid::from_u128(0xb);
        let _read_a = registry.register(OperationKey::ReadValue(a, a));
        let _read_b = registry.register(OperationKey::ReadValue(b, b));
        assert!(registry.resolve(&OperationKey::ReadValue(b, b), Ok(rssi(0))));
        assert_eq!(registry.pending_keys(), vec![OperationKey::ReadValue(a, a)]);
    }

    #[test]
    fn dropping_a_waiter_removes_its_entry() {
        let registry = PendingRegistry::new(None);
        let pending = registry.register(OperationKey::ReadRssi);
        let mut fut = Box::pin(pending.wait());
        assert!(block_on(poll_once(&mut fut)).is_none());
        assert_eq!(registry.pending_keys().len(), 1);
        drop(fut);
        assert!(registry.pending_keys().is_empty());
        assert!(!registry.resolve(&OperationKey::ReadRssi, Ok(rssi(-1))));
    }

    #[test]
    fn fail_all_resolves_everything_once_and_closes() {
        let registry = PendingRegistry::new(None);
        let waiters: Vec<_> = (0..3)
            .map(|i| registry.register(OperationKey::DiscoverCharacteristics(Uuid::from_u128(i))))
            .collect();
        assert_eq!(registry.fail_all(ErrorKind::PeripheralDisconnected), 3);
        assert!(registry.is_closed());
        for waiter in waiters {
            let err = block_on(waiter.wait()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PeripheralDisconnected);
        }
        let late = registry.register(OperationKey::ReadRssi);
        assert!(registry.pending_keys().is_empty());
        assert_eq!(
            block_on(late.wait()).unwrap_err().kind(),
            ErrorKind::PeripheralDisconnected
        );
    }

    #[test]
    fn cancel_all_fails_waiters_with_cancelled() {
        let registry = PendingRegistry::new(None);
        let pending = registry.register(OperationKey::ReadyToSend);
        assert_eq!(pending.key(), OperationKey::ReadyToSend);
        assert_eq!(registry.cancel_all(), 1);
        let err = block_on(pending.wait()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationCancelled);
        assert!(!registry.is_closed());
    }

    #[test]
    fn resolve_all_wakes_every_waiter_under_the_key() {
        let registry = PendingRegistry::new(None);
        let first = registry.register(OperationKey::ReadyToSend);
        let second = registry.register(OperationKey::ReadyToSend);
        let _rssi = registry.register(OperationKey::ReadRssi);
        let ready = RawEvent::ReadyToSendWriteWithoutResponse;
        assert_eq!(registry.resolve_all(&OperationKey::ReadyToSend, &ready), 2);
        assert_eq!(registry.pending_keys(), vec![OperationKey::ReadRssi]);
        assert_eq!(block_on(first.wait()).unwrap(), ready);
        assert_eq!(block_on(second.wait()).unwrap(), ready);
        assert_eq!(registry.resolve_all(&OperationKey::ReadyToSend, &ready), 0);
    }

    #[test]
    fn fail_matching_only_fails_selected_keys() {
        let registry = PendingRegistry::new(None);
        let gone = Uuid::from_u128(0xa);
        let kept = Uuid::from_u128(0xb);
        let read = registry.register(OperationKey::ReadValue(gone, gone));
        let notify = registry.register(OperationKey::NotifyState(gone, kept));
        let _other = registry.register(OperationKey::ReadValue(kept, kept));
        let _rssi = registry.register(OperationKey::ReadRssi);
        let failed = registry.fail_matching(
            |key| key.service() == Some(gone),
            || ErrorKind::ServiceNotFound.into(),
        );
        assert_eq!(failed, 2);
        assert_eq!(registry.pending_keys().len(), 2);
        assert!(!registry.is_closed());
        for waiter in [read, notify] {
            let err = block_on(waiter.wait()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ServiceNotFound);
        }
    }

    #[test]
    fn timeout_removes_the_slot() {
        let registry = PendingRegistry::new(Some(Duration::from_millis(10)));
        let pending = registry.register(OperationKey::ReadRssi);
        let err = block_on(pending.wait()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(registry.pending_keys().is_empty());
    }
}
