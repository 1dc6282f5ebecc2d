//! Raw platform callback events and the per-peripheral event bus.

use async_broadcast::{InactiveReceiver, Receiver, Sender, TrySendError};
use futures_core::Stream;
use futures_lite::StreamExt;
use uuid::Uuid;

use crate::error::PlatformError;

/// A characteristic reported by a characteristic discovery callback.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub is_notifying: bool,
}

impl DiscoveredCharacteristic {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            is_notifying: false,
        }
    }
}

/// A callback from the platform BLE stack, tagged with the identity needed to match
/// it against the operation waiting for it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RawEvent {
    ServicesDiscovered {
        services: Vec<Uuid>,
        error: Option<PlatformError>,
    },
    CharacteristicsDiscovered {
        service: Uuid,
        characteristics: Vec<DiscoveredCharacteristic>,
        error: Option<PlatformError>,
    },
    ValueUpdated {
        service: Uuid,
        characteristic: Uuid,
        value: Option<Vec<u8>>,
        error: Option<PlatformError>,
    },
    ValueWritten {
        service: Uuid,
        characteristic: Uuid,
        error: Option<PlatformError>,
    },
    NotifyStateChanged {
        service: Uuid,
        characteristic: Uuid,
        is_notifying: bool,
        error: Option<PlatformError>,
    },
    RssiRead {
        rssi: i16,
        error: Option<PlatformError>,
    },
    NameChanged {
        name: Option<String>,
    },
    ServicesInvalidated {
        services: Vec<Uuid>,
    },
    /// The transport can queue writes without response again.
    ReadyToSendWriteWithoutResponse,
    /// The connection-lifecycle collaborator tore the connection down.
    Disconnected {
        error: Option<PlatformError>,
    },
}

impl RawEvent {
    /// The error carried by this event, if any.
    pub fn error(&self) -> Option<&PlatformError> {
        match self {
            Self::ServicesDiscovered { error, .. }
            | Self::CharacteristicsDiscovered { error, .. }
            | Self::ValueUpdated { error, .. }
            | Self::ValueWritten { error, .. }
            | Self::NotifyStateChanged { error, .. }
            | Self::RssiRead { error, .. }
            | Self::Disconnected { error } => error.as_ref(),
            Self::NameChanged { .. }
            | Self::ServicesInvalidated { .. }
            | Self::ReadyToSendWriteWithoutResponse => None,
        }
    }

    /// The `(service, characteristic)` pair this event refers to, if it refers to one.
    pub fn characteristic(&self) -> Option<(Uuid, Uuid)> {
        match self {
            Self::ValueUpdated {
                service,
                characteristic,
                ..
            }
            | Self::ValueWritten {
                service,
                characteristic,
                ..
            }
            | Self::NotifyStateChanged {
                service,
                characteristic,
                ..
            } => Some((*service, *characteristic)),
            _ => None,
        }
    }
}

/// Multicast, replay-free stream of [RawEvent]s for one peripheral.
///
/// Subscribers only see events published after they subscribed. Error events flow
/// through like any other event and never close the bus.
pub(crate) struct EventBus {
    sender: Sender<RawEvent>,
    #[allow(unused)]
    sender_keeper: InactiveReceiver<RawEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity);
        sender.set_overflow(true);
        sender.set_await_active(false);
        Self {
            sender,
            sender_keeper: receiver.deactivate(),
        }
    }

    /// Broadcasts `event` to all current subscribers. Never blocks.
    pub fn publish(&self, event: RawEvent) {
        match self.sender.try_broadcast(event) {
            Ok(Some(dropped)) => {
                log::warn!("event bus overflowed, dropped {dropped:?}");
            }
            Ok(None) | Err(TrySendError::Inactive(_)) => (),
            Err(TrySendError::Closed(ev)) => log::trace!("event bus closed, dropped {ev:?}"),
            Err(TrySendError::Full(_)) => (),
        }
    }

    /// All events published from now on, until the bus is closed.
    pub fn subscribe(&self) -> Receiver<RawEvent> {
        self.sender.new_receiver()
    }

    /// Events published from now on for which `predicate` returns true.
    pub fn subscribe_filtered<F>(&self, predicate: F) -> impl Stream<Item = RawEvent> + Send + Unpin
    where
        F: FnMut(&RawEvent) -> bool + Send + Unpin + 'static,
    {
        self.subscribe().filter(predicate)
    }

    /// Ends all subscriptions once they drained the events already delivered.
    pub fn close(&self) {
        self.sender.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::block_on;

    fn written(characteristic: Uuid) -> RawEvent {
        RawEvent::ValueWritten {
            service: Uuid::nil(),
            characteristic,
            error: None,
        }
    }

    #[test]
    fn late_subscriber_misses_prior_events() {
        let bus = EventBus::new(8);
        bus.publish(written(Uuid::from_u128(1)));
        let receiver = bus.subscribe();
        bus.publish(written(Uuid::from_u128(2)));
        bus.close();
        let events: Vec<_> = block_on(receiver.collect());
        assert_eq!(events, vec![written(Uuid::from_u128(2))]);
    }

    #[test]
    fn filtered_subscription_keeps_order_and_error_events() {
        let bus = EventBus::new(8);
        let target = Uuid::from_u128(7);
        let stream = bus.subscribe_filtered(move |ev| {
            ev.characteristic().map(|(_, c)| c) == Some(target)
        });
        bus.publish(written(Uuid::from_u128(1)));
        bus.publish(RawEvent::ValueWritten {
            service: Uuid::nil(),
            characteristic: target,
            error: Some("busy".into()),
        });
        bus.publish(written(target));
        bus.close();
        let events: Vec<_> = block_on(stream.collect());
        assert_eq!(events.len(), 2);
        assert!(events[0].error().is_some());
        assert_eq!(events[1], written(target));
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(1);
        bus.publish(RawEvent::ReadyToSendWriteWithoutResponse);
        bus.publish(RawEvent::ReadyToSendWriteWithoutResponse);
        let receiver = bus.subscribe();
        bus.publish(RawEvent::NameChanged { name: None });
        bus.close();
        let events: Vec<_> = block_on(receiver.collect());
        assert_eq!(events, vec![RawEvent::NameChanged { name: None }]);
    }
}
