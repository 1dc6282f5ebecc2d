#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_lite::future::{self, FutureExt};
use gatt_engine::{
    BluetoothUuidExt, ConnectionState, DiscoveredCharacteristic, Peripheral, PeripheralConfig,
    PeripheralHandle, PeripheralId, PlatformError, RawEvent, Uuid, WriteType,
};

pub fn s1() -> Uuid {
    Uuid::from_u16(0x180f)
}

pub fn c1() -> Uuid {
    Uuid::from_u16(0x2a19)
}

pub fn c2() -> Uuid {
    Uuid::from_u16(0x2a1a)
}

pub fn s2() -> Uuid {
    Uuid::from_u16(0x1810)
}

/// A platform call as seen by [MockPeripheral].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DiscoverServices(Vec<Uuid>),
    DiscoverCharacteristics(Uuid, Vec<Uuid>),
    ReadValue(Uuid, Uuid),
    WriteValue(Uuid, Uuid, Vec<u8>, WriteType),
    SetNotify(Uuid, Uuid, bool),
    ReadRssi,
}

type Responder = Box<dyn FnMut(&Call) -> Vec<RawEvent> + Send>;

/// Records every platform call and queues the callbacks its responder produces.
/// Callbacks are only delivered when a test pumps them into the peripheral.
pub struct MockPeripheral {
    calls: Mutex<Vec<Call>>,
    outbox: Mutex<VecDeque<RawEvent>>,
    responder: Mutex<Responder>,
    can_send: AtomicBool,
    fail_next: Mutex<Option<PlatformError>>,
}

impl MockPeripheral {
    /// A peripheral with service `s1()` holding `c1()` and `c2()`, answering every
    /// call successfully.
    pub fn new() -> Arc<Self> {
        Self::with_responder(gatt_responder())
    }

    pub fn with_responder(
        responder: impl FnMut(&Call) -> Vec<RawEvent> + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            outbox: Mutex::new(VecDeque::new()),
            responder: Mutex::new(Box::new(responder)),
            can_send: AtomicBool::new(true),
            fail_next: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn push_event(&self, event: RawEvent) {
        self.outbox.lock().unwrap().push_back(event);
    }

    pub fn set_can_send(&self, can_send: bool) {
        self.can_send.store(can_send, Ordering::SeqCst);
    }

    pub fn fail_next_call(&self, err: PlatformError) {
        self.fail_next.lock().unwrap().replace(err);
    }

    /// Delivers all queued callbacks to `peripheral`.
    pub fn flush_into(&self, peripheral: &Peripheral) {
        loop {
            let event = self.outbox.lock().unwrap().pop_front();
            match event {
                Some(event) => peripheral.handle_event(event),
                None => break,
            }
        }
    }

    fn record(&self, call: Call) -> Result<(), PlatformError> {
        if let Some(err) = self.fail_next.lock().unwrap().take() {
            return Err(err);
        }
        let events = {
            let mut responder = self.responder.lock().unwrap();
            (*responder)(&call)
        };
        self.calls.lock().unwrap().push(call);
        self.outbox.lock().unwrap().extend(events);
        Ok(())
    }
}

impl PeripheralHandle for MockPeripheral {
    fn id(&self) -> PeripheralId {
        PeripheralId(Uuid::from_u128(0xfeed))
    }

    fn name(&self) -> Option<String> {
        Some("Mock Sensor".into())
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Connected
    }

    fn discover_services(&self, services: &[Uuid]) -> Result<(), PlatformError> {
        self.record(Call::DiscoverServices(services.to_vec()))
    }

    fn discover_characteristics(
        &self,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<(), PlatformError> {
        self.record(Call::DiscoverCharacteristics(
            service,
            characteristics.to_vec(),
        ))
    }

    fn read_value(&self, service: Uuid, characteristic: Uuid) -> Result<(), PlatformError> {
        self.record(Call::ReadValue(service, characteristic))
    }

    fn write_value(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), PlatformError> {
        self.record(Call::WriteValue(
            service,
            characteristic,
            value.to_vec(),
            write_type,
        ))
    }

    fn set_notify(
        &self,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), PlatformError> {
        self.record(Call::SetNotify(service, characteristic, enabled))
    }

    fn read_rssi(&self) -> Result<(), PlatformError> {
        self.record(Call::ReadRssi)
    }

    fn can_send_write_without_response(&self) -> bool {
        self.can_send.load(Ordering::SeqCst)
    }
}

/// Answers calls like a peripheral with service `s1()` holding `c1()` and `c2()`.
/// Reads return the last value written, or `[0x64]` before any write.
pub fn gatt_responder() -> impl FnMut(&Call) -> Vec<RawEvent> + Send + 'static {
    let db: HashMap<Uuid, Vec<Uuid>> = HashMap::from([(s1(), vec![c1(), c2()])]);
    let mut values: HashMap<Uuid, Vec<u8>> = HashMap::new();
    move |call: &Call| match call {
        Call::DiscoverServices(ids) => vec![RawEvent::ServicesDiscovered {
            services: db
                .keys()
                .filter(|id| ids.is_empty() || ids.contains(*id))
                .copied()
                .collect(),
            error: None,
        }],
        Call::DiscoverCharacteristics(service, ids) => {
            vec![RawEvent::CharacteristicsDiscovered {
                service: *service,
                characteristics: db
                    .get(service)
                    .into_iter()
                    .flatten()
                    .filter(|id| ids.is_empty() || ids.contains(*id))
                    .map(|id| DiscoveredCharacteristic::new(*id))
                    .collect(),
                error: None,
            }]
        }
        Call::ReadValue(service, characteristic) => vec![RawEvent::ValueUpdated {
            service: *service,
            characteristic: *characteristic,
            value: Some(values.get(characteristic).cloned().unwrap_or(vec![0x64])),
            error: None,
        }],
        Call::WriteValue(service, characteristic, value, write_type) => {
            values.insert(*characteristic, value.clone());
            match write_type {
                WriteType::WithResponse => vec![RawEvent::ValueWritten {
                    service: *service,
                    characteristic: *characteristic,
                    error: None,
                }],
                WriteType::WithoutResponse => Vec::new(),
            }
        }
        Call::SetNotify(service, characteristic, enabled) => {
            vec![RawEvent::NotifyStateChanged {
                service: *service,
                characteristic: *characteristic,
                is_notifying: *enabled,
                error: None,
            }]
        }
        Call::ReadRssi => vec![RawEvent::RssiRead {
            rssi: -42,
            error: None,
        }],
    }
}

pub fn connect(mock: &Arc<MockPeripheral>) -> Peripheral {
    connect_with(mock, PeripheralConfig::default())
}

pub fn connect_with(mock: &Arc<MockPeripheral>, config: PeripheralConfig) -> Peripheral {
    let handle: Arc<dyn PeripheralHandle> = mock.clone();
    Peripheral::new(handle, config)
}

/// Drives `fut` to completion while delivering the mock's callbacks.
pub fn run<T>(peripheral: &Peripheral, mock: &MockPeripheral, fut: impl Future<Output = T>) -> T {
    run_with(peripheral, mock, fut, || ())
}

/// Like [run], calling `on_tick` after every delivery round.
pub fn run_with<T>(
    peripheral: &Peripheral,
    mock: &MockPeripheral,
    fut: impl Future<Output = T>,
    on_tick: impl FnMut(),
) -> T {
    future::block_on(fut.or(pump(peripheral, mock, on_tick)))
}

async fn pump<T>(peripheral: &Peripheral, mock: &MockPeripheral, mut on_tick: impl FnMut()) -> T {
    loop {
        mock.flush_into(peripheral);
        on_tick();
        future::yield_now().await;
    }
}
