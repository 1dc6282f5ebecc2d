use std::time::Duration;

/// Configuration of a [crate::Peripheral] session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PeripheralConfig {
    event_capacity: usize,
    notification_capacity: usize,
    operation_timeout: Option<Duration>,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            notification_capacity: 64,
            operation_timeout: None,
        }
    }
}

impl PeripheralConfig {
    /// Capacity of the event bus. A subscriber lagging behind by more than this
    /// many events loses the oldest ones. Default: 256.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Number of undelivered values a notification stream may buffer before the
    /// oldest one is dropped. Default: 64.
    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity.max(1);
        self
    }

    /// Deadline applied to every wait for a platform callback. No operation times out
    /// when this is `None`, which is the default; callers are expected to impose their
    /// own deadline in that case.
    pub fn operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub(crate) fn get_event_capacity(&self) -> usize {
        self.event_capacity
    }

    pub(crate) fn get_notification_capacity(&self) -> usize {
        self.notification_capacity
    }

    pub(crate) fn get_operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }
}
