//! Defines error types.

use std::fmt::Debug;

/// Error reported by the platform BLE stack, either synchronously when a call
/// could not be issued or inside a callback event.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlatformError {
    /// An ATT protocol error returned by the remote peripheral.
    Att(AttError),
    /// Any other error described by the platform.
    Message(String),
}

impl std::error::Error for PlatformError {}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Att(att_error) => write!(f, "ATT error: {att_error}"),
            Self::Message(msg) => f.write_str(msg),
        }
    }
}

impl From<AttError> for PlatformError {
    fn from(att_error: AttError) -> Self {
        Self::Att(att_error)
    }
}

impl From<String> for PlatformError {
    fn from(msg: String) -> Self {
        Self::Message(msg)
    }
}

impl From<&str> for PlatformError {
    fn from(msg: &str) -> Self {
        Self::Message(msg.to_string())
    }
}

impl From<PlatformError> for Error {
    fn from(err: PlatformError) -> Self {
        let msg = err.to_string();
        Error::new(ErrorKind::OperationFailed, Some(err), msg)
    }
}

impl From<AttError> for Error {
    fn from(e: AttError) -> Self {
        PlatformError::Att(e).into()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            source: None,
            message: String::new(),
        }
    }
}

/// The error type for peripheral operations.
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<PlatformError>,
    message: String,
}

impl Error {
    pub(crate) fn new<S: ToString>(
        kind: ErrorKind,
        source: Option<PlatformError>,
        message: S,
    ) -> Self {
        Error {
            kind,
            source,
            message: message.to_string(),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message for this error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the platform error carried by an [`ErrorKind::OperationFailed`] error.
    pub fn platform_error(&self) -> Option<&PlatformError> {
        self.source.as_ref()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.message.is_empty(), &self.source) {
            (true, None) => write!(f, "{}", &self.kind),
            (false, None) => write!(f, "{}: {}", &self.kind, &self.message),
            (_, Some(err)) => write!(f, "{}: {}", &self.kind, err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|x| {
            let x: &(dyn std::error::Error + 'static) = x;
            x
        })
    }
}

/// A list of general categories of peripheral operation errors.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// the service was not found on the peripheral
    ServiceNotFound,
    /// the characteristic was not found in the service
    CharacteristicNotFound,
    /// the platform reported a failure
    OperationFailed,
    /// the peripheral is disconnected
    PeripheralDisconnected,
    /// the operation was cancelled
    OperationCancelled,
    /// timed out
    Timeout,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ServiceNotFound => f.write_str("the service was not found on the peripheral"),
            ErrorKind::CharacteristicNotFound => {
                f.write_str("the characteristic was not found in the service")
            }
            ErrorKind::OperationFailed => f.write_str("the platform reported a failure"),
            ErrorKind::PeripheralDisconnected => f.write_str("the peripheral is disconnected"),
            ErrorKind::OperationCancelled => f.write_str("the operation was cancelled"),
            ErrorKind::Timeout => f.write_str("timed out"),
        }
    }
}

/// Bluetooth Attribute Protocol error. See the Bluetooth Core Specification, Vol 3, Part F, §3.4.1.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttError(u8);

impl AttError {
    /// The operation completed successfully.
    pub const SUCCESS: AttError = AttError(0x00);
    /// The attribute handle given was not valid on this server.
    pub const INVALID_HANDLE: AttError = AttError(0x01);
    /// The attribute cannot be read.
    pub const READ_NOT_PERMITTED: AttError = AttError(0x02);
    /// The attribute cannot be written.
    pub const WRITE_NOT_PERMITTED: AttError = AttError(0x03);
    /// The attribute PDU was invalid.
    pub const INVALID_PDU: AttError = AttError(0x04);
    /// The attribute requires authentication before it can be read or written.
    pub const INSUFFICIENT_AUTHENTICATION: AttError = AttError(0x05);
    /// Attribute server does not support the request received from the client.
    pub const REQUEST_NOT_SUPPORTED: AttError = AttError(0x06);
    /// Offset specified was past the end of the attribute.
    pub const INVALID_OFFSET: AttError = AttError(0x07);
    /// The attribute requires authorization before it can be read or written.
    pub const INSUFFICIENT_AUTHORIZATION: AttError = AttError(0x08);
    /// No attribute found within the given attribute handle range.
    pub const ATTRIBUTE_NOT_FOUND: AttError = AttError(0x0a);
    /// The attribute value length is invalid for the operation.
    pub const INVALID_ATTRIBUTE_VALUE_LENGTH: AttError = AttError(0x0d);
    /// The request encountered an unlikely error and could not be completed.
    pub const UNLIKELY_ERROR: AttError = AttError(0x0e);
    /// The attribute requires encryption before it can be read or written.
    pub const INSUFFICIENT_ENCRYPTION: AttError = AttError(0x0f);
    /// Insufficient Resources to complete the request.
    pub const INSUFFICIENT_RESOURCES: AttError = AttError(0x11);
    /// The server requests the client to rediscover the database.
    pub const DATABASE_OUT_OF_SYNC: AttError = AttError(0x12);
    /// Client Characteristic Configuration Descriptor Improperly Configured
    pub const CCCD_IMPROPERLY_CONFIGURED: AttError = AttError(0xfd);
    /// Procedure Already in Progress
    pub const PROCEDURE_ALREADY_IN_PROGRESS: AttError = AttError(0xfe);

    /// Converts a [`u8`] value to an [`AttError`].
    pub const fn from_u8(val: u8) -> Self {
        AttError(val)
    }

    /// Converts an [`AttError`] to a [`u8`] value.
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Checks if the error code is in the application error range.
    pub fn is_application(&self) -> bool {
        (0x80..0xa0).contains(&self.0)
    }
}

impl std::fmt::Display for AttError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let desc = match *self {
            AttError::SUCCESS => "success",
            AttError::INVALID_HANDLE => "invalid handle",
            AttError::READ_NOT_PERMITTED => "read not permitted",
            AttError::WRITE_NOT_PERMITTED => "write not permitted",
            AttError::INVALID_PDU => "invalid PDU",
            AttError::INSUFFICIENT_AUTHENTICATION => "insufficient authentication",
            AttError::REQUEST_NOT_SUPPORTED => "request not supported",
            AttError::INVALID_OFFSET => "invalid offset",
            AttError::INSUFFICIENT_AUTHORIZATION => "insufficient authorization",
            AttError::ATTRIBUTE_NOT_FOUND => "attribute not found",
            AttError::INVALID_ATTRIBUTE_VALUE_LENGTH => "invalid attribute value length",
            AttError::UNLIKELY_ERROR => "unlikely error",
            AttError::INSUFFICIENT_ENCRYPTION => "insufficient encryption",
            AttError::INSUFFICIENT_RESOURCES => "insufficient resources",
            AttError::DATABASE_OUT_OF_SYNC => "database out of sync",
            AttError::CCCD_IMPROPERLY_CONFIGURED => "CCCD improperly configured",
            AttError::PROCEDURE_ALREADY_IN_PROGRESS => "procedure already in progress",
            _ if self.is_application() => {
                return write!(f, "application error 0x{:02x}", self.0);
            }
            _ => return write!(f, "unknown error 0x{:02x}", self.0),
        };
        f.write_str(desc)
    }
}

impl From<u8> for AttError {
    fn from(number: u8) -> Self {
        AttError(number)
    }
}

impl From<AttError> for u8 {
    fn from(val: AttError) -> Self {
        val.0
    }
}
