//! Error types for the RTU master
//!
//! Every failure surfaces as a [`ModbusError`]. Frame and timeout failures
//! drive the transaction engine's retries; device exceptions, argument errors
//! and unexpected replies are reported to the caller as-is; I/O failures are
//! fatal for the connection.

use std::fmt;

use thiserror::Error;

use crate::constants::*;

/// Result alias used throughout the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Frame-level decode failures. A frame that fails these checks is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },
}

/// Which I/O step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    OpenFailed,
    ReadFailed,
    WriteFailed,
    NotConnected,
}

impl fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoErrorKind::OpenFailed => "open failed",
            IoErrorKind::ReadFailed => "read failed",
            IoErrorKind::WriteFailed => "write failed",
            IoErrorKind::NotConnected => "not connected",
        };
        f.write_str(name)
    }
}

/// Device-reported Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveBusy,
    NegativeAcknowledge,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    Unknown(u8),
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            EXCEPTION_ILLEGAL_FUNCTION => ExceptionCode::IllegalFunction,
            EXCEPTION_ILLEGAL_DATA_ADDRESS => ExceptionCode::IllegalDataAddress,
            EXCEPTION_ILLEGAL_DATA_VALUE => ExceptionCode::IllegalDataValue,
            EXCEPTION_SLAVE_DEVICE_FAILURE => ExceptionCode::SlaveDeviceFailure,
            EXCEPTION_ACKNOWLEDGE => ExceptionCode::Acknowledge,
            EXCEPTION_SLAVE_DEVICE_BUSY => ExceptionCode::SlaveBusy,
            EXCEPTION_NEGATIVE_ACKNOWLEDGE => ExceptionCode::NegativeAcknowledge,
            EXCEPTION_MEMORY_PARITY_ERROR => ExceptionCode::MemoryParityError,
            EXCEPTION_GATEWAY_PATH_UNAVAILABLE => ExceptionCode::GatewayPathUnavailable,
            EXCEPTION_GATEWAY_TARGET_FAILED => ExceptionCode::GatewayTargetFailedToRespond,
            other => ExceptionCode::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => EXCEPTION_ILLEGAL_FUNCTION,
            ExceptionCode::IllegalDataAddress => EXCEPTION_ILLEGAL_DATA_ADDRESS,
            ExceptionCode::IllegalDataValue => EXCEPTION_ILLEGAL_DATA_VALUE,
            ExceptionCode::SlaveDeviceFailure => EXCEPTION_SLAVE_DEVICE_FAILURE,
            ExceptionCode::Acknowledge => EXCEPTION_ACKNOWLEDGE,
            ExceptionCode::SlaveBusy => EXCEPTION_SLAVE_DEVICE_BUSY,
            ExceptionCode::NegativeAcknowledge => EXCEPTION_NEGATIVE_ACKNOWLEDGE,
            ExceptionCode::MemoryParityError => EXCEPTION_MEMORY_PARITY_ERROR,
            ExceptionCode::GatewayPathUnavailable => EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
            ExceptionCode::GatewayTargetFailedToRespond => EXCEPTION_GATEWAY_TARGET_FAILED,
            ExceptionCode::Unknown(code) => code,
        }
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::SlaveDeviceFailure => "Slave Device Failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::SlaveBusy => "Slave Device Busy",
            ExceptionCode::NegativeAcknowledge => "Negative Acknowledge",
            ExceptionCode::MemoryParityError => "Memory Parity Error",
            ExceptionCode::GatewayPathUnavailable => "Gateway Path Unavailable",
            ExceptionCode::GatewayTargetFailedToRespond => {
                "Gateway Target Device Failed to Respond"
            }
            ExceptionCode::Unknown(_) => "Unknown Exception",
        }
    }
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        ExceptionCode::from_u8(code)
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.to_u8())
    }
}

/// Top-level error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModbusError {
    /// Serial port open/read/write failure. The transport is disconnected.
    #[error("I/O error ({kind}): {message}")]
    Io { kind: IoErrorKind, message: String },

    /// A received frame failed validation.
    ///
    /// [`TransactionEngine`](crate::transaction::TransactionEngine) retries
    /// corrupt frames and reports exhaustion as [`ModbusError::Timeout`] with
    /// `last_frame_error` set, so it never returns this variant. It arises
    /// when code calling [`frame::decode`](crate::frame::decode) directly
    /// converts the [`FrameError`] with `?`.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// No valid response after every attempt
    #[error("no valid response after {attempts} attempt(s) of {timeout_ms}ms")]
    Timeout {
        attempts: u32,
        timeout_ms: u64,
        last_frame_error: Option<FrameError>,
    },

    /// The device answered with an exception response
    #[error("Modbus exception on function 0x{function:02X}: {code}")]
    Exception { function: u8, code: ExceptionCode },

    /// Caller passed a value that cannot be put on the wire
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Reply does not belong to the request (wrong unit, function, or echo)
    #[error("unexpected response: {message}")]
    UnexpectedResponse { message: String },

    /// Serial parameters that cannot be applied
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    pub fn io(kind: IoErrorKind, message: impl Into<String>) -> Self {
        ModbusError::Io {
            kind,
            message: message.into(),
        }
    }

    pub fn not_connected() -> Self {
        ModbusError::io(IoErrorKind::NotConnected, "transport is not connected")
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ModbusError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn unexpected_response(message: impl Into<String>) -> Self {
        ModbusError::UnexpectedResponse {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ModbusError::Configuration {
            message: message.into(),
        }
    }

    /// Errors the transaction engine resends on
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModbusError::Frame(_) | ModbusError::Timeout { .. })
    }

    /// Errors after which the connection is no longer usable
    pub fn is_fatal(&self) -> bool {
        matches!(self, ModbusError::Io { .. })
    }

    /// The device does not implement the requested function code
    pub fn is_function_unsupported(&self) -> bool {
        matches!(
            self,
            ModbusError::Exception {
                code: ExceptionCode::IllegalFunction,
                ..
            }
        )
    }

    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            ModbusError::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }
}
