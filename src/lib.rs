//! # Voltage RTU - Async Modbus RTU Master
//!
//! A Modbus RTU master for RS-485/RS-232 lines, built on Tokio. It frames
//! requests with CRC-16, delimits replies by line silence, matches each
//! reply to its request and retries lost or corrupted frames.
//!
//! ## Features
//!
//! - **Silence-based framing**: t3.5 derived from baud rate and character format
//! - **One transaction on the bus**: concurrent callers are serialised
//! - **Retries with a classified outcome**: timeouts, corrupt frames, device
//!   exceptions and mismatched replies are distinct errors
//! - **Function-code fallback**: single-coil writes can fall back to 0x0F
//! - **Statistics**: transport and transaction counters
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client |
//! |------|----------|--------|
//! | 0x04 | Read Input Registers | ✅ |
//! | 0x05 | Write Single Coil | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_rtu::{ModbusClient, ModbusResult, ModbusRtuClient, SerialConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let config = SerialConfig::new()
//!         .with_baud_rate(9600)
//!         .with_response_timeout(Duration::from_millis(1500));
//!     let client = ModbusRtuClient::connect("/dev/ttyUSB0", config)?;
//!
//!     let values = client.read_04(1, 999, 1).await?;
//!     println!("Input register 999: {:?}", values);
//!
//!     client.write_06(1, 999, 50).await?;
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus RTU protocol constants
pub mod constants;

/// RTU frame encoding, decoding and CRC
pub mod frame;

/// Serial line parameters and derived timing
pub mod config;

/// Modbus requests and responses
pub mod protocol;

/// Serial transport with silence-delimited framing
pub mod transport;

/// Request/response transactions with retries
pub mod transaction;

/// Function-code fallback policy
pub mod fallback;

/// Modbus client implementations
pub mod client;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_rtu::tokio) ===
pub use tokio;

// === Core client API ===
pub use client::{scoped, GenericModbusClient, ModbusClient};

// === Error handling ===
pub use error::{ExceptionCode, FrameError, IoErrorKind, ModbusError, ModbusResult};

// === Core types ===
pub use config::{DataBits, Parity, SerialConfig, StopBits};
pub use fallback::{
    Command, FallbackPolicy, FallbackTrigger, FunctionRoute, Operation, RoutedReply,
};
pub use protocol::{to_register_value, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};

// === Engine and transport ===
pub use transaction::{TransactionEngine, TransactionStats};
pub use transport::{ConnectionState, ModbusTransport, RtuTransport, TransportStats};

// === Protocol limits (commonly needed constants) ===
pub use constants::{MAX_PDU_SIZE, MAX_READ_REGISTERS, MAX_RTU_FRAME_SIZE, MAX_WRITE_COILS};

#[cfg(feature = "serial")]
pub use client::ModbusRtuClient;

#[cfg(feature = "serial")]
pub use transport::SerialTransport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage RTU v{} - async Modbus RTU master", VERSION)
}
