//! # Serial Line Configuration
//!
//! Port parameters, per-attempt response timeout, retry budget and the
//! silence intervals derived from them.
//!
//! ## RTU Timing
//!
//! RTU frames carry no length field: a frame ends when the line has been
//! quiet for 3.5 character times (t3.5). A character is start bit + data bits
//! + parity bit + stop bits. Above 19200 baud Modbus over serial line fixes the
//! intervals at 1750 µs (t3.5) and 750 µs (t1.5).
//!
//! | Baud | Format | Character | t3.5 |
//! |------|--------|-----------|------|
//! | 9600 | 8E1 | 1.146 ms | 4.01 ms |
//! | 19200 | 8N1 | 0.521 ms | 1.82 ms |
//! | 115200 | 8E1 | - | 1.75 ms (fixed) |

use std::time::Duration;

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_MAX_RETRIES, DEFAULT_RESPONSE_TIMEOUT_MS,
    FIXED_TIMING_BAUD_THRESHOLD, MIN_INTER_CHAR_TIMEOUT_US, MIN_INTER_FRAME_SILENCE_US,
};
use crate::error::{ModbusError, ModbusResult};

/// Parity bit setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
}

/// Stop bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Serial parameters plus transaction policy for one RTU line.
///
/// # Example
///
/// ```rust
/// use voltage_rtu::config::{Parity, SerialConfig};
/// use std::time::Duration;
///
/// let config = SerialConfig::new()
///     .with_baud_rate(19200)
///     .with_parity(Parity::None)
///     .with_response_timeout(Duration::from_millis(500))
///     .with_max_retries(1);
///
/// assert_eq!(config.baud_rate, 19200);
/// assert_eq!(config.bits_per_char(), 10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    /// Line speed.
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// How long one attempt waits for a response.
    pub response_timeout: Duration,
    /// Resends after the first attempt on timeout or corrupt frame.
    pub max_retries: u8,
    /// Overrides the derived inter-frame silence (USB adapters often need more).
    pub silence_override: Option<Duration>,
}

impl Default for SerialConfig {
    /// 9600 baud, 8 data bits, even parity, 1 stop bit, 1.5 s timeout, 2 retries
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            silence_override: None,
        }
    }
}

impl SerialConfig {
    /// Create a configuration with the default 9600 8E1 settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set data bits.
    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Set parity.
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set stop bits.
    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Set the per-attempt response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the number of resends.
    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    /// Force a specific inter-frame silence instead of the derived one.
    pub fn with_silence(mut self, silence: Duration) -> Self {
        self.silence_override = Some(silence);
        self
    }

    /// Reject settings the transport cannot work with.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.baud_rate == 0 {
            return Err(ModbusError::configuration("baud rate must be non-zero"));
        }
        if self.response_timeout.is_zero() {
            return Err(ModbusError::configuration(
                "response timeout must be non-zero",
            ));
        }
        if self.silence_override.is_some_and(|s| s.is_zero()) {
            return Err(ModbusError::configuration("silence must be non-zero"));
        }
        Ok(())
    }

    /// Bits on the wire per character, including start, parity and stop bits.
    pub fn bits_per_char(&self) -> u32 {
        let data = match self.data_bits {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 0,
            Parity::Even | Parity::Odd => 1,
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        1 + data + parity + stop
    }

    /// Time to transmit one character.
    pub fn char_time(&self) -> Duration {
        let baud = u64::from(self.baud_rate.max(1));
        Duration::from_nanos(u64::from(self.bits_per_char()) * 1_000_000_000 / baud)
    }

    /// Quiet period that terminates a frame (t3.5).
    pub fn inter_frame_silence(&self) -> Duration {
        if let Some(silence) = self.silence_override {
            return silence;
        }
        if self.baud_rate > FIXED_TIMING_BAUD_THRESHOLD {
            Duration::from_micros(MIN_INTER_FRAME_SILENCE_US)
        } else {
            self.char_time() * 7 / 2
        }
    }

    /// Maximum gap between characters of one frame (t1.5).
    pub fn inter_char_timeout(&self) -> Duration {
        if self.baud_rate > FIXED_TIMING_BAUD_THRESHOLD {
            Duration::from_micros(MIN_INTER_CHAR_TIMEOUT_US)
        } else {
            self.char_time() * 3 / 2
        }
    }
}

#[cfg(feature = "serial")]
impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

#[cfg(feature = "serial")]
impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

#[cfg(feature = "serial")]
impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}
