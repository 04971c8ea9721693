//! Serial transport for Modbus RTU
//!
//! The transport owns the byte stream and knows nothing about Modbus beyond
//! RTU timing: frames are delimited by a quiet period of 3.5 character times
//! (see [`SerialConfig::inter_frame_silence`]). It writes whole frames,
//! reads silence-delimited frames and drains stray input; correlation,
//! CRC checking and retries belong to the transaction engine.
//!
//! [`RtuTransport`] is generic over the stream so the same code drives a
//! `tokio_serial::SerialStream` in production and an in-memory
//! `tokio::io::duplex` pipe in tests.
//!
//! ## Connection State
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Connected
//!      ^                          |                  |
//!      +-------- open error ------+                  |
//!      +------------ close() / fatal I/O error ------+
//! ```
//!
//! There is no reconnection logic here; reconnecting is caller policy.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::constants::MAX_RTU_FRAME_SIZE;
use crate::error::{IoErrorKind, ModbusError, ModbusResult};
use crate::frame::format_hex;

/// Upper bound on bytes thrown away by one [`ModbusTransport::discard_pending`] call
const MAX_DISCARD_BYTES: usize = MAX_RTU_FRAME_SIZE * 4;

/// Log packet with direction
fn log_packet(direction: &str, data: &[u8]) {
    info!("[MODBUS-RTU] {} {}", direction, format_hex(data));
}

/// Transport layer abstraction for the RTU master.
///
/// Implementations are exclusively owned by one
/// [`TransactionEngine`](crate::transaction::TransactionEngine), which
/// serialises access, so methods take `&mut self`.
pub trait ModbusTransport: Send {
    /// Write one complete frame after the inter-frame silence has elapsed.
    ///
    /// A broken or partial write disconnects the transport and returns
    /// `Io { kind: WriteFailed }`.
    fn write_frame(&mut self, frame: &[u8]) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Accumulate bytes until the line goes quiet or `timeout` expires.
    ///
    /// Returns whatever was received, possibly nothing, when the deadline
    /// passes. Only I/O failures are errors.
    fn read_frame(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = ModbusResult<Vec<u8>>> + Send;

    /// Throw away bytes already waiting on the line, returning how many.
    fn discard_pending(&mut self) -> impl Future<Output = ModbusResult<usize>> + Send;

    /// Throw away everything that arrives before `deadline`, then keep
    /// draining until the line is quiet for one silence interval.
    fn discard_until(
        &mut self,
        deadline: Instant,
    ) -> impl Future<Output = ModbusResult<usize>> + Send;

    /// Whether the transport holds an open stream.
    fn is_connected(&self) -> bool;

    /// Release the stream. Calling it again is a no-op.
    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Counters since creation.
    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bytes_discarded: u64,
}

/// Lifecycle of the underlying stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Modbus RTU transport over any async byte stream
pub struct RtuTransport<S> {
    /// Open stream, `None` once closed or failed
    stream: Option<S>,
    state: ConnectionState,
    /// Port name/path, used for logging and (re)opening serial ports
    port_name: String,
    config: SerialConfig,
    /// Quiet period that ends a frame
    silence: Duration,
    /// Last time a byte went out or came in
    last_activity: Option<Instant>,
    stats: TransportStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl<S> RtuTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-open stream.
    pub fn from_stream(stream: S, config: SerialConfig) -> Self {
        Self {
            stream: Some(stream),
            state: ConnectionState::Connected,
            port_name: "stream".to_string(),
            silence: config.inter_frame_silence(),
            config,
            last_activity: None,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serial parameters in use
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Port name/path
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Inter-frame silence in use
    pub fn silence(&self) -> Duration {
        self.silence
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Drop the stream after an unrecoverable I/O error.
    fn fail(&mut self, kind: IoErrorKind, message: String) -> ModbusError {
        warn!(port = %self.port_name, %kind, %message, "serial transport failed, disconnecting");
        self.stream = None;
        self.state = ConnectionState::Disconnected;
        self.stats.errors += 1;
        ModbusError::io(kind, message)
    }

    /// Read and drop input until `deadline` has passed and the line is quiet.
    async fn drain(&mut self, deadline: Instant) -> ModbusResult<usize> {
        let silence = self.silence;
        let mut discarded = 0usize;
        let mut buffer = [0u8; MAX_RTU_FRAME_SIZE];

        let outcome = match self.stream.as_mut() {
            Some(stream) => loop {
                if discarded >= MAX_DISCARD_BYTES {
                    break Ok(());
                }
                let wait = deadline
                    .checked_duration_since(Instant::now())
                    .map_or(silence, |remaining| remaining.max(silence));
                match timeout(wait, stream.read(&mut buffer)).await {
                    Ok(Ok(0)) => break Err("serial stream closed".to_string()),
                    Ok(Ok(n)) => discarded += n,
                    Ok(Err(e)) => break Err(format!("serial read error: {}", e)),
                    Err(_) => break Ok(()),
                }
            },
            None => return Err(ModbusError::not_connected()),
        };

        if let Err(message) = outcome {
            return Err(self.fail(IoErrorKind::ReadFailed, message));
        }

        if discarded > 0 {
            self.last_activity = Some(Instant::now());
            self.stats.bytes_discarded += discarded as u64;
            debug!(port = %self.port_name, discarded, "discarded stray bytes");
        }

        Ok(discarded)
    }

    /// Earliest instant the next frame may start
    fn frame_gap_deadline(&self) -> Option<Instant> {
        self.last_activity.map(|last| last + self.silence)
    }
}

impl<S> ModbusTransport for RtuTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, frame: &[u8]) -> ModbusResult<()> {
        if self.stream.is_none() {
            return Err(ModbusError::not_connected());
        }

        if let Some(deadline) = self.frame_gap_deadline() {
            sleep_until(deadline).await;
        }

        let write_timeout = self.config.response_timeout;
        let outcome = match self.stream.as_mut() {
            Some(stream) => {
                match timeout(write_timeout, async {
                    stream.write_all(frame).await?;
                    stream.flush().await
                })
                .await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!("failed to send RTU frame: {}", e)),
                    Err(_) => Err(format!(
                        "send did not complete within {}ms",
                        write_timeout.as_millis()
                    )),
                }
            }
            None => return Err(ModbusError::not_connected()),
        };

        if let Err(message) = outcome {
            return Err(self.fail(IoErrorKind::WriteFailed, message));
        }

        self.last_activity = Some(Instant::now());
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        if self.packet_logging {
            log_packet("send", frame);
        }

        Ok(())
    }

    async fn read_frame(&mut self, response_timeout: Duration) -> ModbusResult<Vec<u8>> {
        let silence = self.silence;
        let deadline = Instant::now() + response_timeout;
        let mut frame = Vec::with_capacity(MAX_RTU_FRAME_SIZE);
        let mut buffer = [0u8; MAX_RTU_FRAME_SIZE];

        let outcome = match self.stream.as_mut() {
            Some(stream) => loop {
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    break Ok(());
                };
                // First byte may take the whole timeout; after that the line must not go quiet
                let wait = if frame.is_empty() {
                    remaining
                } else {
                    silence.min(remaining)
                };
                let room = MAX_RTU_FRAME_SIZE - frame.len();

                match timeout(wait, stream.read(&mut buffer[..room])).await {
                    Ok(Ok(0)) => break Err("serial stream closed".to_string()),
                    Ok(Ok(n)) => {
                        frame.extend_from_slice(&buffer[..n]);
                        self.last_activity = Some(Instant::now());
                        if frame.len() >= MAX_RTU_FRAME_SIZE {
                            break Ok(());
                        }
                    }
                    Ok(Err(e)) => break Err(format!("serial read error: {}", e)),
                    Err(_) => break Ok(()),
                }
            },
            None => return Err(ModbusError::not_connected()),
        };

        if let Err(message) = outcome {
            return Err(self.fail(IoErrorKind::ReadFailed, message));
        }

        if frame.is_empty() {
            self.stats.timeouts += 1;
            debug!(
                port = %self.port_name,
                timeout_ms = response_timeout.as_millis() as u64,
                "no response before deadline"
            );
        } else {
            self.stats.responses_received += 1;
            self.stats.bytes_received += frame.len() as u64;
            if self.packet_logging {
                log_packet("receive", &frame);
            }
        }

        Ok(frame)
    }

    async fn discard_pending(&mut self) -> ModbusResult<usize> {
        self.drain(Instant::now()).await
    }

    async fn discard_until(&mut self, deadline: Instant) -> ModbusResult<usize> {
        self.drain(deadline).await
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.stream.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            // The handle is released on drop even if shutdown fails
            if let Err(e) = stream.shutdown().await {
                debug!(port = %self.port_name, error = %e, "shutdown before close failed");
            }
            debug!(port = %self.port_name, "transport closed");
        }
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// RTU transport on a serial port
#[cfg(feature = "serial")]
pub type SerialTransport = RtuTransport<tokio_serial::SerialStream>;

#[cfg(feature = "serial")]
impl SerialTransport {
    /// Prepare a transport for `port` without opening it.
    pub fn new(port: &str, config: SerialConfig) -> ModbusResult<Self> {
        config.validate()?;
        Ok(Self {
            stream: None,
            state: ConnectionState::Disconnected,
            port_name: port.to_string(),
            silence: config.inter_frame_silence(),
            config,
            last_activity: None,
            stats: TransportStats::default(),
            packet_logging: false,
        })
    }

    /// Open and configure `port`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use voltage_rtu::config::SerialConfig;
    /// use voltage_rtu::transport::SerialTransport;
    ///
    /// let transport = SerialTransport::open("/dev/ttyUSB0", SerialConfig::default())?;
    /// # Ok::<(), voltage_rtu::ModbusError>(())
    /// ```
    pub fn open(port: &str, config: SerialConfig) -> ModbusResult<Self> {
        let mut transport = Self::new(port, config)?;
        transport.connect()?;
        Ok(transport)
    }

    /// Open the serial port: `Disconnected -> Connecting -> Connected`.
    pub fn connect(&mut self) -> ModbusResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        let builder = tokio_serial::new(&self.port_name, self.config.baud_rate)
            .data_bits(self.config.data_bits.into())
            .parity(self.config.parity.into())
            .stop_bits(self.config.stop_bits.into())
            .timeout(self.config.response_timeout);

        match tokio_serial::SerialStream::open(&builder) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = ConnectionState::Connected;
                self.last_activity = None;
                debug!(
                    port = %self.port_name,
                    baud = self.config.baud_rate,
                    silence_us = self.silence.as_micros() as u64,
                    "serial port opened"
                );
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(ModbusError::io(
                    IoErrorKind::OpenFailed,
                    format!("failed to open serial port {}: {}", self.port_name, e),
                ))
            }
        }
    }
}
