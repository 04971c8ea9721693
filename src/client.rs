//! High-level Modbus RTU client
//!
//! The client turns typed operations into requests, hands them to a
//! [`TransactionEngine`] and decodes or verifies the replies. It is generic
//! over the transport, so the same [`GenericModbusClient`] drives a serial
//! port ([`ModbusRtuClient`]) or an in-memory stream in tests.
//!
//! # API Naming Convention
//!
//! | Function Code | Primary Name | Semantic Aliases |
//! |---------------|--------------|------------------|
//! | 0x04 | `read_04()` | `read_input_registers()` |
//! | 0x05 | `write_05()` | `write_single_coil()`, `write_coil()` |
//! | 0x06 | `write_06()` | `write_single_register()`, `write_register()` |
//! | 0x0F | `write_0f()` | `write_multiple_coils()`, `write_coils()` |
//!
//! All methods take `&self`: the engine serialises transactions, so one
//! client can be shared between tasks through an `Arc`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use voltage_rtu::{ModbusClient, ModbusResult, ModbusRtuClient, SerialConfig};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let client = ModbusRtuClient::connect("/dev/ttyUSB0", SerialConfig::default())?;
//!
//!     client.write_register(1, 999, 50).await?;
//!     client.write_coil(1, 999, true).await?;
//!     let speed = client.read_input_registers(1, 999, 1).await?;
//!     println!("speed: {:?}", speed);
//!
//!     client.close().await
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

use tracing::warn;

use crate::config::SerialConfig;
use crate::error::ModbusResult;
use crate::protocol::{ModbusRequest, ModbusResponse, SlaveId};
use crate::transaction::{TransactionEngine, TransactionStats};
use crate::transport::{ModbusTransport, TransportStats};

#[cfg(feature = "serial")]
use crate::transport::SerialTransport;

/// Trait defining the Modbus RTU master operations.
///
/// # Implemented By
///
/// - [`GenericModbusClient`] - client over any [`ModbusTransport`]
/// - [`ModbusRtuClient`] - serial port client (requires `serial` feature)
///
/// # Protocol Limits
///
/// | Operation | Limit |
/// |-----------|-------|
/// | Read Input Registers (0x04) | 125 registers |
/// | Write Multiple Coils (0x0F) | 1968 coils |
pub trait ModbusClient: Send + Sync {
    /// Read input registers (function code 0x04).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus slave/unit ID (1-247)
    /// * `address` - Starting register address (0-65535)
    /// * `quantity` - Number of registers to read (1-125)
    fn read_04(
        &self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Write single coil (function code 0x05).
    ///
    /// `true` is sent as 0xFF00, `false` as 0x0000. The device's echo is
    /// checked against the request.
    fn write_05(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Write single register (function code 0x06).
    fn write_06(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Write multiple coils (function code 0x0F).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus slave/unit ID (1-247)
    /// * `address` - Starting coil address (0-65535)
    /// * `values` - Coil states, packed LSB-first (1-1968 coils)
    fn write_0f(
        &self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Check if the client is connected
    fn is_connected(&self) -> bool;

    /// Close the client connection. Closing twice is a no-op.
    fn close(&self) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Get transport statistics
    fn get_stats(&self) -> TransportStats;

    // ===== Semantic name aliases (for readability) =====

    /// Alias for `read_04` - Read input registers
    #[inline]
    fn read_input_registers(
        &self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_04(slave_id, address, quantity)
    }

    /// Alias for `write_05` - Write single coil
    #[inline]
    fn write_single_coil(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_05(slave_id, address, value)
    }

    /// Alias for `write_05`
    #[inline]
    fn write_coil(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_05(slave_id, address, value)
    }

    /// Alias for `write_06` - Write single register
    #[inline]
    fn write_single_register(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_06(slave_id, address, value)
    }

    /// Alias for `write_06`
    #[inline]
    fn write_register(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_06(slave_id, address, value)
    }

    /// Alias for `write_0f` - Write multiple coils
    #[inline]
    fn write_multiple_coils(
        &self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_0f(slave_id, address, values)
    }

    /// Alias for `write_0f`
    #[inline]
    fn write_coils(
        &self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = ModbusResult<()>> + Send {
        self.write_0f(slave_id, address, values)
    }
}

/// Boxed step sequence run by [`scoped`]
pub type ScopedFuture<'c, R> = Pin<Box<dyn Future<Output = ModbusResult<R>> + Send + 'c>>;

/// Run `f` against `client`, then close the client whatever the outcome.
///
/// The sequence's error takes precedence over a close error. If `f` panics
/// the client is dropped during unwinding, which releases the port.
///
/// ```rust,no_run
/// use voltage_rtu::client::scoped;
/// use voltage_rtu::{ModbusClient, ModbusRtuClient, SerialConfig};
///
/// # async fn example() -> voltage_rtu::ModbusResult<()> {
/// let client = ModbusRtuClient::connect("/dev/ttyUSB0", SerialConfig::default())?;
/// let speed = scoped(client, |c| {
///     Box::pin(async move {
///         c.write_coil(1, 999, true).await?;
///         c.read_input_registers(1, 999, 1).await
///     })
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn scoped<C, R, F>(client: C, f: F) -> ModbusResult<R>
where
    C: ModbusClient,
    F: for<'c> FnOnce(&'c C) -> ScopedFuture<'c, R>,
{
    let result = f(&client).await;
    let closed = client.close().await;

    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(error = %close_err, "close after failed sequence also failed");
            Err(err)
        }
    }
}

/// Generic Modbus client that works with any transport
///
/// Builds requests, runs them through its [`TransactionEngine`] and checks
/// replies: register reads are byte-count checked, writes must echo the
/// request.
pub struct GenericModbusClient<T: ModbusTransport> {
    engine: TransactionEngine<T>,
}

impl<T: ModbusTransport> GenericModbusClient<T> {
    /// Create a client with the default timeout and retry budget
    pub fn new(transport: T) -> Self {
        Self {
            engine: TransactionEngine::new(transport),
        }
    }

    /// Create a client using the timeout and retries of `config`
    pub fn with_config(transport: T, config: &SerialConfig) -> Self {
        Self {
            engine: TransactionEngine::with_config(transport, config),
        }
    }

    pub fn from_engine(engine: TransactionEngine<T>) -> Self {
        Self { engine }
    }

    /// Get a reference to the transaction engine
    pub fn engine(&self) -> &TransactionEngine<T> {
        &self.engine
    }

    /// Transaction counters (retries, timeouts, exceptions, ...)
    pub fn transaction_stats(&self) -> TransactionStats {
        self.engine.stats()
    }

    /// Execute a raw request
    pub async fn execute_request(&self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.engine.execute(request).await
    }

    async fn execute_write(&self, request: ModbusRequest) -> ModbusResult<()> {
        let response = self.execute_request(&request).await?;
        response.verify_echo(&request)
    }
}

impl<T: ModbusTransport> ModbusClient for GenericModbusClient<T> {
    async fn read_04(
        &self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        let request = ModbusRequest::read_input_registers(slave_id, address, quantity)?;
        let response = self.execute_request(&request).await?;
        response.parse_registers(quantity)
    }

    async fn write_05(&self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<()> {
        self.execute_write(ModbusRequest::write_single_coil(slave_id, address, value)?)
            .await
    }

    async fn write_06(&self, slave_id: SlaveId, address: u16, value: u16) -> ModbusResult<()> {
        self.execute_write(ModbusRequest::write_single_register(
            slave_id, address, value,
        )?)
        .await
    }

    async fn write_0f(&self, slave_id: SlaveId, address: u16, values: &[bool]) -> ModbusResult<()> {
        self.execute_write(ModbusRequest::write_multiple_coils(
            slave_id, address, values,
        )?)
        .await
    }

    fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    async fn close(&self) -> ModbusResult<()> {
        self.engine.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.engine.transport_stats()
    }
}

/// Modbus RTU client on a serial port
#[cfg(feature = "serial")]
pub struct ModbusRtuClient {
    inner: GenericModbusClient<SerialTransport>,
}

#[cfg(feature = "serial")]
impl ModbusRtuClient {
    /// Open `port` with `config` and return a connected client
    pub fn connect(port: &str, config: SerialConfig) -> ModbusResult<Self> {
        let transport = SerialTransport::open(port, config)?;
        Ok(Self::from_transport(transport))
    }

    /// Create from an existing SerialTransport
    pub fn from_transport(transport: SerialTransport) -> Self {
        let config = *transport.config();
        Self {
            inner: GenericModbusClient::with_config(transport, &config),
        }
    }

    /// Enable or disable packet logging on an existing client
    pub async fn set_packet_logging(&self, enabled: bool) {
        self.inner
            .engine()
            .lock_transport()
            .await
            .set_packet_logging(enabled);
    }

    pub fn transaction_stats(&self) -> TransactionStats {
        self.inner.transaction_stats()
    }

    /// Execute a raw request
    pub async fn execute_request(&self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.inner.execute_request(request).await
    }
}

#[cfg(feature = "serial")]
impl ModbusClient for ModbusRtuClient {
    async fn read_04(
        &self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.inner.read_04(slave_id, address, quantity).await
    }

    async fn write_05(&self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<()> {
        self.inner.write_05(slave_id, address, value).await
    }

    async fn write_06(&self, slave_id: SlaveId, address: u16, value: u16) -> ModbusResult<()> {
        self.inner.write_06(slave_id, address, value).await
    }

    async fn write_0f(&self, slave_id: SlaveId, address: u16, values: &[bool]) -> ModbusResult<()> {
        self.inner.write_0f(slave_id, address, values).await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn close(&self) -> ModbusResult<()> {
        self.inner.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.inner.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExceptionCode, ModbusError};
    use crate::frame;
    use crate::transaction::tests::{MockLine, MockTransport};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn client(line: &Arc<MockLine>) -> GenericModbusClient<MockTransport> {
        let config = SerialConfig::new()
            .with_response_timeout(Duration::from_millis(20))
            .with_max_retries(1);
        GenericModbusClient::with_config(MockTransport::new(line), &config)
    }

    /// Reply with the request frame itself, as FC05/FC06 devices do
    fn echo(line: &MockLine, request: &ModbusRequest) {
        line.reply(frame::encode(
            request.slave_id,
            request.function.to_u8(),
            &request.payload(),
        ));
    }

    #[tokio::test]
    async fn test_read_04_decodes_registers() {
        let line = MockLine::new();
        line.reply(frame::encode(1, 0x04, &[0x04, 0x00, 0x32, 0x01, 0x00]));
        let client = client(&line);

        let values = assert_ok!(client.read_input_registers(1, 999, 2).await);
        assert_eq!(values, vec![50, 256]);
        assert_eq!(
            line.writes()[0],
            frame::encode(1, 0x04, &[0x03, 0xE7, 0x00, 0x02])
        );
    }

    #[tokio::test]
    async fn test_read_04_short_byte_count_is_unexpected() {
        let line = MockLine::new();
        line.reply(frame::encode(1, 0x04, &[0x02, 0x00, 0x32]));
        let client = client(&line);

        let err = assert_err!(client.read_04(1, 999, 2).await);
        assert!(matches!(err, ModbusError::UnexpectedResponse { .. }));
    }

    #[tokio::test]
    async fn test_write_coil_frame_and_echo() {
        let line = MockLine::new();
        let request = ModbusRequest::write_single_coil(1, 999, true).unwrap();
        echo(&line, &request);
        let client = client(&line);

        assert_ok!(client.write_coil(1, 999, true).await);
        assert_eq!(
            line.writes()[0],
            vec![0x01, 0x05, 0x03, 0xE7, 0xFF, 0x00, 0x3C, 0x49]
        );
    }

    #[tokio::test]
    async fn test_write_register_echo_mismatch() {
        let line = MockLine::new();
        line.reply(frame::encode(1, 0x06, &[0x03, 0xE7, 0x00, 0x31]));
        let client = client(&line);

        let err = assert_err!(client.write_register(1, 999, 50).await);
        assert!(matches!(err, ModbusError::UnexpectedResponse { .. }));
    }

    #[tokio::test]
    async fn test_write_coils_packs_single_coil() {
        let line = MockLine::new();
        line.reply(frame::encode(1, 0x0F, &[0x03, 0xE8, 0x00, 0x01]));
        let client = client(&line);

        assert_ok!(client.write_coils(1, 1000, &[true]).await);
        assert_eq!(
            line.writes()[0],
            frame::encode(1, 0x0F, &[0x03, 0xE8, 0x00, 0x01, 0x01, 0x01])
        );
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_the_wire() {
        let line = MockLine::new();
        let client = client(&line);

        assert_err!(client.read_04(1, 0, 0).await);
        assert_err!(client.read_04(0, 0, 1).await);
        assert_err!(client.write_0f(1, 0, &[]).await);
        assert!(line.writes().is_empty());
    }

    #[tokio::test]
    async fn test_exception_surfaces_to_caller() {
        let line = MockLine::new();
        line.reply(frame::encode(1, 0x86, &[0x02]));
        let client = client(&line);

        let err = assert_err!(client.write_06(1, 999, 50).await);
        assert_eq!(err.exception_code(), Some(ExceptionCode::IllegalDataAddress));
    }

    #[tokio::test]
    async fn test_shared_client_across_tasks() {
        let line = MockLine::new();
        for value in [7u8, 9] {
            line.reply(frame::encode(1, 0x04, &[0x02, 0x00, value]));
        }
        let client = Arc::new(client(&line));

        let a = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.read_04(1, 999, 1).await }
        });
        let b = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.read_04(1, 999, 1).await }
        });

        let mut values = vec![a.await.unwrap().unwrap()[0], b.await.unwrap().unwrap()[0]];
        values.sort_unstable();
        assert_eq!(values, vec![7, 9]);
        assert_eq!(client.transaction_stats().transactions, 2);
    }

    #[tokio::test]
    async fn test_scoped_closes_after_success() {
        let line = MockLine::new();
        echo(&line, &ModbusRequest::write_single_register(1, 999, 50).unwrap());
        let client = client(&line);

        let result = scoped(client, |c| {
            Box::pin(async move {
                c.write_register(1, 999, 50)
                    .await
                    .map(|()| c.is_connected())
            })
        })
        .await;

        assert_eq!(result, Ok(true));
        assert!(!line.connected.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_scoped_closes_after_failure() {
        let line = MockLine::new();
        let client = client(&line);

        let result = scoped(client, |c| {
            Box::pin(async move {
                c.write_coil(1, 999, true).await?;
                c.write_register(1, 999, 0).await
            })
        })
        .await;

        assert!(matches!(result, Err(ModbusError::Timeout { attempts: 2, .. })));
        // The failed step stops the sequence: only the two coil attempts went out
        assert_eq!(line.writes().len(), 2);
        assert!(!line.connected.load(std::sync::atomic::Ordering::SeqCst));
    }
}
