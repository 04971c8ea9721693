//! Request/response transactions with retries
//!
//! [`TransactionEngine`] turns a [`ModbusRequest`] into exactly one matched
//! [`ModbusResponse`] or one classified [`ModbusError`]:
//!
//! 1. The request is validated; an invalid request never reaches the wire.
//! 2. The transport lock is taken, so at most one transaction is on the bus.
//! 3. Each attempt drains stray input, sends the frame and waits up to the
//!    response timeout for a silence-delimited reply.
//! 4. No reply, or a reply failing the CRC/length check, is retried while
//!    attempts remain. Device exceptions and mismatched replies are not.
//!
//! Dropping the future returned by [`TransactionEngine::execute`] cancels
//! the transaction and releases the lock. The engine notices the abandoned
//! attempt on the next call and drains the line until the cancelled
//! request's response window has closed, so a late reply is never matched
//! to a newer request.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SerialConfig;
use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RESPONSE_TIMEOUT_MS};
use crate::error::{ExceptionCode, FrameError, ModbusError, ModbusResult};
use crate::frame::{self, RtuFrame};
use crate::protocol::{ModbusRequest, ModbusResponse};
use crate::transport::{ModbusTransport, TransportStats};

/// Transaction counters since the engine was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub transactions: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub frame_errors: u64,
    pub exceptions: u64,
    pub unexpected_responses: u64,
}

#[derive(Debug, Default)]
struct EngineCounters {
    transactions: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    frame_errors: AtomicU64,
    exceptions: AtomicU64,
    unexpected_responses: AtomicU64,
}

impl EngineCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransactionStats {
        TransactionStats {
            transactions: self.transactions.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            unexpected_responses: self.unexpected_responses.load(Ordering::Relaxed),
        }
    }
}

/// One request in flight
struct Transaction {
    id: u64,
    frame: Vec<u8>,
    attempt_count: u32,
    /// End of the current attempt
    deadline: Instant,
    last_frame_error: Option<FrameError>,
}

impl Transaction {
    fn new(id: u64, request: &ModbusRequest) -> Self {
        Self {
            id,
            frame: frame::encode(
                request.slave_id,
                request.function.to_u8(),
                &request.payload(),
            ),
            attempt_count: 0,
            deadline: Instant::now(),
            last_frame_error: None,
        }
    }

    fn begin_attempt(&mut self, response_timeout: Duration) {
        self.attempt_count += 1;
        self.deadline = Instant::now() + response_timeout;
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Serialises transactions over one transport and applies the retry policy.
pub struct TransactionEngine<T: ModbusTransport> {
    transport: Mutex<T>,
    response_timeout: Duration,
    max_retries: u8,
    next_id: AtomicU64,
    counters: EngineCounters,
    /// Mirrors of transport state, readable without taking the lock
    connected: AtomicBool,
    transport_stats: StdMutex<TransportStats>,
    /// Send time of an attempt whose transaction has not finished
    in_flight: StdMutex<Option<Instant>>,
}

impl<T: ModbusTransport> TransactionEngine<T> {
    /// Engine with the default 1500 ms timeout and 2 retries.
    pub fn new(transport: T) -> Self {
        let connected = transport.is_connected();
        let stats = transport.get_stats();
        Self {
            transport: Mutex::new(transport),
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            next_id: AtomicU64::new(1),
            counters: EngineCounters::default(),
            connected: AtomicBool::new(connected),
            transport_stats: StdMutex::new(stats),
            in_flight: StdMutex::new(None),
        }
    }

    /// Engine using the timeout and retry budget of `config`.
    pub fn with_config(transport: T, config: &SerialConfig) -> Self {
        Self::new(transport)
            .with_response_timeout(config.response_timeout)
            .with_max_retries(config.max_retries)
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    /// Counters since creation
    pub fn stats(&self) -> TransactionStats {
        self.counters.snapshot()
    }

    /// Transport counters as of the last completed transaction
    pub fn transport_stats(&self) -> TransportStats {
        match self.transport_stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Exclusive access to the transport, waiting for any in-flight transaction.
    pub async fn lock_transport(&self) -> MutexGuard<'_, T> {
        self.transport.lock().await
    }

    /// Close the transport once any in-flight transaction has finished.
    pub async fn close(&self) -> ModbusResult<()> {
        let mut transport = self.transport.lock().await;
        let result = transport.close().await;
        self.refresh(&transport);
        result
    }

    /// Run one request to completion.
    pub async fn execute(&self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        request.validate()?;

        let mut txn = Transaction::new(self.next_id.fetch_add(1, Ordering::Relaxed), request);
        EngineCounters::bump(&self.counters.transactions);

        debug!(
            transaction = txn.id,
            slave_id = request.slave_id,
            function = request.function.to_u8(),
            address = request.address,
            quantity = request.quantity,
            "dispatching modbus request"
        );

        let mut transport = self.transport.lock().await;
        let result = self.run(&mut *transport, &mut txn, request).await;
        // Not reached when the caller drops this future mid-transaction
        self.mark_in_flight(None);
        self.refresh(&transport);
        result
    }

    fn mark_in_flight(&self, sent_at: Option<Instant>) {
        match self.in_flight.lock() {
            Ok(mut slot) => *slot = sent_at,
            Err(poisoned) => *poisoned.into_inner() = sent_at,
        }
    }

    fn take_in_flight(&self) -> Option<Instant> {
        match self.in_flight.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Drain the reply window of a transaction that was cancelled mid-attempt.
    async fn drain_abandoned(&self, transport: &mut T, txn: &Transaction) -> ModbusResult<()> {
        let Some(sent_at) = self.take_in_flight() else {
            return Ok(());
        };
        let discarded = transport
            .discard_until(sent_at + self.response_timeout)
            .await?;
        warn!(
            transaction = txn.id,
            discarded, "previous transaction was cancelled, drained its reply window"
        );
        Ok(())
    }

    async fn run(
        &self,
        transport: &mut T,
        txn: &mut Transaction,
        request: &ModbusRequest,
    ) -> ModbusResult<ModbusResponse> {
        if !transport.is_connected() {
            return Err(ModbusError::not_connected());
        }

        self.drain_abandoned(transport, txn).await?;

        let attempts = u32::from(self.max_retries) + 1;

        for attempt in 1..=attempts {
            transport.discard_pending().await?;

            txn.begin_attempt(self.response_timeout);
            self.mark_in_flight(Some(Instant::now()));
            transport.write_frame(&txn.frame).await?;
            let raw = transport.read_frame(txn.remaining()).await?;

            if raw.is_empty() {
                EngineCounters::bump(&self.counters.timeouts);
                txn.last_frame_error = None;
            } else {
                match frame::decode(&raw) {
                    Ok(reply) => {
                        let result = self.interpret(request, reply);
                        if result.is_ok() {
                            debug!(
                                transaction = txn.id,
                                slave_id = request.slave_id,
                                attempt,
                                len = raw.len(),
                                "modbus request succeeded"
                            );
                        }
                        return result;
                    }
                    Err(err) => {
                        EngineCounters::bump(&self.counters.frame_errors);
                        debug!(transaction = txn.id, attempt, error = %err, "discarding corrupt frame");
                        txn.last_frame_error = Some(err);
                    }
                }
            }

            if attempt < attempts {
                EngineCounters::bump(&self.counters.retries);
                match txn.last_frame_error {
                    Some(err) => warn!(
                        transaction = txn.id,
                        slave_id = request.slave_id,
                        attempt,
                        error = %err,
                        "retrying modbus request after frame error"
                    ),
                    None => warn!(
                        transaction = txn.id,
                        slave_id = request.slave_id,
                        attempt,
                        "retrying modbus request after timeout"
                    ),
                }
            }
        }

        Err(ModbusError::Timeout {
            attempts: txn.attempt_count,
            timeout_ms: self.response_timeout.as_millis() as u64,
            last_frame_error: txn.last_frame_error,
        })
    }

    /// Match a valid frame against the request it should answer.
    fn interpret(&self, request: &ModbusRequest, reply: RtuFrame) -> ModbusResult<ModbusResponse> {
        let expected = request.function.to_u8();

        if reply.unit_id != request.slave_id {
            EngineCounters::bump(&self.counters.unexpected_responses);
            return Err(ModbusError::unexpected_response(format!(
                "reply from slave {} to a request for slave {}",
                reply.unit_id, request.slave_id
            )));
        }

        if reply.is_exception() {
            if reply.base_function() != expected {
                EngineCounters::bump(&self.counters.unexpected_responses);
                return Err(ModbusError::unexpected_response(format!(
                    "exception for function 0x{:02X} while waiting for 0x{:02X}",
                    reply.base_function(),
                    expected
                )));
            }

            let code = reply
                .exception_code()
                .map(ExceptionCode::from_u8)
                .ok_or_else(|| ModbusError::unexpected_response("exception without code"))?;
            EngineCounters::bump(&self.counters.exceptions);
            debug!(slave_id = request.slave_id, function = expected, %code, "device exception");
            return Err(ModbusError::Exception {
                function: expected,
                code,
            });
        }

        if reply.function_code != expected {
            EngineCounters::bump(&self.counters.unexpected_responses);
            return Err(ModbusError::unexpected_response(format!(
                "function 0x{:02X} in reply to 0x{:02X}",
                reply.function_code, expected
            )));
        }

        Ok(ModbusResponse::new(
            reply.unit_id,
            request.function,
            reply.payload,
        ))
    }

    fn refresh(&self, transport: &T) {
        self.connected
            .store(transport.is_connected(), Ordering::Release);
        match self.transport_stats.lock() {
            Ok(mut stats) => *stats = transport.get_stats(),
            Err(poisoned) => *poisoned.into_inner() = transport.get_stats(),
        }
    }
}
