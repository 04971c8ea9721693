//! End-to-end tests against a simulated pump slave on an in-memory line.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use voltage_rtu::frame;
use voltage_rtu::{
    scoped, FallbackPolicy, GenericModbusClient, ModbusClient, ModbusError, ModbusFunction,
    RtuTransport, SerialConfig,
};

const PUMP: u8 = 1;

/// One operation as the pump saw it
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Coil(u16, bool),
    Register(u16, u16),
    Read(u16),
}

#[derive(Default)]
struct PumpState {
    coils: HashMap<u16, bool>,
    registers: HashMap<u16, u16>,
    journal: Vec<Step>,
    /// Answer 0x05 with an Illegal Function exception
    reject_single_coil: bool,
    /// Hold back the first reply this long
    first_reply_delay: Option<Duration>,
}

impl PumpState {
    fn handle(&mut self, raw: &[u8]) -> Option<Vec<u8>> {
        let request = frame::decode(raw).ok()?;
        if request.unit_id != PUMP {
            return None;
        }

        let p = &request.payload;
        let word = |i: usize| u16::from_be_bytes([p[i], p[i + 1]]);

        let reply = match request.function_code {
            0x05 if self.reject_single_coil => frame::encode(PUMP, 0x85, &[0x01]),
            0x05 => {
                let on = word(2) == 0xFF00;
                self.coils.insert(word(0), on);
                self.journal.push(Step::Coil(word(0), on));
                frame::encode(PUMP, 0x05, p)
            }
            0x06 => {
                self.registers.insert(word(0), word(2));
                self.journal.push(Step::Register(word(0), word(2)));
                frame::encode(PUMP, 0x06, p)
            }
            0x0F => {
                let (address, quantity) = (word(0), word(2));
                for i in 0..quantity {
                    let on = p[5 + usize::from(i / 8)] & (1 << (i % 8)) != 0;
                    self.coils.insert(address + i, on);
                    self.journal.push(Step::Coil(address + i, on));
                }
                frame::encode(PUMP, 0x0F, &p[..4])
            }
            0x04 => {
                let (address, count) = (word(0), word(2));
                self.journal.push(Step::Read(address));
                let mut data = vec![(count * 2) as u8];
                for i in 0..count {
                    // Speed feedback mirrors the setpoint
                    let value = self.registers.get(&(address + i)).copied().unwrap_or(0);
                    data.extend_from_slice(&value.to_be_bytes());
                }
                frame::encode(PUMP, 0x04, &data)
            }
            other => frame::encode(PUMP, other | 0x80, &[0x01]),
        };
        Some(reply)
    }
}

/// Serve silence-delimited frames until the master hangs up
fn spawn_pump(mut line: DuplexStream, state: Arc<Mutex<PumpState>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = [0u8; 256];
        loop {
            let mut raw = Vec::new();
            match line.read(&mut buffer).await {
                Ok(0) | Err(_) => return,
                Ok(n) => raw.extend_from_slice(&buffer[..n]),
            }
            while let Ok(Ok(n)) = timeout(Duration::from_millis(2), line.read(&mut buffer)).await {
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buffer[..n]);
            }

            let (reply, delay) = {
                let mut state = state.lock().unwrap();
                (state.handle(&raw), state.first_reply_delay.take())
            };
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            if let Some(reply) = reply {
                if line.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    })
}

fn config() -> SerialConfig {
    SerialConfig::new()
        .with_baud_rate(115_200)
        .with_response_timeout(Duration::from_millis(200))
        .with_max_retries(2)
}

fn connect(
    state: PumpState,
    config: SerialConfig,
) -> (
    GenericModbusClient<RtuTransport<DuplexStream>>,
    Arc<Mutex<PumpState>>,
    JoinHandle<()>,
) {
    let (master, slave) = duplex(1024);
    let state = Arc::new(Mutex::new(state));
    let server = spawn_pump(slave, Arc::clone(&state));
    let transport = RtuTransport::from_stream(master, config);
    (
        GenericModbusClient::with_config(transport, &config),
        state,
        server,
    )
}

#[tokio::test]
async fn pump_sequence_runs_in_order() {
    let (client, state, _server) = connect(PumpState::default(), config());

    client.write_coil(PUMP, 1000, true).await.unwrap();
    client.write_register(PUMP, 999, 50).await.unwrap();
    client.write_coil(PUMP, 999, true).await.unwrap();
    for _ in 0..5 {
        let speed = client.read_input_registers(PUMP, 999, 1).await.unwrap();
        assert_eq!(speed, vec![50]);
    }
    client.write_coil(PUMP, 999, false).await.unwrap();

    let mut expected = vec![
        Step::Coil(1000, true),
        Step::Register(999, 50),
        Step::Coil(999, true),
    ];
    expected.extend(std::iter::repeat(Step::Read(999)).take(5));
    expected.push(Step::Coil(999, false));

    let state = state.lock().unwrap();
    assert_eq!(state.journal, expected);
    assert_eq!(state.coils.get(&999), Some(&false));
    assert_eq!(state.coils.get(&1000), Some(&true));

    let stats = client.transaction_stats();
    assert_eq!(stats.transactions, 9);
    assert_eq!(stats.retries, 0);
}

#[tokio::test]
async fn repeated_coil_write_is_idempotent() {
    let (client, state, _server) = connect(PumpState::default(), config());

    client.write_coil(PUMP, 999, true).await.unwrap();
    client.write_coil(PUMP, 999, true).await.unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.coils.get(&999), Some(&true));
    assert_eq!(state.coils.len(), 1);
}

#[tokio::test]
async fn rejected_single_coil_falls_back_to_multiple_coils() {
    let pump = PumpState {
        reject_single_coil: true,
        ..PumpState::default()
    };
    let (client, state, _server) = connect(pump, config());

    let used = FallbackPolicy::default()
        .write_coil(&client, PUMP, 999, true)
        .await
        .unwrap();
    assert_eq!(used, ModbusFunction::WriteMultipleCoils);

    // Without the policy the exception reaches the caller untouched
    let err = client.write_coil(PUMP, 999, false).await.unwrap_err();
    assert!(err.is_function_unsupported());

    let state = state.lock().unwrap();
    assert_eq!(state.journal, vec![Step::Coil(999, true)]);
}

#[tokio::test]
async fn concurrent_callers_never_interleave_frames() {
    let (client, state, _server) = connect(PumpState::default(), config());
    let client = Arc::new(client);

    let tasks: Vec<_> = (0..8u16)
        .map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client.write_register(PUMP, 100 + i, i * 10).await?;
                client.read_input_registers(PUMP, 100 + i, 1).await
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        let values = task.await.unwrap().unwrap();
        assert_eq!(values, vec![i as u16 * 10]);
    }

    assert_eq!(state.lock().unwrap().journal.len(), 16);
    assert_eq!(client.transaction_stats().retries, 0);
}

#[tokio::test]
async fn cancelled_transaction_leaves_line_usable() {
    let pump = PumpState {
        first_reply_delay: Some(Duration::from_millis(60)),
        ..PumpState::default()
    };
    let (client, _state, _server) = connect(pump, config());

    let cancelled = timeout(
        Duration::from_millis(20),
        client.read_input_registers(PUMP, 999, 1),
    )
    .await;
    assert!(cancelled.is_err());

    // Let the late reply land on the line before the next request
    sleep(Duration::from_millis(100)).await;

    client.write_register(PUMP, 999, 50).await.unwrap();
    assert_eq!(client.read_input_registers(PUMP, 999, 1).await.unwrap(), vec![50]);
    assert!(client.get_stats().bytes_discarded > 0);
}

#[tokio::test]
async fn late_reply_to_cancelled_read_is_not_taken_for_the_next() {
    let mut pump = PumpState {
        first_reply_delay: Some(Duration::from_millis(60)),
        ..PumpState::default()
    };
    pump.registers.insert(999, 50);
    pump.registers.insert(1000, 7);
    let (client, _state, _server) = connect(pump, config());

    let cancelled = timeout(
        Duration::from_millis(20),
        client.read_input_registers(PUMP, 999, 1),
    )
    .await;
    assert!(cancelled.is_err());

    // Issued while the reply to register 999 is still on its way
    let values = client.read_input_registers(PUMP, 1000, 1).await.unwrap();
    assert_eq!(values, vec![7]);
    assert!(client.get_stats().bytes_discarded > 0);
    assert_eq!(client.transaction_stats().unexpected_responses, 0);
}

#[tokio::test]
async fn silent_slave_times_out_after_all_attempts() {
    let config = config().with_response_timeout(Duration::from_millis(30));
    let (client, _state, _server) = connect(PumpState::default(), config);

    let err = client.read_input_registers(7, 999, 1).await.unwrap_err();
    assert_eq!(
        err,
        ModbusError::Timeout {
            attempts: 3,
            timeout_ms: 30,
            last_frame_error: None,
        }
    );
    assert_eq!(client.get_stats().requests_sent, 3);
    assert!(client.is_connected());
}

#[tokio::test]
async fn scoped_sequence_closes_the_line_on_error() {
    let (client, _state, server) = connect(PumpState::default(), config());

    let result = scoped(client, |client| {
        Box::pin(async move {
            client.write_coil(PUMP, 1000, true).await?;
            // Slave 0 is rejected before anything is sent
            client.write_register(0, 999, 50).await
        })
    })
    .await;

    assert!(matches!(result, Err(ModbusError::InvalidArgument { .. })));
    // The pump sees the master hang up
    timeout(Duration::from_secs(1), server).await.unwrap().unwrap();
}
