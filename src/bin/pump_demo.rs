//! Peristaltic Pump Demo
//!
//! Drives one pump over Modbus RTU:
//! - direction coil 1000 ON
//! - speed setpoint register 999 = 50
//! - start coil 999 ON
//! - poll speed feedback (input register 999) five times, 0.5 s apart
//! - stop coil 999 OFF
//!
//! The port is closed on every exit path. Coil writes fall back to 0x0F for
//! pumps that reject 0x05.
//!
//! Usage: cargo run --bin pump_demo [port] [baud]
//! Example: RUST_LOG=voltage_rtu=debug cargo run --bin pump_demo /dev/ttyUSB0 9600

use std::time::Duration;

use tokio::time::sleep;
use tracing_subscriber::EnvFilter;
use voltage_rtu::{
    scoped, FallbackPolicy, ModbusClient, ModbusError, ModbusRtuClient, SerialConfig,
};

const PUMP_SLAVE_ID: u8 = 1;
const DIRECTION_COIL: u16 = 1000;
const START_COIL: u16 = 999;
const SPEED_REGISTER: u16 = 999;
const SPEED_SETPOINT: u16 = 50;
const POLL_COUNT: usize = 5;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Short label for a failed read
fn error_kind(err: &ModbusError) -> String {
    match err {
        ModbusError::Io { kind, .. } => format!("I/O: {}", kind),
        ModbusError::Frame(_) => "corrupt frame".to_string(),
        ModbusError::Timeout { .. } => "timeout".to_string(),
        ModbusError::Exception { code, .. } => format!("exception: {}", code),
        ModbusError::InvalidArgument { .. } => "invalid argument".to_string(),
        ModbusError::UnexpectedResponse { .. } => "unexpected response".to_string(),
        ModbusError::Configuration { .. } => "configuration".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let port = args.get(1).map(String::as_str).unwrap_or("/dev/ttyUSB0");
    let baud_rate = match args.get(2) {
        Some(baud) => baud.parse::<u32>()?,
        None => 9600,
    };

    println!("🚀 {}", voltage_rtu::info());
    println!("=============================");
    println!("🔌 Port: {} @ {} baud (8E1)\n", port, baud_rate);

    let config = SerialConfig::new().with_baud_rate(baud_rate);
    let client = ModbusRtuClient::connect(port, config)?;
    client.set_packet_logging(true).await;
    println!("✅ Connected");

    let policy = FallbackPolicy::default();

    scoped(client, |client| {
        Box::pin(async move {
            let used = policy
                .write_coil(client, PUMP_SLAVE_ID, DIRECTION_COIL, true)
                .await?;
            println!("↪️  Direction set (coil {}, {})", DIRECTION_COIL, used);

            client
                .write_register(PUMP_SLAVE_ID, SPEED_REGISTER, SPEED_SETPOINT)
                .await?;
            println!("⚙️  Speed setpoint {} written", SPEED_SETPOINT);

            let used = policy
                .write_coil(client, PUMP_SLAVE_ID, START_COIL, true)
                .await?;
            println!("▶️  Pump started ({})", used);

            println!("\n📊 Speed feedback");
            for poll in 1..=POLL_COUNT {
                // Give the controller time to ramp before each reading
                sleep(POLL_INTERVAL).await;
                match client
                    .read_input_registers(PUMP_SLAVE_ID, SPEED_REGISTER, 1)
                    .await
                {
                    Ok(values) => println!("  [{}] speed = {:?}", poll, values),
                    Err(e) => println!("  [{}] read error ({}): {}", poll, error_kind(&e), e),
                }
            }

            let used = policy
                .write_coil(client, PUMP_SLAVE_ID, START_COIL, false)
                .await?;
            println!("\n⏹️  Pump stopped ({})", used);

            let stats = client.get_stats();
            println!(
                "📈 Frames sent: {}, received: {}, timeouts: {}",
                stats.requests_sent, stats.responses_received, stats.timeouts
            );
            Ok::<(), ModbusError>(())
        })
    })
    .await?;

    println!("🔒 Port closed");
    Ok(())
}
