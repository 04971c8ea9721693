//! Per-operation function-code routing with fallback
//!
//! Some devices implement Write Multiple Coils (0x0F) but reject Write Single
//! Coil (0x05) with an Illegal Function exception. [`FallbackPolicy`] keeps a
//! routing table from each [`Operation`] to the function code tried first and
//! the one used when the device rejects it. [`FallbackPolicy::execute`] sends
//! any [`Command`] through its route; by default only coil writes have a
//! fallback, retrying a rejected 0x05 as a one-coil 0x0F write at the same
//! address.
//!
//! ```rust,no_run
//! use voltage_rtu::fallback::FallbackPolicy;
//! use voltage_rtu::{ModbusRtuClient, SerialConfig};
//!
//! # async fn example() -> voltage_rtu::ModbusResult<()> {
//! let client = ModbusRtuClient::connect("/dev/ttyUSB0", SerialConfig::default())?;
//! let policy = FallbackPolicy::default();
//! let used = policy.write_coil(&client, 1, 999, true).await?;
//! println!("coil written with {}", used);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use tracing::warn;

use crate::client::ModbusClient;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusFunction, SlaveId};

/// Logical operations the policy can route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ReadInputRegisters,
    WriteRegister,
    WriteCoil,
    WriteCoils,
}

/// One operation with its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteRegister { address: u16, value: u16 },
    WriteCoil { address: u16, value: bool },
    WriteCoils { address: u16, values: &'a [bool] },
}

impl Command<'_> {
    pub fn operation(&self) -> Operation {
        match self {
            Command::ReadInputRegisters { .. } => Operation::ReadInputRegisters,
            Command::WriteRegister { .. } => Operation::WriteRegister,
            Command::WriteCoil { .. } => Operation::WriteCoil,
            Command::WriteCoils { .. } => Operation::WriteCoils,
        }
    }
}

/// Result of a routed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedReply {
    /// Function code the device accepted
    pub function: ModbusFunction,
    /// Registers read; empty for writes
    pub registers: Vec<u16>,
}

/// Function code to try first, and the one to use when it is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionRoute {
    pub primary: ModbusFunction,
    pub fallback: Option<ModbusFunction>,
}

impl FunctionRoute {
    pub fn single(function: ModbusFunction) -> Self {
        Self {
            primary: function,
            fallback: None,
        }
    }

    pub fn with_fallback(primary: ModbusFunction, fallback: ModbusFunction) -> Self {
        Self {
            primary,
            fallback: Some(fallback),
        }
    }
}

/// Which errors switch to the fallback function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackTrigger {
    /// Only an Illegal Function exception
    #[default]
    FunctionUnsupported,
    /// Any device exception
    AnyException,
}

/// Routing table plus trigger
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    routes: HashMap<Operation, FunctionRoute>,
    trigger: FallbackTrigger,
}

impl Default for FallbackPolicy {
    /// `WriteCoil` falls back from 0x05 to 0x0F; everything else uses one function.
    fn default() -> Self {
        let routes = HashMap::from([
            (
                Operation::ReadInputRegisters,
                FunctionRoute::single(ModbusFunction::ReadInputRegisters),
            ),
            (
                Operation::WriteRegister,
                FunctionRoute::single(ModbusFunction::WriteSingleRegister),
            ),
            (
                Operation::WriteCoil,
                FunctionRoute::with_fallback(
                    ModbusFunction::WriteSingleCoil,
                    ModbusFunction::WriteMultipleCoils,
                ),
            ),
            (
                Operation::WriteCoils,
                FunctionRoute::single(ModbusFunction::WriteMultipleCoils),
            ),
        ]);

        Self {
            routes,
            trigger: FallbackTrigger::default(),
        }
    }
}

impl FallbackPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trigger(mut self, trigger: FallbackTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_route(mut self, operation: Operation, route: FunctionRoute) -> Self {
        self.routes.insert(operation, route);
        self
    }

    pub fn trigger(&self) -> FallbackTrigger {
        self.trigger
    }

    pub fn route(&self, operation: Operation) -> Option<FunctionRoute> {
        self.routes.get(&operation).copied()
    }

    /// Whether `err` from the primary function should switch to the fallback
    pub fn should_fall_back(&self, err: &ModbusError) -> bool {
        match self.trigger {
            FallbackTrigger::FunctionUnsupported => err.is_function_unsupported(),
            FallbackTrigger::AnyException => matches!(err, ModbusError::Exception { .. }),
        }
    }

    /// Send `command` with its route's primary function, switching to the
    /// fallback function when the device rejects the primary.
    ///
    /// An operation without a route uses its natural function code.
    pub async fn execute<C: ModbusClient>(
        &self,
        client: &C,
        slave_id: SlaveId,
        command: Command<'_>,
    ) -> ModbusResult<RoutedReply> {
        let operation = command.operation();
        let route = self
            .route(operation)
            .unwrap_or(FunctionRoute::single(natural_function(operation)));

        let err = match send(client, route.primary, slave_id, command).await {
            Ok(registers) => {
                return Ok(RoutedReply {
                    function: route.primary,
                    registers,
                })
            }
            Err(err) => err,
        };

        match route.fallback {
            Some(fallback) if self.should_fall_back(&err) => {
                warn!(
                    slave_id,
                    ?operation,
                    primary = %route.primary,
                    fallback = %fallback,
                    error = %err,
                    "function rejected, retrying with fallback function"
                );
                let registers = send(client, fallback, slave_id, command).await?;
                Ok(RoutedReply {
                    function: fallback,
                    registers,
                })
            }
            _ => Err(err),
        }
    }

    /// Write one coil, returning the function code that the device accepted.
    pub async fn write_coil<C: ModbusClient>(
        &self,
        client: &C,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> ModbusResult<ModbusFunction> {
        let reply = self
            .execute(client, slave_id, Command::WriteCoil { address, value })
            .await?;
        Ok(reply.function)
    }
}

fn natural_function(operation: Operation) -> ModbusFunction {
    match operation {
        Operation::ReadInputRegisters => ModbusFunction::ReadInputRegisters,
        Operation::WriteRegister => ModbusFunction::WriteSingleRegister,
        Operation::WriteCoil => ModbusFunction::WriteSingleCoil,
        Operation::WriteCoils => ModbusFunction::WriteMultipleCoils,
    }
}

/// Issue `command` with one specific function code.
async fn send<C: ModbusClient>(
    client: &C,
    function: ModbusFunction,
    slave_id: SlaveId,
    command: Command<'_>,
) -> ModbusResult<Vec<u16>> {
    match (function, command) {
        (ModbusFunction::ReadInputRegisters, Command::ReadInputRegisters { address, quantity }) => {
            client.read_04(slave_id, address, quantity).await
        }
        (ModbusFunction::WriteSingleRegister, Command::WriteRegister { address, value }) => {
            client.write_06(slave_id, address, value).await.map(|()| Vec::new())
        }
        (ModbusFunction::WriteSingleCoil, Command::WriteCoil { address, value }) => {
            client.write_05(slave_id, address, value).await.map(|()| Vec::new())
        }
        (ModbusFunction::WriteSingleCoil, Command::WriteCoils { address, values: &[value] }) => {
            client.write_05(slave_id, address, value).await.map(|()| Vec::new())
        }
        (ModbusFunction::WriteMultipleCoils, Command::WriteCoil { address, value }) => client
            .write_0f(slave_id, address, &[value])
            .await
            .map(|()| Vec::new()),
        (ModbusFunction::WriteMultipleCoils, Command::WriteCoils { address, values }) => client
            .write_0f(slave_id, address, values)
            .await
            .map(|()| Vec::new()),
        (function, command) => Err(ModbusError::configuration(format!(
            "{} cannot carry {:?}",
            function,
            command.operation()
        ))),
    }
}
