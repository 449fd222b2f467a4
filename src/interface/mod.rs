//! Device interfaces turn validated commands into transmissions.
//!
//! Every catalog device gets one interface. What an interface can do depends
//! on its family and on whether it is wired to a host.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::{json, Value};

use crate::catalog::{Address, ControlDescriptor, ControlValue, DeviceDescriptor};
use crate::config::{DeviceBinding, Family};
use crate::envelope::{CommandRequest, CommandResult, ErrorKind};
use crate::host::{EffectHost, HostError, Link};
use crate::protocol;

mod fire;
mod light;
pub use self::fire::Fire;
pub use self::light::Light;

/// A request that has passed routing: the device exists, the control exists
/// and the value fits the control.
pub struct Command<'a> {
    pub request: &'a CommandRequest,
    pub control: &'a ControlDescriptor,
    pub value: ControlValue,
}

/// Why a transmission didn't happen.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmitError {
    pub kind: ErrorKind,
    pub msg: String,
}

impl TransmitError {
    /// The family has no way to express this control.
    pub fn unsupported(control: &ControlDescriptor) -> TransmitError {
        TransmitError {
            kind: ErrorKind::MethodNotImplemented,
            msg: format!("Control type {} not supported", control.kind),
        }
    }
}

impl From<HostError> for TransmitError {
    fn from(err: HostError) -> TransmitError {
        let kind = match err {
            HostError::Disconnected => ErrorKind::InterfaceUnavailable,
            HostError::Timeout(_) => ErrorKind::TransmitTimeout,
            HostError::Rejected => ErrorKind::TransmitRejected,
            HostError::Io(_) => ErrorKind::TransmitFailed,
        };
        TransmitError {
            kind,
            msg: err.to_string(),
        }
    }
}

/// The optional send capability of an interface.
pub trait Transmit: Send + Sync {
    /// Make exactly one transmission attempt, returning an optional
    /// acknowledgement payload.
    fn transmit(&self, cmd: &Command<'_>) -> Result<Option<Value>, TransmitError>;
}

/// Server-side adapter for one device.
pub trait DeviceInterface: Send + Sync {
    fn address(&self) -> &Address;

    /// The family driving the device, if any.
    fn family(&self) -> Option<Family> {
        None
    }

    /// Is the device reachable right now?
    fn available(&self) -> bool;

    /// The send capability, if this device has one wired up.
    fn transmitter(&self) -> Option<&dyn Transmit>;

    /// Send a command to the device.
    fn send(&self, cmd: &Command<'_>) -> CommandResult {
        // Never touch a device we know is down.
        if !self.available() {
            return CommandResult::error(
                cmd.request,
                ErrorKind::InterfaceUnavailable,
                "Interface unavailable",
            );
        }

        let transmitter = match self.transmitter() {
            Some(transmitter) => transmitter,
            None => {
                return CommandResult::error(
                    cmd.request,
                    ErrorKind::MethodNotImplemented,
                    "Method not implemented",
                )
            }
        };

        match transmitter.transmit(cmd) {
            Ok(ack) => CommandResult::ok(cmd.request, "Sent", ack),
            Err(err) => {
                warn!("Device {} send failed: {}", self.address(), err.msg);
                CommandResult::error(cmd.request, err.kind, err.msg)
            }
        }
    }
}

impl Family {
    /// Handler category the family's devices are addressed under.
    pub fn category(self) -> &'static str {
        match self {
            Family::Light => "lights",
            Family::Fire => "fire",
        }
    }
}

/// How a device reaches its HMTL module.
pub struct Wiring {
    host: Arc<dyn EffectHost>,
    hmtl_address: u16,
    /// Control id -> HMTL output number.
    outputs: HashMap<String, u8>,
}

impl Wiring {
    pub fn new(host: Arc<dyn EffectHost>, hmtl_address: u16, outputs: HashMap<String, u8>) -> Wiring {
        Wiring {
            host,
            hmtl_address,
            outputs,
        }
    }

    pub fn link(&self) -> Link {
        self.host.link()
    }

    pub fn hmtl_address(&self) -> u16 {
        self.hmtl_address
    }

    /// Output number for a control: explicit mapping, else the control id.
    pub fn output(&self, control: &ControlDescriptor) -> u8 {
        self.outputs
            .get(&control.id)
            .copied()
            .or_else(|| control.id.parse().ok())
            .unwrap_or(0)
    }

    /// Put one frame on the host and describe what went out.
    fn transmit(&self, output: u8, frame: Vec<u8>) -> Result<Option<Value>, TransmitError> {
        debug!("HMTL {} output {}: {} B", self.hmtl_address, output, frame.len());
        self.host.transmit(&frame)?;
        Ok(Some(json!({
            "hmtl_address": self.hmtl_address,
            "output": output,
            "bytes": frame.len(),
        })))
    }
}

/// A catalog device no family was configured for.
pub struct Unwired {
    address: Address,
}

impl Unwired {
    pub fn new(address: Address) -> Unwired {
        Unwired { address }
    }
}

impl DeviceInterface for Unwired {
    fn address(&self) -> &Address {
        &self.address
    }

    /// Nothing to be unreachable.
    fn available(&self) -> bool {
        true
    }

    fn transmitter(&self) -> Option<&dyn Transmit> {
        None
    }
}

/// Build the interface for one catalog device.
///
/// Returns the name of a missing host as the error.
pub fn build(
    device: &DeviceDescriptor,
    binding: Option<&DeviceBinding>,
    hosts: &HashMap<String, Arc<dyn EffectHost>>,
) -> Result<Box<dyn DeviceInterface>, String> {
    let binding = match binding {
        Some(binding) => binding,
        None => {
            warn!("Device {} has no binding, it can't transmit", device.address);
            return Ok(Box::new(Unwired::new(device.address.clone())));
        }
    };

    let wiring = match &binding.host {
        Some(name) => {
            let host = hosts.get(name).ok_or_else(|| name.clone())?;
            let hmtl_address = binding
                .hmtl_address
                .or_else(|| device.address.as_str().parse().ok())
                .unwrap_or(protocol::BROADCAST);
            Some(Wiring::new(host.clone(), hmtl_address, binding.outputs.clone()))
        }
        None => None,
    };

    let address = device.address.clone();
    let interface: Box<dyn DeviceInterface> = match binding.family {
        Family::Light => Box::new(Light::new(address, wiring)),
        Family::Fire => Box::new(Fire::new(address, wiring)),
    };
    Ok(interface)
}
