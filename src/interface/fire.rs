//! Flame effects: pilot ignitors and poofers.

use log::info;
use serde_json::Value;

use super::{Command, DeviceInterface, Transmit, TransmitError, Wiring};
use crate::catalog::{Address, ControlValue};
use crate::config::Family;
use crate::host::Link;
use crate::protocol;

/// Poofer solenoid fully open.
const OPEN: [u8; 3] = [255, 255, 255];
const CLOSED: [u8; 3] = [0, 0, 0];

pub struct Fire {
    address: Address,
    link: Link,
    wiring: Option<Wiring>,
}

impl Fire {
    pub fn new(address: Address, wiring: Option<Wiring>) -> Fire {
        let link = match &wiring {
            Some(wiring) => wiring.link(),
            None => Link::new(true),
        };
        info!("Fire {} on {:?}", address, wiring.as_ref().map(Wiring::hmtl_address));
        Fire {
            address,
            link,
            wiring,
        }
    }
}

impl DeviceInterface for Fire {
    fn address(&self) -> &Address {
        &self.address
    }

    fn family(&self) -> Option<Family> {
        Some(Family::Fire)
    }

    fn available(&self) -> bool {
        self.link.is_up()
    }

    fn transmitter(&self) -> Option<&dyn Transmit> {
        self.wiring.as_ref().map(|_| self as &dyn Transmit)
    }
}

impl Transmit for Fire {
    fn transmit(&self, cmd: &Command<'_>) -> Result<Option<Value>, TransmitError> {
        let wiring = match &self.wiring {
            Some(wiring) => wiring,
            None => return Err(TransmitError::unsupported(cmd.control)),
        };
        let address = wiring.hmtl_address();
        let output = wiring.output(cmd.control);

        let frame = match cmd.value {
            ControlValue::Switch(on) => protocol::value_msg(address, output, if on { 255 } else { 0 }),
            // Open the valve for `ms`, then let the module close it.
            ControlValue::Integer(ms) if ms >= 0 => {
                protocol::timed_change_msg(address, output, ms.min(u32::MAX as i64) as u32, OPEN, CLOSED)
            }
            _ => return Err(TransmitError::unsupported(cmd.control)),
        };

        wiring.transmit(output, frame)
    }
}
