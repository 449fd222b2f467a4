//! Lights: RGB heads and switched lamps.

use log::info;
use serde_json::Value;

use super::{Command, DeviceInterface, Transmit, TransmitError, Wiring};
use crate::catalog::{Address, ControlValue};
use crate::config::Family;
use crate::host::Link;
use crate::protocol;

pub struct Light {
    address: Address,
    link: Link,
    wiring: Option<Wiring>,
}

impl Light {
    pub fn new(address: Address, wiring: Option<Wiring>) -> Light {
        let link = match &wiring {
            Some(wiring) => wiring.link(),
            None => Link::new(true),
        };
        info!("Light {} on {:?}", address, wiring.as_ref().map(Wiring::hmtl_address));
        Light {
            address,
            link,
            wiring,
        }
    }
}

impl DeviceInterface for Light {
    fn address(&self) -> &Address {
        &self.address
    }

    fn family(&self) -> Option<Family> {
        Some(Family::Light)
    }

    fn available(&self) -> bool {
        self.link.is_up()
    }

    fn transmitter(&self) -> Option<&dyn Transmit> {
        self.wiring.as_ref().map(|_| self as &dyn Transmit)
    }
}

impl Transmit for Light {
    fn transmit(&self, cmd: &Command<'_>) -> Result<Option<Value>, TransmitError> {
        let wiring = match &self.wiring {
            Some(wiring) => wiring,
            None => return Err(TransmitError::unsupported(cmd.control)),
        };
        let address = wiring.hmtl_address();
        let output = wiring.output(cmd.control);

        let frame = match cmd.value {
            ControlValue::Rgb(red, green, blue) => protocol::rgb_msg(address, output, red, green, blue),
            ControlValue::Switch(on) => protocol::value_msg(address, output, if on { 255 } else { 0 }),
            _ => return Err(TransmitError::unsupported(cmd.control)),
        };

        wiring.transmit(output, frame)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::test::sample;
    use crate::envelope::{CommandRequest, ErrorKind};
    use crate::interface::test::MockHost;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_rgb_head() {
        let host = MockHost::new(true);
        let light = Light::new(Address::from("25"), Some(Wiring::new(host.clone(), 25, HashMap::new())));

        let catalog = sample();
        let control = catalog.device(&Address::from("25")).unwrap().control("0").unwrap();
        let request = CommandRequest::new("lights", Address::from("25"), "0", json!("10,20,30"));
        let result = light.send(&Command {
            request: &request,
            control,
            value: ControlValue::Rgb(10, 20, 30),
        });
        assert!(result.is_ok());
        assert_eq!(vec![protocol::rgb_msg(25, 0, 10, 20, 30)], *host.frames.lock().unwrap());

        // Lights don't know how to run timed programs.
        let result = light.send(&Command {
            request: &request,
            control,
            value: ControlValue::Integer(100),
        });
        assert_eq!(Some(ErrorKind::MethodNotImplemented), result.kind);
    }

    #[test]
    fn test_follows_host_link() {
        let host = MockHost::new(true);
        let light = Light::new(Address::from("25"), Some(Wiring::new(host.clone(), 25, HashMap::new())));
        assert!(light.available());
        host.link.set(false);
        assert!(!light.available());
    }
}
