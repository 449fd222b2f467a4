//! The Router maps device addresses to device interfaces.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use crate::catalog::{Address, Catalog, DeviceDescriptor};
use crate::config::{DeviceBinding, Family};
use crate::envelope::{CommandRequest, CommandResult, ErrorKind};
use crate::host::EffectHost;
use crate::interface::{self, Command, DeviceInterface, Unwired};

mod handler;
pub use self::handler::{handlers, CommandHandler};

struct Device {
    descriptor: DeviceDescriptor,
    interface: Box<dyn DeviceInterface>,
}

/// Routers validate commands against the catalog and hand them to the
/// matching device interface.
///
/// Nothing in a Router changes after construction; interfaces keep track of
/// their own availability.
pub struct Router {
    catalog: Catalog,
    devices: HashMap<Address, Device>,
}

/// Result type for Router setup.
pub type RouterResult<T> = Result<T, RouterError>;

#[derive(Debug, Error)]
pub enum RouterError {
    /// A device binding names a host that wasn't set up.
    #[error("device {device} refers to unknown host {host}")]
    UnknownHost { device: Address, host: String },
    /// An interface was supplied for a device the catalog doesn't know.
    #[error("interface for {0} has no catalog entry")]
    NotInCatalog(Address),
}

impl Router {
    /// Wire up every catalog device from its binding.
    pub fn from_config(
        catalog: Catalog,
        bindings: &HashMap<Address, DeviceBinding>,
        hosts: &HashMap<String, Arc<dyn EffectHost>>,
    ) -> RouterResult<Router> {
        for address in bindings.keys() {
            if catalog.device(address).is_none() {
                warn!("Binding for {} has no catalog entry, ignoring it", address);
            }
        }

        let mut interfaces = Vec::with_capacity(catalog.devices().len());
        for device in catalog.devices() {
            let interface = interface::build(device, bindings.get(&device.address), hosts)
                .map_err(|host| RouterError::UnknownHost {
                    device: device.address.clone(),
                    host,
                })?;
            interfaces.push(interface);
        }

        Self::new(catalog, interfaces)
    }

    /// Assemble a router from ready-made interfaces. Catalog devices without
    /// an interface can't transmit.
    pub fn new(catalog: Catalog, interfaces: Vec<Box<dyn DeviceInterface>>) -> RouterResult<Router> {
        let mut by_address: HashMap<Address, Box<dyn DeviceInterface>> = HashMap::new();
        for interface in interfaces {
            if catalog.device(interface.address()).is_none() {
                return Err(RouterError::NotInCatalog(interface.address().clone()));
            }
            by_address.insert(interface.address().clone(), interface);
        }

        let devices = catalog
            .devices()
            .iter()
            .map(|descriptor| {
                let interface = by_address
                    .remove(&descriptor.address)
                    .unwrap_or_else(|| {
                        Box::new(Unwired::new(descriptor.address.clone())) as Box<dyn DeviceInterface>
                    });
                (
                    descriptor.address.clone(),
                    Device {
                        descriptor: descriptor.clone(),
                        interface,
                    },
                )
            })
            .collect();

        Ok(Router { catalog, devices })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Is the device reachable? `None` for unknown devices.
    pub fn available(&self, address: &Address) -> Option<bool> {
        self.devices
            .get(address)
            .map(|device| device.interface.available())
    }

    /// The family driving a device. `None` for unknown or unwired devices.
    pub fn family(&self, address: &Address) -> Option<Family> {
        self.devices
            .get(address)
            .and_then(|device| device.interface.family())
    }

    /// Validate a command and pass it to its device.
    pub fn handle_command(&self, request: &CommandRequest) -> CommandResult {
        debug!(
            "Command {}/{} = {}",
            request.device_address, request.control_id, request.value
        );

        let device = match self.devices.get(&request.device_address) {
            Some(device) => device,
            None => {
                return CommandResult::error(
                    request,
                    ErrorKind::UnknownDevice,
                    format!("Unknown device {}", request.device_address),
                )
            }
        };

        let control = match device.descriptor.control(&request.control_id) {
            Some(control) => control,
            None => {
                return CommandResult::error(
                    request,
                    ErrorKind::UnknownControl,
                    format!(
                        "Unknown control {} on {}",
                        request.control_id, device.descriptor.name
                    ),
                )
            }
        };

        let value = match control.validate(&request.value) {
            Ok(value) => value,
            Err(err) => return CommandResult::error(request, ErrorKind::InvalidValue, err.0),
        };

        device.interface.send(&Command {
            request,
            control,
            value,
        })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::catalog::test::sample;
    use crate::envelope::Status;
    use crate::interface::test::{hosts, MockHost};
    use serde_json::{json, Value};

    /// Sample catalog with the flame box on the mock bus and the tiki head
    /// bound to the light family without a host.
    pub(crate) fn router(host: &Arc<MockHost>) -> Router {
        let mut bindings = HashMap::new();
        bindings.insert(
            Address::from("12"),
            DeviceBinding {
                family: Family::Fire,
                host: Some("bus".to_string()),
                hmtl_address: None,
                outputs: HashMap::new(),
            },
        );
        bindings.insert(
            Address::from("25"),
            DeviceBinding {
                family: Family::Light,
                host: None,
                hmtl_address: None,
                outputs: HashMap::new(),
            },
        );
        Router::from_config(sample(), &bindings, &hosts(host)).unwrap()
    }

    fn request(device: &str, control: &str, value: Value) -> CommandRequest {
        CommandRequest::new("command", Address::from(device), control, value)
    }

    #[test]
    fn test_poof_in_bounds() {
        let host = MockHost::new(true);
        let router = router(&host);
        let result = router.handle_command(&request("12", "1", json!(1500)));
        assert_eq!(Status::Ok, result.status);
        assert_eq!(1, host.calls());
    }

    #[test]
    fn test_poof_out_of_bounds() {
        let host = MockHost::new(true);
        let router = router(&host);
        let result = router.handle_command(&request("12", "1", json!(5000)));
        assert_eq!(Status::Error, result.status);
        assert_eq!(Some(ErrorKind::InvalidValue), result.kind);
        assert_eq!(0, host.calls());
    }

    #[test]
    fn test_bounds_inclusive() {
        let host = MockHost::new(true);
        let router = router(&host);
        assert!(router.handle_command(&request("12", "1", json!(100))).is_ok());
        assert!(router.handle_command(&request("12", "1", json!(2000))).is_ok());
        assert!(!router.handle_command(&request("12", "1", json!(99))).is_ok());
        assert!(!router.handle_command(&request("12", "1", json!(2001))).is_ok());
        assert_eq!(2, host.calls());
    }

    #[test]
    fn test_no_send_wired() {
        let host = MockHost::new(true);
        let router = router(&host);
        for value in [json!("1,2,3"), json!("0,0,0")] {
            let result = router.handle_command(&request("25", "0", value));
            assert_eq!(Some(ErrorKind::MethodNotImplemented), result.kind);
        }
        assert_eq!(0, host.calls());
    }

    #[test]
    fn test_family() {
        let host = MockHost::new(true);
        let router = router(&host);
        assert_eq!(Some(Family::Fire), router.family(&Address::from("12")));
        assert_eq!(Some(Family::Light), router.family(&Address::from("25")));
        assert_eq!(None, router.family(&Address::from("99")));
    }

    #[test]
    fn test_unavailable() {
        let host = MockHost::new(false);
        let router = router(&host);
        assert_eq!(Some(false), router.available(&Address::from("12")));
        for (control, value) in [("0", json!("on")), ("1", json!(500))] {
            let result = router.handle_command(&request("12", control, value));
            assert_eq!(Some(ErrorKind::InterfaceUnavailable), result.kind);
        }
        assert_eq!(0, host.calls());
    }

    #[test]
    fn test_unknown_device_and_control() {
        let host = MockHost::new(true);
        let router = router(&host);
        let result = router.handle_command(&request("99", "1", json!(1500)));
        assert_eq!(Some(ErrorKind::UnknownDevice), result.kind);
        assert_eq!(None, router.available(&Address::from("99")));

        let result = router.handle_command(&request("12", "7", json!(1500)));
        assert_eq!(Some(ErrorKind::UnknownControl), result.kind);
        assert_eq!(0, host.calls());
    }

    #[test]
    fn test_result_echoes_request() {
        let host = MockHost::new(true);
        let router = router(&host);
        let req = request("12", "1", json!(5000));
        let result = router.handle_command(&req);
        assert_eq!(req.payload(), &result.opts);
    }

    #[test]
    fn test_unknown_host() {
        let host = MockHost::new(true);
        let mut bindings = HashMap::new();
        bindings.insert(
            Address::from("12"),
            DeviceBinding {
                family: Family::Fire,
                host: Some("elsewhere".to_string()),
                hmtl_address: None,
                outputs: HashMap::new(),
            },
        );
        let err = Router::from_config(sample(), &bindings, &hosts(&host)).err().unwrap();
        assert!(matches!(err, RouterError::UnknownHost { host, .. } if host == "elsewhere"));
    }

    #[test]
    fn test_interface_outside_catalog() {
        let interfaces: Vec<Box<dyn DeviceInterface>> = vec![Box::new(Unwired::new(Address::from("3")))];
        let err = Router::new(sample(), interfaces).err().unwrap();
        assert!(matches!(err, RouterError::NotInCatalog(_)));
    }
}
