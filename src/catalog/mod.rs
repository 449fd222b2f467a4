//! The device catalog: every known device and the controls it exposes.
//!
//! The catalog is a JSON array of devices. It is loaded once at startup,
//! handed to the browser as-is to build its view, and used to build the
//! command router.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

mod value;
pub use self::value::{ControlValue, InvalidValue};

/// Prefix used when the catalog is written as a browser script.
const SCRIPT_PREFIX: &str = "window.devices";

/// Opaque, stable device identifier.
///
/// Catalogs may spell addresses as strings or integers; both forms end up
/// as the same canonical string.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new<S: Into<String>>(address: S) -> Address {
        Address(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an address from a loosely typed JSON value.
    pub fn from_value(value: &Value) -> Option<Address> {
        key_from_value(value).map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Address {
        Address(address.to_owned())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_key(deserializer).map(Address)
    }
}

/// Turn a string or integer JSON value into an identifier string.
pub(crate) fn key_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(num) if num.is_i64() || num.is_u64() => Some(num.to_string()),
        _ => None,
    }
}

fn deserialize_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    key_from_value(&value)
        .ok_or_else(|| serde::de::Error::custom("expected a string or integer identifier"))
}

/// What kind of widget a control is, and so what values it accepts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum ControlType {
    /// On/off.
    Switch,
    /// Trigger with an integer parameter, bounded by `min..=max`.
    ExecuteWithIntegerValue,
    /// Colour picked in HSL, delivered as "r,g,b".
    HslColorPickerRgbOutput,
    /// Anything else. Values are passed through untouched.
    Other(String),
}

impl ControlType {
    pub fn as_str(&self) -> &str {
        match self {
            ControlType::Switch => "switch",
            ControlType::ExecuteWithIntegerValue => "execute_with_integer_value",
            ControlType::HslColorPickerRgbOutput => "hsl_color_picker_rgb_output",
            ControlType::Other(name) => name,
        }
    }

    /// Does this control type carry `min`/`max` bounds?
    pub fn is_ranged(&self) -> bool {
        matches!(self, ControlType::ExecuteWithIntegerValue)
    }
}

impl From<String> for ControlType {
    fn from(name: String) -> ControlType {
        match name.as_str() {
            "switch" => ControlType::Switch,
            "execute_with_integer_value" => ControlType::ExecuteWithIntegerValue,
            "hsl_color_picker_rgb_output" => ControlType::HslColorPickerRgbOutput,
            _ => ControlType::Other(name),
        }
    }
}

impl From<ControlType> for String {
    fn from(kind: ControlType) -> String {
        kind.as_str().to_owned()
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single actuatable parameter on a device.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ControlDescriptor {
    /// Unique within the owning device.
    #[serde(deserialize_with = "deserialize_key")]
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ControlType,
    /// Initial value shown by the view.
    #[serde(default)]
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An addressable effect unit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DeviceDescriptor {
    pub address: Address,
    pub name: String,
    pub controls: Vec<ControlDescriptor>,
}

impl DeviceDescriptor {
    /// Look up a control by id.
    pub fn control(&self, id: &str) -> Option<&ControlDescriptor> {
        self.controls.iter().find(|control| control.id == id)
    }
}

/// Errors found while loading a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unable to read catalog: {0}")]
    Io(#[from] io::Error),
    #[error("malformed catalog: {0}")]
    Json(#[from] serde_json::Error),
    #[error("device with an empty address")]
    EmptyAddress,
    #[error("duplicate device address {0}")]
    DuplicateAddress(Address),
    #[error("device {0} has a control with an empty id")]
    EmptyControlId(Address),
    #[error("device {device} has duplicate control id {control}")]
    DuplicateControl { device: Address, control: String },
    #[error("control {device}/{control} needs both min and max")]
    MissingBounds { device: Address, control: String },
    #[error("control {device}/{control} has min {min} above max {max}")]
    InvertedBounds { device: Address, control: String, min: i64, max: i64 },
    #[error("control {device}/{control} default {default} is not an integer in {min}..={max}")]
    InvalidDefault { device: Address, control: String, default: Value, min: i64, max: i64 },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Every known device, in catalog order.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct Catalog {
    devices: Vec<DeviceDescriptor>,
}

impl Catalog {
    /// Build a catalog from already parsed descriptors.
    pub fn new(devices: Vec<DeviceDescriptor>) -> CatalogResult<Catalog> {
        let catalog = Catalog { devices };
        catalog.check()?;
        Ok(catalog)
    }

    /// Read a catalog file.
    pub fn load<T: AsRef<Path>>(path: T) -> CatalogResult<Catalog> {
        let file = fs::File::open(path)?;
        Self::from_reader(io::BufReader::new(file))
    }

    pub fn from_reader<R: Read>(mut reader: R) -> CatalogResult<Catalog> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::from_str(&text)
    }

    /// Parse a catalog from either a plain JSON array or the browser script
    /// form (`window.devices = [...];`).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> CatalogResult<Catalog> {
        let devices: Vec<DeviceDescriptor> = serde_json::from_str(strip_script(text))?;
        Self::new(devices)
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn device(&self, address: &Address) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|device| &device.address == address)
    }

    /// The catalog as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.devices)
    }

    /// The catalog as a script defining `window.devices`.
    pub fn to_script(&self) -> serde_json::Result<String> {
        Ok(format!("{} =\n{};\n", SCRIPT_PREFIX, self.to_json()?))
    }

    fn check(&self) -> CatalogResult<()> {
        let mut addresses = HashSet::new();

        for device in &self.devices {
            if device.address.as_str().is_empty() {
                return Err(CatalogError::EmptyAddress);
            }
            if !addresses.insert(&device.address) {
                return Err(CatalogError::DuplicateAddress(device.address.clone()));
            }

            let mut ids = HashSet::new();
            for control in &device.controls {
                if control.id.is_empty() {
                    return Err(CatalogError::EmptyControlId(device.address.clone()));
                }
                if !ids.insert(control.id.as_str()) {
                    return Err(CatalogError::DuplicateControl {
                        device: device.address.clone(),
                        control: control.id.clone(),
                    });
                }
                if control.kind.is_ranged() {
                    check_bounds(&device.address, control)?;
                }
            }
        }

        Ok(())
    }
}

/// Ranged controls need `min <= default <= max`.
fn check_bounds(device: &Address, control: &ControlDescriptor) -> CatalogResult<()> {
    let (min, max) = match (control.min, control.max) {
        (Some(min), Some(max)) => (min, max),
        _ => {
            return Err(CatalogError::MissingBounds {
                device: device.clone(),
                control: control.id.clone(),
            })
        }
    };

    if min > max {
        return Err(CatalogError::InvertedBounds {
            device: device.clone(),
            control: control.id.clone(),
            min,
            max,
        });
    }

    match control.default.as_i64() {
        Some(default) if (min..=max).contains(&default) => Ok(()),
        _ => Err(CatalogError::InvalidDefault {
            device: device.clone(),
            control: control.id.clone(),
            default: control.default.clone(),
            min,
            max,
        }),
    }
}

fn strip_script(text: &str) -> &str {
    let trimmed = text.trim();
    let body = match trimmed.strip_prefix(SCRIPT_PREFIX) {
        Some(rest) => rest.trim_start().trim_start_matches('=').trim_start(),
        None => trimmed,
    };
    body.trim_end().trim_end_matches(';')
}
