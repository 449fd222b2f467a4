use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::Address;

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    /// Server configuration.
    pub server: Server,
    /// Path to the device catalog.
    pub catalog: PathBuf,
    /// Log at debug level.
    #[serde(default)]
    pub debug: bool,
    /// Physical transports, by name.
    #[serde(default)]
    pub hosts: HashMap<String, Host>,
    /// How each catalog device is wired up, by device address.
    #[serde(default)]
    pub devices: HashMap<Address, DeviceBinding>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Host address to serve the catalog and WebSocket on.
    pub web_addr: String,
    /// Path of the command WebSocket.
    #[serde(default = "default_command_path")]
    pub command_path: String,
}

fn default_command_path() -> String {
    "/command".to_string()
}

/// Host device configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Host {
    /// HMTL module on a serial port.
    #[serde(rename_all = "camelCase")]
    Serial {
        /// Path to a serial device. Without one, frames are only logged.
        path: Option<String>,
        #[serde(default = "default_baud")]
        baud: u32,
        /// How long to wait for a frame to go out (and be confirmed).
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        /// Wait for the module's "ok" after each frame.
        #[serde(default)]
        confirm: bool,
        /// How long a freshly opened port may take to say "ready". 0 skips the wait.
        #[serde(default = "default_ready_timeout_ms")]
        ready_timeout_ms: u64,
    },
    /// Another HMTL command server, reached over UDP.
    Proxy {
        // Target UDP address.
        addr: String,
    },
}

fn default_baud() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

/// Device family, selecting which interface drives a device.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Light,
    Fire,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBinding {
    pub family: Family,
    /// Host the device hangs off. Without one the device can't transmit.
    #[serde(default)]
    pub host: Option<String>,
    /// HMTL module address. Defaults to the device address when numeric.
    #[serde(default)]
    pub hmtl_address: Option<u16>,
    /// Control id -> HMTL output number. Defaults to the control id when numeric.
    #[serde(default)]
    pub outputs: HashMap<String, u8>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config: {0}")]
    Io(#[from] io::Error),
    #[error("malformed YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("malformed JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("device {device} refers to invalid host: {host}")]
    UnknownHost { device: Address, host: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

pub fn read_config_yaml<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    let file = fs::File::open(path)?;
    let root: Root = serde_yaml::from_reader(io::BufReader::new(file))?;
    check(root)
}

pub fn read_config_json<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    let file = fs::File::open(path)?;
    let root: Root = serde_json::from_reader(io::BufReader::new(file))?;
    check(root)
}

/// Read a config file, picking the format from its extension.
pub fn read_config<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => read_config_json(path),
        _ => read_config_yaml(path),
    }
}

/// Quick sanity check for the configuration.
fn check(root: Root) -> ConfigResult<Root> {
    for (address, binding) in &root.devices {
        if let Some(host) = &binding.host {
            // Devices should refer to a valid host.
            if !root.hosts.contains_key(host) {
                return Err(ConfigError::UnknownHost {
                    device: address.clone(),
                    host: host.clone(),
                });
            }
        }
    }

    Ok(root)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
server:
  webAddr: "127.0.0.1:4567"
catalog: ./devices.json
hosts:
  bus:
    type: serial
    path: /dev/ttyUSB0
    timeoutMs: 250
    confirm: true
  relay:
    type: proxy
    addr: "10.0.0.2:6000"
devices:
  12:
    family: fire
    host: bus
    outputs:
      "1": 3
  "25":
    family: light
"#;

    fn write_temp(suffix: &str, text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_yaml() {
        let file = write_temp(".yaml", SAMPLE);
        let root = read_config(file.path()).unwrap();
        assert_eq!("/command", root.server.command_path);
        assert!(!root.debug);
        match &root.hosts["bus"] {
            Host::Serial { path, baud, timeout_ms, confirm, ready_timeout_ms } => {
                assert_eq!(Some("/dev/ttyUSB0"), path.as_deref());
                assert_eq!(9600, *baud);
                assert_eq!(250, *timeout_ms);
                assert!(*confirm);
                assert_eq!(10_000, *ready_timeout_ms);
            }
            other => panic!("unexpected host {:?}", other),
        }
        let fire = &root.devices[&Address::from("12")];
        assert_eq!(Family::Fire, fire.family);
        assert_eq!(Some(3), fire.outputs.get("1").copied());
        let light = &root.devices[&Address::from("25")];
        assert_eq!(Family::Light, light.family);
        assert!(light.host.is_none());
    }

    #[test]
    fn test_read_json() {
        let file = write_temp(
            ".json",
            r#"{"server": {"webAddr": "0.0.0.0:80", "commandPath": "/ws"},
                "catalog": "devices.json",
                "devices": {"3": {"family": "light"}}}"#,
        );
        let root = read_config(file.path()).unwrap();
        assert_eq!("/ws", root.server.command_path);
        assert!(root.hosts.is_empty());
    }

    #[test]
    fn test_unknown_host() {
        let file = write_temp(
            ".yaml",
            "server: {webAddr: \"0.0.0.0:80\"}\ncatalog: d.json\ndevices:\n  \"1\": {family: fire, host: nope}\n",
        );
        let err = read_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownHost { host, .. } if host == "nope"));
    }
}
