//! Control panel server for show-effect devices: a catalog of devices and
//! controls, per-device interfaces speaking HMTL to the hardware, and a
//! WebSocket carrying commands and their results.

pub mod catalog;
pub mod client;
pub mod config;
pub mod envelope;
pub mod host;
pub mod interface;
pub mod listener;
pub mod protocol;
pub mod router;
