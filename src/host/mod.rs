//! Host devices carry HMTL frames to the physical modules.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config;

pub mod proxy;
pub mod serial;
pub use self::proxy::UdpProxy;
pub use self::serial::SerialBus;

/// Connectivity flag of a host, shared with every interface using it.
///
/// Only the host's own connection handling flips it.
#[derive(Clone, Debug)]
pub struct Link(Arc<AtomicBool>);

impl Link {
    pub fn new(up: bool) -> Link {
        Link(Arc::new(AtomicBool::new(up)))
    }

    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, up: bool) {
        self.0.store(up, Ordering::Release);
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host link is down")]
    Disconnected,
    #[error("no confirmation within {0:?}")]
    Timeout(Duration),
    #[error("module refused the message")]
    Rejected,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type HostResult<T> = Result<T, HostError>;

/// Hosts take complete HMTL frames and put them on the wire.
///
/// A host shared by several devices serializes its own writes.
pub trait EffectHost: Send + Sync {
    /// The host's connectivity flag.
    fn link(&self) -> Link;
    /// Put one frame on the wire. Never retries.
    fn transmit(&self, frame: &[u8]) -> HostResult<()>;
}

/// Set up every configured host.
pub fn from_config(
    hosts: &HashMap<String, config::Host>,
) -> io::Result<HashMap<String, Arc<dyn EffectHost>>> {
    let mut effect_hosts: HashMap<String, Arc<dyn EffectHost>> = HashMap::new();

    for (name, host) in hosts {
        let effect_host: Arc<dyn EffectHost> = match host {
            config::Host::Serial {
                path,
                baud,
                timeout_ms,
                confirm,
                ready_timeout_ms,
            } => Arc::new(SerialBus::start(
                name,
                serial::Settings {
                    path: path.clone(),
                    baud: *baud,
                    timeout: Duration::from_millis(*timeout_ms),
                    confirm: *confirm,
                    ready_wait: match *ready_timeout_ms {
                        0 => None,
                        ms => Some(Duration::from_millis(ms)),
                    },
                },
            )?),
            config::Host::Proxy { addr } => Arc::new(UdpProxy::new(addr)?),
        };
        effect_hosts.insert(name.clone(), effect_host);
    }

    Ok(effect_hosts)
}
