//! Observable per-control state, kept up to date from command results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam::channel::{self, Receiver, Sender};
use log::debug;
use serde_json::Value;

use super::ClientHandler;
use crate::catalog::{key_from_value, Address, Catalog};
use crate::envelope::{CommandResult, Envelope};

/// Last known state of one control.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    /// Last value the server accepted (the catalog default until then).
    pub value: Value,
    /// Message of the last failed command, cleared by the next success.
    pub last_error: Option<String>,
}

/// Notification that a control's state changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub device: Address,
    pub control: String,
    pub state: ControlState,
}

type Key = (Address, String);

/// State of every control in the catalog.
///
/// Clones share the same state, so one clone can be registered as a handler
/// while another drives the view.
#[derive(Clone)]
pub struct ViewState {
    controls: Arc<Mutex<HashMap<Key, ControlState>>>,
    changes: Sender<Change>,
}

impl ViewState {
    /// Start every control at its catalog default.
    pub fn new(catalog: &Catalog) -> (ViewState, Receiver<Change>) {
        let mut controls = HashMap::new();
        for device in catalog.devices() {
            for control in &device.controls {
                controls.insert(
                    (device.address.clone(), control.id.clone()),
                    ControlState {
                        value: control.default.clone(),
                        last_error: None,
                    },
                );
            }
        }

        let (changes, receiver) = channel::unbounded();
        let state = ViewState {
            controls: Arc::new(Mutex::new(controls)),
            changes,
        };
        (state, receiver)
    }

    pub fn get(&self, device: &Address, control: &str) -> Option<ControlState> {
        self.lock()
            .get(&(device.clone(), control.to_string()))
            .cloned()
    }

    /// Fold a command result into the control it was for.
    pub fn apply(&self, result: &CommandResult) {
        let device = result.opts.get("device_address").and_then(Address::from_value);
        let control = result.opts.get("control_id").and_then(key_from_value);
        let key = match (device, control) {
            (Some(device), Some(control)) => (device, control),
            _ => {
                debug!("[client] Result without a device/control echo: {}", result.msg);
                return;
            }
        };

        let state = {
            let mut controls = self.lock();
            let state = match controls.get_mut(&key) {
                Some(state) => state,
                None => {
                    debug!("[client] Result for unknown control {}/{}", key.0, key.1);
                    return;
                }
            };

            if result.is_ok() {
                if let Some(value) = result.opts.get("value") {
                    state.value = value.clone();
                }
                state.last_error = None;
            } else {
                state.last_error = Some(result.msg.clone());
            }
            state.clone()
        };

        // Nobody listening is fine.
        self.changes
            .send(Change {
                device: key.0,
                control: key.1,
                state,
            })
            .ok();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, ControlState>> {
        match self.controls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ClientHandler for ViewState {
    fn process(&mut self, envelope: &Envelope) {
        match CommandResult::from_envelope(envelope) {
            Some(result) => self.apply(&result),
            None => debug!("[client] {} sent something that isn't a result", envelope.handler),
        }
    }
}
