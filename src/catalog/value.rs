//! Checking command values against a control's declared type.

use serde_json::Value;
use thiserror::Error;

use super::{ControlDescriptor, ControlType};

/// A command value that has been checked against its control.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlValue {
    Switch(bool),
    Integer(i64),
    Rgb(u8, u8, u8),
    /// Value for a control type we don't know how to check.
    Raw(Value),
}

/// Why a value was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvalidValue(pub String);

impl ControlDescriptor {
    /// Check a value against this control's type and bounds.
    pub fn validate(&self, value: &Value) -> Result<ControlValue, InvalidValue> {
        match &self.kind {
            ControlType::Switch => parse_switch(value)
                .map(ControlValue::Switch)
                .ok_or_else(|| invalid(format!("{} expects true/false or \"on\"/\"off\"", self.id))),
            ControlType::ExecuteWithIntegerValue => {
                let num = value
                    .as_i64()
                    .ok_or_else(|| invalid(format!("{} expects an integer", self.id)))?;
                let min = self.min.unwrap_or(i64::MIN);
                let max = self.max.unwrap_or(i64::MAX);
                if num < min || num > max {
                    return Err(invalid(format!(
                        "{} is outside {}..={} for {}",
                        num, min, max, self.id
                    )));
                }
                Ok(ControlValue::Integer(num))
            }
            ControlType::HslColorPickerRgbOutput => parse_rgb(value)
                .map(|(r, g, b)| ControlValue::Rgb(r, g, b))
                .ok_or_else(|| invalid(format!("{} expects \"r,g,b\" with 0..=255 channels", self.id))),
            ControlType::Other(_) => {
                if value.is_null() {
                    Err(invalid(format!("{} expects a value", self.id)))
                } else {
                    Ok(ControlValue::Raw(value.clone()))
                }
            }
        }
    }
}

fn invalid(msg: String) -> InvalidValue {
    InvalidValue(msg)
}

fn parse_switch(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(on) => Some(*on),
        Value::String(text) => match text.as_str() {
            "on" => Some(true),
            "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_rgb(value: &Value) -> Option<(u8, u8, u8)> {
    let channels: Vec<u8> = match value {
        Value::String(text) => text
            .split(',')
            .map(|part| part.trim().parse::<u8>().ok())
            .collect::<Option<_>>()?,
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().filter(|c| *c <= 255).map(|c| c as u8))
            .collect::<Option<_>>()?,
        _ => return None,
    };

    match channels.as_slice() {
        [r, g, b] => Some((*r, *g, *b)),
        _ => None,
    }
}
