use std::fmt;

use crate::property::PropertyError;

/// Errors the bus reports back to a caller. Never a panic: a misbehaving
/// client or device degrades the interaction, not the process.
#[derive(Debug, Eq, PartialEq)]
pub enum BusError {
    UnknownDevice(String),
    UnknownProperty(String, String),
    UnknownClient(u64),
    Property(PropertyError),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::UnknownDevice(name) => write!(f, "unknown device {name:?}"),
            BusError::UnknownProperty(device, name) => {
                write!(f, "unknown property {device:?}.{name:?}")
            }
            BusError::UnknownClient(id) => write!(f, "unknown client {id}"),
            BusError::Property(err) => write!(f, "{err}"),
        }
    }
}

impl From<PropertyError> for BusError {
    fn from(err: PropertyError) -> Self {
        BusError::Property(err)
    }
}

pub type BusResult<T> = Result<T, BusError>;
