pub mod blob;
pub mod bus;
pub mod client;
pub mod device;
pub mod error;
pub mod property;
pub mod selector;

pub use bus::{Bus, BusHandle, ClientId};
pub use client::Client;
pub use device::{BlobMode, Device, EnableBlobRecord, InterfaceMask, PropertyChange};
pub use error::{BusError, BusResult};
pub use property::{Item, ItemValue, Perm, Property, PropertyError, PropertyKind, PropertyState, ProtocolVersion, SwitchRule};
pub use selector::Selector;
