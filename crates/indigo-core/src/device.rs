use crate::bus::BusHandle;
use crate::selector::Selector;

/// Bitmask of the device roles a driver advertises, carried so clients can
/// filter device lists by capability (mount/ccd/focuser/...). The exact set
/// of interfaces is open-ended in the original system; we model it as an
/// opaque bitmask rather than an exhaustive enum so new driver kinds never
/// require a breaking change here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceMask(pub u64);

/// A `change` requested by a client against one of the device's properties.
/// The bus has already validated the target property exists; the device
/// only needs to decide whether it accepts the requested values.
#[derive(Debug, Clone)]
pub struct PropertyChange {
    pub property: String,
    pub text_items: Vec<(String, String)>,
    pub number_items: Vec<(String, f64)>,
    pub switch_items: Vec<(String, bool)>,
}

/// Record describing a client's current BLOB delivery preference, scoped by
/// an optional device and an optional property name within it (see
/// `BlobMode`). `device: None` means "every device"; `property: None` means
/// "every property of the matching device(s)".
#[derive(Debug, Clone)]
pub struct EnableBlobRecord {
    pub device: Option<String>,
    pub property: Option<String>,
    pub mode: BlobMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobMode {
    /// BLOB-typed properties of matching device/name are suppressed outright.
    Never,
    /// BLOB values are sent inline alongside any other changed properties.
    Also,
    /// Only BLOB-typed properties are sent; non-BLOB properties are suppressed.
    Only,
    /// BLOB values are sent as a `/blob/<handle><format>` reference with no
    /// inline payload; the client fetches the bytes over HTTP on demand.
    Url,
}

/// The device side of the bus contract (see spec C7). Implementors own a
/// piece of hardware or simulated hardware; the bus serializes every call
/// into one device behind that device's own mutex, so method bodies may
/// assume exclusive access to `&mut self`.
pub trait Device: Send {
    fn name(&self) -> &str;

    fn interface(&self) -> InterfaceMask {
        InterfaceMask::default()
    }

    /// Called once when the device is registered with the bus. Expected to
    /// define at least one property before returning.
    fn attach(&mut self, bus: &BusHandle);

    /// Re-announce matching properties, in response to a client's
    /// `getProperties` request.
    fn enumerate_properties(&mut self, bus: &BusHandle, selector: &Selector);

    /// A client's requested change to one of this device's properties.
    fn change_property(&mut self, bus: &BusHandle, change: PropertyChange);

    /// A client updated its BLOB delivery policy. Most devices ignore this;
    /// it exists for devices that only start generating BLOB content when at
    /// least one client wants it.
    fn enable_blob(&mut self, _bus: &BusHandle, _record: EnableBlobRecord) {}

    /// Called once when the device is being removed from the bus. Expected
    /// to delete its own properties; the bus deletes any it left behind.
    fn detach(&mut self, bus: &BusHandle);
}
