use crate::bus::{BusHandle, ClientId};
use crate::property::{Property, ProtocolVersion};

/// The client side of the bus contract. Implementors are usually a wire
/// adapter (`indigo-proto-xml`/`indigo-proto-json`) wrapping one connection,
/// but nothing in the bus requires that — an in-process client is just as
/// valid, which is how the test suites in this workspace exercise the bus
/// without opening a socket.
pub trait Client: Send {
    fn name(&self) -> &str;

    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::Current20
    }

    /// Called once when the client attaches, with the id the bus assigned
    /// it (needed for later `enable_blob` calls). The bus follows this with
    /// an `enumerate_properties` pass across every attached device.
    fn attach(&mut self, bus: &BusHandle, id: ClientId);

    fn define_property(&mut self, property: &Property);
    fn update_property(&mut self, property: &Property);

    /// `item` is `None` when an entire property (or device, if `device` is
    /// also absent from context at the call site) was deleted.
    fn delete_property(&mut self, device: &str, property: Option<&str>);

    fn message(&mut self, device: Option<&str>, text: &str);

    fn detach(&mut self, bus: &BusHandle);
}
