//! Drives one TCP connection speaking the XML dialect: a `Client` impl that
//! serializes bus callbacks onto the connection's write half, paired with a
//! blocking read loop that feeds the parser and turns completed elements
//! into bus calls.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use slog::Logger;

use indigo_core::{BlobMode, Bus, BusHandle, Client, ClientId, EnableBlobRecord, Property, PropertyKind, ProtocolVersion, Selector};

use crate::message::{InboundMessage, OutboundMessage};
use crate::parser::Parser;
use crate::translate::{element_to_inbound, property_to_vector, vector_to_change};
use crate::writer::write_outbound;

static NEXT_CONN_NAME: AtomicU64 = AtomicU64::new(0);

pub struct XmlClientAdapter {
    name: String,
    writer: Mutex<Box<dyn Write + Send>>,
    bus: Arc<Bus>,
    client_id: Mutex<Option<ClientId>>,
    /// Locked in by the first `getProperties`; `None` until then (spec §6.4).
    version: Mutex<Option<ProtocolVersion>>,
    log: Logger,
}

impl XmlClientAdapter {
    pub fn new(writer: Box<dyn Write + Send>, bus: Arc<Bus>, log: Logger) -> XmlClientAdapter {
        let name = format!("xml-client-{}", NEXT_CONN_NAME.fetch_add(1, Ordering::Relaxed));
        XmlClientAdapter {
            name,
            writer: Mutex::new(writer),
            bus,
            client_id: Mutex::new(None),
            version: Mutex::new(None),
            log,
        }
    }

    /// XML defaults BLOB delivery to suppressed for current clients; legacy
    /// 1.7 clients default to `also` (spec §6.4).
    fn blob_mode(&self, device: &str, property: &str) -> BlobMode {
        let default_mode = match *self.version.lock().expect("version mutex poisoned") {
            Some(ProtocolVersion::Legacy17) => BlobMode::Also,
            _ => BlobMode::Never,
        };
        match *self.client_id.lock().expect("client id mutex poisoned") {
            Some(id) => self.bus.blob_mode_for(id, device, property, default_mode),
            None => default_mode,
        }
    }

    /// Locks in the connection's protocol version from a `getProperties`
    /// `version` attribute. Returns `Err` if the version string is neither
    /// `1.7` nor `2.0`, in which case the caller rejects the client and
    /// closes the connection (spec §6.4). A client that never sends a
    /// version, or repeats the same one, is left/kept unchanged.
    fn negotiate_version(&self, raw: Option<&str>) -> Result<(), ()> {
        let Some(raw) = raw else {
            return Ok(());
        };
        let parsed = match raw {
            "1.7" => ProtocolVersion::Legacy17,
            "2.0" => ProtocolVersion::Current20,
            _ => return Err(()),
        };
        *self.version.lock().expect("version mutex poisoned") = Some(parsed);
        Ok(())
    }

    fn emit(&self, message: OutboundMessage) {
        let mut writer = self.writer.lock().expect("xml writer mutex poisoned");
        if let Err(err) = write_outbound(&mut *writer, &message) {
            slog::warn!(self.log, "failed writing xml message"; "error" => %err);
        }
    }

    fn emit_property(&self, property: &Property, verb: fn(crate::message::DefOrSetVector) -> OutboundMessage) {
        let mode = self.blob_mode(&property.device, &property.name);
        if property.kind != PropertyKind::Blob && mode == BlobMode::Only {
            // A client in "only" mode wants nothing but this device's BLOBs.
            return;
        }
        let mut vector = property_to_vector(property);
        if property.kind == PropertyKind::Blob {
            if mode == BlobMode::Never {
                return;
            }
            for (item, raw) in property.items().iter().zip(vector.items.iter_mut()) {
                if let indigo_core::ItemValue::Blob { format, .. } = &item.value {
                    let key = (property.device.clone(), property.name.clone(), item.name.clone());
                    let Some(entry) = self.bus.blobs().get_by_key(&key) else {
                        continue;
                    };
                    if mode == BlobMode::Url {
                        raw.text = format!("/blob/{:x}{}", entry.handle, format);
                    } else {
                        let (_, bytes) = entry.content();
                        raw.text = BASE64.encode(bytes);
                    }
                }
            }
        }
        self.emit(verb(vector));
    }
}

impl Client for XmlClientAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&mut self, _bus: &BusHandle, id: ClientId) {
        *self.client_id.lock().expect("client id mutex poisoned") = Some(id);
    }

    fn define_property(&mut self, property: &Property) {
        self.emit_property(property, OutboundMessage::Def);
    }

    fn update_property(&mut self, property: &Property) {
        self.emit_property(property, OutboundMessage::Set);
    }

    fn delete_property(&mut self, device: &str, property: Option<&str>) {
        self.emit(OutboundMessage::DelProperty {
            device: device.to_string(),
            property: property.map(str::to_string),
        });
    }

    fn message(&mut self, device: Option<&str>, text: &str) {
        self.emit(OutboundMessage::Message {
            device: device.map(str::to_string),
            text: text.to_string(),
        });
    }

    fn detach(&mut self, _bus: &BusHandle) {}
}

/// Runs the XML dialect over `stream` until the peer disconnects or sends a
/// malformed message, then detaches the client from the bus. Blocks the
/// calling thread — the server spawns one thread per accepted connection.
pub fn serve_xml_connection<S>(mut stream: S, bus: Arc<Bus>, log: Logger) -> io::Result<()>
where
    S: Read + Write + Send + 'static,
    S: TryCloneWrite,
{
    let writer = stream.try_clone_write()?;
    let adapter = Arc::new(Mutex::new(XmlClientAdapter::new(writer, bus.clone(), log.clone())));
    let client_id = bus.attach_client(adapter.clone());

    let mut parser = Parser::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                slog::debug!(log, "xml connection read error"; "error" => %e);
                break;
            }
        };
        parser.feed(&buf[..n]);
        loop {
            match parser.next_element() {
                Ok(Some(element)) => {
                    let inbound = match element_to_inbound(&element) {
                        Ok(inbound) => inbound,
                        Err(_) => continue,
                    };
                    if dispatch_inbound(&bus, &adapter, client_id, inbound, &log) {
                        bus.detach_client(client_id).ok();
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    slog::debug!(log, "malformed xml message, closing connection");
                    bus.detach_client(client_id).ok();
                    return Ok(());
                }
            }
        }
    }
    bus.detach_client(client_id).ok();
    Ok(())
}

/// Returns `true` if the connection should be closed (an unrecognised
/// protocol version was rejected, per spec §6.4).
fn dispatch_inbound(bus: &Arc<Bus>, adapter: &Arc<Mutex<XmlClientAdapter>>, client_id: ClientId, inbound: InboundMessage, log: &Logger) -> bool {
    match inbound {
        InboundMessage::GetProperties { device, property, version } => {
            if adapter.lock().expect("xml adapter mutex poisoned").negotiate_version(version.as_deref()).is_err() {
                let mut guard = adapter.lock().expect("xml adapter mutex poisoned");
                guard.message(None, &format!("unsupported protocol version {:?}", version.unwrap_or_default()));
                return true;
            }
            bus.enumerate_properties(Selector { device, property });
        }
        InboundMessage::NewVector(vector) => {
            let change = vector_to_change(&vector);
            if let Err(err) = bus.change_property(&vector.device, change) {
                slog::debug!(log, "rejected change"; "error" => %err);
            }
        }
        InboundMessage::EnableBlob { device, property, mode } => {
            bus.enable_blob(client_id, EnableBlobRecord { device: Some(device), property, mode }).ok();
        }
    }
    false
}

/// `TcpStream::try_clone` generalized so tests can drive the adapter against
/// an in-memory duplex without a real socket.
pub trait TryCloneWrite {
    fn try_clone_write(&self) -> io::Result<Box<dyn Write + Send>>;
}

impl TryCloneWrite for std::net::TcpStream {
    fn try_clone_write(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.try_clone()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indigo_core::{Item, ItemValue, Perm, PropertyState, ProtocolVersion};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn define_property_serializes_as_def_vector() {
        let bus = Bus::new(test_logger());
        let sink = SharedBuffer::default();
        let mut adapter = XmlClientAdapter::new(Box::new(sink.clone()), bus, test_logger());
        let property = Property::new(
            "mount",
            "MOUNT_PARK",
            "Main",
            "Park",
            PropertyState::Ok,
            Perm::ReadWrite,
            None,
            ProtocolVersion::Current20,
            vec![Item::new("PARKED", "Parked", ItemValue::Switch(false))],
        )
        .unwrap();
        adapter.define_property(&property);
        let written = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(written.starts_with("<defSwitchVector device=\"mount\" name=\"MOUNT_PARK\""));
    }

    #[test]
    fn blob_in_url_mode_emits_a_blob_reference_not_bytes() {
        let bus = Bus::new(test_logger());
        let key = ("ccd".to_string(), "CCD_IMAGE".to_string(), "IMAGE".to_string());
        let handle = bus.blobs().register(key, ".fits".to_string(), None);

        let sink = SharedBuffer::default();
        let adapter = Arc::new(Mutex::new(XmlClientAdapter::new(Box::new(sink.clone()), bus.clone(), test_logger())));
        let client_id = bus.attach_client(adapter.clone());
        bus.enable_blob(
            client_id,
            EnableBlobRecord {
                device: None,
                property: None,
                mode: BlobMode::Url,
            },
        )
        .unwrap();

        let property = Property::new(
            "ccd",
            "CCD_IMAGE",
            "Main",
            "Image",
            PropertyState::Ok,
            Perm::ReadOnly,
            None,
            ProtocolVersion::Current20,
            vec![Item::new("IMAGE", "Image", ItemValue::Blob { format: ".fits".into(), size: 0 })],
        )
        .unwrap();
        adapter.lock().unwrap().define_property(&property);

        let written = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains(&format!("/blob/{:x}.fits", handle)));
    }

    #[test]
    fn legacy_client_defaults_to_also_blob_mode() {
        let bus = Bus::new(test_logger());
        let key = ("ccd".to_string(), "CCD_IMAGE".to_string(), "IMAGE".to_string());
        bus.blobs().register(key, ".fits".to_string(), None);

        let sink = SharedBuffer::default();
        let adapter = Arc::new(Mutex::new(XmlClientAdapter::new(Box::new(sink.clone()), bus.clone(), test_logger())));
        bus.attach_client(adapter.clone());
        adapter.lock().unwrap().negotiate_version(Some("1.7")).unwrap();

        let property = Property::new(
            "ccd",
            "CCD_IMAGE",
            "Main",
            "Image",
            PropertyState::Ok,
            Perm::ReadOnly,
            None,
            ProtocolVersion::Current20,
            vec![Item::new("IMAGE", "Image", ItemValue::Blob { format: ".fits".into(), size: 0 })],
        )
        .unwrap();
        adapter.lock().unwrap().define_property(&property);

        let written = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("<defBLOBVector"));
    }

    #[test]
    fn unrecognised_version_is_rejected_and_closes_the_connection() {
        let bus = Bus::new(test_logger());
        let sink = SharedBuffer::default();
        let adapter = Arc::new(Mutex::new(XmlClientAdapter::new(Box::new(sink.clone()), bus.clone(), test_logger())));
        let client_id = bus.attach_client(adapter.clone());
        let close = dispatch_inbound(
            &bus,
            &adapter,
            client_id,
            InboundMessage::GetProperties {
                device: None,
                property: None,
                version: Some("9.9".to_string()),
            },
            &test_logger(),
        );
        assert!(close);
        let written = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("<message"));
    }
}
